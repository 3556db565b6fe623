use std::io::{self, Write};
use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RunResult};
use crate::remap::RemapOutcome;
use crate::store::ResetReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_reset(result: &ResetReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_remap(result: &RemapOutcome) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Terminal progress: a byte bar per download, a row bar per remap pass.
#[derive(Default)]
pub struct BarProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn replace(&self, bar: Option<ProgressBar>) {
        if let Ok(mut current) = self.bar.lock() {
            if let Some(previous) = current.take() {
                previous.finish_and_clear();
            }
            *current = bar;
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(current) = self.bar.lock() {
            if let Some(bar) = current.as_ref() {
                f(bar);
            }
        }
    }
}

impl ProgressSink for BarProgress {
    fn event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::DownloadStarted {
                destination,
                total_bytes,
                ..
            } => {
                let bar = match total_bytes {
                    Some(total) => {
                        let bar = ProgressBar::new(total);
                        bar.set_style(bytes_style());
                        bar
                    }
                    None => {
                        let bar = ProgressBar::new_spinner();
                        bar.set_style(spinner_style());
                        bar
                    }
                };
                bar.set_message(destination);
                self.replace(Some(bar));
            }
            ProgressEvent::DownloadAdvanced { bytes } => self.with_bar(|bar| bar.inc(bytes)),
            ProgressEvent::RemapStarted { total_rows, .. } => {
                let bar = ProgressBar::new(total_rows);
                bar.set_style(rows_style());
                bar.set_message("Updating CSV");
                self.replace(Some(bar));
            }
            ProgressEvent::RemapAdvanced { rows } => self.with_bar(|bar| bar.inc(rows)),
            ProgressEvent::PartWritten { path, records } => {
                self.with_bar(|bar| bar.println(format!("wrote {path} ({records} rows)")));
            }
            ProgressEvent::DownloadFinished | ProgressEvent::RemapFinished => self.replace(None),
        }
    }
}

fn bytes_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg} {bytes} ({bytes_per_sec})")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn rows_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg} [{bar:40.green/white}] {pos}/{len} rows ({per_sec})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}
