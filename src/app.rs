use std::fs::{self, OpenOptions};
use std::io::Write;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{RemapRule, ResolvedConfig};
use crate::domain::{DatasetId, dataset_list_entries};
use crate::error::HarvestError;
use crate::fetch::DatasetSource;
use crate::remap::{RemapOutcome, Remapper};
use crate::store::{ResetReport, Store};

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    DownloadStarted {
        id: String,
        destination: String,
        total_bytes: Option<u64>,
    },
    DownloadAdvanced {
        bytes: u64,
    },
    DownloadFinished,
    RemapStarted {
        source: String,
        total_rows: u64,
    },
    RemapAdvanced {
        rows: u64,
    },
    RemapFinished,
    PartWritten {
        path: String,
        records: usize,
    },
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Per-dataset lifecycle. `FetchFailed`, `RemapFailed` and `Done` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetState {
    Pending,
    Fetching,
    FetchFailed,
    Fetched,
    Remapping,
    RemapFailed,
    Done,
}

impl DatasetState {
    pub fn as_str(self) -> &'static str {
        match self {
            DatasetState::Pending => "pending",
            DatasetState::Fetching => "fetching",
            DatasetState::FetchFailed => "fetch_failed",
            DatasetState::Fetched => "fetched",
            DatasetState::Remapping => "remapping",
            DatasetState::RemapFailed => "remap_failed",
            DatasetState::Done => "done",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, DatasetState::FetchFailed | DatasetState::RemapFailed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub id: String,
    pub state: DatasetState,
    pub bytes: Option<u64>,
    pub content_length: Option<u64>,
    pub latency_ms: Option<u128>,
    pub outcome: Option<RemapOutcome>,
    pub error: Option<String>,
}

impl DatasetReport {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: DatasetState::Pending,
            bytes: None,
            content_length: None,
            latency_ms: None,
            outcome: None,
            error: None,
        }
    }

    fn transition(&mut self, state: DatasetState) {
        info!(dataset = %self.id, from = self.state.as_str(), to = state.as_str(), "state");
        self.state = state;
    }

    fn fail(&mut self, state: DatasetState, err: &HarvestError) {
        error!(dataset = %self.id, error = %err, "{}", state.as_str());
        self.error = Some(err.to_string());
        self.state = state;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub reset: ResetReport,
    pub datasets: Vec<DatasetReport>,
    pub finished_at: String,
}

impl RunResult {
    pub fn succeeded(&self) -> usize {
        self.datasets
            .iter()
            .filter(|report| report.state == DatasetState::Done)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.datasets
            .iter()
            .filter(|report| report.state.is_failure())
            .count()
    }

    pub fn parts_written(&self) -> usize {
        self.datasets
            .iter()
            .filter_map(|report| report.outcome.as_ref())
            .map(|outcome| outcome.parts.len())
            .sum()
    }
}

/// Append-only log of identifiers whose download failed.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: Utf8PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn record_failure(&self, id: &str) -> Result<(), HarvestError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("open {}: {err}", self.path)))?;
        writeln!(file, "Error downloading dataset ID: {id}")
            .map_err(|err| HarvestError::Filesystem(format!("append {}: {err}", self.path)))
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub reset_keep: Vec<String>,
    pub remap: RemapRule,
    pub part_threshold: u64,
    pub export_json: bool,
}

impl RunOptions {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            reset_keep: config.reset_keep.clone(),
            remap: config.remap.clone(),
            part_threshold: config.part_threshold,
            export_json: config.export_json,
        }
    }
}

pub struct App<S: DatasetSource> {
    store: Store,
    source: S,
    error_log: ErrorLog,
    options: RunOptions,
}

impl<S: DatasetSource> App<S> {
    pub fn new(store: Store, source: S, error_log: ErrorLog, options: RunOptions) -> Self {
        Self {
            store,
            source,
            error_log,
            options,
        }
    }

    /// Resets the output root once, then processes every entry in order.
    ///
    /// Per-dataset failures end up in the returned reports; only a failure to
    /// prepare the output root aborts the run.
    pub fn run(
        &self,
        entries: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<RunResult, HarvestError> {
        let reset = self.store.reset(&self.options.reset_keep)?;
        let datasets = entries
            .iter()
            .map(|entry| self.process(entry, sink))
            .collect();
        Ok(RunResult {
            reset,
            datasets,
            finished_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn remapper(&self) -> Remapper<'_> {
        Remapper::new(
            &self.store,
            &self.options.remap,
            self.options.part_threshold,
        )
        .export_json(self.options.export_json)
    }

    fn process(&self, entry: &str, sink: &dyn ProgressSink) -> DatasetReport {
        let mut report = DatasetReport::new(entry);

        let id = match entry.parse::<DatasetId>() {
            Ok(id) => id,
            Err(err) => {
                report.fail(DatasetState::FetchFailed, &err);
                self.log_failure(entry);
                return report;
            }
        };

        report.transition(DatasetState::Fetching);
        let raw_path = self.store.raw_path(&id);
        let start = Instant::now();
        match self.source.download(&id, raw_path.as_std_path(), sink) {
            Ok(info) => {
                report.bytes = Some(info.bytes);
                report.content_length = info.content_length;
                if let Some(expected) = info
                    .content_length
                    .filter(|length| *length != info.bytes)
                {
                    warn!(dataset = %id, expected, received = info.bytes, "length mismatch");
                }
                report.latency_ms = Some(start.elapsed().as_millis());
                report.transition(DatasetState::Fetched);
            }
            Err(err) => {
                report.fail(DatasetState::FetchFailed, &err);
                self.log_failure(id.as_str());
                return report;
            }
        }

        report.transition(DatasetState::Remapping);
        match self.remapper().process(raw_path.as_std_path(), id.as_str(), sink) {
            Ok(outcome) => {
                report.outcome = Some(outcome);
                report.transition(DatasetState::Done);
            }
            Err(err) => {
                report.fail(DatasetState::RemapFailed, &err);
            }
        }
        report
    }

    fn log_failure(&self, id: &str) {
        if let Err(err) = self.error_log.record_failure(id) {
            warn!(log = %self.error_log.path(), error = %err, "failed to append error log");
        }
    }
}

/// Reads the dataset list, one identifier per line.
pub fn read_dataset_list(path: &Utf8Path) -> Result<Vec<String>, HarvestError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|_| HarvestError::DatasetListRead(path.as_std_path().to_path_buf()))?;
    Ok(dataset_list_entries(&content))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::Path;

    use super::*;
    use crate::fetch::DownloadInfo;
    use crate::output::JsonOutput;

    #[derive(Default)]
    struct RecordingSource {
        calls: RefCell<Vec<String>>,
    }

    impl DatasetSource for RecordingSource {
        fn download(
            &self,
            id: &DatasetId,
            destination: &Path,
            _sink: &dyn ProgressSink,
        ) -> Result<DownloadInfo, HarvestError> {
            self.calls.borrow_mut().push(id.to_string());
            let body = "id,categoryoptioncombo,attributeoptioncombo\n1,c6PwdArn3fZ,x\n";
            fs::write(destination, body).unwrap();
            Ok(DownloadInfo {
                bytes: body.len() as u64,
                content_length: None,
            })
        }
    }

    #[test]
    fn invalid_identifier_is_logged_without_download() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("downloads")).unwrap();
        let log = Utf8PathBuf::from_path_buf(temp.path().join("errors.log")).unwrap();
        let app = App::new(
            Store::new(root),
            RecordingSource::default(),
            ErrorLog::new(log.clone()),
            RunOptions {
                reset_keep: Vec::new(),
                remap: RemapRule::default(),
                part_threshold: 1024,
                export_json: false,
            },
        );

        let result = app
            .run(&["../escape".to_string(), "ok1".to_string()], &JsonOutput)
            .unwrap();

        assert_eq!(*app.source.calls.borrow(), vec!["ok1".to_string()]);
        assert_eq!(result.datasets[0].state, DatasetState::FetchFailed);
        assert_eq!(result.datasets[1].state, DatasetState::Done);
        let content = fs::read_to_string(log.as_std_path()).unwrap();
        assert_eq!(content, "Error downloading dataset ID: ../escape\n");
    }
}
