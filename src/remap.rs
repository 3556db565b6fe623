use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use csv::ReaderBuilder;
use serde::Serialize;
use serde::ser::{SerializeMap, SerializeSeq};
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::chunk::ChunkedWriter;
use crate::config::RemapRule;
use crate::domain::PartNaming;
use crate::error::HarvestError;
use crate::store::Store;

/// Positions of the two designated columns in a header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnPair {
    pub first: Option<usize>,
    pub second: Option<usize>,
}

impl ColumnPair {
    pub fn locate(rule: &RemapRule, headers: &[String]) -> Self {
        let find = |name: Option<&String>| {
            name.and_then(|name| headers.iter().position(|header| header == name))
        };
        Self {
            first: find(rule.columns.first()),
            second: find(rule.columns.get(1)),
        }
    }
}

/// Rewrites both designated columns when either holds the sentinel.
///
/// Columns absent from the header read as empty and are never written.
pub fn remap_record(rule: &RemapRule, pair: ColumnPair, record: &mut [String]) -> bool {
    let value = |index: Option<usize>| {
        index
            .and_then(|index| record.get(index))
            .map(String::as_str)
            .unwrap_or("")
    };
    if value(pair.first) != rule.sentinel && value(pair.second) != rule.sentinel {
        return false;
    }
    for index in [pair.first, pair.second].into_iter().flatten() {
        if let Some(field) = record.get_mut(index) {
            field.clone_from(&rule.replacement);
        }
    }
    true
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RemapOutcome {
    pub rows: u64,
    pub remapped: u64,
    pub parts: Vec<String>,
    pub json_path: Option<String>,
}

pub struct Remapper<'a> {
    store: &'a Store,
    rule: &'a RemapRule,
    threshold: u64,
    export_json: bool,
}

impl<'a> Remapper<'a> {
    pub fn new(store: &'a Store, rule: &'a RemapRule, threshold: u64) -> Self {
        Self {
            store,
            rule,
            threshold,
            export_json: false,
        }
    }

    pub fn export_json(mut self, enabled: bool) -> Self {
        self.export_json = enabled;
        self
    }

    /// Remaps a file already on disk; the dataset is named after the file's
    /// prefix.
    pub fn process_file(
        &self,
        source: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<RemapOutcome, HarvestError> {
        let data_set = source
            .file_stem()
            .map(|stem| PartNaming::from_file_stem(&stem.to_string_lossy()).prefix)
            .unwrap_or_default();
        self.process(source, &data_set, sink)
    }

    /// Remaps `source` into part files and deletes it once done.
    ///
    /// `data_set` names the dataset in the optional JSON export.
    pub fn process(
        &self,
        source: &Path,
        data_set: &str,
        sink: &dyn ProgressSink,
    ) -> Result<RemapOutcome, HarvestError> {
        let stem = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| {
                HarvestError::Filesystem(format!("no file name in {}", source.display()))
            })?;
        let naming = PartNaming::from_file_stem(&stem);

        let total_rows = count_records(source)?;
        sink.event(ProgressEvent::RemapStarted {
            source: source.display().to_string(),
            total_rows,
        });
        let mut written = Vec::new();
        let result = self.rewrite(source, &naming, data_set, sink, &mut written);
        sink.event(ProgressEvent::RemapFinished);
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                self.discard(&naming, &written);
                return Err(err);
            }
        };

        fs::remove_file(source).map_err(|err| {
            HarvestError::Filesystem(format!("remove {}: {err}", source.display()))
        })?;
        info!(
            source = %source.display(),
            rows = outcome.rows,
            remapped = outcome.remapped,
            parts = outcome.parts.len(),
            "remapped dataset"
        );
        Ok(outcome)
    }

    /// Removes parts written by a failed pass, then the directories it left empty.
    fn discard(&self, naming: &PartNaming, written: &[Utf8PathBuf]) {
        for path in written {
            match fs::remove_file(path.as_std_path()) {
                Ok(()) => debug!(part = %path, "removed part of failed remap"),
                Err(err) => warn!(part = %path, error = %err, "failed to remove part"),
            }
        }
        for dir in [self.store.csv_dir(naming), self.store.dataset_dir(naming)] {
            // fails on non-empty directories, which stay
            if fs::remove_dir(dir.as_std_path()).is_ok() {
                debug!(dir = %dir, "removed empty directory");
            }
        }
    }

    fn rewrite(
        &self,
        source: &Path,
        naming: &PartNaming,
        data_set: &str,
        sink: &dyn ProgressSink,
        written: &mut Vec<Utf8PathBuf>,
    ) -> Result<RemapOutcome, HarvestError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(source)
            .map_err(|err| HarvestError::Csv(err.to_string()))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|err| HarvestError::Csv(err.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        let pair = ColumnPair::locate(self.rule, &headers);
        if pair.first.is_none() || pair.second.is_none() {
            debug!(
                source = %source.display(),
                columns = ?self.rule.columns,
                "designated column missing from header"
            );
        }

        let mut writer = ChunkedWriter::new(
            self.store.csv_dir(naming),
            naming.clone(),
            headers.clone(),
            self.threshold,
        );
        let mut exported = Vec::new();
        let mut outcome = RemapOutcome::default();

        for result in reader.records() {
            let record = result.map_err(|err| HarvestError::Csv(err.to_string()))?;
            if record.len() > headers.len() {
                warn!(
                    line = record.position().map(|pos| pos.line()),
                    extra = record.len() - headers.len(),
                    "dropping fields beyond header"
                );
            }
            let mut fields: Vec<String> = record
                .iter()
                .take(headers.len())
                .map(str::to_string)
                .collect();
            fields.resize(headers.len(), String::new());

            if remap_record(self.rule, pair, &mut fields) {
                outcome.remapped += 1;
            }
            outcome.rows += 1;
            if self.export_json {
                exported.push(fields.clone());
            }
            if let Some(part) = writer.push(fields)? {
                sink.event(ProgressEvent::PartWritten {
                    path: part.path.to_string(),
                    records: part.records,
                });
                outcome.parts.push(part.path.to_string());
                written.push(part.path);
            }
            sink.event(ProgressEvent::RemapAdvanced { rows: 1 });
        }

        if let Some(part) = writer.finish()? {
            sink.event(ProgressEvent::PartWritten {
                path: part.path.to_string(),
                records: part.records,
            });
            outcome.parts.push(part.path.to_string());
            written.push(part.path);
        }

        if self.export_json && !exported.is_empty() {
            let path = self.store.json_path(naming);
            write_data_value_set(&path, data_set, &headers, &exported)?;
            outcome.json_path = Some(path.into_string());
        }

        Ok(outcome)
    }
}

/// Counts data records; used only to size the progress bar.
pub fn count_records(path: &Path) -> Result<u64, HarvestError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|err| HarvestError::Csv(err.to_string()))?;
    let mut record = csv::ByteRecord::new();
    let mut count = 0u64;
    while reader
        .read_byte_record(&mut record)
        .map_err(|err| HarvestError::Csv(err.to_string()))?
    {
        count += 1;
    }
    Ok(count)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DataValueSet<'a> {
    data_set: &'a str,
    data_values: Rows<'a>,
}

struct Rows<'a> {
    headers: &'a [String],
    rows: &'a [Vec<String>],
}

struct Row<'a> {
    headers: &'a [String],
    values: &'a [String],
}

impl Serialize for Rows<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for values in self.rows {
            seq.serialize_element(&Row {
                headers: self.headers,
                values,
            })?;
        }
        seq.end()
    }
}

impl Serialize for Row<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.headers.len()))?;
        for (header, value) in self.headers.iter().zip(self.values) {
            map.serialize_entry(header, value)?;
        }
        map.end()
    }
}

fn write_data_value_set(
    path: &Utf8Path,
    data_set: &str,
    headers: &[String],
    rows: &[Vec<String>],
) -> Result<(), HarvestError> {
    let document = DataValueSet {
        data_set,
        data_values: Rows { headers, rows },
    };
    let content = serde_json::to_vec_pretty(&document)
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    Store::write_bytes_atomic(path, &content)
}
