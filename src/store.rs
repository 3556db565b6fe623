use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::domain::{DatasetId, PartNaming};
use crate::error::HarvestError;

/// Layout of the output root:
///
/// ```text
/// {root}/{id}_dataSet.csv                    raw download, removed after remapping
/// {root}/{prefix}/csv/{name}_part_{N}.csv    size-bounded parts
/// {root}/{prefix}/json/{name}.json           optional dataValueSet export
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    output_root: Utf8PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResetReport {
    pub removed: Vec<String>,
    pub kept: Vec<String>,
    pub failed: Vec<ResetFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetFailure {
    pub path: String,
    pub error: String,
}

impl Store {
    pub fn new(output_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn raw_path(&self, id: &DatasetId) -> Utf8PathBuf {
        self.output_root.join(id.raw_file_name())
    }

    pub fn dataset_dir(&self, naming: &PartNaming) -> Utf8PathBuf {
        self.output_root.join(&naming.prefix)
    }

    pub fn csv_dir(&self, naming: &PartNaming) -> Utf8PathBuf {
        self.dataset_dir(naming).join("csv")
    }

    pub fn json_path(&self, naming: &PartNaming) -> Utf8PathBuf {
        self.dataset_dir(naming)
            .join("json")
            .join(naming.json_file_name())
    }

    pub fn ensure_output_root(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.output_root.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    }

    /// Removes every file and directory under the output root except names in
    /// `keep`. Per-entry failures are reported, not returned.
    pub fn reset(&self, keep: &[String]) -> Result<ResetReport, HarvestError> {
        self.ensure_output_root()?;
        let entries = fs::read_dir(self.output_root.as_std_path()).map_err(|err| {
            HarvestError::Filesystem(format!("read {}: {err}", self.output_root))
        })?;

        let mut report = ResetReport::default();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(root = %self.output_root, error = %err, "failed to read entry");
                    report.failed.push(ResetFailure {
                        path: self.output_root.to_string(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            let path = entry.path();
            let shown = path.display().to_string();
            let name = entry.file_name().to_string_lossy().into_owned();
            if keep.iter().any(|kept| *kept == name) {
                report.kept.push(shown);
                continue;
            }

            let is_dir = entry
                .file_type()
                .map(|file_type| file_type.is_dir())
                .unwrap_or(false);
            let result = if is_dir {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => {
                    debug!(path = %shown, "deleted");
                    report.removed.push(shown);
                }
                Err(err) => {
                    warn!(path = %shown, error = %err, "failed to delete");
                    report.failed.push(ResetFailure {
                        path: shown,
                        error: err.to_string(),
                    });
                }
            }
        }
        report.removed.sort();
        report.kept.sort();
        report.failed.sort_by(|a, b| a.path.cmp(&b.path));
        info!(
            root = %self.output_root,
            removed = report.removed.len(),
            kept = report.kept.len(),
            failed = report.failed.len(),
            "output root reset"
        );
        Ok(report)
    }

    /// Writes `content` through a temp file in the target directory so a
    /// reader never sees a half-written file.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
        let temp = Self::temp_file_for(path)?;
        fs::write(temp.path(), content).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Self::persist(temp, path)
    }

    pub fn temp_file_for(path: &Utf8Path) -> Result<NamedTempFile, HarvestError> {
        let parent = path
            .parent()
            .ok_or_else(|| HarvestError::Filesystem(format!("invalid destination {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        tempfile::Builder::new()
            .prefix(".harvest")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    }

    pub fn persist(temp: NamedTempFile, path: &Utf8Path) -> Result<(), HarvestError> {
        temp.persist(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("persist {path}: {}", err.error)))?;
        Ok(())
    }
}
