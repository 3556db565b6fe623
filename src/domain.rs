use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

static DATASET_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("dataset id pattern is valid")
});

/// Suffix the downloaded file carries before remapping, `{id}_dataSet.csv`.
pub const RAW_FILE_SUFFIX: &str = "_dataSet";

/// Opaque token naming one remote dataset.
///
/// The token ends up in local file names, so anything that could escape the
/// output root (separators, leading dots, whitespace) is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetId(String);

impl DatasetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn raw_file_name(&self) -> String {
        format!("{}{RAW_FILE_SUFFIX}.csv", self.0)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !DATASET_ID_RE.is_match(trimmed) {
            return Err(HarvestError::InvalidDatasetId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for DatasetId {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DatasetId> for String {
    fn from(value: DatasetId) -> Self {
        value.0
    }
}

/// Names derived from a raw file's base name.
///
/// `name` is the file stem, `prefix` is the part of the stem before the first
/// underscore and names the per-dataset output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartNaming {
    pub prefix: String,
    pub name: String,
}

impl PartNaming {
    pub fn from_file_stem(stem: &str) -> Self {
        let prefix = stem.split('_').next().unwrap_or(stem);
        Self {
            prefix: prefix.to_string(),
            name: stem.to_string(),
        }
    }

    pub fn part_file_name(&self, index: usize) -> String {
        format!("{}_part_{index}.csv", self.name)
    }

    pub fn json_file_name(&self) -> String {
        format!("{}.json", self.name)
    }
}

/// Splits dataset list content into candidate identifiers.
///
/// Lines are trimmed and blank lines dropped; validation is left to the caller
/// so one bad line does not reject the whole list.
pub fn dataset_list_entries(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
