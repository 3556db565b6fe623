use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid dataset identifier: {0:?}")]
    InvalidDatasetId(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing credentials: set HARVEST_USERNAME and HARVEST_PASSWORD or add them to the config file")]
    #[diagnostic(help("credentials are never compiled in"))]
    MissingCredentials,

    #[error("failed to read dataset list at {0}")]
    DatasetListRead(PathBuf),

    #[error("request failed: {0}")]
    Http(String),

    #[error("server returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("csv error: {0}")]
    Csv(String),
}
