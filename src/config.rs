use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use directories::ProjectDirs;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

pub const DEFAULT_CONFIG_FILE: &str = "harvester.json";
pub const DEFAULT_BASE_URL: &str = "https://ima-assp.org/api/dataValueSets";
pub const DEFAULT_ORG_UNIT: &str = "s7ZjqzKnWsJ";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_PART_THRESHOLD: u64 = 5 * 1024 * 1024;

const ENV_USERNAME: &str = "HARVEST_USERNAME";
const ENV_PASSWORD: &str = "HARVEST_PASSWORD";
const ENV_BASE_URL: &str = "HARVEST_BASE_URL";

/// On-disk config. Every field is optional; `ConfigLoader` fills the gaps.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub org_unit: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub part_threshold_bytes: Option<u64>,
    #[serde(default)]
    pub output_root: Option<String>,
    #[serde(default)]
    pub datasets_file: Option<String>,
    #[serde(default)]
    pub error_log: Option<String>,
    #[serde(default)]
    pub reset_keep: Option<Vec<String>>,
    #[serde(default)]
    pub export_json: Option<bool>,
    #[serde(default)]
    pub remap: Option<RemapRule>,
}

/// Sentinel rewrite applied to a pair of designated columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapRule {
    #[serde(default = "default_remap_columns")]
    pub columns: Vec<String>,
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
    #[serde(default = "default_replacement")]
    pub replacement: String,
}

impl Default for RemapRule {
    fn default() -> Self {
        Self {
            columns: default_remap_columns(),
            sentinel: default_sentinel(),
            replacement: default_replacement(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub base_url: String,
    pub org_unit: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub endpoint: Endpoint,
    pub credentials: Option<Credentials>,
    pub timeout: Duration,
    pub chunk_size: usize,
    pub part_threshold: u64,
    pub output_root: Utf8PathBuf,
    pub datasets_file: Utf8PathBuf,
    pub error_log: Utf8PathBuf,
    pub reset_keep: Vec<String>,
    pub export_json: bool,
    pub remap: RemapRule,
}

impl ResolvedConfig {
    pub fn credentials(&self) -> Result<&Credentials, HarvestError> {
        self.credentials
            .as_ref()
            .ok_or(HarvestError::MissingCredentials)
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Result<Self, HarvestError> {
        if let Some(path) = overrides.datasets_file {
            self.datasets_file = path;
        }
        if let Some(path) = overrides.output_root {
            self.output_root = path;
        }
        if let Some(threshold) = overrides.part_threshold {
            if threshold == 0 {
                return Err(HarvestError::InvalidConfig(
                    "part threshold must be greater than zero".to_string(),
                ));
            }
            self.part_threshold = threshold;
        }
        if overrides.export_json {
            self.export_json = true;
        }
        Ok(self)
    }
}

/// Command-line values that win over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub datasets_file: Option<Utf8PathBuf>,
    pub output_root: Option<Utf8PathBuf>,
    pub part_threshold: Option<u64>,
    pub export_json: bool,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let mut config = match Self::locate(path) {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
                serde_json::from_str::<Config>(&content)
                    .map_err(|err| HarvestError::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };

        apply_env(&mut config);
        Self::resolve_config(config)
    }

    fn locate(path: Option<&str>) -> Option<PathBuf> {
        if let Some(path) = path {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("", "", "dataset-harvester")
            .map(|dirs| dirs.config_dir().join(DEFAULT_CONFIG_FILE))
            .filter(|candidate| candidate.exists())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HarvestError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let start_date = config.start_date.unwrap_or_else(default_start_date);
        let end_date = config.end_date.unwrap_or_else(default_end_date);
        if start_date > end_date {
            return Err(HarvestError::InvalidConfig(format!(
                "start_date {start_date} is after end_date {end_date}"
            )));
        }

        let base_url = config
            .base_url
            .map(|value| value.trim().to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(HarvestError::InvalidConfig(format!(
                "base_url must be an http(s) URL: {base_url}"
            )));
        }

        let credentials = match (config.username, config.password) {
            (Some(username), Some(password)) if !username.trim().is_empty() => Some(Credentials {
                username: username.trim().to_string(),
                password,
            }),
            _ => None,
        };

        let chunk_size = config.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(HarvestError::InvalidConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        let part_threshold = config.part_threshold_bytes.unwrap_or(DEFAULT_PART_THRESHOLD);
        if part_threshold == 0 {
            return Err(HarvestError::InvalidConfig(
                "part_threshold_bytes must be greater than zero".to_string(),
            ));
        }

        let remap = config.remap.unwrap_or_default();
        validate_remap(&remap)?;

        Ok(ResolvedConfig {
            schema_version,
            endpoint: Endpoint {
                base_url,
                org_unit: config
                    .org_unit
                    .unwrap_or_else(|| DEFAULT_ORG_UNIT.to_string()),
                start_date,
                end_date,
            },
            credentials,
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            chunk_size,
            part_threshold,
            output_root: Utf8PathBuf::from(
                config.output_root.unwrap_or_else(|| "downloads".to_string()),
            ),
            datasets_file: Utf8PathBuf::from(
                config
                    .datasets_file
                    .unwrap_or_else(|| "dataSets.txt".to_string()),
            ),
            error_log: Utf8PathBuf::from(
                config.error_log.unwrap_or_else(|| "errors.log".to_string()),
            ),
            reset_keep: config.reset_keep.unwrap_or_else(default_reset_keep),
            export_json: config.export_json.unwrap_or(false),
            remap,
        })
    }
}

fn apply_env(config: &mut Config) {
    if let Some(username) = env_value(ENV_USERNAME) {
        config.username = Some(username);
    }
    if let Some(password) = env_value(ENV_PASSWORD) {
        config.password = Some(SecretString::from(password));
    }
    if let Some(base_url) = env_value(ENV_BASE_URL) {
        config.base_url = Some(base_url);
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn validate_remap(rule: &RemapRule) -> Result<(), HarvestError> {
    match rule.columns.as_slice() {
        [first, second] if first != second && !first.is_empty() && !second.is_empty() => {}
        _ => {
            return Err(HarvestError::InvalidConfig(
                "remap.columns must name exactly two distinct columns".to_string(),
            ));
        }
    }
    if rule.sentinel.is_empty() {
        return Err(HarvestError::InvalidConfig(
            "remap.sentinel must not be empty".to_string(),
        ));
    }
    Ok(())
}

pub fn default_remap_columns() -> Vec<String> {
    vec![
        "categoryoptioncombo".to_string(),
        "attributeoptioncombo".to_string(),
    ]
}

fn default_sentinel() -> String {
    "c6PwdArn3fZ".to_string()
}

fn default_replacement() -> String {
    "HllvX50cXC0".to_string()
}

pub fn default_reset_keep() -> Vec<String> {
    vec![".gitignore".to_string()]
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2013, 1, 1).unwrap_or_default()
}

fn default_end_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 8, 31).unwrap_or_default()
}
