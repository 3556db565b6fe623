use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::{Credentials, Endpoint, ResolvedConfig};
use crate::domain::DatasetId;
use crate::error::HarvestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadInfo {
    pub bytes: u64,
    pub content_length: Option<u64>,
}

pub trait DatasetSource {
    /// Streams one dataset export to `destination`.
    ///
    /// On error no file is left at `destination`.
    fn download(
        &self,
        id: &DatasetId,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadInfo, HarvestError>;
}

#[derive(Clone)]
pub struct DhisHttpClient {
    client: Client,
    endpoint: Endpoint,
    credentials: Credentials,
    chunk_size: usize,
}

impl DhisHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, HarvestError> {
        let credentials = config.credentials()?.clone();
        Self::with_parts(
            config.endpoint.clone(),
            credentials,
            config.timeout,
            config.chunk_size,
        )
    }

    pub fn with_parts(
        endpoint: Endpoint,
        credentials: Credentials,
        timeout: Duration,
        chunk_size: usize,
    ) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dataset-harvester/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            credentials,
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn query_params(&self, id: &DatasetId) -> Vec<(&'static str, String)> {
        query_params(&self.endpoint, id)
    }

    fn send(&self, id: &DatasetId) -> Result<Response, HarvestError> {
        let response = self
            .client
            .get(&self.endpoint.base_url)
            .query(&self.query_params(id))
            .basic_auth(
                &self.credentials.username,
                Some(self.credentials.password.expose_secret()),
            )
            .send()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Self::handle_status(response)
    }

    fn handle_status(response: Response) -> Result<Response, HarvestError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .status()
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
        Err(HarvestError::Status { status, message })
    }

    fn stream_to_file(
        &self,
        mut response: Response,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64, HarvestError> {
        let mut file =
            File::create(destination).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let mut buffer = vec![0u8; self.chunk_size];
        let mut written = 0u64;
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|err| HarvestError::Http(err.to_string()))?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
            written += read as u64;
            sink.event(ProgressEvent::DownloadAdvanced { bytes: read as u64 });
        }
        file.flush()
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(written)
    }
}

impl DatasetSource for DhisHttpClient {
    fn download(
        &self,
        id: &DatasetId,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadInfo, HarvestError> {
        let response = self.send(id)?;
        let content_length = response.content_length().filter(|length| *length > 0);
        sink.event(ProgressEvent::DownloadStarted {
            id: id.to_string(),
            destination: destination.display().to_string(),
            total_bytes: content_length,
        });

        let result = self.stream_to_file(response, destination, sink);
        sink.event(ProgressEvent::DownloadFinished);
        match result {
            Ok(bytes) => {
                debug!(dataset = %id, bytes, "download complete");
                Ok(DownloadInfo {
                    bytes,
                    content_length,
                })
            }
            Err(err) => {
                if destination.exists() {
                    if let Err(remove_err) = fs::remove_file(destination) {
                        warn!(
                            path = %destination.display(),
                            error = %remove_err,
                            "failed to remove partial download"
                        );
                    }
                }
                Err(err)
            }
        }
    }
}

pub fn query_params(endpoint: &Endpoint, id: &DatasetId) -> Vec<(&'static str, String)> {
    vec![
        ("dataElementIdScheme", "UID".to_string()),
        ("orgUnitIdScheme", "UID".to_string()),
        ("idScheme", "UID".to_string()),
        ("orgUnit", endpoint.org_unit.clone()),
        ("includeDeleted", "false".to_string()),
        ("children", "true".to_string()),
        ("startDate", endpoint.start_date.format("%Y-%m-%d").to_string()),
        ("endDate", endpoint.end_date.format("%Y-%m-%d").to_string()),
        ("dataSet", id.as_str().to_string()),
        ("format", "csv".to_string()),
        ("attachment", "dataValueSets.csv".to_string()),
    ]
}
