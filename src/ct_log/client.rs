// src/ct_log/client.rs
use anyhow::{Context, Result};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{GetEntriesResponse, RawLogEntry, SignedTreeHead};
use crate::types::normalize_server_url;

/// Failure of a single CT log request
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} answered with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to parse response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Timeouts are the only failure retried at an unchanged cursor
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }

    fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        let url = url.to_string();
        if e.is_timeout() {
            FetchError::Timeout { url }
        } else if e.is_decode() {
            FetchError::Decode { url, source: e }
        } else {
            FetchError::Transport { url, source: e }
        }
    }
}

/// HTTP client for Certificate Transparency log RFC 6962 API
#[derive(Clone)]
pub struct CtLogClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl CtLogClient {
    /// Create a new CT log client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: normalize_server_url(base_url),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get Signed Tree Head (current log size and timestamp)
    /// Endpoint: GET {base_url}ct/v1/get-sth
    pub async fn get_sth(&self) -> Result<SignedTreeHead, FetchError> {
        let url = format!("{}ct/v1/get-sth", self.base_url);

        debug!("Fetching STH from {}", url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { url, status, body });
        }

        let sth: SignedTreeHead = response
            .json()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e))?;

        debug!(
            "STH received: tree_size={}, timestamp={}",
            sth.tree_size, sth.timestamp
        );

        Ok(sth)
    }

    /// Current number of entries in the log
    pub async fn tree_size(&self) -> Result<u64, FetchError> {
        Ok(self.get_sth().await?.tree_size)
    }

    /// Get entries from CT log, both bounds inclusive
    /// Endpoint: GET {base_url}ct/v1/get-entries?start={start}&end={end}
    pub async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<RawLogEntry>, FetchError> {
        let url = format!(
            "{}ct/v1/get-entries?start={}&end={}",
            self.base_url, start, end
        );

        debug!("Fetching entries {}-{} from {}", start, end, self.base_url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                warn!("Rate limited by CT log: {}", self.base_url);
            }

            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let entries_response: GetEntriesResponse = response
            .json()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e))?;

        debug!(
            "Received {} entries from {}",
            entries_response.entries.len(),
            self.base_url
        );

        Ok(entries_response.entries)
    }
}
