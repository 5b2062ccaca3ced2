// src/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A Certificate Transparency log server registered for harvesting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogServer {
    /// Storage-assigned id, `None` until first persisted
    pub id: Option<i64>,
    /// Base URL, always ending with '/'
    pub url: String,
    pub nickname: String,
}

impl LogServer {
    /// Create an unsaved server. The URL gets a trailing slash and the
    /// nickname defaults to the URL.
    pub fn new(url: &str, nickname: Option<&str>) -> Self {
        let url = normalize_server_url(url);
        let nickname = match nickname {
            Some(n) if !n.trim().is_empty() => n.trim().to_string(),
            _ => url.clone(),
        };

        Self {
            id: None,
            url,
            nickname,
        }
    }

    /// Id of a persisted server; unsaved servers report 0
    pub fn id(&self) -> i64 {
        self.id.unwrap_or_default()
    }
}

impl fmt::Display for LogServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.nickname, self.url)
    }
}

/// Append the trailing slash that the CT endpoints are joined onto
pub fn normalize_server_url(url: &str) -> String {
    let url = url.trim();
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

/// A contiguous index range over one log, with a resume cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    pub id: Option<i64>,
    pub server_id: i64,
    /// First index of the range (inclusive)
    pub start: u64,
    /// Last index of the range (inclusive)
    pub end: u64,
    /// Next index to fetch
    pub next: u64,
}

impl Slice {
    pub fn new(server_id: i64, start: u64, end: u64) -> Self {
        Self {
            id: None,
            server_id,
            start,
            end,
            next: start,
        }
    }

    /// A slice is consumed once its cursor moved past its end
    pub fn is_consumed(&self) -> bool {
        self.next > self.end
    }

    /// Move the cursor forward; it never goes backward
    pub fn advance_to(&mut self, next: u64) {
        self.next = self.next.max(next);
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slice #{} [{}..={}] next={} server={}",
            self.id.unwrap_or_default(),
            self.start,
            self.end,
            self.next,
            self.server_id
        )
    }
}

/// One downloaded log entry with its binary payloads already base64-decoded
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub index: u64,
    pub leaf: Vec<u8>,
    pub chain: Vec<u8>,
}

/// A decoded certificate for a domain in the allow-list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub id: Option<i64>,
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub signature_algorithm: String,
    pub version: u32,
    /// Hex SHA-256 of the DER body
    pub fingerprint: String,
    pub vat: Option<String>,
    pub vat_searched: bool,
}

impl Certificate {
    /// Close out the VAT search. A found VAT implies the search happened.
    pub fn record_vat_search(&mut self, vat: Option<String>) {
        self.vat = vat;
        self.vat_searched = true;
    }

    /// Coarse VAT status used by reports
    pub fn vat_status(&self) -> VatStatus {
        match (&self.vat, self.vat_searched) {
            (Some(_), _) => VatStatus::Found,
            (None, true) => VatStatus::NotFound,
            (None, false) => VatStatus::NotSearched,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VatStatus {
    Found,
    NotFound,
    NotSearched,
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (issuer: {})", self.subject, self.issuer)?;
        if let Some(ref vat) = self.vat {
            write!(f, " [VAT {}]", vat)?;
        }
        Ok(())
    }
}
