// src/database/mod.rs
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::report::VatSummary;
use crate::types::{Certificate, LogServer, Slice};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PostgresBackend;

/// Ordering for slice listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceOrder {
    /// By start index, lowest first (scan order)
    StartAsc,
    /// By end index, highest first (most recent slice first)
    EndDesc,
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("URL already exists in database: {0}")]
    DuplicateUrl(String),

    #[error("URL is too short to be a log server: {0}")]
    InvalidUrl(String),
}

/// Storage backend for servers, slices and certificates
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert a server, or update it when it already carries an id
    async fn upsert_server(&self, server: &LogServer) -> Result<LogServer>;

    async fn find_server(&self, id: i64) -> Result<Option<LogServer>>;

    async fn find_server_by_url(&self, url: &str) -> Result<Option<LogServer>>;

    async fn list_servers(&self) -> Result<Vec<LogServer>>;

    /// Insert a slice, or update it when it already carries an id
    async fn upsert_slice(&self, slice: &Slice) -> Result<Slice>;

    async fn list_slices_by_server(&self, server_id: i64, order: SliceOrder) -> Result<Vec<Slice>>;

    async fn delete_slice(&self, id: i64) -> Result<()>;

    async fn slice_exists(&self, id: i64) -> Result<bool>;

    /// Insert a certificate, or update it when it already carries an id
    async fn upsert_certificate(&self, certificate: &Certificate) -> Result<Certificate>;

    /// Certificates whose VAT search has not completed yet
    async fn list_certificates_not_vat_searched(&self) -> Result<Vec<Certificate>>;

    /// One page of certificates ordered by id
    async fn list_certificates(&self, page: u64, size: u64, vat_only: bool) -> Result<Vec<Certificate>>;

    async fn count_certificates(&self) -> Result<u64>;

    /// Number of certificates per issuer
    async fn count_by_issuer(&self) -> Result<Vec<(String, u64)>>;

    /// Number of certificates per signature algorithm
    async fn count_by_algorithm(&self) -> Result<Vec<(String, u64)>>;

    async fn vat_summary(&self) -> Result<VatSummary>;
}

/// Register a new log server, rejecting URLs that are already known
pub async fn register_server(
    storage: &dyn Storage,
    url: &str,
    nickname: Option<&str>,
) -> Result<LogServer> {
    let server = LogServer::new(url, nickname);

    if server.url.len() < 10 {
        return Err(RegistrationError::InvalidUrl(server.url).into());
    }

    if storage.find_server_by_url(&server.url).await?.is_some() {
        return Err(RegistrationError::DuplicateUrl(server.url).into());
    }

    let saved = storage.upsert_server(&server).await?;
    info!("Registered log server {}", saved);

    Ok(saved)
}
