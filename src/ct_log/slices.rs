// src/ct_log/slices.rs
//! Partitioning of a log's index space into resumable slices

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::client::CtLogClient;
use crate::database::{SliceOrder, Storage};
use crate::types::{LogServer, Slice};

/// Creates and reclaims the slices of each log server
pub struct SliceManager {
    storage: Arc<dyn Storage>,
    slice_size: u64,
}

impl SliceManager {
    pub fn new(storage: Arc<dyn Storage>, slice_size: u64) -> Self {
        Self {
            storage,
            slice_size: slice_size.max(1),
        }
    }

    /// Reclaim consumed slices, extend coverage to the current log size, and
    /// return every slice of the server ordered by start index
    pub async fn prepare(&self, server: &LogServer, client: &CtLogClient) -> Result<Vec<Slice>> {
        let reclaimed = self.reclaim_consumed_slices(server).await?;
        let created = self.compute_slices(server, client).await?;
        info!(
            "{}: reclaimed {} slices, created {}",
            server.nickname,
            reclaimed,
            created.len()
        );

        self.storage
            .list_slices_by_server(server.id(), SliceOrder::StartAsc)
            .await
    }

    /// Create slices from the last known end up to the log's current size.
    /// A failed size query creates nothing.
    pub async fn compute_slices(&self, server: &LogServer, client: &CtLogClient) -> Result<Vec<Slice>> {
        let size = match client.tree_size().await {
            Ok(size) => size,
            Err(e) => {
                warn!("{}: failed to get log size: {}", server.nickname, e);
                0
            }
        };

        self.extend_to(server, size).await
    }

    /// Create the slices covering `[watermark, size)`
    pub async fn extend_to(&self, server: &LogServer, size: u64) -> Result<Vec<Slice>> {
        let existing = self
            .storage
            .list_slices_by_server(server.id(), SliceOrder::EndDesc)
            .await?;
        let mut start = existing.first().map(|s| s.end + 1).unwrap_or(0);

        let mut created = Vec::new();
        while start < size {
            let end = (start + self.slice_size - 1).min(size - 1);
            let slice = self
                .storage
                .upsert_slice(&Slice::new(server.id(), start, end))
                .await?;
            debug!("{}: created {}", server.nickname, slice);
            created.push(slice);
            start = end + 1;
        }

        Ok(created)
    }

    /// Delete consumed slices, always keeping the most recent one as the
    /// resume watermark. Returns the number deleted.
    pub async fn reclaim_consumed_slices(&self, server: &LogServer) -> Result<usize> {
        let slices = self
            .storage
            .list_slices_by_server(server.id(), SliceOrder::EndDesc)
            .await?;

        let mut deleted = 0;
        for slice in slices.iter().skip(1).filter(|s| s.is_consumed()) {
            if let Some(id) = slice.id {
                self.storage.delete_slice(id).await?;
                deleted += 1;
            }
        }

        Ok(deleted)
    }
}
