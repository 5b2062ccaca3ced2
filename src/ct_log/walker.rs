// src/ct_log/walker.rs
//! Page-by-page download of one slice

use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::client::CtLogClient;
use crate::database::Storage;
use crate::pipeline::pool::{Interrupt, PoolError};
use crate::stats::StatsCollector;
use crate::types::{LogEntry, LogServer, Slice};

/// Receives downloaded entries for decoding
pub trait EntrySink: Send + Sync {
    fn submit(&self, entry: LogEntry) -> Result<(), PoolError>;
}

/// How a walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    /// The cursor moved past the slice end
    Completed,
    /// The slice pool was interrupted
    Interrupted,
    /// The decode stage stopped accepting entries
    SinkClosed,
}

/// Walks a slice from its cursor to its end
pub struct SliceWalker<'a> {
    pub client: &'a CtLogClient,
    pub storage: &'a dyn Storage,
    pub sink: &'a dyn EntrySink,
    pub stats: &'a StatsCollector,
    pub page_size: u64,
    pub retry_delay: Duration,
}

impl SliceWalker<'_> {
    /// Download every remaining page of `slice`. After each page is handed
    /// off, the cursor and then the server are persisted.
    pub async fn walk(&self, server: &LogServer, mut slice: Slice, interrupt: &Interrupt) -> Result<WalkOutcome> {
        info!("{}: walking {}", server.nickname, slice);
        let page_size = self.page_size.max(1);

        while !slice.is_consumed() {
            if interrupt.is_raised() {
                return Ok(WalkOutcome::Interrupted);
            }

            let start = slice.next;
            let end = (start + page_size - 1).min(slice.end);

            let fetched = tokio::select! {
                _ = interrupt.raised() => return Ok(WalkOutcome::Interrupted),
                fetched = self.client.get_entries(start, end) => fetched,
            };

            match fetched {
                Ok(raw_entries) => {
                    self.stats.add_fetched(raw_entries.len() as u64);
                    let received = raw_entries.len() as u64;

                    for (offset, raw) in raw_entries.iter().enumerate() {
                        let index = start + offset as u64;
                        match LogEntry::from_raw(index, raw) {
                            Ok(entry) => {
                                if let Err(e) = self.sink.submit(entry) {
                                    warn!("{}: stopping walk at {}: {}", server.nickname, start, e);
                                    return Ok(WalkOutcome::SinkClosed);
                                }
                            }
                            Err(e) => {
                                warn!("{}: dropping entry {}: {}", server.nickname, index, e);
                                self.stats.increment_malformed();
                            }
                        }
                    }

                    // Logs may cap the batch below the requested window
                    if received > 0 && received < end - start + 1 {
                        slice.advance_to(start + received);
                    } else {
                        slice.advance_to(end + 1);
                    }
                }
                Err(e) if e.is_timeout() => {
                    warn!("{}: {}, retrying from {}", server.nickname, e, start);
                    tokio::select! {
                        _ = interrupt.raised() => return Ok(WalkOutcome::Interrupted),
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                    continue;
                }
                Err(e) => {
                    warn!("{}: {}, skipping entries {}-{}", server.nickname, e, start, end);
                    slice.advance_to(end + 1);
                }
            }

            slice = self.storage.upsert_slice(&slice).await?;
            self.storage.upsert_server(server).await?;
            debug!("{}: {}", server.nickname, slice);
        }

        info!("{}: finished {}", server.nickname, slice);
        Ok(WalkOutcome::Completed)
    }
}
