// src/pipeline/mod.rs
//! Four worker pools wired into a download → decode → scrape pipeline
//!
//! - server pool (one worker): prepares the slices of a log server and
//!   resumes pending VAT searches
//! - slice pool: walks one slice per task
//! - decode pool: decodes one entry per task
//! - scrape pool: crawls one certificate's website per task
//!
//! Pools are spawned on first use. Each holds only a weak reference back to
//! the pipeline, so dropping the last `Arc<Pipeline>` lets queued work go.

pub mod pool;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::cert_parser::{CertificateDecoder, DecodeOutcome};
use crate::config::{Config, DownloadConfig, PipelineConfig};
use crate::ct_log::{CtLogClient, EntrySink, SliceManager, SliceWalker, WalkOutcome};
use crate::database::Storage;
use crate::stats::StatsCollector;
use crate::types::{Certificate, LogEntry, LogServer, Slice};
use crate::vat::{CrawlOutcome, VatCrawler};

pub use pool::{Interrupt, PoolError, PoolState, TaskHandler, WorkerPool};

/// Unit of work for any of the pools
pub enum Task {
    ScanServer(LogServer),
    ResumeVatSearches,
    WalkSlice {
        client: CtLogClient,
        server: LogServer,
        slice: Slice,
    },
    DecodeEntry(LogEntry),
    ScrapeCertificate(Certificate),
}

impl Task {
    fn kind(&self) -> &'static str {
        match self {
            Task::ScanServer(_) => "scan-server",
            Task::ResumeVatSearches => "resume-vat-searches",
            Task::WalkSlice { .. } => "walk-slice",
            Task::DecodeEntry(_) => "decode-entry",
            Task::ScrapeCertificate(_) => "scrape-certificate",
        }
    }
}

/// State of each pool; `None` when the pool was never started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStatus {
    pub server: Option<PoolState>,
    pub slice: Option<PoolState>,
    pub decode: Option<PoolState>,
    pub scrape: Option<PoolState>,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |state: Option<PoolState>| match state {
            Some(state) => state.to_string(),
            None => "idle".to_string(),
        };
        write!(
            f,
            "servers: {} | slices: {} | decode: {} | scrape: {}",
            show(self.server),
            show(self.slice),
            show(self.decode),
            show(self.scrape)
        )
    }
}

pub struct Pipeline {
    storage: Arc<dyn Storage>,
    download: DownloadConfig,
    sizes: PipelineConfig,
    decoder: CertificateDecoder,
    crawler: VatCrawler,
    stats: StatsCollector,
    dispatcher: Arc<dyn TaskHandler<Task>>,
    server_pool: OnceLock<WorkerPool<Task>>,
    slice_pool: OnceLock<WorkerPool<Task>>,
    decode_pool: OnceLock<WorkerPool<Task>>,
    scrape_pool: OnceLock<WorkerPool<Task>>,
}

impl Pipeline {
    pub fn new(config: &Config, storage: Arc<dyn Storage>) -> Result<Arc<Self>> {
        let crawler = VatCrawler::new(&config.crawler)?;
        let decoder = CertificateDecoder::new(config.decoder.allowed_suffixes.clone());

        Ok(Arc::new_cyclic(|pipeline: &Weak<Pipeline>| Self {
            storage,
            download: config.download.clone(),
            sizes: config.pipeline.clone(),
            decoder,
            crawler,
            stats: StatsCollector::new(),
            dispatcher: Arc::new(Dispatcher {
                pipeline: pipeline.clone(),
            }),
            server_pool: OnceLock::new(),
            slice_pool: OnceLock::new(),
            decode_pool: OnceLock::new(),
            scrape_pool: OnceLock::new(),
        }))
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    /// Queue a scan of `server`: reclaim and extend its slices, then walk them
    pub fn scan_server(&self, server: LogServer) -> Result<(), PoolError> {
        self.server_pool().submit(Task::ScanServer(server))
    }

    /// Queue a VAT search for every certificate not searched yet
    pub fn resume_vat_searches(&self) -> Result<(), PoolError> {
        self.server_pool().submit(Task::ResumeVatSearches)
    }

    /// Drain the server pool and interrupt the slice pool
    pub fn stop_downloading(&self) {
        self.server_pool().shutdown_graceful();
        self.slice_pool().shutdown_now();
    }

    /// Drain the decode pool and interrupt the scrape pool
    pub fn stop_processing(&self) {
        self.decode_pool().shutdown_graceful();
        self.scrape_pool().shutdown_now();
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            server: self.server_pool.get().map(WorkerPool::state),
            slice: self.slice_pool.get().map(WorkerPool::state),
            decode: self.decode_pool.get().map(WorkerPool::state),
            scrape: self.scrape_pool.get().map(WorkerPool::state),
        }
    }

    /// Wait until every started pool has nothing queued or running. Stages
    /// are awaited in pipeline order, so work handed downstream is covered.
    pub async fn wait_idle(&self) {
        for pool in self.pools() {
            if let Some(pool) = pool.get() {
                pool.wait_idle().await;
            }
        }
    }

    /// Wait for the workers of every started pool to exit. Only returns
    /// once each of them was stopped.
    pub async fn join(&self) {
        for pool in self.pools() {
            if let Some(pool) = pool.get() {
                pool.join().await;
            }
        }
    }

    fn pools(&self) -> [&OnceLock<WorkerPool<Task>>; 4] {
        [
            &self.server_pool,
            &self.slice_pool,
            &self.decode_pool,
            &self.scrape_pool,
        ]
    }

    fn server_pool(&self) -> &WorkerPool<Task> {
        self.server_pool
            .get_or_init(|| WorkerPool::spawn("server", 1, self.dispatcher.clone()))
    }

    fn slice_pool(&self) -> &WorkerPool<Task> {
        self.slice_pool.get_or_init(|| {
            WorkerPool::spawn("slice", self.sizes.slice_workers, self.dispatcher.clone())
        })
    }

    fn decode_pool(&self) -> &WorkerPool<Task> {
        self.decode_pool.get_or_init(|| {
            WorkerPool::spawn("decode", self.sizes.decode_workers, self.dispatcher.clone())
        })
    }

    fn scrape_pool(&self) -> &WorkerPool<Task> {
        self.scrape_pool.get_or_init(|| {
            WorkerPool::spawn("scrape", self.sizes.scrape_workers, self.dispatcher.clone())
        })
    }

    async fn run_task(&self, task: Task, interrupt: &Interrupt) {
        match task {
            Task::ScanServer(server) => {
                if let Err(e) = self.prepare_server(&server).await {
                    error!("{}: scan failed: {:#}", server.nickname, e);
                }
            }
            Task::ResumeVatSearches => {
                if let Err(e) = self.queue_pending_searches().await {
                    error!("Failed to resume VAT searches: {:#}", e);
                }
            }
            Task::WalkSlice {
                client,
                server,
                slice,
            } => {
                if let Err(e) = self.walk_slice(&client, &server, slice, interrupt).await {
                    error!("{}: slice walk failed: {:#}", server.nickname, e);
                }
            }
            Task::DecodeEntry(entry) => self.decode_entry(entry).await,
            Task::ScrapeCertificate(certificate) => {
                self.scrape_certificate(certificate, interrupt).await
            }
        }
    }

    async fn prepare_server(&self, server: &LogServer) -> Result<()> {
        let client = CtLogClient::new(
            &server.url,
            Duration::from_secs(self.download.request_timeout_secs),
        )?;
        let manager = SliceManager::new(Arc::clone(&self.storage), self.download.slice_size);

        let pending: Vec<Slice> = manager
            .prepare(server, &client)
            .await?
            .into_iter()
            .filter(|slice| !slice.is_consumed())
            .collect();

        info!("{}: {} slices to walk", server.nickname, pending.len());

        for slice in pending {
            self.slice_pool().submit(Task::WalkSlice {
                client: client.clone(),
                server: server.clone(),
                slice,
            })?;
        }

        Ok(())
    }

    async fn queue_pending_searches(&self) -> Result<()> {
        let pending = self.storage.list_certificates_not_vat_searched().await?;
        info!("Resuming VAT search for {} certificates", pending.len());

        for certificate in pending {
            self.scrape_pool()
                .submit(Task::ScrapeCertificate(certificate))?;
        }

        Ok(())
    }

    async fn walk_slice(
        &self,
        client: &CtLogClient,
        server: &LogServer,
        slice: Slice,
        interrupt: &Interrupt,
    ) -> Result<()> {
        if let Some(id) = slice.id {
            if !self.storage.slice_exists(id).await? {
                debug!("{}: {} no longer exists", server.nickname, slice);
                return Ok(());
            }
        }

        let walker = SliceWalker {
            client,
            storage: self.storage.as_ref(),
            sink: self,
            stats: &self.stats,
            page_size: self.download.page_size,
            retry_delay: Duration::from_millis(self.download.retry_delay_ms),
        };

        match walker.walk(server, slice, interrupt).await? {
            WalkOutcome::Completed => {}
            WalkOutcome::Interrupted => debug!("{}: slice walk interrupted", server.nickname),
            WalkOutcome::SinkClosed => debug!("{}: decoder closed, walk stopped", server.nickname),
        }

        Ok(())
    }

    async fn decode_entry(&self, entry: LogEntry) {
        match self.decoder.decode(&entry) {
            Ok(DecodeOutcome::Accepted(certificate)) => {
                let saved = match self.storage.upsert_certificate(&certificate).await {
                    Ok(saved) => saved,
                    Err(e) => {
                        error!("Failed to save certificate for {}: {:#}", certificate.subject, e);
                        return;
                    }
                };
                self.stats.increment_saved();
                debug!("Entry {}: saved certificate for {}", entry.index, saved.subject);

                if let Err(e) = self.scrape_pool().submit(Task::ScrapeCertificate(saved)) {
                    debug!("VAT search deferred: {}", e);
                }
            }
            Ok(DecodeOutcome::Skipped(reason)) => {
                self.stats.increment_skipped();
                trace!("Entry {}: {}", entry.index, reason);
            }
            Err(e) => {
                self.stats.increment_malformed();
                warn!("Entry {}: {}", entry.index, e);
            }
        }
    }

    async fn scrape_certificate(&self, mut certificate: Certificate, interrupt: &Interrupt) {
        let vat = match self.crawler.crawl(&certificate.subject, interrupt).await {
            CrawlOutcome::Found(vat) => Some(vat),
            CrawlOutcome::NotFound => None,
            CrawlOutcome::Cancelled => {
                debug!("VAT search for {} cancelled", certificate.subject);
                return;
            }
        };

        if let Some(vat) = &vat {
            info!("{}: found VAT {}", certificate.subject, vat);
        }
        self.stats.record_vat(vat.is_some());
        certificate.record_vat_search(vat);

        if let Err(e) = self.storage.upsert_certificate(&certificate).await {
            error!("Failed to save VAT result for {}: {:#}", certificate.subject, e);
        }
    }
}

impl EntrySink for Pipeline {
    fn submit(&self, entry: LogEntry) -> Result<(), PoolError> {
        self.decode_pool().submit(Task::DecodeEntry(entry))
    }
}

/// Routes pool tasks back into the pipeline
struct Dispatcher {
    pipeline: Weak<Pipeline>,
}

#[async_trait]
impl TaskHandler<Task> for Dispatcher {
    async fn handle(&self, task: Task, interrupt: Interrupt) {
        let Some(pipeline) = self.pipeline.upgrade() else {
            debug!("Pipeline dropped, discarding {} task", task.kind());
            return;
        };
        trace!("Running {} task", task.kind());
        pipeline.run_task(task, &interrupt).await;
    }
}
