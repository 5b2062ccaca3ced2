// src/pipeline/pool.rs
//! Fixed-size pools of tokio workers sharing one unbounded queue

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("{0} pool is closed")]
    Closed(&'static str),
}

/// Coarse lifecycle state of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting work
    Running,
    /// No longer accepting work, workers still alive
    Closing,
    /// All workers have exited
    Closed,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolState::Running => "running",
            PoolState::Closing => "closing",
            PoolState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Read side of a pool's forceful-stop signal
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

impl Interrupt {
    /// An interrupt that is never raised
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the interrupt is raised. Pends forever if it never can be.
    pub async fn raised(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|raised| *raised).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl From<watch::Receiver<bool>> for Interrupt {
    fn from(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }
}

/// Work executed by a pool's workers
#[async_trait]
pub trait TaskHandler<T>: Send + Sync + 'static {
    async fn handle(&self, task: T, interrupt: Interrupt);
}

/// Counts queued plus running tasks and wakes idle waiters at zero
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// N workers pulling tasks from one shared queue
pub struct WorkerPool<T> {
    name: &'static str,
    size: usize,
    sender: Mutex<Option<mpsc::UnboundedSender<T>>>,
    interrupt_tx: watch::Sender<bool>,
    live_workers: Arc<AtomicUsize>,
    pending: Arc<Pending>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `size` workers (at least one) running `handler`
    pub fn spawn(name: &'static str, size: usize, handler: Arc<dyn TaskHandler<T>>) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let (interrupt_tx, interrupt_rx) = watch::channel(false);
        let queue = Arc::new(tokio::sync::Mutex::new(receiver));
        let live_workers = Arc::new(AtomicUsize::new(size));
        let pending = Arc::new(Pending::default());

        let workers = (0..size)
            .map(|worker_id| {
                let worker = Worker {
                    pool: name,
                    id: worker_id,
                    queue: Arc::clone(&queue),
                    handler: Arc::clone(&handler),
                    interrupt: Interrupt::from(interrupt_rx.clone()),
                    live_workers: Arc::clone(&live_workers),
                    pending: Arc::clone(&pending),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!("Started {} pool with {} workers", name, size);

        Self {
            name,
            size,
            sender: Mutex::new(Some(sender)),
            interrupt_tx,
            live_workers,
            pending,
            workers: Mutex::new(workers),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queued plus in-flight tasks
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Queue a task; never blocks
    pub fn submit(&self, task: T) -> Result<(), PoolError> {
        let sender = self.sender.lock().unwrap();
        let Some(sender) = sender.as_ref() else {
            return Err(PoolError::Closed(self.name));
        };

        self.pending.add();
        if sender.send(task).is_err() {
            self.pending.done();
            return Err(PoolError::Closed(self.name));
        }
        Ok(())
    }

    pub fn state(&self) -> PoolState {
        if self.sender.lock().unwrap().is_some() {
            PoolState::Running
        } else if self.live_workers.load(Ordering::SeqCst) > 0 {
            PoolState::Closing
        } else {
            PoolState::Closed
        }
    }

    /// Reject new work and let workers finish everything already queued
    pub fn shutdown_graceful(&self) {
        if self.sender.lock().unwrap().take().is_some() {
            info!("Draining {} pool", self.name);
        }
    }

    /// Reject new work, drop queued tasks and raise the interrupt
    pub fn shutdown_now(&self) {
        self.sender.lock().unwrap().take();
        if !*self.interrupt_tx.borrow() {
            info!("Interrupting {} pool", self.name);
            self.interrupt_tx.send_replace(true);
        }
    }

    /// Wait until nothing is queued or running
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.pending.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Wait for every worker to exit. Only returns after a shutdown.
    pub async fn join(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            if let Err(e) = worker.await {
                error!("{} pool worker ended abnormally: {}", self.name, e);
            }
        }
    }
}

struct Worker<T> {
    pool: &'static str,
    id: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<T>>>,
    handler: Arc<dyn TaskHandler<T>>,
    interrupt: Interrupt,
    live_workers: Arc<AtomicUsize>,
    pending: Arc<Pending>,
}

impl<T: Send + 'static> Worker<T> {
    async fn run(self) {
        debug!("{} worker {} started", self.pool, self.id);

        while let Some(task) = self.next_task().await {
            let handler = Arc::clone(&self.handler);
            let interrupt = self.interrupt.clone();
            let outcome = tokio::spawn(async move { handler.handle(task, interrupt).await }).await;

            if let Err(e) = outcome {
                error!("{} worker {}: task failed: {}", self.pool, self.id, e);
            }
            self.pending.done();
        }

        self.live_workers.fetch_sub(1, Ordering::SeqCst);
        debug!("{} worker {} stopped", self.pool, self.id);
    }

    /// Next task, or `None` once the queue is closed and drained or the
    /// interrupt was raised. Tasks left behind by an interrupt are discarded.
    async fn next_task(&self) -> Option<T> {
        let mut queue = self.queue.lock().await;

        let task = tokio::select! {
            biased;
            _ = self.interrupt.raised() => None,
            task = queue.recv() => task,
        };

        if task.is_some() && !self.interrupt.is_raised() {
            return task;
        }

        if self.interrupt.is_raised() {
            let mut discarded = usize::from(task.is_some());
            while queue.try_recv().is_ok() {
                discarded += 1;
            }
            for _ in 0..discarded {
                self.pending.done();
            }
            if discarded > 0 {
                debug!("{} pool discarded {} queued tasks", self.pool, discarded);
            }
        }

        None
    }
}
