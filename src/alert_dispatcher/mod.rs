//! AlertDispatcher - Bounded Alert Worker Pool
//!
//! ## Responsibilities
//!
//! - Accept alert tasks on an unbounded queue
//! - Deliver them through a fixed number of workers, best-effort
//! - Drain queued tasks on shutdown before the transport is released
//!
//! ## Design Principles
//!
//! - Explicitly constructed and owned by the supervisor; producers hold an
//!   `AlertHandle`
//! - Failures are terminal for the task: logged, counted, never retried

mod transport;
mod types;

pub use transport::{AlertTransport, HttpAlertTransport};
pub use types::*;

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

type TaskSender = Arc<RwLock<Option<mpsc::UnboundedSender<AlertTask>>>>;

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Producer side of the dispatcher
#[derive(Clone)]
pub struct AlertHandle {
    sender: TaskSender,
    counters: Arc<Counters>,
}

impl AlertHandle {
    /// Queue a task; fails once shutdown has begun
    pub fn submit(&self, task: AlertTask) -> Result<()> {
        let guard = self.sender.read().unwrap_or_else(|p| p.into_inner());
        let sender = guard.as_ref().ok_or(Error::DispatcherClosed)?;
        sender.send(task).map_err(|_| Error::DispatcherClosed)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> DispatcherStats {
        self.counters.snapshot()
    }
}

/// Fixed-size alert worker pool
pub struct AlertDispatcher {
    handle: AlertHandle,
    workers: Vec<JoinHandle<()>>,
    transport: Arc<dyn AlertTransport>,
}

impl AlertDispatcher {
    /// Spawn `workers` workers (at least one) sharing one queue
    pub fn start(transport: Arc<dyn AlertTransport>, workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers)
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let transport = Arc::clone(&transport);
                let counters = Arc::clone(&counters);
                tokio::spawn(async move {
                    run_worker(worker_id, rx, transport, counters).await;
                })
            })
            .collect();

        tracing::info!(
            workers = workers,
            channel = transport.channel_name(),
            "Alert dispatcher started"
        );

        Self {
            handle: AlertHandle {
                sender: Arc::new(RwLock::new(Some(tx))),
                counters,
            },
            workers: handles,
            transport,
        }
    }

    pub fn handle(&self) -> AlertHandle {
        self.handle.clone()
    }

    pub fn submit(&self, task: AlertTask) -> Result<()> {
        self.handle.submit(task)
    }

    pub fn stats(&self) -> DispatcherStats {
        self.handle.stats()
    }

    /// Stop accepting tasks, drain the queue, then release the transport
    pub async fn shutdown(self) -> DispatcherStats {
        // dropping the only sender lets workers see the end of the queue
        // once it is empty
        self.handle
            .sender
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .take();

        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Alert worker terminated abnormally");
            }
        }

        let stats = self.handle.stats();
        drop(self.transport);

        tracing::info!(
            submitted = stats.submitted,
            delivered = stats.delivered,
            failed = stats.failed,
            "Alert dispatcher drained"
        );

        stats
    }
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<AlertTask>>>,
    transport: Arc<dyn AlertTransport>,
    counters: Arc<Counters>,
) {
    loop {
        let task = { rx.lock().await.recv().await };
        let Some(task) = task else {
            break;
        };

        let start = std::time::Instant::now();
        match transport.send(&task).await {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    worker_id = worker_id,
                    camera = %task.display_name,
                    class_id = task.class_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Alert sent"
                );
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    worker_id = worker_id,
                    camera = %task.display_name,
                    class_id = task.class_id,
                    error = %e,
                    "Alert delivery failed"
                );
            }
        }
    }

    tracing::debug!(worker_id = worker_id, "Alert worker stopped");
}
