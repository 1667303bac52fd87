//! Deferred task scheduler for fire-and-forget work (telemetry).
//! Tasks run on a dedicated OS thread that owns its own Tokio runtime, so the
//! request runtime never polls them. Submission is an unbounded channel send
//! and never blocks. A semaphore caps how many deferred tasks run at once.
//! No ordering guarantee, no completion guarantee past the shutdown grace.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::{metric_names, MetricsRegistry};

pub type DeferredTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Anything that can take a task off the response path.
pub trait TaskScheduler: Send + Sync {
    /// Enqueue `task`. Must return without waiting for the task to run.
    fn schedule(&self, label: &'static str, task: DeferredTask);
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub worker_threads: usize,
    pub max_in_flight: usize,
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            max_in_flight: 32,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to start deferred runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    abandoned: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    /// Still running when the shutdown grace ran out, then aborted.
    pub abandoned: u64,
}

struct Queued {
    label: &'static str,
    task: DeferredTask,
    enqueued_at: Instant,
}

pub struct DeferredScheduler {
    tx: mpsc::UnboundedSender<Queued>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl DeferredScheduler {
    /// Build the deferred runtime and start the dispatch thread.
    pub fn start(
        config: SchedulerConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, SchedulerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("deferred-worker")
            .enable_all()
            .build()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let loop_shutdown = shutdown.clone();
        let loop_counters = Arc::clone(&counters);
        let worker = std::thread::Builder::new()
            .name("deferred-dispatch".into())
            .spawn(move || {
                let grace = config.shutdown_grace;
                runtime.block_on(dispatch_loop(
                    rx,
                    loop_shutdown,
                    config,
                    loop_counters,
                    metrics,
                ));
                runtime.shutdown_timeout(grace);
                info!("deferred scheduler stopped");
            })?;

        Ok(Self {
            tx,
            shutdown,
            worker: Mutex::new(Some(worker)),
            counters,
        })
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Stop intake, drain queued tasks for up to the grace period, join the thread.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => error!("deferred dispatch thread panicked"),
                Err(e) => error!(error = %e, "failed to join deferred dispatch thread"),
            }
        }
    }
}

impl TaskScheduler for DeferredScheduler {
    fn schedule(&self, label: &'static str, task: DeferredTask) {
        if self.shutdown.is_cancelled() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(label, "scheduler stopped, dropping deferred task");
            return;
        }
        let queued = Queued {
            label,
            task,
            enqueued_at: Instant::now(),
        };
        match self.tx.send(queued) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(label, "deferred queue closed, dropping task");
            }
        }
    }
}

impl Drop for DeferredScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<Queued>,
    shutdown: CancellationToken,
    config: SchedulerConfig,
    counters: Arc<Counters>,
    metrics: Arc<MetricsRegistry>,
) {
    let limiter = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
    let mut in_flight: JoinSet<&'static str> = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            queued = rx.recv() => match queued {
                Some(queued) => spawn_task(&mut in_flight, queued, &limiter, &metrics),
                None => break,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                settle(joined, &counters);
            }
        }
    }

    // Intake stops here; whatever was already queued still gets a chance.
    rx.close();
    while let Ok(queued) = rx.try_recv() {
        spawn_task(&mut in_flight, queued, &limiter, &metrics);
    }

    let pending = in_flight.len();
    if pending > 0 {
        debug!(pending, "draining deferred tasks");
    }
    let drained = tokio::time::timeout(config.shutdown_grace, async {
        while let Some(joined) = in_flight.join_next().await {
            settle(joined, &counters);
        }
    })
    .await;

    if drained.is_err() {
        let abandoned = in_flight.len();
        counters
            .abandoned
            .fetch_add(abandoned as u64, Ordering::Relaxed);
        warn!(
            abandoned,
            grace_ms = config.shutdown_grace.as_millis() as u64,
            "deferred tasks abandoned at shutdown"
        );
        in_flight.abort_all();
    }
}

fn spawn_task(
    in_flight: &mut JoinSet<&'static str>,
    queued: Queued,
    limiter: &Arc<Semaphore>,
    metrics: &Arc<MetricsRegistry>,
) {
    let limiter = Arc::clone(limiter);
    let metrics = Arc::clone(metrics);
    let Queued {
        label,
        task,
        enqueued_at,
    } = queued;

    in_flight.spawn(async move {
        let _permit = limiter.acquire_owned().await;
        metrics.record(
            metric_names::QUEUE_WAIT_DEFERRED,
            enqueued_at.elapsed().as_micros() as f64,
        );
        // Panics are re-raised so the JoinSet reports them against this label.
        if let Err(panic) = std::panic::AssertUnwindSafe(task).catch_unwind().await {
            error!(label, "deferred task panicked");
            std::panic::resume_unwind(panic);
        }
        label
    });
}

fn settle(joined: Result<&'static str, tokio::task::JoinError>, counters: &Counters) {
    match joined {
        Ok(label) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            debug!(label, "deferred task completed");
        }
        Err(e) if e.is_panic() => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "deferred task cancelled");
        }
    }
}
