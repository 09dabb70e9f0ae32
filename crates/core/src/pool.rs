//! Bounded-parallelism consumer applying a work plan to discovered paths.
//!
//! The pool reads until its input closes — closure is the termination signal,
//! so cancellation reaches it through the producers. A semaphore caps
//! in-flight work; after the input closes the pool drains what is still
//! running and reports an aggregate error when any path failed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use std::path::PathBuf;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Result, ValetError};
use crate::path::FilePath;
use crate::plan::WorkPlan;

/// Default worker count: one per host processor.
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Process-wide work counters, shared across workers.
#[derive(Debug, Default)]
pub struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    pub fn new() -> Arc<Counters> {
        Arc::new(Counters::default())
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn add_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn add_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Discovery-side errors share the failure count so they surface in the
    /// aggregate result and the exit code.
    pub fn count_discovery_error(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Consume `paths`, applying `plan` to each with at most `max_workers`
/// concurrent applications. Returns `Err(Pipeline { .. })` when any path
/// failed.
pub async fn process_paths(
    mut paths: mpsc::Receiver<FilePath>,
    plan: Arc<WorkPlan>,
    max_workers: usize,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) -> Result<()> {
    let slots = Arc::new(Semaphore::new(max_workers.max(1)));
    let in_flight: Arc<DashSet<PathBuf>> = Arc::new(DashSet::new());
    let mut workers = JoinSet::new();

    info!(plan = plan.name(), workers = max_workers.max(1), "worker pool starting");

    while let Some(path) = paths.recv().await {
        // After cancellation only drain the queue; start no new work.
        if cancel.is_cancelled() {
            debug!(path = %path, "discarding after cancellation");
            continue;
        }
        // Kernels may deliver duplicate events for one write; one worker per
        // path at a time keeps the plan idempotent under duplicates.
        if !in_flight.insert(path.as_path().to_path_buf()) {
            debug!(path = %path, "already in flight");
            continue;
        }

        let permit = Arc::clone(&slots)
            .acquire_owned()
            .await
            .expect("worker semaphore is never closed");
        let plan = Arc::clone(&plan);
        let counters = Arc::clone(&counters);
        let in_flight = Arc::clone(&in_flight);
        workers.spawn(async move {
            let key = path.as_path().to_path_buf();
            match plan.apply(&path).await {
                Ok(fired) => {
                    debug!(path = %path, rules = fired, "processed");
                    counters.add_processed();
                }
                Err(e) => {
                    error!(path = %path, error = %e, "work plan failed");
                    counters.add_failed();
                }
            }
            in_flight.remove(&key);
            drop(permit);
        });

        // Reap finished workers so the join set stays small.
        while workers.try_join_next().is_some() {}
    }

    // Input closed: drain in-flight work.
    while workers.join_next().await.is_some() {}

    let (processed, failed) = (counters.processed(), counters.failed());
    info!(processed, failed, "worker pool drained");
    if failed > 0 {
        Err(ValetError::Pipeline { failed, processed })
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
