//! End-to-end pipeline assembly.
//!
//! Two producers (watcher, interval sweeper) feed one merge, which feeds one
//! worker pool. Cancellation propagates from the shared token: producers
//! close first, the merge follows once both inputs are done, and the pool
//! drains in-flight work before returning.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DEFAULT_SWEEP_INTERVAL;
use crate::error::{Result, ValetError};
use crate::merge::merged;
use crate::path::FilePath;
use crate::plan::WorkPlan;
use crate::pool::{default_workers, process_paths, Counters};
use crate::predicate::Predicate;
use crate::sweep::sweep_channel;
use crate::walk::walk_channel;
use crate::watch::watch_channel;

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Sweep cadence; clamped to the permitted minimum.
    pub interval: Duration,
    /// Worker pool size; defaults to the host processor count.
    pub max_workers: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions { interval: DEFAULT_SWEEP_INTERVAL, max_workers: default_workers() }
    }
}

/// Run the daemon pipeline until cancellation: watch + sweep `root`, apply
/// `plan` to every matching path. Returns the pool's aggregate result.
pub async fn run_pipeline(
    root: FilePath,
    matcher: Predicate,
    pruner: Predicate,
    plan: WorkPlan,
    opts: PipelineOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let current = root.restat();
    if !current.is_dir() {
        return Err(ValetError::Setup(format!("{current} is not a directory")));
    }
    info!(
        root = %current,
        plan = plan.name(),
        workers = opts.max_workers,
        interval_s = opts.interval.as_secs(),
        "pipeline starting"
    );

    let (watch_paths, watch_errors) =
        watch_channel(current.clone(), matcher.clone(), pruner.clone(), cancel.clone());
    let (sweep_paths, sweep_errors) =
        sweep_channel(current, matcher, pruner, opts.interval, cancel.clone());

    let paths = merged(watch_paths, sweep_paths);
    let mut errors = merged(watch_errors, sweep_errors);

    let counters = Counters::new();
    let error_counters = Arc::clone(&counters);
    let error_drain = tokio::spawn(async move {
        while let Some(e) = errors.recv().await {
            warn!(error = %e, "discovery error");
            error_counters.count_discovery_error();
        }
    });

    let result =
        process_paths(paths, Arc::new(plan), opts.max_workers, cancel, Arc::clone(&counters)).await;
    let _ = error_drain.await;

    match result {
        Ok(()) if counters.failed() > 0 => Err(ValetError::Pipeline {
            failed: counters.failed(),
            processed: counters.processed(),
        }),
        other => other,
    }
}

/// One-shot variant: a single walk of `root` through the same worker pool,
/// used by the annotation run. Returns the aggregate result.
pub async fn run_single_sweep(
    root: FilePath,
    matcher: Predicate,
    pruner: Predicate,
    plan: WorkPlan,
    max_workers: usize,
    cancel: CancellationToken,
) -> Result<()> {
    let current = root.restat();
    if !current.is_dir() {
        return Err(ValetError::Setup(format!("{current} is not a directory")));
    }

    let (paths, mut errors) = walk_channel(current, matcher, pruner, cancel.clone());
    let counters = Counters::new();
    let error_counters = Arc::clone(&counters);
    let error_drain = tokio::spawn(async move {
        while let Some(e) = errors.recv().await {
            warn!(error = %e, "discovery error");
            error_counters.count_discovery_error();
        }
    });

    let result =
        process_paths(paths, Arc::new(plan), max_workers, cancel, Arc::clone(&counters)).await;
    let _ = error_drain.await;

    match result {
        Ok(()) if counters.failed() > 0 => Err(ValetError::Pipeline {
            failed: counters.failed(),
            processed: counters.processed(),
        }),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::checksum_plan;
    use crate::config::Config;
    use crate::predicate;

    #[tokio::test]
    async fn test_pipeline_checksums_and_drains_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("reads.fastq"), b"hello world\n").unwrap();

        let config = Config::default();
        let cancel = CancellationToken::new();
        let opts = PipelineOptions { interval: Duration::from_secs(3600), max_workers: 2 };

        let pipeline = tokio::spawn(run_pipeline(
            FilePath::new(dir.path()).unwrap(),
            predicate::requires_archiving(&config.archive_suffixes),
            predicate::match_none(),
            checksum_plan(&config),
            opts,
            cancel.clone(),
        ));

        // Wait until the initial sweep has produced the sidecar.
        let sidecar = dir.path().join("reads.fastq.md5");
        for _ in 0..200 {
            if sidecar.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(sidecar.exists(), "initial sweep should write the sidecar");

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(15), pipeline)
            .await
            .expect("pipeline must shut down within the grace period")
            .unwrap();
        assert!(result.is_ok(), "clean run: {result:?}");
    }

    #[tokio::test]
    async fn test_pipeline_bad_root_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_pipeline(
            FilePath::new(dir.path().join("missing")).unwrap(),
            predicate::match_all(),
            predicate::match_none(),
            crate::plan::dry_run_plan(),
            PipelineOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ValetError::Setup(_)));
    }
}
