//! Periodic full sweeps of the monitored tree.
//!
//! A sweep walks the root immediately, then once per tick. Walks are
//! serialized: a tick that arrives while a walk is still running is delayed,
//! never run concurrently, so a file is not emitted twice by overlapping
//! sweeps.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ValetError;
use crate::path::FilePath;
use crate::predicate::Predicate;
use crate::walk::{walk_tree, STREAM_DEPTH};

/// Sweep `root` every `interval` (clamped to the permitted minimum) until
/// cancellation, forwarding paths and errors downstream.
pub async fn sweep_tree(
    root: FilePath,
    matcher: Predicate,
    pruner: Predicate,
    interval: Duration,
    cancel: CancellationToken,
    paths: mpsc::Sender<FilePath>,
    errors: mpsc::Sender<ValetError>,
) {
    let interval = Config::clamp_interval(interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(root = %root, "sweeper cancelled");
                break;
            }
            // The first tick completes immediately, walking at startup.
            _ = ticker.tick() => {
                debug!(root = %root, "sweep starting");
                let walked = walk_tree(
                    root.clone(),
                    matcher.clone(),
                    pruner.clone(),
                    cancel.clone(),
                    paths.clone(),
                    errors.clone(),
                )
                .await;
                if let Err(e) = walked {
                    // The root may be transiently unreachable; report it and
                    // keep the cadence rather than give up.
                    warn!(root = %root, error = %e, "sweep failed");
                    if errors.send(e).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Spawn a sweeper and return its output streams.
pub fn sweep_channel(
    root: FilePath,
    matcher: Predicate,
    pruner: Predicate,
    interval: Duration,
    cancel: CancellationToken,
) -> (mpsc::Receiver<FilePath>, mpsc::Receiver<ValetError>) {
    let (paths_tx, paths_rx) = mpsc::channel(STREAM_DEPTH);
    let (errors_tx, errors_rx) = mpsc::channel(STREAM_DEPTH);
    tokio::spawn(async move {
        sweep_tree(root, matcher, pruner, interval, cancel, paths_tx, errors_tx).await;
    });
    (paths_rx, errors_rx)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{has_suffix_in, match_none};

    #[tokio::test]
    async fn test_sweep_walks_immediately() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("reads.fastq"), b"a").unwrap();

        let cancel = CancellationToken::new();
        let (mut paths, _errors) = sweep_channel(
            FilePath::new(dir.path()).unwrap(),
            has_suffix_in(vec!["fastq".to_string()]),
            match_none(),
            Duration::from_secs(3600),
            cancel.clone(),
        );

        // The first sweep fires without waiting for the interval.
        let got = tokio::time::timeout(Duration::from_secs(10), paths.recv())
            .await
            .expect("first sweep should fire immediately")
            .expect("stream closed early");
        assert_eq!(got.file_name(), "reads.fastq");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_sweep_cancellation_closes_streams() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let (mut paths, mut errors) = sweep_channel(
            FilePath::new(dir.path()).unwrap(),
            match_none(),
            match_none(),
            Duration::from_secs(3600),
            cancel.clone(),
        );
        cancel.cancel();

        let drained = tokio::time::timeout(Duration::from_secs(10), async {
            while paths.recv().await.is_some() {}
            while errors.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }
}
