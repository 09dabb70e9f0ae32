//! Recursive directory traversal feeding the pipeline.
//!
//! A walk yields a finite sequence of matching paths plus a finite sequence
//! of recoverable errors, both delivered over channels and closed when the
//! traversal ends or cancellation fires. Pruned directories are neither
//! descended into nor emitted. Only setup failures (an unusable root) are
//! surfaced terminally.

use ignore::WalkBuilder;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, ValetError};
use crate::path::FilePath;
use crate::predicate::Predicate;

/// Channel depth for discovery streams.
pub const STREAM_DEPTH: usize = 256;

/// Walk `root` depth-first, sending matching paths on `paths` and
/// recoverable per-entry errors on `errors`.
pub async fn walk_tree(
    root: FilePath,
    matcher: Predicate,
    pruner: Predicate,
    cancel: CancellationToken,
    paths: mpsc::Sender<FilePath>,
    errors: mpsc::Sender<ValetError>,
) -> Result<()> {
    let current = root.restat();
    if !current.is_dir() {
        return Err(ValetError::Setup(format!("{current} is not a directory")));
    }

    tokio::task::spawn_blocking(move || walk_blocking(current, matcher, pruner, cancel, paths, errors))
        .await
        .map_err(|e| ValetError::Setup(format!("walker task failed: {e}")))?
}

fn walk_blocking(
    root: FilePath,
    matcher: Predicate,
    pruner: Predicate,
    cancel: CancellationToken,
    paths: mpsc::Sender<FilePath>,
    errors: mpsc::Sender<ValetError>,
) -> Result<()> {
    let filter_pruner = pruner.clone();
    let walker = WalkBuilder::new(root.as_path())
        .hidden(false)
        .ignore(false)
        .parents(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            match FilePath::new(entry.path()) {
                Ok(fp) => !filter_pruner.eval(&fp).prune,
                Err(_) => true,
            }
        })
        .build();

    for result in walker {
        if cancel.is_cancelled() {
            debug!(root = %root, "walk cancelled");
            break;
        }
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                // Entries that vanish between enumeration and visit are
                // routine while an instrument is writing.
                if vanished(&e) {
                    debug!(error = %e, "entry vanished during walk");
                    continue;
                }
                warn!(error = %e, "walk entry error");
                if errors.blocking_send(ValetError::WalkEntry(e.to_string())).is_err() {
                    break;
                }
                continue;
            }
        };

        let fp = match FilePath::new(entry.path()) {
            Ok(fp) => fp,
            Err(e) => {
                if errors.blocking_send(e).is_err() {
                    break;
                }
                continue;
            }
        };
        if !fp.exists() {
            debug!(path = %fp, "path vanished during walk");
            continue;
        }
        if matcher.eval(&fp).matched && paths.blocking_send(fp).is_err() {
            // Downstream has gone away; stop walking.
            break;
        }
    }
    Ok(())
}

fn vanished(e: &ignore::Error) -> bool {
    e.io_error().map(|io| io.kind() == std::io::ErrorKind::NotFound).unwrap_or(false)
}

/// Spawn a walk and return its output streams.
pub fn walk_channel(
    root: FilePath,
    matcher: Predicate,
    pruner: Predicate,
    cancel: CancellationToken,
) -> (mpsc::Receiver<FilePath>, mpsc::Receiver<ValetError>) {
    let (paths_tx, paths_rx) = mpsc::channel(STREAM_DEPTH);
    let (errors_tx, errors_rx) = mpsc::channel(STREAM_DEPTH);
    tokio::spawn(async move {
        if let Err(e) = walk_tree(root, matcher, pruner, cancel, paths_tx, errors_tx.clone()).await {
            let _ = errors_tx.send(e).await;
        }
    });
    (paths_rx, errors_rx)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
