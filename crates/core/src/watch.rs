//! Kernel-event-driven discovery.
//!
//! On startup the watcher walks the root once, placing a non-recursive watch
//! on every directory that is not pruned, then enters its event loop. New
//! directories get watches as they appear; files are emitted downstream on
//! Close-write or Moved-to once they pass the match predicate, so only
//! fully-written files reach the pipeline. The output is an infinite
//! sequence, ended only by cancellation or an unrecoverable watcher failure.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use notify::event::{AccessKind, AccessMode, EventKind, ModifyKind, RenameMode};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, ValetError};
use crate::path::FilePath;
use crate::predicate::Predicate;
use crate::walk::STREAM_DEPTH;

/// Depth of the raw kernel event queue.
const EVENT_QUEUE_DEPTH: usize = 1024;

/// Watch `root` and emit matching file paths until cancellation.
///
/// Failures while placing individual watches are reported on `errors` but do
/// not abort the watcher: a degraded watcher beats a refusal to start, and
/// the interval sweeper covers anything it misses.
pub async fn watch_tree(
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

    let (ev_tx, mut ev_rx) = mpsc::channel::<notify::Result<Event>>(EVENT_QUEUE_DEPTH);
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            // The callback runs on notify's thread; block rather than drop
            // events under load.
            let _ = ev_tx.blocking_send(res);
        },
        notify::Config::default(),
    )?;

    let added =
        add_watches_under(&mut watcher, current.as_path().to_path_buf(), &pruner, &errors).await;
    info!(root = %current, dirs = added, "watching");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(root = %current, "watcher cancelled");
                break;
            }
            ev = ev_rx.recv() => {
                let Some(ev) = ev else { break };
                match ev {
                    Ok(event) => {
                        if handle_event(&mut watcher, event, &matcher, &pruner, &paths, &errors)
                            .await
                            .is_err()
                        {
                            // Downstream closed.
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "watcher error");
                        if errors.send(ValetError::Watch(e)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Route one kernel event. Returns `Err(())` when downstream has closed.
async fn handle_event(
    watcher: &mut RecommendedWatcher,
    event: Event,
    matcher: &Predicate,
    pruner: &Predicate,
    paths: &mpsc::Sender<FilePath>,
    errors: &mpsc::Sender<ValetError>,
) -> std::result::Result<(), ()> {
    let (dir_interest, file_interest) = match event.kind {
        // The path is gone; a duplicate Remove is equally uninteresting.
        EventKind::Remove(_) => (false, false),
        EventKind::Create(_) => (true, false),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => (false, true),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => (true, true),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => (true, true),
        _ => (false, false),
    };
    if !dir_interest && !file_interest {
        return Ok(());
    }

    // For a From/To rename pair the destination is the final path.
    let event_paths: Vec<&PathBuf> =
        if matches!(event.kind, EventKind::Modify(ModifyKind::Name(RenameMode::Both))) {
            event.paths.last().into_iter().collect()
        } else {
            event.paths.iter().collect()
        };

    for raw in event_paths {
        let fp = match FilePath::new(raw) {
            Ok(fp) => fp,
            Err(e) => {
                if errors.send(e).await.is_err() {
                    return Err(());
                }
                continue;
            }
        };
        if !fp.exists() {
            // Vanished between event delivery and stat.
            debug!(path = %fp, "event path vanished");
            continue;
        }

        if fp.is_dir() && dir_interest {
            if pruner.eval(&fp).prune {
                debug!(path = %fp, "not watching pruned directory");
                continue;
            }
            let added =
                add_watches_under(watcher, fp.as_path().to_path_buf(), pruner, errors).await;
            debug!(path = %fp, dirs = added, "added watches");
        } else if fp.is_file() && file_interest && matcher.eval(&fp).matched {
            debug!(path = %fp, "watch emitting");
            if paths.send(fp).await.is_err() {
                return Err(());
            }
        }
    }
    Ok(())
}

/// Walk `start` collecting every unpruned directory, then place a
/// non-recursive watch on each. Returns the number of watches placed.
async fn add_watches_under(
    watcher: &mut RecommendedWatcher,
    start: PathBuf,
    pruner: &Predicate,
    errors: &mpsc::Sender<ValetError>,
) -> usize {
    let (dirs, walk_errors) = {
        let pruner = pruner.clone();
        tokio::task::spawn_blocking(move || collect_dirs(&start, &pruner))
            .await
            .unwrap_or_else(|_| (Vec::new(), Vec::new()))
    };

    for e in walk_errors {
        warn!(error = %e, "watch registration walk error");
        if errors.send(e).await.is_err() {
            break;
        }
    }

    let mut added = 0usize;
    for dir in dirs {
        match watcher.watch(&dir, RecursiveMode::NonRecursive) {
            Ok(()) => added += 1,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "could not watch directory");
                if errors.send(ValetError::Watch(e)).await.is_err() {
                    break;
                }
            }
        }
    }
    added
}

/// Unpruned directories under `start`, including `start` itself.
fn collect_dirs(start: &Path, pruner: &Predicate) -> (Vec<PathBuf>, Vec<ValetError>) {
    let mut dirs = Vec::new();
    let mut errs = Vec::new();

    let filter_pruner = pruner.clone();
    let walker = WalkBuilder::new(start)
        .hidden(false)
        .ignore(false)
        .parents(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false)
        .filter_entry(move |entry| match FilePath::new(entry.path()) {
            Ok(fp) => !filter_pruner.eval(&fp).prune,
            Err(_) => true,
        })
        .build();

    for result in walker {
        match result {
            Ok(entry) if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) => {
                dirs.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => errs.push(ValetError::WalkEntry(e.to_string())),
        }
    }
    (dirs, errs)
}

/// Spawn a watcher and return its output streams.
pub fn watch_channel(
    root: FilePath,
    matcher: Predicate,
    pruner: Predicate,
    cancel: CancellationToken,
) -> (mpsc::Receiver<FilePath>, mpsc::Receiver<ValetError>) {
    let (paths_tx, paths_rx) = mpsc::channel(STREAM_DEPTH);
    let (errors_tx, errors_rx) = mpsc::channel(STREAM_DEPTH);
    tokio::spawn(async move {
        if let Err(e) = watch_tree(root, matcher, pruner, cancel, paths_tx, errors_tx.clone()).await
        {
            let _ = errors_tx.send(e).await;
        }
    });
    (paths_rx, errors_rx)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{has_suffix_in, prune_names_under};
    use std::time::Duration;

    const SETTLE: Duration = Duration::from_millis(500);
    const RECV_TIMEOUT: Duration = Duration::from_secs(10);

    async fn recv_path(rx: &mut mpsc::Receiver<FilePath>) -> FilePath {
        tokio::time::timeout(RECV_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for a watch event")
            .expect("watch stream closed early")
    }

    #[tokio::test]
    async fn test_watch_emits_closed_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = FilePath::new(dir.path()).unwrap();
        let cancel = CancellationToken::new();
        let (mut paths, _errors) = watch_channel(
            root,
            has_suffix_in(vec!["fastq".to_string()]),
            crate::predicate::match_none(),
            cancel.clone(),
        );
        tokio::time::sleep(SETTLE).await;

        std::fs::write(dir.path().join("reads.fastq"), b"ACGT").unwrap();

        let got = recv_path(&mut paths).await;
        assert_eq!(got.file_name(), "reads.fastq");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_watch_follows_new_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = FilePath::new(dir.path()).unwrap();
        let cancel = CancellationToken::new();
        let (mut paths, _errors) = watch_channel(
            root,
            has_suffix_in(vec!["fastq".to_string()]),
            crate::predicate::match_none(),
            cancel.clone(),
        );
        tokio::time::sleep(SETTLE).await;

        let sub = dir.path().join("run1");
        std::fs::create_dir(&sub).unwrap();
        tokio::time::sleep(SETTLE).await;

        std::fs::write(sub.join("reads.fastq"), b"ACGT").unwrap();

        let got = recv_path(&mut paths).await;
        assert_eq!(got.file_name(), "reads.fastq");
        assert!(got.as_path().starts_with(&sub));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_watch_honors_prune() {
        let dir = tempfile::tempdir().unwrap();
        let root = FilePath::new(dir.path()).unwrap();
        let cancel = CancellationToken::new();
        let (mut paths, _errors) = watch_channel(
            root,
            has_suffix_in(vec!["fastq".to_string()]),
            prune_names_under(dir.path().to_path_buf(), vec!["reports".to_string()]),
            cancel.clone(),
        );
        tokio::time::sleep(SETTLE).await;

        let pruned = dir.path().join("reports");
        std::fs::create_dir(&pruned).unwrap();
        tokio::time::sleep(SETTLE).await;

        // A file in the pruned directory must never surface; one at the root
        // must. Receiving the second proves the first was skipped because
        // per-source ordering is preserved.
        std::fs::write(pruned.join("hidden.fastq"), b"x").unwrap();
        tokio::time::sleep(SETTLE).await;
        std::fs::write(dir.path().join("visible.fastq"), b"y").unwrap();

        let got = recv_path(&mut paths).await;
        assert_eq!(got.file_name(), "visible.fastq");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_watch_cancellation_closes_stream() {
        let dir = tempfile::tempdir().unwrap();
        let root = FilePath::new(dir.path()).unwrap();
        let cancel = CancellationToken::new();
        let (mut paths, _errors) = watch_channel(
            root,
            crate::predicate::match_all(),
            crate::predicate::match_none(),
            cancel.clone(),
        );
        tokio::time::sleep(SETTLE).await;

        cancel.cancel();
        let closed = tokio::time::timeout(RECV_TIMEOUT, async {
            while paths.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "stream must close after cancellation");
    }
}
