//! Test harness for end-to-end pipeline scenarios.
//!
//! Builds a temp data tree plus a filesystem-backed object store, with a
//! counting client wrapper so tests can assert how many uploads actually
//! happened.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use valet_core::remote::pool::DEFAULT_ACQUIRE_TIMEOUT;
use valet_core::remote::{AttrValue, RemoteObject};
use valet_core::{
    Archiver, ClientPool, Config, FilePath, FsObjectStore, Result, StoreClient, StorePath,
};

/// A store client that counts puts, delegating everything to an inner store.
pub struct CountingStore {
    inner: FsObjectStore,
    puts: Arc<AtomicUsize>,
}

#[async_trait]
impl StoreClient for CountingStore {
    async fn put(
        &self,
        local: &Path,
        dest: &StorePath,
        expected_md5: &str,
        metadata: &[AttrValue],
    ) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(local, dest, expected_md5, metadata).await
    }

    async fn ensure_collection(&self, coll: &StorePath) -> Result<()> {
        self.inner.ensure_collection(coll).await
    }

    async fn get_object(&self, path: &StorePath) -> Result<Option<RemoteObject>> {
        self.inner.get_object(path).await
    }

    async fn annotate(&self, path: &StorePath, metadata: &[AttrValue]) -> Result<()> {
        self.inner.annotate(path, metadata).await
    }
}

pub struct Harness {
    pub temp: TempDir,
    pub config: Config,
    pub store: FsObjectStore,
    pub puts: Arc<AtomicUsize>,
}

impl Harness {
    /// A harness whose compression threshold is tiny so tests can exercise
    /// the large-file path without writing hundreds of megabytes.
    pub fn new() -> Harness {
        let temp = TempDir::new().expect("temp dir");
        std::fs::create_dir_all(temp.path().join("data")).unwrap();
        let store = FsObjectStore::new(temp.path().join("store"));
        let config = Config {
            large_file_threshold: 1024,
            ..Config::default()
        };
        Harness { temp, config, store, puts: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn data_root(&self) -> PathBuf {
        self.temp.path().join("data")
    }

    pub fn uploads(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Write a data file under the root and return its path value.
    pub fn write_file(&self, rel: &str, content: &[u8]) -> FilePath {
        let path = self.data_root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        FilePath::new(&path).unwrap()
    }

    pub fn client_pool(&self) -> ClientPool {
        let store = self.store.clone();
        let puts = Arc::clone(&self.puts);
        ClientPool::with_capacity(
            2,
            move || {
                Arc::new(CountingStore { inner: store.clone(), puts: Arc::clone(&puts) })
                    as Arc<dyn StoreClient>
            },
            DEFAULT_ACQUIRE_TIMEOUT,
        )
    }

    pub fn archiver(&self, prefer_compressed: bool) -> Archiver {
        Archiver::new(
            self.client_pool(),
            self.data_root(),
            StorePath::new("/archive"),
            prefer_compressed,
            self.config.annotate_uncompressed_checksum,
        )
    }

    /// Everything currently on disk under the data root, root-relative.
    pub fn local_files(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_files(&self.data_root(), &self.data_root(), &mut out);
        out.sort();
        out
    }

    /// Everything currently in the store, store-root-relative.
    pub fn store_files(&self) -> Vec<String> {
        let mut out = Vec::new();
        let root = self.store.root().to_path_buf();
        if root.exists() {
            collect_files(&root, &root, &mut out);
        }
        out.sort();
        out
    }
}

fn collect_files(dir: &Path, root: &Path, out: &mut Vec<String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, root, out);
        } else {
            out.push(path.strip_prefix(root).unwrap().to_string_lossy().to_string());
        }
    }
}

/// Push one path through a plan via the worker pool, returning the counter
/// snapshot `(processed, failed)`.
pub async fn pool_apply(
    plan: valet_core::WorkPlan,
    paths: Vec<FilePath>,
) -> (u64, u64) {
    let (tx, rx) = tokio::sync::mpsc::channel(paths.len().max(1));
    for p in paths {
        tx.send(p).await.unwrap();
    }
    drop(tx);

    let counters = valet_core::pool::Counters::new();
    let _ = valet_core::pool::process_paths(
        rx,
        Arc::new(plan),
        2,
        tokio_util::sync::CancellationToken::new(),
        Arc::clone(&counters),
    )
    .await;
    (counters.processed(), counters.failed())
}

/// Back-date a file's mtime by `secs` seconds.
pub fn backdate(path: &Path, secs: i64) {
    let meta = std::fs::metadata(path).expect("backdate target exists");
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    filetime::set_file_mtime(
        path,
        filetime::FileTime::from_unix_time(mtime.unix_seconds() - secs, 0),
    )
    .unwrap();
}

#[allow(dead_code)]
pub fn sleep_past_mtime_granularity() -> Duration {
    Duration::from_millis(20)
}
