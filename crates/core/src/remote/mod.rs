//! Contract the engine demands of a remote content-addressed object store.
//!
//! The store client library itself is an external collaborator; the engine
//! depends only on [`StoreClient`]. A filesystem-backed implementation lives
//! in [`fs`] and is what the CLI and the test suite wire in.

pub mod fs;
pub mod pool;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValetError};

pub use fs::FsObjectStore;
pub use pool::{ClientPool, PooledClient};

// ---------------------------------------------------------------------------
// Store paths
// ---------------------------------------------------------------------------

/// A normalized, `/`-separated absolute path inside the object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorePath(String);

impl StorePath {
    /// Normalize: force a leading `/`, collapse repeated separators, drop a
    /// trailing one.
    pub fn new(s: impl AsRef<str>) -> Self {
        let mut out = String::from("/");
        for seg in s.as_ref().split('/').filter(|seg| !seg.is_empty()) {
            if !out.ends_with('/') {
                out.push('/');
            }
            out.push_str(seg);
        }
        StorePath(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, seg: &str) -> StorePath {
        StorePath::new(format!("{}/{}", self.0, seg))
    }

    /// Parent collection, or `None` at the root.
    pub fn parent(&self) -> Option<StorePath> {
        if self.0 == "/" {
            return None;
        }
        let idx = self.0.rfind('/')?;
        if idx == 0 {
            Some(StorePath(String::from("/")))
        } else {
            Some(StorePath(self.0[..idx].to_string()))
        }
    }

    /// Destination for `local`: `remote_base` plus `local` relative to
    /// `local_base`.
    pub fn for_local(local: &Path, local_base: &Path, remote_base: &StorePath) -> Result<StorePath> {
        let rel = local.strip_prefix(local_base).map_err(|_| {
            ValetError::Setup(format!(
                "{} is not under the local base {}",
                local.display(),
                local_base.display()
            ))
        })?;
        let mut out = remote_base.clone();
        for comp in rel.components() {
            match comp.as_os_str().to_str() {
                Some(seg) => out = out.join(seg),
                None => {
                    return Err(ValetError::Setup(format!(
                        "{}: non-UTF-8 path component",
                        local.display()
                    )))
                }
            }
        }
        Ok(out)
    }
}

impl std::fmt::Display for StorePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Metadata and object snapshots
// ---------------------------------------------------------------------------

/// A single attribute/value metadata pair on a remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrValue {
    pub attr: String,
    pub value: String,
}

impl AttrValue {
    pub fn new(attr: impl Into<String>, value: impl Into<String>) -> Self {
        AttrValue { attr: attr.into(), value: value.into() }
    }
}

/// Point-in-time view of a remote object.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub path: StorePath,
    /// Server-computed checksum of the stored bytes, lower-case hex MD5.
    pub checksum: String,
    pub metadata: Vec<AttrValue>,
}

impl RemoteObject {
    pub fn has_metadata(&self, attr: &str, value: &str) -> bool {
        self.metadata.iter().any(|m| m.attr == attr && m.value == value)
    }
}

// ---------------------------------------------------------------------------
// Client contract
// ---------------------------------------------------------------------------

/// Operations the archive pipeline requires of a store client.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Upload `local` to `dest` with creation metadata. The store verifies
    /// the received bytes against `expected_md5` and rejects a mismatch.
    async fn put(
        &self,
        local: &Path,
        dest: &StorePath,
        expected_md5: &str,
        metadata: &[AttrValue],
    ) -> Result<()>;

    /// Create the collection (and its ancestors) if absent. Idempotent.
    async fn ensure_collection(&self, coll: &StorePath) -> Result<()>;

    /// Fetch a snapshot of the object at `path`, or `None` if it does not
    /// exist.
    async fn get_object(&self, path: &StorePath) -> Result<Option<RemoteObject>>;

    /// Upsert metadata pairs on an existing object: replace the value of an
    /// existing attribute, append a new one.
    async fn annotate(&self, path: &StorePath, metadata: &[AttrValue]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_store_path_normalization() {
        assert_eq!(StorePath::new("archive/run1").as_str(), "/archive/run1");
        assert_eq!(StorePath::new("/archive//run1/").as_str(), "/archive/run1");
        assert_eq!(StorePath::new("/").as_str(), "/");
        assert_eq!(StorePath::new("").as_str(), "/");
    }

    #[test]
    fn test_store_path_parent() {
        let p = StorePath::new("/archive/run1/reads.fastq");
        assert_eq!(p.parent().unwrap().as_str(), "/archive/run1");
        assert_eq!(StorePath::new("/archive").parent().unwrap().as_str(), "/");
        assert!(StorePath::new("/").parent().is_none());
    }

    #[test]
    fn test_for_local_reattaches_under_remote_base() {
        let dest = StorePath::for_local(
            &PathBuf::from("/data/run1/pass/reads.fastq"),
            &PathBuf::from("/data"),
            &StorePath::new("/archive"),
        )
        .unwrap();
        assert_eq!(dest.as_str(), "/archive/run1/pass/reads.fastq");
    }

    #[test]
    fn test_for_local_outside_base_is_setup_error() {
        let err = StorePath::for_local(
            &PathBuf::from("/elsewhere/reads.fastq"),
            &PathBuf::from("/data"),
            &StorePath::new("/archive"),
        )
        .unwrap_err();
        assert!(matches!(err, ValetError::Setup(_)));
    }
}
