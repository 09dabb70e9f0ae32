//! Filesystem-backed object store.
//!
//! Objects live under a root directory mirroring their [`StorePath`];
//! metadata sits beside each object in a `<name>.meta.json` document. The
//! store recomputes the MD5 of received bytes and rejects a put whose digest
//! disagrees with the caller's expectation, matching the server-side checksum
//! enforcement the archive contract demands.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checksum::{hex_digest, md5_of_file};
use crate::error::{Result, ValetError};
use crate::remote::{AttrValue, RemoteObject, StoreClient, StorePath};

const META_SUFFIX: &str = ".meta.json";

/// On-disk metadata document stored beside each object.
#[derive(Debug, Serialize, Deserialize)]
struct MetaDoc {
    checksum: String,
    metadata: Vec<AttrValue>,
}

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsObjectStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, path: &StorePath) -> PathBuf {
        let rel = path.as_str().trim_start_matches('/');
        self.root.join(rel)
    }

    fn meta_path(&self, path: &StorePath) -> PathBuf {
        let data = self.data_path(path);
        let mut name = data.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(META_SUFFIX);
        data.with_file_name(name)
    }

    fn read_meta(&self, path: &StorePath) -> Result<MetaDoc> {
        let meta_path = self.meta_path(path);
        let raw = std::fs::read_to_string(&meta_path).map_err(|e| ValetError::io(&meta_path, e))?;
        serde_json::from_str(&raw)
            .map_err(|e| ValetError::Store(format!("{path}: corrupt metadata document: {e}")))
    }

    fn write_meta(&self, path: &StorePath, doc: &MetaDoc) -> Result<()> {
        let meta_path = self.meta_path(path);
        let raw = serde_json::to_string_pretty(doc)
            .map_err(|e| ValetError::Store(format!("{path}: encode metadata: {e}")))?;
        std::fs::write(&meta_path, raw).map_err(|e| ValetError::io(&meta_path, e))
    }
}

#[async_trait]
impl StoreClient for FsObjectStore {
    async fn put(
        &self,
        local: &Path,
        dest: &StorePath,
        expected_md5: &str,
        metadata: &[AttrValue],
    ) -> Result<()> {
        let store = self.clone();
        let local = local.to_path_buf();
        let dest = dest.clone();
        let expected = expected_md5.to_string();
        let metadata = metadata.to_vec();

        tokio::task::spawn_blocking(move || {
            let data_path = store.data_path(&dest);
            if let Some(parent) = data_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ValetError::io(parent, e))?;
            }
            std::fs::copy(&local, &data_path).map_err(|e| ValetError::io(&local, e))?;

            // Server-side enforcement: digest what actually landed.
            let received = hex_digest(&md5_of_file(&data_path)?);
            if received != expected {
                let _ = std::fs::remove_file(&data_path);
                return Err(ValetError::ChecksumMismatch {
                    path: local,
                    expected,
                    actual: received,
                });
            }

            store.write_meta(&dest, &MetaDoc { checksum: received, metadata })?;
            debug!(dest = %dest, "stored object");
            Ok(())
        })
        .await
        .map_err(|e| ValetError::Store(format!("put task failed: {e}")))?
    }

    async fn ensure_collection(&self, coll: &StorePath) -> Result<()> {
        let dir = self.data_path(coll);
        std::fs::create_dir_all(&dir).map_err(|e| ValetError::io(&dir, e))
    }

    async fn get_object(&self, path: &StorePath) -> Result<Option<RemoteObject>> {
        let data_path = self.data_path(path);
        if !data_path.is_file() {
            return Ok(None);
        }
        let doc = self.read_meta(path)?;
        Ok(Some(RemoteObject {
            path: path.clone(),
            checksum: doc.checksum,
            metadata: doc.metadata,
        }))
    }

    async fn annotate(&self, path: &StorePath, metadata: &[AttrValue]) -> Result<()> {
        if !self.data_path(path).is_file() {
            return Err(ValetError::Store(format!("{path}: no such object")));
        }
        let mut doc = self.read_meta(path)?;
        for pair in metadata {
            match doc.metadata.iter_mut().find(|m| m.attr == pair.attr) {
                Some(existing) => existing.value = pair.value.clone(),
                None => doc.metadata.push(pair.clone()),
            }
        }
        self.write_meta(path, &doc)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, FsObjectStore, PathBuf, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().join("store"));
        let local = dir.path().join("reads.fastq");
        std::fs::write(&local, b"ACGT\n").unwrap();
        let md5 = hex_digest(&md5_of_file(&local).unwrap());
        (dir, store, local, md5)
    }

    #[tokio::test]
    async fn test_put_and_get_round_trip() {
        let (_dir, store, local, md5) = fixture();
        let dest = StorePath::new("/archive/run1/reads.fastq");
        store.ensure_collection(&dest.parent().unwrap()).await.unwrap();
        store
            .put(&local, &dest, &md5, &[AttrValue::new("md5", &md5)])
            .await
            .unwrap();

        let obj = store.get_object(&dest).await.unwrap().unwrap();
        assert_eq!(obj.checksum, md5);
        assert!(obj.has_metadata("md5", &md5));
    }

    #[tokio::test]
    async fn test_put_rejects_checksum_mismatch() {
        let (_dir, store, local, _md5) = fixture();
        let dest = StorePath::new("/archive/reads.fastq");
        store.ensure_collection(&dest.parent().unwrap()).await.unwrap();
        let err = store
            .put(&local, &dest, "00000000000000000000000000000000", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ValetError::ChecksumMismatch { .. }));
        assert!(store.get_object(&dest).await.unwrap().is_none(), "rejected put leaves no object");
    }

    #[tokio::test]
    async fn test_ensure_collection_idempotent() {
        let (_dir, store, _local, _md5) = fixture();
        let coll = StorePath::new("/archive/run1");
        store.ensure_collection(&coll).await.unwrap();
        store.ensure_collection(&coll).await.unwrap();
    }

    #[tokio::test]
    async fn test_annotate_upserts() {
        let (_dir, store, local, md5) = fixture();
        let dest = StorePath::new("/archive/reads.fastq");
        store.ensure_collection(&dest.parent().unwrap()).await.unwrap();
        store
            .put(&local, &dest, &md5, &[AttrValue::new("md5", &md5)])
            .await
            .unwrap();

        store
            .annotate(
                &dest,
                &[AttrValue::new("ont:sample_id", "s1"), AttrValue::new("md5", &md5)],
            )
            .await
            .unwrap();
        store
            .annotate(&dest, &[AttrValue::new("ont:sample_id", "s2")])
            .await
            .unwrap();

        let obj = store.get_object(&dest).await.unwrap().unwrap();
        assert!(obj.has_metadata("ont:sample_id", "s2"));
        assert!(!obj.has_metadata("ont:sample_id", "s1"), "upsert replaces the value");
        assert!(obj.has_metadata("md5", &md5));
    }

    #[tokio::test]
    async fn test_get_missing_object() {
        let (_dir, store, _local, _md5) = fixture();
        let obj = store.get_object(&StorePath::new("/nope")).await.unwrap();
        assert!(obj.is_none());
    }
}
