//! Upload to the remote store with checksum metadata and round-trip
//! verification.
//!
//! When `prefer_compressed` is on and a `.gz` sibling exists, the compressed
//! rendition is what travels; its `.gz.md5` sidecar supplies the expected
//! digest. Verification re-reads the object and requires existence, a server
//! checksum equal to the expectation, and matching `md5` metadata.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::checksum::read_sidecar;
use crate::error::{Result, ValetError};
use crate::path::FilePath;
use crate::remote::{AttrValue, ClientPool, StorePath};
use crate::report::parse_report;

/// Metadata attribute carrying the digest of the stored bytes.
pub const MD5_ATTR: &str = "md5";

/// Metadata attribute carrying the pre-compression digest when a `.gz`
/// rendition was uploaded.
pub const MD5_UNCOMPRESSED_ATTR: &str = "md5_uncompressed";

#[derive(Clone)]
pub struct Archiver {
    pool: ClientPool,
    local_base: PathBuf,
    remote_base: StorePath,
    prefer_compressed: bool,
    annotate_uncompressed: bool,
}

impl Archiver {
    pub fn new(
        pool: ClientPool,
        local_base: impl Into<PathBuf>,
        remote_base: StorePath,
        prefer_compressed: bool,
        annotate_uncompressed: bool,
    ) -> Self {
        Archiver {
            pool,
            local_base: local_base.into(),
            remote_base,
            prefer_compressed,
            annotate_uncompressed,
        }
    }

    /// The file that actually travels: the `.gz` sibling when preferred and
    /// present, otherwise the path itself.
    fn operating_path(&self, path: &FilePath) -> Result<FilePath> {
        if self.prefer_compressed {
            let gz = path.compressed_sibling();
            if gz.exists() {
                return FilePath::new(gz);
            }
        }
        Ok(path.restat())
    }

    /// Remote destination for a local path.
    pub fn destination(&self, path: &FilePath) -> Result<StorePath> {
        StorePath::for_local(path.as_path(), &self.local_base, &self.remote_base)
    }

    /// Upload `path` (or its compressed rendition), then verify the stored
    /// object end to end.
    pub async fn archive(&self, path: &FilePath) -> Result<()> {
        let started = Instant::now();
        let op = self.operating_path(path)?;
        let dest = self.destination(&op)?;
        let expected = read_sidecar(&op.checksum_sibling())?;

        let mut metadata = vec![AttrValue::new(MD5_ATTR, &expected)];
        if self.annotate_uncompressed && op.has_suffix(crate::path::COMPRESS_EXT) {
            // The primary's own sidecar holds the pre-compression digest.
            let primary_sidecar = FilePath::hypothetical(op.uncompressed_name())?.checksum_sibling();
            if primary_sidecar.exists() {
                metadata.push(AttrValue::new(MD5_UNCOMPRESSED_ATTR, read_sidecar(&primary_sidecar)?));
            }
        }

        let client = self.pool.acquire().await?;
        if let Some(parent) = dest.parent() {
            client.ensure_collection(&parent).await?;
        }
        client.put(op.as_path(), &dest, &expected, &metadata).await?;

        // Trust nothing: re-read what landed.
        let obj = client.get_object(&dest).await?.ok_or_else(|| ValetError::Verify {
            path: op.as_path().to_path_buf(),
            reason: format!("{dest} absent after upload"),
        })?;
        if obj.checksum != expected {
            error!(
                path = %op,
                dest = %dest,
                expected = %expected,
                actual = %obj.checksum,
                "server checksum disagrees after upload"
            );
            return Err(ValetError::Verify {
                path: op.as_path().to_path_buf(),
                reason: format!("server checksum {} != {expected}", obj.checksum),
            });
        }
        if !obj.has_metadata(MD5_ATTR, &expected) {
            error!(path = %op, dest = %dest, expected = %expected, "md5 metadata missing after upload");
            return Err(ValetError::Verify {
                path: op.as_path().to_path_buf(),
                reason: format!("{MD5_ATTR} metadata does not equal {expected}"),
            });
        }

        info!(
            path = %op,
            dest = %dest,
            md5 = %expected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "archived"
        );
        Ok(())
    }

    /// Read-only archival check: a verified remote copy exists and the local
    /// checksum sidecar, when present, is current and agrees with it.
    ///
    /// After local cleanup (no primary, no sidecar) the remote evidence alone
    /// answers, so the predicate stays true once a file has been archived
    /// and removed.
    pub async fn is_archived(&self, path: &FilePath) -> Result<bool> {
        let op = self.operating_path(path)?;
        let dest = self.destination(&op)?;

        let client = self.pool.acquire().await?;
        let Some(obj) = client.get_object(&dest).await? else {
            return Ok(false);
        };
        drop(client);

        if !obj.has_metadata(MD5_ATTR, &obj.checksum) {
            debug!(dest = %dest, "md5 metadata does not match server checksum");
            return Ok(false);
        }

        let sidecar = op.checksum_sibling();
        if sidecar.exists() {
            if crate::predicate::checksum_is_stale().eval(&op).matched {
                debug!(path = %op, "checksum sidecar is stale");
                return Ok(false);
            }
            if read_sidecar(&sidecar)? != obj.checksum {
                debug!(path = %op, dest = %dest, "local checksum disagrees with remote");
                return Ok(false);
            }
        } else if op.exists() {
            // A local file with no checksum proof cannot be called archived.
            return Ok(false);
        }

        Ok(true)
    }

    /// Parse a run report and upsert its tracking attributes onto the
    /// report's remote object, verifying the pairs landed.
    pub async fn annotate_report(&self, report: &FilePath, namespace: &str) -> Result<()> {
        let op = self.operating_path(report)?;
        let info = parse_report(report.as_path())?;
        let attrs = info.attributes(namespace)?;
        let dest = self.destination(&op)?;

        let client = self.pool.acquire().await?;
        client.annotate(&dest, &attrs).await?;

        let obj = client.get_object(&dest).await?.ok_or_else(|| ValetError::Verify {
            path: report.as_path().to_path_buf(),
            reason: format!("{dest}: cannot annotate a missing object"),
        })?;
        for pair in &attrs {
            if !obj.has_metadata(&pair.attr, &pair.value) {
                return Err(ValetError::Verify {
                    path: report.as_path().to_path_buf(),
                    reason: format!("{dest}: {}={} missing after annotation", pair.attr, pair.value),
                });
            }
        }

        info!(path = %report, dest = %dest, attrs = attrs.len(), "annotated");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
