//! Streaming gzip compression with inline checksums.
//!
//! A single pass over the source computes the uncompressed MD5, writes the
//! gzip stream to a temp file while computing the compressed MD5, then lands
//! `<path>.gz` by atomic rename and writes both checksum sidecars. The source
//! file is never modified.

use std::io::{Read, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use tracing::{debug, info};

use crate::checksum::{hex_digest, write_sidecar};
use crate::error::{Result, ValetError};
use crate::path::FilePath;

const COPY_BUF: usize = 64 * 1024;

/// Digests produced by one compression pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedDigests {
    /// MD5 of the source bytes.
    pub raw: String,
    /// MD5 of the gzip stream as written.
    pub compressed: String,
}

/// An `io::Write` that feeds a hasher before forwarding to the inner writer.
struct TeeWriter<W: Write> {
    inner: W,
    hasher: Md5,
}

impl<W: Write> TeeWriter<W> {
    fn new(inner: W) -> Self {
        TeeWriter { inner, hasher: Md5::new() }
    }

    fn finish(self) -> (W, [u8; 16]) {
        (self.inner, self.hasher.finalize().into())
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Compress `path` to `<path>.gz`, writing `<path>.gz.md5` and `<path>.md5`.
///
/// The temp file lives in the destination directory so the final rename is
/// atomic; on any failure before the rename it is removed on drop.
pub fn compress_file(path: &FilePath) -> Result<CompressedDigests> {
    let src_path = path.as_path();
    let dest = path.compressed_sibling();
    let dir = dest
        .parent()
        .ok_or_else(|| ValetError::io(&dest, std::io::Error::other("no parent directory")))?;

    let started = std::time::Instant::now();
    let mut src = std::fs::File::open(src_path).map_err(|e| ValetError::io(src_path, e))?;
    let tmp = tempfile::Builder::new()
        .prefix(".valet-")
        .suffix(".gz.tmp")
        .tempfile_in(dir)
        .map_err(|e| ValetError::io(&dest, e))?;

    // source -> raw hasher -> gzip -> compressed hasher -> temp file
    let tee = TeeWriter::new(tmp);
    let mut encoder = GzEncoder::new(tee, Compression::default());
    let mut raw_hasher = Md5::new();
    let mut buf = [0u8; COPY_BUF];
    let mut copied = 0u64;
    loop {
        let n = src.read(&mut buf).map_err(|e| ValetError::io(src_path, e))?;
        if n == 0 {
            break;
        }
        raw_hasher.update(&buf[..n]);
        encoder
            .write_all(&buf[..n])
            .map_err(|e| ValetError::io(&dest, e))?;
        copied += n as u64;
    }

    let tee = encoder.finish().map_err(|e| ValetError::io(&dest, e))?;
    let (mut tmp, gz_digest) = tee.finish();
    tmp.flush().map_err(|e| ValetError::io(&dest, e))?;
    tmp.persist(&dest).map_err(|e| ValetError::io(&dest, e.error))?;

    let raw_digest: [u8; 16] = raw_hasher.finalize().into();
    let digests = CompressedDigests {
        raw: hex_digest(&raw_digest),
        compressed: hex_digest(&gz_digest),
    };

    write_sidecar(&path.compressed_checksum_sibling(), &digests.compressed)?;
    write_sidecar(&path.checksum_sibling(), &digests.raw)?;

    info!(
        path = %path,
        bytes = copied,
        md5 = %digests.raw,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "compressed"
    );
    debug!(dest = %dest.display(), gz_md5 = %digests.compressed, "compressed rendition");
    Ok(digests)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
