//! MD5 checksum sidecar maintenance.
//!
//! Sidecars are `<path>.md5` files holding the lower-case hex digest of the
//! primary file's bytes followed by a single newline. Writes go through a
//! temp file in the destination directory and an atomic rename, so partial
//! writes are never visible and an existing sidecar is never overwritten in
//! place.

use std::io::{Read, Write};
use std::path::Path;

use md5::{Digest, Md5};
use tracing::debug;

use crate::error::{Result, ValetError};
use crate::path::FilePath;
use crate::predicate::{checksum_is_stale, has_checksum, Predicate};

const READ_BUF: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// Stream-read `path` and return the MD5 digest of its bytes.
pub fn md5_of_file(path: &Path) -> Result<[u8; 16]> {
    let mut file = std::fs::File::open(path).map_err(|e| ValetError::io(path, e))?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; READ_BUF];
    loop {
        let n = file.read(&mut buf).map_err(|e| ValetError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Lower-case hex rendering of a digest.
pub fn hex_digest(digest: &[u8; 16]) -> String {
    let mut s = String::with_capacity(32);
    for b in digest {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

// ---------------------------------------------------------------------------
// Sidecar IO
// ---------------------------------------------------------------------------

/// Write `hex` + `\n` to `sidecar` via a temp file and atomic rename.
///
/// The temp file lives in the sidecar's own directory: rename(2) is atomic
/// only within a single filesystem.
pub fn write_sidecar(sidecar: &Path, hex: &str) -> Result<()> {
    let dir = sidecar
        .parent()
        .ok_or_else(|| ValetError::io(sidecar, std::io::Error::other("no parent directory")))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".valet-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| ValetError::io(sidecar, e))?;
    tmp.write_all(hex.as_bytes()).map_err(|e| ValetError::io(sidecar, e))?;
    tmp.write_all(b"\n").map_err(|e| ValetError::io(sidecar, e))?;
    tmp.flush().map_err(|e| ValetError::io(sidecar, e))?;
    tmp.persist(sidecar)
        .map_err(|e| ValetError::io(sidecar, e.error))?;
    Ok(())
}

/// Read a sidecar's digest: everything up to the first newline, with
/// surrounding whitespace tolerated.
pub fn read_sidecar(sidecar: &Path) -> Result<String> {
    let content = std::fs::read_to_string(sidecar).map_err(|e| ValetError::io(sidecar, e))?;
    let first = content.lines().next().unwrap_or("");
    Ok(first.trim().to_string())
}

/// Remove `<path>.md5` and, if present, `<path>.gz.md5`. Missing files are
/// not an error.
pub fn remove_sidecars(path: &FilePath) -> Result<()> {
    for sidecar in [path.checksum_sibling(), path.compressed_checksum_sibling()] {
        match std::fs::remove_file(&sidecar) {
            Ok(()) => debug!(path = %sidecar.display(), "removed checksum sidecar"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ValetError::io(&sidecar, e)),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Create-or-update
// ---------------------------------------------------------------------------

/// Ensure `<path>.md5` exists and is current.
///
/// A stale sidecar is removed and re-created; a missing sidecar is created;
/// a valid sidecar is left untouched, so the operation is idempotent.
pub fn ensure_checksum(path: &FilePath) -> Result<()> {
    let current = path.restat();
    let stale = checksum_is_stale().eval(&current).matched;
    let present = has_checksum().eval(&current).matched;

    if present && !stale {
        debug!(path = %current, "checksum sidecar is current");
        return Ok(());
    }

    if stale {
        let sidecar = current.checksum_sibling();
        match std::fs::remove_file(&sidecar) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ValetError::io(&sidecar, e)),
        }
    }

    let digest = md5_of_file(current.as_path())?;
    let hex = hex_digest(&digest);
    write_sidecar(&current.checksum_sibling(), &hex)?;
    debug!(path = %current, md5 = %hex, "wrote checksum sidecar");
    Ok(())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Walk `root` and count archivable files whose sidecar is missing or stale.
/// Returns `(needing_work, examined)`.
pub async fn count_missing_checksums(
    root: FilePath,
    suffixes: &[String],
    pruner: Predicate,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<(u64, u64)> {
    let matcher = crate::predicate::all_of(vec![
        crate::predicate::is_regular(),
        crate::predicate::requires_archiving(suffixes),
    ]);
    let needs = crate::predicate::requires_checksum(suffixes);

    let (mut paths, _errors) = crate::walk::walk_channel(root, matcher, pruner, cancel);

    // Workers aggregate into one guarded counter.
    let missing = std::sync::Mutex::new(0u64);
    let mut examined = 0u64;
    while let Some(path) = paths.recv().await {
        examined += 1;
        if needs.eval(&path).matched {
            debug!(path = %path, "checksum missing or stale");
            *missing.lock().unwrap() += 1;
        }
    }
    let missing = *missing.lock().unwrap();
    Ok((missing, examined))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};

    // MD5 of "hello world\n" (printf 'hello world\n' | md5sum)
    const HELLO_MD5: &str = "6f5902ac237024bdd0c176cb93063dc4";

    #[test]
    fn test_md5_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("x.txt");
        std::fs::write(&f, b"hello world\n").unwrap();
        assert_eq!(hex_digest(&md5_of_file(&f).unwrap()), HELLO_MD5);
    }

    #[test]
    fn test_sidecar_roundtrip_and_format() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("x.txt.md5");
        write_sidecar(&sidecar, HELLO_MD5).unwrap();

        let raw = std::fs::read_to_string(&sidecar).unwrap();
        assert_eq!(raw, format!("{HELLO_MD5}\n"));
        assert_eq!(read_sidecar(&sidecar).unwrap(), HELLO_MD5);
    }

    #[test]
    fn test_read_sidecar_tolerates_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("x.txt.md5");
        std::fs::write(&sidecar, format!("  {HELLO_MD5}\t\nnoise")).unwrap();
        assert_eq!(read_sidecar(&sidecar).unwrap(), HELLO_MD5);
    }

    #[test]
    fn test_ensure_checksum_creates_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("reads.fastq");
        std::fs::write(&f, b"hello world\n").unwrap();
        let p = FilePath::new(&f).unwrap();

        ensure_checksum(&p).unwrap();
        let sidecar = p.checksum_sibling();
        assert_eq!(read_sidecar(&sidecar).unwrap(), HELLO_MD5);

        let before = std::fs::metadata(&sidecar).unwrap().modified().unwrap();
        ensure_checksum(&p).unwrap();
        let after = std::fs::metadata(&sidecar).unwrap().modified().unwrap();
        assert_eq!(before, after, "second run must not rewrite the sidecar");
    }

    #[test]
    fn test_ensure_checksum_replaces_stale() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("reads.fastq");
        std::fs::write(&f, b"hello world\n").unwrap();
        let sidecar = dir.path().join("reads.fastq.md5");
        std::fs::write(&sidecar, "0000\n").unwrap();
        set_file_mtime(&sidecar, FileTime::from_unix_time(1_000_000, 0)).unwrap();

        let p = FilePath::new(&f).unwrap();
        ensure_checksum(&p).unwrap();
        assert_eq!(read_sidecar(&sidecar).unwrap(), HELLO_MD5);
    }

    #[tokio::test]
    async fn test_count_missing_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let suffixes = vec!["fastq".to_string(), "bam".to_string()];

        // Seven archivable files, three without a sidecar.
        for i in 0..7 {
            let name = if i % 2 == 0 { format!("f{i}.fastq") } else { format!("f{i}.bam") };
            let f = dir.path().join(&name);
            std::fs::write(&f, b"data").unwrap();
            if i >= 3 {
                ensure_checksum(&FilePath::new(&f).unwrap()).unwrap();
            }
        }
        std::fs::write(dir.path().join("ignored.log"), b"x").unwrap();

        let (missing, examined) = count_missing_checksums(
            FilePath::new(dir.path()).unwrap(),
            &suffixes,
            crate::predicate::match_none(),
            tokio_util::sync::CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(examined, 7);
        assert_eq!(missing, 3);
    }

    #[test]
    fn test_remove_sidecars_missing_ok() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("reads.fastq");
        std::fs::write(&f, b"x").unwrap();
        let p = FilePath::new(&f).unwrap();

        remove_sidecars(&p).unwrap();

        std::fs::write(p.checksum_sibling(), "aa\n").unwrap();
        std::fs::write(p.compressed_checksum_sibling(), "bb\n").unwrap();
        remove_sidecars(&p).unwrap();
        assert!(!p.checksum_sibling().exists());
        assert!(!p.compressed_checksum_sibling().exists());
    }
}
