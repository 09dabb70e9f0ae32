//! Idempotent local deletion of archived files and their siblings.

use tracing::info;

use crate::checksum::remove_sidecars;
use crate::error::{Result, ValetError};
use crate::path::FilePath;

fn remove_if_present(path: &std::path::Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ValetError::io(path, e)),
    }
}

/// Delete the primary file and its `.gz` sibling. Missing files are not an
/// error, so a rerun after partial cleanup succeeds.
pub fn remove_file(path: &FilePath) -> Result<()> {
    if remove_if_present(path.as_path())? {
        info!(path = %path, "removed archived file");
    }
    if remove_if_present(&path.compressed_sibling())? {
        info!(path = %path.compressed_sibling().display(), "removed compressed rendition");
    }
    Ok(())
}

/// Delete the `.md5` and `.gz.md5` sidecars. Missing files are not an error.
pub fn remove_checksum_siblings(path: &FilePath) -> Result<()> {
    remove_sidecars(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_file_and_rendition() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("reads.bam");
        std::fs::write(&f, b"data").unwrap();
        std::fs::write(dir.path().join("reads.bam.gz"), b"gz").unwrap();
        let p = FilePath::new(&f).unwrap();

        remove_file(&p).unwrap();
        assert!(!f.exists());
        assert!(!p.compressed_sibling().exists());

        // Second run is a no-op, not an error
        remove_file(&p).unwrap();
    }
}
