//! Absolute-path value type carrying a cached stat snapshot.
//!
//! A `FilePath` is constructed once per discovery event and never mutated.
//! Predicates that need fresher state call [`FilePath::restat`], which
//! returns a new value.

use std::fmt;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Result, ValetError};

/// Sidecar suffix for checksum files.
pub const CHECKSUM_EXT: &str = "md5";

/// Sidecar suffix for compressed files.
pub const COMPRESS_EXT: &str = "gz";

// ---------------------------------------------------------------------------
// Stat snapshot
// ---------------------------------------------------------------------------

/// Point-in-time stat of a path. Either fully populated or absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub is_dir: bool,
    pub is_file: bool,
    pub size: u64,
    pub modified: SystemTime,
}

impl FileInfo {
    fn from_metadata(meta: &Metadata) -> Option<Self> {
        Some(FileInfo {
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            size: meta.len(),
            modified: meta.modified().ok()?,
        })
    }
}

// ---------------------------------------------------------------------------
// FilePath
// ---------------------------------------------------------------------------

/// An absolute, lexically cleaned path plus an optional stat snapshot.
#[derive(Debug, Clone)]
pub struct FilePath {
    path: PathBuf,
    info: Option<FileInfo>,
}

impl FilePath {
    /// Clean and absolutize `path`, then attempt a stat. A failed stat (for
    /// example a path that vanished between event and construction) leaves the
    /// snapshot absent; it is never partially populated.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let abs = absolutize(path.as_ref())?;
        let info = std::fs::symlink_metadata(&abs)
            .ok()
            .and_then(|m| FileInfo::from_metadata(&m));
        Ok(FilePath { path: abs, info })
    }

    /// Like [`FilePath::new`] but skips the stat, so callers can reason about
    /// paths that do not exist yet (the hypothetical compressed sibling).
    pub fn hypothetical(path: impl AsRef<Path>) -> Result<Self> {
        Ok(FilePath { path: absolutize(path.as_ref())?, info: None })
    }

    /// Return a fresh value with a re-attempted stat.
    pub fn restat(&self) -> Self {
        let info = std::fs::symlink_metadata(&self.path)
            .ok()
            .and_then(|m| FileInfo::from_metadata(&m));
        FilePath { path: self.path.clone(), info }
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> Option<&FileInfo> {
        self.info.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.info.is_some()
    }

    pub fn is_dir(&self) -> bool {
        self.info.map(|i| i.is_dir).unwrap_or(false)
    }

    pub fn is_file(&self) -> bool {
        self.info.map(|i| i.is_file).unwrap_or(false)
    }

    pub fn size(&self) -> Option<u64> {
        self.info.map(|i| i.size)
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.info.map(|i| i.modified)
    }

    /// Final path component as UTF-8, or an empty string.
    pub fn file_name(&self) -> &str {
        self.path.file_name().and_then(|n| n.to_str()).unwrap_or("")
    }

    /// The checksum sidecar path: `<path>.md5`.
    pub fn checksum_sibling(&self) -> PathBuf {
        append_ext(&self.path, CHECKSUM_EXT)
    }

    /// The compressed sibling path: `<path>.gz`.
    pub fn compressed_sibling(&self) -> PathBuf {
        append_ext(&self.path, COMPRESS_EXT)
    }

    /// The checksum sidecar of the compressed sibling: `<path>.gz.md5`.
    pub fn compressed_checksum_sibling(&self) -> PathBuf {
        append_ext(&self.compressed_sibling(), CHECKSUM_EXT)
    }

    /// The path with a trailing `.gz` removed, or the path itself.
    pub fn uncompressed_name(&self) -> PathBuf {
        match self.path.to_str() {
            Some(s) if s.ends_with(".gz") => PathBuf::from(&s[..s.len() - 3]),
            _ => self.path.clone(),
        }
    }

    /// Whether `suffix` matches this path, anchored as `.{suffix}$`,
    /// case-sensitive.
    pub fn has_suffix(&self, suffix: &str) -> bool {
        match self.path.to_str() {
            Some(s) => {
                s.len() > suffix.len() + 1
                    && s.ends_with(suffix)
                    && s.as_bytes()[s.len() - suffix.len() - 1] == b'.'
            }
            None => false,
        }
    }
}

impl PartialEq for FilePath {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for FilePath {}

impl std::hash::Hash for FilePath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.path.display().fmt(f)
    }
}

impl AsRef<Path> for FilePath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Append `ext` to the full file name (`reads.fastq` -> `reads.fastq.md5`).
fn append_ext(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(ext);
    path.with_file_name(name)
}

/// Absolutize against the current directory and lexically clean: `.` removed,
/// `..` resolved against the accumulated prefix, no filesystem access.
fn absolutize(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| ValetError::Setup(format!("current directory: {e}")))?;
        cwd.join(path)
    };

    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::RootDir);
                }
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolutize_cleans_dots() {
        let p = absolutize(Path::new("/data/run/./reads/../reads.fastq")).unwrap();
        assert_eq!(p, PathBuf::from("/data/run/reads.fastq"));
    }

    #[test]
    fn test_absolutize_relative() {
        let p = absolutize(Path::new("reads.fastq")).unwrap();
        assert!(p.is_absolute());
        assert!(p.ends_with("reads.fastq"));
    }

    #[test]
    fn test_sibling_names() {
        let p = FilePath::hypothetical("/data/reads.fastq").unwrap();
        assert_eq!(p.checksum_sibling(), PathBuf::from("/data/reads.fastq.md5"));
        assert_eq!(p.compressed_sibling(), PathBuf::from("/data/reads.fastq.gz"));
        assert_eq!(
            p.compressed_checksum_sibling(),
            PathBuf::from("/data/reads.fastq.gz.md5")
        );
    }

    #[test]
    fn test_uncompressed_name() {
        let gz = FilePath::hypothetical("/data/reads.fastq.gz").unwrap();
        assert_eq!(gz.uncompressed_name(), PathBuf::from("/data/reads.fastq"));
        let plain = FilePath::hypothetical("/data/reads.fastq").unwrap();
        assert_eq!(plain.uncompressed_name(), PathBuf::from("/data/reads.fastq"));
    }

    #[test]
    fn test_has_suffix_anchored() {
        let p = FilePath::hypothetical("/data/reads.fastq").unwrap();
        assert!(p.has_suffix("fastq"));
        assert!(!p.has_suffix("fast"));
        assert!(!p.has_suffix("FASTQ"));
        // `.{suffix}` must be a proper suffix with the dot present
        let q = FilePath::hypothetical("/data/fastq").unwrap();
        assert!(!q.has_suffix("fastq"));
    }

    #[test]
    fn test_stat_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.txt");
        std::fs::write(&file, b"abc").unwrap();

        let p = FilePath::new(&file).unwrap();
        assert!(p.exists());
        assert!(p.is_file());
        assert_eq!(p.size(), Some(3));

        let gone = FilePath::new(dir.path().join("missing.txt")).unwrap();
        assert!(!gone.exists());
        assert!(gone.info().is_none());
    }

    #[test]
    fn test_restat_returns_new_value() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.txt");
        let p = FilePath::new(&file).unwrap();
        assert!(!p.exists());

        std::fs::write(&file, b"abc").unwrap();
        let q = p.restat();
        assert!(!p.exists());
        assert!(q.exists());
    }
}
