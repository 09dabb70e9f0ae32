//! Error taxonomy for the valet engine.
//!
//! Setup errors are fatal before the pipeline starts; everything else is
//! recoverable at the pipeline level — logged, counted, and forwarded on the
//! error stream without closing the pipeline.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ValetError>;

#[derive(Debug, Error)]
pub enum ValetError {
    /// Invalid flags, missing roots, bad globs. Fatal at startup.
    #[error("setup: {0}")]
    Setup(String),

    /// A filesystem operation failed for a specific path.
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The kernel event source failed.
    #[error("watch: {0}")]
    Watch(#[from] notify::Error),

    /// A single entry could not be visited during a walk.
    #[error("walk: {0}")]
    WalkEntry(String),

    /// The remote object store reported a failure.
    #[error("store: {0}")]
    Store(String),

    /// No store client became available within the acquire timeout.
    #[error("store client pool exhausted")]
    PoolExhausted,

    /// A digest disagreed with its expected value.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Post-upload verification disagreed with local state.
    #[error("verification failed for {path}: {reason}")]
    Verify { path: PathBuf, reason: String },

    /// A report file could not be parsed into tracking metadata.
    #[error("report {path}: {reason}")]
    Report { path: PathBuf, reason: String },

    /// Aggregate result of a pipeline run with a non-zero failure count.
    #[error("{failed} of {processed} files failed")]
    Pipeline { failed: u64, processed: u64 },
}

impl ValetError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ValetError::Io { path: path.into(), source }
    }

    /// True for per-file conditions the pipeline logs and survives.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ValetError::Setup(_) | ValetError::Pipeline { .. })
    }
}
