//! valet-core — engine for a data-management daemon that watches instrument
//! output, maintains MD5 sidecars, compresses large files, and archives
//! verified copies to a remote object store.
//!
//! Discovery (watcher + interval sweeper) feeds a fair merge, which feeds a
//! bounded worker pool applying a rank-ordered work plan to each path. All
//! state lives on the filesystem and in the remote store.

pub mod archive;
pub mod checksum;
pub mod compress;
pub mod config;
pub mod error;
pub mod merge;
pub mod path;
pub mod pipeline;
pub mod plan;
pub mod pool;
pub mod predicate;
pub mod remote;
pub mod remove;
pub mod report;
pub mod sweep;
pub mod walk;
pub mod watch;

pub use archive::Archiver;
pub use config::Config;
pub use error::{Result, ValetError};
pub use path::FilePath;
pub use pipeline::{run_pipeline, run_single_sweep, PipelineOptions};
pub use plan::{archive_plan, checksum_plan, dry_run_plan, ArchiveOptions, WorkPlan};
pub use predicate::Predicate;
pub use remote::{AttrValue, ClientPool, FsObjectStore, StoreClient, StorePath};
