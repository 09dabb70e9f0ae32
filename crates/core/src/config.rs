//! Runtime configuration for the engine.
//!
//! Everything has a sensible default for Oxford Nanopore instrument output;
//! a `valet.toml` at the monitored root may override any field.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::predicate::LARGE_FILE_THRESHOLD;

/// Smallest permitted sweep interval.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Default sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Config file name looked up at the monitored root.
pub const CONFIG_FILE: &str = "valet.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// File suffixes eligible for checksumming and archival.
    pub archive_suffixes: Vec<String>,
    /// Directory names ignored when they sit directly under the data root.
    pub ignore_dirs: Vec<String>,
    /// Files strictly larger than this are compressed before archival.
    pub large_file_threshold: u64,
    /// Namespace prefix for report metadata attributes.
    pub namespace: String,
    /// When uploading a `.gz`, also attach the uncompressed digest.
    pub annotate_uncompressed_checksum: bool,
    /// Glob selecting instrument run reports for annotation.
    pub report_glob: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            archive_suffixes: [
                "fast5", "pod5", "fastq", "bam", "bai", "bed", "csv", "txt", "md", "pdf",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ignore_dirs: [
                "intermediate",
                "queued_reads",
                "reports",
                "pings",
                "reads",
                "npg",
                "epi2me_inside",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            large_file_threshold: LARGE_FILE_THRESHOLD,
            namespace: "ont".to_string(),
            annotate_uncompressed_checksum: true,
            report_glob: "**/report*.md".to_string(),
        }
    }
}

impl Config {
    /// Load `valet.toml` from `root` if present; fall back to defaults.
    /// A malformed file is reported and ignored rather than refusing to start.
    pub fn load(root: &Path) -> Config {
        let path = root.join(CONFIG_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Config::default(),
        };
        match toml::from_str::<Config>(&content) {
            Ok(config) => {
                info!(path = %path.display(), "loaded configuration");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring malformed config");
                Config::default()
            }
        }
    }

    /// Clamp a requested sweep interval to the permitted minimum.
    pub fn clamp_interval(interval: Duration) -> Duration {
        interval.max(MIN_SWEEP_INTERVAL)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert!(c.archive_suffixes.iter().any(|s| s == "fast5"));
        assert!(c.archive_suffixes.iter().any(|s| s == "pod5"));
        assert!(!c.archive_suffixes.iter().any(|s| s == "gz"));
        assert!(c.ignore_dirs.iter().any(|s| s == "queued_reads"));
        assert_eq!(c.large_file_threshold, 524_288_000);
        assert!(c.annotate_uncompressed_checksum);
    }

    #[test]
    fn test_load_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
archive_suffixes = ["fastq"]
large_file_threshold = 1024
namespace = "npg"
"#,
        )
        .unwrap();

        let c = Config::load(dir.path());
        assert_eq!(c.archive_suffixes, vec!["fastq".to_string()]);
        assert_eq!(c.large_file_threshold, 1024);
        assert_eq!(c.namespace, "npg");
        // Unspecified fields keep their defaults
        assert!(c.ignore_dirs.iter().any(|s| s == "pings"));
    }

    #[test]
    fn test_malformed_config_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "not [valid").unwrap();
        let c = Config::load(dir.path());
        assert_eq!(c.namespace, "ont");
    }

    #[test]
    fn test_interval_clamp() {
        assert_eq!(
            Config::clamp_interval(Duration::from_secs(1)),
            MIN_SWEEP_INTERVAL
        );
        assert_eq!(
            Config::clamp_interval(Duration::from_secs(600)),
            Duration::from_secs(600)
        );
    }
}
