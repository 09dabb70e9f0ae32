//! Composable boolean predicates over paths.
//!
//! Every predicate yields a [`Decision`]: a match bit plus an orthogonal
//! prune signal. The prune signal is consumed only by the walker and the
//! watcher to avoid descending into a directory; it is never an error.
//! Combinators short-circuit in document order, and a prune signal produced
//! by any evaluated sub-predicate propagates unchanged through `and`, `or`,
//! and `not`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use globset::GlobSet;

use crate::path::FilePath;

/// Files strictly larger than this are "large" (500 MiB).
pub const LARGE_FILE_THRESHOLD: u64 = 524_288_000;

// ---------------------------------------------------------------------------
// Decision and Predicate
// ---------------------------------------------------------------------------

/// Outcome of evaluating a predicate against a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub matched: bool,
    pub prune: bool,
}

impl Decision {
    pub const MATCH: Decision = Decision { matched: true, prune: false };
    pub const NO_MATCH: Decision = Decision { matched: false, prune: false };

    pub fn matched(matched: bool) -> Decision {
        Decision { matched, prune: false }
    }
}

/// A pure function from path to [`Decision`]. Cheap to clone.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&FilePath) -> Decision + Send + Sync>);

impl Predicate {
    pub fn new(f: impl Fn(&FilePath) -> Decision + Send + Sync + 'static) -> Self {
        Predicate(Arc::new(f))
    }

    pub fn eval(&self, path: &FilePath) -> Decision {
        (self.0)(path)
    }

    /// All of `self` and `others` match. Short-circuits on the first
    /// non-match; prune signals from evaluated sub-predicates are OR-ed.
    pub fn and(self, other: Predicate) -> Predicate {
        all_of(vec![self, other])
    }

    /// Either `self` or `other` matches. Short-circuits on the first match.
    pub fn or(self, other: Predicate) -> Predicate {
        any_of(vec![self, other])
    }

    /// Inverted match; the prune signal passes through unchanged.
    pub fn not(self) -> Predicate {
        Predicate::new(move |p| {
            let d = self.eval(p);
            Decision { matched: !d.matched, prune: d.prune }
        })
    }
}

/// Conjunction over any number of predicates, in document order.
pub fn all_of(preds: Vec<Predicate>) -> Predicate {
    Predicate::new(move |p| {
        let mut prune = false;
        for pred in &preds {
            let d = pred.eval(p);
            prune |= d.prune;
            if !d.matched {
                return Decision { matched: false, prune };
            }
        }
        Decision { matched: true, prune }
    })
}

/// Disjunction over any number of predicates, in document order.
pub fn any_of(preds: Vec<Predicate>) -> Predicate {
    Predicate::new(move |p| {
        let mut prune = false;
        for pred in &preds {
            let d = pred.eval(p);
            prune |= d.prune;
            if d.matched {
                return Decision { matched: true, prune };
            }
        }
        Decision { matched: false, prune }
    })
}

// ---------------------------------------------------------------------------
// Standard predicates
// ---------------------------------------------------------------------------

pub fn match_all() -> Predicate {
    Predicate::new(|_| Decision::MATCH)
}

pub fn match_none() -> Predicate {
    Predicate::new(|_| Decision::NO_MATCH)
}

pub fn is_dir() -> Predicate {
    Predicate::new(|p| Decision::matched(p.is_dir()))
}

pub fn is_regular() -> Predicate {
    Predicate::new(|p| Decision::matched(p.is_file()))
}

/// Strictly greater than `threshold` bytes.
pub fn larger_than(threshold: u64) -> Predicate {
    Predicate::new(move |p| Decision::matched(p.size().map(|s| s > threshold).unwrap_or(false)))
}

/// Anchored, case-sensitive `.{suffix}$` match against any of `suffixes`.
pub fn has_suffix_in(suffixes: Vec<String>) -> Predicate {
    Predicate::new(move |p| Decision::matched(suffixes.iter().any(|s| p.has_suffix(s))))
}

pub fn has_suffix(suffix: &str) -> Predicate {
    has_suffix_in(vec![suffix.to_string()])
}

/// A `<path>.md5` sidecar exists.
pub fn has_checksum() -> Predicate {
    Predicate::new(|p| Decision::matched(p.checksum_sibling().exists()))
}

/// A `<path>.md5` sidecar exists and is older than the primary.
pub fn checksum_is_stale() -> Predicate {
    Predicate::new(|p| Decision::matched(sibling_is_stale(p, &p.checksum_sibling())))
}

/// A `<path>.gz` sibling exists.
pub fn has_compressed_sibling() -> Predicate {
    Predicate::new(|p| Decision::matched(p.compressed_sibling().exists()))
}

/// A `<path>.gz` sibling exists and is older than the primary.
pub fn compressed_is_stale() -> Predicate {
    Predicate::new(|p| Decision::matched(sibling_is_stale(p, &p.compressed_sibling())))
}

/// A compressed rendition of this file exists: either the path is itself a
/// `.gz`, or a `<path>.gz` sibling is present.
pub fn has_compressed_version() -> Predicate {
    Predicate::new(|p| {
        Decision::matched(p.has_suffix(crate::path::COMPRESS_EXT) || p.compressed_sibling().exists())
    })
}

/// Stale iff the primary's mtime is strictly after the sibling's mtime.
/// Equal mtimes are fresh; a missing sibling is not stale.
fn sibling_is_stale(primary: &FilePath, sibling: &Path) -> bool {
    let primary_mtime = match primary.modified() {
        Some(t) => t,
        None => match fresh_mtime(primary.as_path()) {
            Some(t) => t,
            None => return false,
        },
    };
    match fresh_mtime(sibling) {
        Some(sibling_mtime) => primary_mtime > sibling_mtime,
        None => false,
    }
}

fn fresh_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::symlink_metadata(path).ok().and_then(|m| m.modified().ok())
}

// ---------------------------------------------------------------------------
// Prune predicates
// ---------------------------------------------------------------------------

/// Matches (and signals prune for) directories named in `names` that sit
/// directly under `root`. This is the default ignore rule for instrument
/// output layouts, where bookkeeping directories live at the data root.
pub fn prune_names_under(root: PathBuf, names: Vec<String>) -> Predicate {
    Predicate::new(move |p| {
        let hit = p.is_dir()
            && p.as_path().parent() == Some(root.as_path())
            && names.iter().any(|n| p.file_name() == n);
        Decision { matched: hit, prune: hit }
    })
}

/// Matches (and signals prune for) any path whose root-relative form matches
/// one of the compiled glob patterns.
pub fn prune_globs(root: PathBuf, globs: GlobSet) -> Predicate {
    Predicate::new(move |p| {
        let rel = p.as_path().strip_prefix(&root).unwrap_or(p.as_path());
        let hit = globs.is_match(rel);
        Decision { matched: hit, prune: hit }
    })
}

/// Plain glob match on the root-relative path, with no prune signal.
pub fn matches_globs(root: PathBuf, globs: GlobSet) -> Predicate {
    Predicate::new(move |p| {
        let rel = p.as_path().strip_prefix(&root).unwrap_or(p.as_path());
        Decision::matched(globs.is_match(rel))
    })
}

// ---------------------------------------------------------------------------
// Composite predicates
// ---------------------------------------------------------------------------

/// Any-of the configured archive suffixes.
pub fn requires_archiving(suffixes: &[String]) -> Predicate {
    has_suffix_in(suffixes.to_vec())
}

/// A regular archivable file whose checksum sidecar is missing or stale.
pub fn requires_checksum(suffixes: &[String]) -> Predicate {
    all_of(vec![
        is_regular(),
        requires_archiving(suffixes),
        any_of(vec![has_checksum().not(), checksum_is_stale()]),
    ])
}

/// A regular, large, archivable file whose compressed sibling is missing or
/// stale.
pub fn requires_compression(suffixes: &[String], threshold: u64) -> Predicate {
    all_of(vec![
        is_regular(),
        larger_than(threshold),
        requires_archiving(suffixes),
        any_of(vec![has_compressed_sibling().not(), compressed_is_stale()]),
    ])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
