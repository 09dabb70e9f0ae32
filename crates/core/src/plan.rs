//! Rank-ordered work plans.
//!
//! A plan is an ordered list of rules, each a guard plus an action. Rules run
//! in ascending rank (stable for ties), and every guard is re-evaluated
//! against the path's current state because earlier actions change sibling
//! existence and mtimes — the archive guard must see the checksum the
//! previous rule just wrote. A failing action (or guard) stops the path;
//! later rules are skipped and the error surfaces to the pool.

use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::archive::Archiver;
use crate::checksum::ensure_checksum;
use crate::config::Config;
use crate::error::{Result, ValetError};
use crate::path::FilePath;
use crate::predicate::{self, Predicate};
use crate::remove::{remove_checksum_siblings, remove_file};

type BoxFut<T> = Pin<Box<dyn std::future::Future<Output = T> + Send>>;

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// A rule guard: a predicate that may also consult the remote store.
#[derive(Clone)]
pub struct Guard(Arc<dyn Fn(FilePath) -> BoxFut<Result<bool>> + Send + Sync>);

impl Guard {
    pub fn new<F>(f: F) -> Guard
    where
        F: Fn(FilePath) -> BoxFut<Result<bool>> + Send + Sync + 'static,
    {
        Guard(Arc::new(f))
    }

    /// Lift a pure predicate; only its match bit is consulted here.
    pub fn lift(pred: Predicate) -> Guard {
        Guard::new(move |path| {
            let matched = pred.eval(&path).matched;
            Box::pin(async move { Ok(matched) })
        })
    }

    pub async fn check(&self, path: &FilePath) -> Result<bool> {
        (self.0)(path.clone()).await
    }

    pub fn and(self, other: Guard) -> Guard {
        Guard::new(move |path| {
            let a = self.clone();
            let b = other.clone();
            Box::pin(async move { Ok(a.check(&path).await? && b.check(&path).await?) })
        })
    }

    pub fn or(self, other: Guard) -> Guard {
        Guard::new(move |path| {
            let a = self.clone();
            let b = other.clone();
            Box::pin(async move { Ok(a.check(&path).await? || b.check(&path).await?) })
        })
    }

    pub fn not(self) -> Guard {
        Guard::new(move |path| {
            let inner = self.clone();
            Box::pin(async move { Ok(!inner.check(&path).await?) })
        })
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// A work-plan action applied to one path.
#[derive(Clone)]
pub struct Action(Arc<dyn Fn(FilePath) -> BoxFut<Result<()>> + Send + Sync>);

impl Action {
    pub fn new<F>(f: F) -> Action
    where
        F: Fn(FilePath) -> BoxFut<Result<()>> + Send + Sync + 'static,
    {
        Action(Arc::new(f))
    }

    pub fn noop() -> Action {
        Action::new(|_| Box::pin(async { Ok(()) }))
    }

    /// Wrap a synchronous, I/O-heavy function so it runs off the async
    /// executor.
    pub fn blocking<F>(f: F) -> Action
    where
        F: Fn(&FilePath) -> Result<()> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Action::new(move |path| {
            let f = Arc::clone(&f);
            Box::pin(async move {
                tokio::task::spawn_blocking(move || f(&path))
                    .await
                    .map_err(|e| ValetError::Setup(format!("action task failed: {e}")))?
            })
        })
    }

    pub async fn call(&self, path: FilePath) -> Result<()> {
        (self.0)(path).await
    }
}

// ---------------------------------------------------------------------------
// Rules and plans
// ---------------------------------------------------------------------------

/// One (guard, action, rank) triple. Lower rank runs first; ties may run in
/// either order and the canonical plans are robust to both.
#[derive(Clone)]
pub struct Rule {
    pub name: &'static str,
    pub rank: u8,
    pub when: Guard,
    pub run: Action,
}

impl Rule {
    pub fn new(name: &'static str, rank: u8, when: Guard, run: Action) -> Rule {
        Rule { name, rank, when, run }
    }
}

#[derive(Clone)]
pub struct WorkPlan {
    name: &'static str,
    rules: Vec<Rule>,
}

impl WorkPlan {
    pub fn new(name: &'static str, mut rules: Vec<Rule>) -> WorkPlan {
        rules.sort_by_key(|r| r.rank);
        WorkPlan { name, rules }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Run the plan against one path. Returns the number of rules that
    /// fired. An empty plan is the implicit do-nothing.
    pub async fn apply(&self, path: &FilePath) -> Result<usize> {
        let mut fired = 0usize;
        for rule in &self.rules {
            let current = path.restat();
            if rule.when.check(&current).await? {
                debug!(rule = rule.name, path = %current, "rule firing");
                rule.run.call(current).await?;
                fired += 1;
            }
        }
        Ok(fired)
    }
}

// ---------------------------------------------------------------------------
// Canonical plans
// ---------------------------------------------------------------------------

/// Matches every path, does nothing. Substituted under `--dry-run`.
pub fn dry_run_plan() -> WorkPlan {
    WorkPlan::new(
        "dry-run",
        vec![Rule::new("touch nothing", 1, Guard::lift(predicate::match_all()), Action::noop())],
    )
}

/// Keep checksum sidecars current for every archivable file.
pub fn checksum_plan(config: &Config) -> WorkPlan {
    WorkPlan::new(
        "checksum",
        vec![Rule::new(
            "create or update checksum",
            1,
            Guard::lift(predicate::requires_checksum(&config.archive_suffixes)),
            Action::blocking(ensure_checksum),
        )],
    )
}

/// Knobs for [`archive_plan`].
#[derive(Debug, Clone, Copy)]
pub struct ArchiveOptions {
    /// Gzip files over the configured threshold before upload.
    pub compress_large: bool,
    /// Remove local files and sidecars once the upload has verified.
    pub delete_local: bool,
}

/// The full archival plan: compress, checksum, upload, clean up.
pub fn archive_plan(config: &Config, archiver: Archiver, opts: ArchiveOptions) -> WorkPlan {
    let suffixes = &config.archive_suffixes;
    let mut rules = Vec::new();

    if opts.compress_large {
        rules.push(Rule::new(
            "compress large file",
            1,
            Guard::lift(predicate::requires_compression(suffixes, config.large_file_threshold)),
            Action::blocking(|p| crate::compress::compress_file(p).map(|_| ())),
        ));
    }

    let mut checksum_guard = Guard::lift(predicate::requires_checksum(suffixes));
    if opts.compress_large {
        // Compression writes both sidecars itself; do not checksum what the
        // rank-1 rule is about to replace.
        checksum_guard = checksum_guard.and(
            Guard::lift(predicate::requires_compression(suffixes, config.large_file_threshold))
                .not(),
        );
    }
    rules.push(Rule::new(
        "create or update checksum",
        2,
        checksum_guard,
        Action::blocking(ensure_checksum),
    ));

    let archivable = Guard::lift(predicate::any_of(vec![
        predicate::requires_archiving(suffixes),
        predicate::has_compressed_version(),
    ]));
    let not_archived = {
        let archiver = archiver.clone();
        Guard::new(move |path| {
            let archiver = archiver.clone();
            Box::pin(async move { archiver.is_archived(&path).await })
        })
        .not()
    };
    let upload = {
        let archiver = archiver.clone();
        Action::new(move |path| {
            let archiver = archiver.clone();
            Box::pin(async move { archiver.archive(&path).await })
        })
    };
    rules.push(Rule::new("archive", 3, archivable.and(not_archived), upload));

    if opts.delete_local {
        let archived = Guard::new(move |path| {
            let archiver = archiver.clone();
            Box::pin(async move { archiver.is_archived(&path).await })
        });
        rules.push(Rule::new("remove archived file", 4, archived, Action::blocking(remove_file)));
        rules.push(Rule::new(
            "remove checksum sidecars",
            5,
            Guard::lift(predicate::has_checksum()),
            Action::blocking(remove_checksum_siblings),
        ));
    }

    WorkPlan::new("archive", rules)
}

/// Annotate run reports with their tracking metadata.
pub fn annotate_plan(
    root: std::path::PathBuf,
    reports: globset::GlobSet,
    archiver: Archiver,
    namespace: String,
) -> WorkPlan {
    let guard = Guard::lift(
        predicate::is_regular().and(predicate::matches_globs(root, reports)),
    );
    let run = Action::new(move |path| {
        let archiver = archiver.clone();
        let namespace = namespace.clone();
        Box::pin(async move { archiver.annotate_report(&path, &namespace).await })
    });
    WorkPlan::new("annotate", vec![Rule::new("annotate run report", 1, guard, run)])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
