//! valet — thin CLI shell over the [`valet_core`] engine.
//!
//! Watches a tree of instrument output and keeps checksums current,
//! compresses large files, archives verified copies to an object store, and
//! annotates archived run reports.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use valet_core::checksum::count_missing_checksums;
use valet_core::plan::annotate_plan;
use valet_core::predicate::{self, Predicate};
use valet_core::remote::pool::DEFAULT_ACQUIRE_TIMEOUT;
use valet_core::{
    archive_plan, checksum_plan, dry_run_plan, run_pipeline, run_single_sweep, ArchiveOptions,
    Archiver, ClientPool, Config, FilePath, FsObjectStore, PipelineOptions, StoreClient, StorePath,
    ValetError, WorkPlan,
};

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Data-management daemon for scientific instrument output.
#[derive(Parser)]
#[command(name = "valet", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive files to the object store
    #[command(subcommand)]
    Archive(ArchiveCommands),

    /// Maintain and inspect checksum sidecars
    #[command(subcommand)]
    Checksum(ChecksumCommands),

    /// Annotate archived run reports with tracking metadata
    Annotate {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        store: StoreArgs,

        /// Worker-pool size (default: host processor count)
        #[arg(long, value_name = "N")]
        max_proc: Option<usize>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ArchiveCommands {
    /// Watch a tree and archive finished files
    Create {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        daemon: DaemonArgs,

        #[command(flatten)]
        store: StoreArgs,

        /// Remove local files and sidecars after verified archival
        #[arg(long)]
        delete_on_archive: bool,

        /// Gzip files over the size threshold before upload
        #[arg(long)]
        compress_large: bool,
    },
}

#[derive(Subcommand)]
enum ChecksumCommands {
    /// Watch a tree and keep checksum sidecars current
    Create {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        daemon: DaemonArgs,
    },
    /// Report files whose sidecar is missing or stale
    Status {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Tree to monitor
    #[arg(long, value_name = "PATH")]
    root: PathBuf,

    /// Additional prune pattern, relative to the root (repeatable)
    #[arg(long = "exclude", value_name = "GLOB")]
    excludes: Vec<String>,

    /// Informational logging
    #[arg(long)]
    verbose: bool,

    /// Debug logging
    #[arg(long)]
    debug: bool,

    /// Match every file but run no actions
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct DaemonArgs {
    /// Sweep interval (minimum 30s)
    #[arg(long, value_name = "DURATION", default_value = "5m", value_parser = parse_interval)]
    interval: Duration,

    /// Worker-pool size (default: host processor count)
    #[arg(long, value_name = "N")]
    max_proc: Option<usize>,
}

#[derive(Args)]
struct StoreArgs {
    /// Directory backing the filesystem object store
    #[arg(long, value_name = "PATH")]
    store: PathBuf,

    /// Collection under which archived files land
    #[arg(long, value_name = "PATH", default_value = "/")]
    archive_root: String,

    /// Store client pool capacity
    #[arg(long, value_name = "N", default_value = "4")]
    max_clients: usize,
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    let d = humantime::parse_duration(s).map_err(|e| e.to_string())?;
    if d < valet_core::config::MIN_SWEEP_INTERVAL {
        return Err(format!(
            "interval must be at least {}s",
            valet_core::config::MIN_SWEEP_INTERVAL.as_secs()
        ));
    }
    Ok(d)
}

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

/// Normal shutdown.
const EXIT_OK: i32 = 0;
/// Processing errors surfaced from the pool, or work remaining.
const EXIT_PROCESSING: i32 = 1;
/// Invalid flags or unusable roots; clap uses the same code for usage errors.
const EXIT_SETUP: i32 = 2;

fn exit_for(err: &ValetError) -> i32 {
    match err {
        ValetError::Setup(_) => EXIT_SETUP,
        _ => EXIT_PROCESSING,
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown signal
// ---------------------------------------------------------------------------

/// Turn the first termination signal into cancellation. Producers close
/// first, then the pool drains.
async fn shutdown_signal(cancel: CancellationToken) {
    let signal = wait_for_termination().await;
    info!(signal, "shutdown requested, draining");
    cancel.cancel();
}

#[cfg(unix)]
async fn wait_for_termination() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};
    let mut interrupt = signal(SignalKind::interrupt()).expect("SIGINT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("SIGTERM handler");
    tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}

// ---------------------------------------------------------------------------
// Wiring helpers
// ---------------------------------------------------------------------------

struct Workspace {
    root: FilePath,
    config: Config,
    matcher: Predicate,
    pruner: Predicate,
}

/// Resolve the root, load its config, and build the match/prune predicates
/// shared by every subcommand.
fn workspace(common: &CommonArgs) -> Result<Workspace, ValetError> {
    let root = FilePath::new(&common.root)?;
    if !root.is_dir() {
        return Err(ValetError::Setup(format!("--root {root} is not a directory")));
    }
    let config = Config::load(root.as_path());

    let mut pruner = predicate::prune_names_under(
        root.as_path().to_path_buf(),
        config.ignore_dirs.clone(),
    );
    if !common.excludes.is_empty() {
        let globs = build_globset(&common.excludes)?;
        pruner = predicate::any_of(vec![
            pruner,
            predicate::prune_globs(root.as_path().to_path_buf(), globs),
        ]);
    }

    // Excluded files must not be emitted either, so the matcher carries the
    // inverse of the pruner's match bit.
    let matcher = predicate::all_of(vec![
        pruner.clone().not(),
        predicate::any_of(vec![
            predicate::requires_archiving(&config.archive_suffixes),
            predicate::has_suffix(valet_core::path::COMPRESS_EXT),
        ]),
    ]);

    Ok(Workspace { root, config, matcher, pruner })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ValetError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| ValetError::Setup(format!("--exclude {pattern}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ValetError::Setup(format!("exclude patterns: {e}")))
}

fn build_archiver(
    ws: &Workspace,
    store: &StoreArgs,
    prefer_compressed: bool,
) -> Result<Archiver, ValetError> {
    if !store.store.is_dir() {
        std::fs::create_dir_all(&store.store)
            .map_err(|e| ValetError::Setup(format!("--store {}: {e}", store.store.display())))?;
    }
    let backing = store.store.clone();
    let pool = ClientPool::with_capacity(
        store.max_clients,
        move || Arc::new(FsObjectStore::new(backing.clone())) as Arc<dyn StoreClient>,
        DEFAULT_ACQUIRE_TIMEOUT,
    );
    Ok(Archiver::new(
        pool,
        ws.root.as_path(),
        StorePath::new(&store.archive_root),
        prefer_compressed,
        ws.config.annotate_uncompressed_checksum,
    ))
}

fn pipeline_options(daemon: &DaemonArgs) -> PipelineOptions {
    PipelineOptions {
        interval: daemon.interval,
        max_workers: daemon.max_proc.unwrap_or_else(valet_core::pool::default_workers),
    }
}

fn select_plan(dry_run: bool, plan: WorkPlan) -> WorkPlan {
    if dry_run {
        info!("dry run: substituting the no-op plan");
        dry_run_plan()
    } else {
        plan
    }
}

// ---------------------------------------------------------------------------
// Command drivers
// ---------------------------------------------------------------------------

async fn run_archive_create(
    common: CommonArgs,
    daemon: DaemonArgs,
    store: StoreArgs,
    delete_on_archive: bool,
    compress_large: bool,
    cancel: CancellationToken,
) -> Result<(), ValetError> {
    let ws = workspace(&common)?;
    let archiver = build_archiver(&ws, &store, compress_large)?;
    let plan = select_plan(
        common.dry_run,
        archive_plan(
            &ws.config,
            archiver,
            ArchiveOptions { compress_large, delete_local: delete_on_archive },
        ),
    );
    run_pipeline(ws.root, ws.matcher, ws.pruner, plan, pipeline_options(&daemon), cancel).await
}

async fn run_checksum_create(
    common: CommonArgs,
    daemon: DaemonArgs,
    cancel: CancellationToken,
) -> Result<(), ValetError> {
    let ws = workspace(&common)?;
    let plan = select_plan(common.dry_run, checksum_plan(&ws.config));
    run_pipeline(ws.root, ws.matcher, ws.pruner, plan, pipeline_options(&daemon), cancel).await
}

async fn run_checksum_status(
    common: CommonArgs,
    cancel: CancellationToken,
) -> Result<(), ValetError> {
    let ws = workspace(&common)?;
    let (missing, examined) =
        count_missing_checksums(ws.root, &ws.config.archive_suffixes, ws.pruner, cancel).await?;

    println!("Examined:          {examined}");
    println!("Missing or stale:  {missing}");
    if missing > 0 {
        return Err(ValetError::Pipeline { failed: missing, processed: examined });
    }
    Ok(())
}

async fn run_annotate(
    common: CommonArgs,
    store: StoreArgs,
    max_proc: Option<usize>,
    cancel: CancellationToken,
) -> Result<(), ValetError> {
    let ws = workspace(&common)?;
    let archiver = build_archiver(&ws, &store, false)?;
    let reports = build_globset(std::slice::from_ref(&ws.config.report_glob))?;
    let plan = select_plan(
        common.dry_run,
        annotate_plan(
            ws.root.as_path().to_path_buf(),
            reports,
            archiver,
            ws.config.namespace.clone(),
        ),
    );
    let workers = max_proc.unwrap_or_else(valet_core::pool::default_workers);
    run_single_sweep(ws.root, predicate::is_regular(), ws.pruner, plan, workers, cancel).await
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn init_logging(verbose: bool, debug: bool) {
    let directive = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("valet={directive}").parse().expect("static directive"))
                .add_directive(
                    format!("valet_core={directive}").parse().expect("static directive"),
                ),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let common = match &cli.command {
        Commands::Archive(ArchiveCommands::Create { common, .. }) => Some(common),
        Commands::Checksum(ChecksumCommands::Create { common, .. }) => Some(common),
        Commands::Checksum(ChecksumCommands::Status { common }) => Some(common),
        Commands::Annotate { common, .. } => Some(common),
        Commands::Completions { .. } => None,
    };
    init_logging(
        common.map(|c| c.verbose).unwrap_or(false),
        common.map(|c| c.debug).unwrap_or(false),
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let result = match cli.command {
        Commands::Archive(ArchiveCommands::Create {
            common,
            daemon,
            store,
            delete_on_archive,
            compress_large,
        }) => {
            run_archive_create(common, daemon, store, delete_on_archive, compress_large, cancel)
                .await
        }
        Commands::Checksum(ChecksumCommands::Create { common, daemon }) => {
            run_checksum_create(common, daemon, cancel).await
        }
        Commands::Checksum(ChecksumCommands::Status { common }) => {
            run_checksum_status(common, cancel).await
        }
        Commands::Annotate { common, store, max_proc } => {
            run_annotate(common, store, max_proc, cancel).await
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "valet", &mut std::io::stdout());
            return;
        }
    };

    match result {
        Ok(()) => std::process::exit(EXIT_OK),
        Err(e) => {
            error!(error = %e, "exiting");
            eprintln!("valet: {e}");
            std::process::exit(exit_for(&e));
        }
    }
}
