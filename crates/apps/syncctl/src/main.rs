//! syncctl - run graphsync passes from the command line
//!
//! Reads `sync.json` from the graphsync config directory (or `--config`),
//! syncs every configured server into a SQLite database and prints a
//! summary per server.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use graphsync::{
    CancelHandle, EntityKind, EntityStore, SYNC_ORDER, SqliteEntityStore, SyncEngine, SyncOutcome,
    SyncProfile, SyncSettings, UreqTransport,
};
use log::{error, info, warn};

#[derive(Parser)]
#[command(name = "syncctl", version, about = "Incremental GraphQL sync into a local database")]
struct Cli {
    /// Settings file; defaults to sync.json in the config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync every configured server once
    Sync {
        /// light, cautious, moderate or high
        #[arg(long)]
        profile: Option<SyncProfile>,

        /// Allow two requests in flight
        #[arg(long)]
        parallel: bool,

        /// List every open item instead of only recently updated ones
        #[arg(long)]
        full: bool,
    },
    /// Show stored servers and entity counts
    Status,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let mut settings = match &cli.config {
        Some(path) => SyncSettings::from_file(path)?,
        None => SyncSettings::load()?,
    };
    if let Some(db) = cli.db {
        settings.database = Some(db);
    }
    let db_path = settings.database_path()?;
    let store = Arc::new(
        SqliteEntityStore::new(&db_path)
            .with_context(|| format!("Failed to open store at {}", db_path.display()))?,
    );

    match cli.command {
        Command::Sync {
            profile,
            parallel,
            full,
        } => {
            if let Some(profile) = profile {
                settings.profile = profile;
            }
            settings.parallel |= parallel;
            settings.full_refresh |= full;
            sync(store, settings)
        }
        Command::Status => {
            status(store.as_ref())?;
            Ok(true)
        }
    }
}

fn sync(store: Arc<SqliteEntityStore>, settings: SyncSettings) -> Result<bool> {
    if settings.servers.is_empty() {
        warn!(
            "No servers configured. Add them to {} or set GRAPHSYNC_ENDPOINT and GRAPHSYNC_TOKEN",
            graphsync::config::SETTINGS_FILE
        );
        return Ok(false);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(async move {
        let transport = UreqTransport::new(settings.request_timeout());
        let engine = SyncEngine::new(store, transport, settings);

        let cancel = CancelHandle::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling sync");
                on_interrupt.cancel();
            }
        });

        let report = engine.sync(cancel.token()).await;
        for server in &report.servers {
            match &server.outcome {
                SyncOutcome::Succeeded => info!(
                    "{}: {} new, {} updated, {} deleted in {} requests",
                    server.label, server.created, server.updated, server.deleted, server.requests
                ),
                SyncOutcome::Failed(reason) => error!("{}: failed: {reason}", server.label),
                SyncOutcome::Cancelled => warn!("{}: cancelled", server.label),
            }
            if let Some(stats) = &server.stats {
                info!(
                    "{}: rate limit {}/{} remaining",
                    server.label, stats.remaining, stats.limit
                );
            }
        }
        Ok(report.all_succeeded())
    })
}

fn status(store: &dyn EntityStore) -> Result<()> {
    let servers = store.list_servers()?;
    if servers.is_empty() {
        println!("No servers synced yet");
        return Ok(());
    }
    for server in servers {
        let synced = server
            .last_synced_at
            .map(|at| at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        let state = if server.last_sync_succeeded { "ok" } else { "failed" };
        println!("{} ({}) last synced {synced} [{state}]", server.label, server.graphql_path);

        let counts = SYNC_ORDER
            .iter()
            .map(|&kind| Ok((kind, store.count_entities(&server.id, kind)?)))
            .collect::<Result<Vec<(EntityKind, usize)>>>()?;
        for (kind, count) in counts.into_iter().filter(|(_, count)| *count > 0) {
            println!("  {:<14} {count}", kind.as_str());
        }
    }
    Ok(())
}
