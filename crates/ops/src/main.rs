//! clubdesk operator tooling.
//!
//! Runs the vote migration and its integrity check against a JSON snapshot
//! of the document store, keyed by document path.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use clubdesk_common::{Config, LoggingConfig};
use clubdesk_core::{MigrationEngine, VerificationEngine, VoteStorageFlags};
use clubdesk_db::{DocumentStore, MemoryStore};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "clubdesk-ops")]
#[command(about = "Vote storage migration tooling for clubdesk")]
struct Cli {
    /// Store snapshot (overrides `store.snapshot_path`)
    #[arg(short, long, env = "CLUBDESK_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy embedded vote arrays into per-voter documents
    Migrate {
        /// Do not write the migrated snapshot back
        #[arg(long)]
        dry_run: bool,
    },
    /// Compare both vote layouts of every survey
    Verify,
    /// Show the configured vote storage flags
    Flags,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "clubdesk=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn load_snapshot(path: &Path) -> anyhow::Result<MemoryStore> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Snapshot {} is not valid JSON", path.display()))?;
    let store = MemoryStore::from_json(&value)?;
    info!(path = %path.display(), documents = store.document_count(), "Snapshot loaded");
    Ok(store)
}

async fn write_snapshot(store: &MemoryStore, path: &Path) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(&store.to_json())?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
    info!(path = %path.display(), documents = store.document_count(), "Snapshot written");
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load()?;
    config.validate()?;
    init_tracing(&config.logging);

    let snapshot_path = cli
        .snapshot
        .unwrap_or_else(|| config.store.snapshot_path.clone());

    match cli.command {
        Command::Flags => {
            print_json(&VoteStorageFlags::from_config(&config.vote_storage).snapshot())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Migrate { dry_run } => {
            let store = load_snapshot(&snapshot_path).await?;
            let handle: Arc<dyn DocumentStore> = Arc::new(store.clone());
            let result = MigrationEngine::new(handle, config.migration.clone())
                .migrate_all_survey_votes()
                .await;
            print_json(&result)?;

            if result.fatal_error.is_some() {
                return Ok(ExitCode::FAILURE);
            }
            if dry_run {
                info!("Dry run, snapshot left unchanged");
            } else {
                write_snapshot(&store, &snapshot_path).await?;
            }
            if !result.is_complete() {
                warn!(failed = result.failure_count, "Some surveys were not migrated");
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify => {
            let store = load_snapshot(&snapshot_path).await?;
            let result = VerificationEngine::new(Arc::new(store))
                .verify_migration_integrity()
                .await;
            print_json(&result)?;
            Ok(if result.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
