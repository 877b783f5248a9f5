/// Schema upgrade tool - brings a store file up to the current layout
///
/// Usage:
///   migrate [--db-path <path>]
///
/// Options:
///   --db-path: Path to the SQLite store (defaults to MEMORY_VAULT_DB, then ~/.memory-vault/vault.db)
///
/// Opening the store runs the upgrade. A second run reports that nothing changed.
use anyhow::{Context, Result};
use clap::Parser;
use memory_vault_store::{Database, StoreConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "migrate")]
#[command(about = "Upgrade a knowledge store to the current schema")]
struct Args {
    /// Path to SQLite database file
    #[arg(long, short)]
    db_path: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut config = StoreConfig::from_env();
    if let Some(path) = args.db_path {
        config.db_path = path;
    }

    info!("Database: {}", config.db_path.display());

    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let db = Database::open(config.clone())
        .with_context(|| format!("opening {}", config.db_path.display()))?;

    // Opening already upgraded the file; this pass only confirms it is current
    let stats = db.ensure_schema()?;
    if !stats.is_noop() {
        anyhow::bail!("schema still changing after upgrade: {:?}", stats);
    }

    let scope = db.load_scope()?;
    info!("Schema is current");
    info!("  Knowledge items: {}", db.count_all_knowledge()?);
    info!("  Work items:      {}", db.count_all_work_items()?.total());
    match &scope.container {
        Some(container) => info!("  Active scope:    {}", container.name),
        None => info!("  Active scope:    global"),
    }

    Ok(())
}
