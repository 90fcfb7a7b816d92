//! CLI entry point for mirrorkv.
//!
//! The `mirrorkv` binary opens one namespace on the configured backend and
//! reads or writes it through the reconciliation engine.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mirrorkv_core::{MirrorConfig, SetOptions, Store};
use mirrorkv_store::Backend;
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// mirrorkv: an observable key-value store mirrored into durable storage.
#[derive(Parser)]
#[command(name = "mirrorkv", version, about = "Inspect and edit mirrorkv namespaces")]
struct Cli {
    /// Configuration file (TOML).  Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Namespace to open.
    #[arg(short, long, global = true, default_value = "default")]
    namespace: String,

    /// Log filter used when `RUST_LOG` is unset.  Overrides `[log] level`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the stored value of a key.
    Get { key: String },

    /// Store a value.  Parsed as JSON, otherwise taken as a string.
    Set { key: String, value: String },

    /// Delete a key.
    Remove { key: String },

    /// Print every stored key and value as one JSON object.
    Dump,

    /// Delete every key in the namespace.
    Clear,

    /// List stored keys.
    Keys,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MirrorConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => MirrorConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("invalid environment override")?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    init_tracing(level, cli.json_logs);

    let store = config
        .open_store(cli.namespace.clone())
        .await
        .context("failed to open store")?;
    store.ready().await.context("failed to restore store")?;
    info!(namespace = %cli.namespace, backend = ?config.backend.kind, "store opened");

    match cli.command {
        Commands::Get { key } => cmd_get(&store, &key).await,
        Commands::Set { key, value } => cmd_set(&store, &key, &value).await,
        Commands::Remove { key } => cmd_remove(&store, &key).await,
        Commands::Dump => cmd_dump(&store).await,
        Commands::Clear => cmd_clear(&store).await,
        Commands::Keys => cmd_keys(&store).await,
    }?;

    store.flush().await.context("failed to flush pending writes")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_get(store: &Store, key: &str) -> Result<()> {
    let value = store
        .get_item(key)
        .await
        .with_context(|| format!("failed to read {key}"))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn cmd_set(store: &Store, key: &str, raw: &str) -> Result<()> {
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    debug!(key, %value, "writing");
    store
        .set_item(key, Some(value), SetOptions::immediate())
        .await
        .with_context(|| format!("failed to write {key}"))
}

async fn cmd_remove(store: &Store, key: &str) -> Result<()> {
    store
        .remove_item(key)
        .await
        .with_context(|| format!("failed to remove {key}"))
}

async fn cmd_dump(store: &Store) -> Result<()> {
    let keys = stored_keys(store).await?;
    let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let fields = store
        .restore(Some(refs.as_slice()))
        .await
        .context("failed to restore namespace")?;
    println!("{}", serde_json::to_string_pretty(&Value::Object(fields))?);
    Ok(())
}

async fn cmd_clear(store: &Store) -> Result<()> {
    let keys = stored_keys(store).await?;
    let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    store.restore(Some(refs.as_slice())).await?;
    store.clear().await.context("failed to clear namespace")?;
    info!(removed = keys.len(), "namespace cleared");
    Ok(())
}

async fn cmd_keys(store: &Store) -> Result<()> {
    for key in stored_keys(store).await? {
        println!("{key}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn stored_keys(store: &Store) -> Result<Vec<String>> {
    let backend = store.backend().context("store has no backend")?;
    backend
        .keys()
        .await
        .context("failed to list stored keys")
}

/// Initialize the global tracing subscriber on stderr.
fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
