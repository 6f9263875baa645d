use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gitvault::config::ServerConfig;
use gitvault::server::{build_router, AppState};
use gitvault::storage::{SqliteStorage, StorageBackend};

/// Serve git clone discovery for database-backed collections.
#[derive(Parser)]
#[command(name = "gitvault", version)]
struct Cli {
    /// Path to the config file (defaults to ~/.config/gitvault/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the database path
    #[arg(long)]
    database: Option<PathBuf>,

    /// Override the listen address
    #[arg(long)]
    listen: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }

    let storage = SqliteStorage::open(&config.database_path)
        .with_context(|| format!("Failed to open database at {:?}", config.database_path))?;
    storage.initialize().context("Failed to run migrations")?;

    let state = AppState {
        storage: Arc::new(storage),
        auth_realm: config.auth_realm.clone(),
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, db = ?config.database_path, "gitvault listening");
    axum::serve(listener, router).await?;

    Ok(())
}
