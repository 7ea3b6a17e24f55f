//! # notebook-server
//!
//! HTTP server for the contact notebook.
//!
//! This binary provides:
//! - **Note CRUD** under `/api/v1/notebook`, backed by a SQLite database
//! - **Image storage** under `/api/v1/images`, content-addressed by MD5 digest
//!   on the local filesystem

mod api;
mod blob_store;
mod config;
mod error;

use std::sync::{Arc, Mutex};

use notebook_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,notebook_server=debug")),
        )
        .init();

    info!("Starting notebook server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize storage
    // -----------------------------------------------------------------------
    let database = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    // Blob store (creates directory if missing)
    let images = Arc::new(BlobStore::new(config.image_storage_path.clone()).await?);

    let app_state = AppState {
        notes: Arc::new(Mutex::new(database)),
        images,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
