use anyhow::{Context, Result};
use shared::observability::{init_logging, LogConfig};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

mod config;
mod conversion;
mod error;
mod handlers;
mod models;
mod routes;
mod storage;
mod utils;

use config::{Config, StorageBackend, StorageConfig};
use conversion::{ConversionPool, ConverterSettings};
use storage::{FolderListing, MemoryStore, ObjectStore, S3Store};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub listing: Arc<FolderListing>,
    pub pool: ConversionPool,
    pub converter: Arc<ConverterSettings>,
    pub storage: Arc<StorageConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn ObjectStore>, config: &Config) -> Self {
        Self {
            listing: Arc::new(FolderListing::new(store.clone(), config.listing.clone())),
            store,
            pool: ConversionPool::new(
                config.converter.max_concurrent,
                config.converter.queue_capacity,
            ),
            converter: Arc::new(config.converter.clone()),
            storage: Arc::new(config.storage.clone()),
        }
    }
}

async fn build_store(config: &StorageConfig) -> Arc<dyn ObjectStore> {
    match config.backend {
        StorageBackend::S3 => {
            info!(
                bucket = %config.s3.bucket,
                endpoint = %config.s3.endpoint_url(),
                "Using S3-compatible object store"
            );
            Arc::new(S3Store::new(config.s3.clone()).await)
        }
        StorageBackend::Memory => {
            info!(bucket = %config.s3.bucket, "Using in-memory object store");
            Arc::new(MemoryStore::new(config.s3.bucket.clone()))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    init_logging(LogConfig {
        level: config.logging.level,
        format: config.logging.format,
        service_name: "spaces-gateway".to_string(),
        ..Default::default()
    })
    .context("Failed to initialize logging")?;

    config.validate().context("Invalid configuration")?;

    info!("Starting Spaces Gateway v{}", env!("CARGO_PKG_VERSION"));

    let store = build_store(&config.storage).await;
    let state = AppState::new(store, &config);
    let app = routes::create_router(state, &config.server);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(
        %addr,
        converter = %config.converter.executable_path.display(),
        max_concurrent = config.converter.max_concurrent,
        "Spaces Gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Spaces Gateway shut down gracefully");
    Ok(())
}
