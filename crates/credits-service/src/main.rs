//! Credits Service - HTTP API for the credits ledger.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credits_core::{PlanCatalog, StaticPlanCatalog};
use credits_service::{create_router, AppState, CreditsService, ServiceConfig, StorageBackend};
use credits_store::{LedgerStore, MemoryStore, PgStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,credits=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Credits Service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        storage_backend = ?config.storage_backend,
        plans_file = ?config.plans_file,
        reconcile_on_read = config.reconcile_on_read,
        "Service configuration loaded"
    );

    let store = open_store(&config).await?;

    let catalog: Arc<dyn PlanCatalog> = match &config.plans_file {
        Some(path) => {
            let catalog = StaticPlanCatalog::from_json_file(path)?;
            tracing::info!(path = %path, plans = catalog.len(), "Plan catalog loaded");
            Arc::new(catalog)
        }
        None => Arc::new(StaticPlanCatalog::default()),
    };

    let credits = CreditsService::new(store, catalog)
        .reconcile_on_read(config.reconcile_on_read)
        .reconcile_page_size(config.reconcile_page_size);

    let state = AppState::new(credits, config.clone());
    let app = create_router(state);

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn open_store(
    config: &ServiceConfig,
) -> Result<Arc<dyn LedgerStore>, Box<dyn std::error::Error>> {
    match config.storage_backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory store - ledger is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL is required for the postgres backend")?;
            let store = PgStore::connect(url, config.database_max_connections).await?;
            store.migrate().await?;
            tracing::info!("PostgreSQL store ready");
            Ok(Arc::new(store))
        }
        #[cfg(feature = "rocksdb-backend")]
        StorageBackend::RocksDb => {
            tracing::info!(path = %config.data_dir, "Opening RocksDB store");
            Ok(Arc::new(credits_store::RocksStore::open(&config.data_dir)?))
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StorageBackend::RocksDb => {
            Err("RocksDB backend requires the rocksdb-backend feature".into())
        }
    }
}
