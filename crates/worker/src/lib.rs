//! Service wiring for the worker process.

use std::sync::Arc;

use anyhow::Context;
use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use clipcredit_infra::config::StorageBackend;
use clipcredit_infra::store::{
    InMemoryLedgerStore, InMemoryPaymentStore, InMemoryUploadStore, MIGRATOR, PostgresLedgerStore,
    PostgresPaymentStore, PostgresUploadStore,
};
use clipcredit_infra::{
    AppConfig, Clock, GatewayRegistry, LedgerStore, MockGateway, ObjectStoreStorage, PaymentReconciler, PaymentStore,
    StorageCleanupScheduler, SystemClock, TokenLedger, UploadStore,
};

/// Everything the process runs.
#[derive(Clone)]
pub struct Services {
    pub tokens: TokenLedger,
    pub payments: PaymentReconciler,
    pub cleanup: StorageCleanupScheduler,
}

struct Stores {
    ledger: Arc<dyn LedgerStore>,
    payments: Arc<dyn PaymentStore>,
    uploads: Arc<dyn UploadStore>,
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<Services> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stores = build_stores(config).await?;
    let storage = ObjectStoreStorage::new(build_object_store(config)?, config.storage.public_base_url.clone())
        .with_retry_policy(config.storage_retry.clone());

    let tokens = TokenLedger::new(stores.ledger, Arc::clone(&clock));
    let gateways = GatewayRegistry::new().with_gateway(MockGateway::arc());
    let payments = PaymentReconciler::new(stores.payments, tokens.clone(), gateways, Arc::clone(&clock))
        .with_crediting_policy(config.crediting_retry.clone());
    let cleanup = StorageCleanupScheduler::new(Arc::new(storage), stores.uploads, clock, config.cleanup.clone());

    Ok(Services {
        tokens,
        payments,
        cleanup,
    })
}

async fn build_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    if !config.database.use_persistent_stores {
        info!("using in-memory stores");
        return Ok(Stores {
            ledger: InMemoryLedgerStore::arc(),
            payments: InMemoryPaymentStore::arc(),
            uploads: InMemoryUploadStore::arc(),
        });
    }

    let url = config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    MIGRATOR.run(&pool).await.context("failed to run migrations")?;
    info!("using Postgres stores");

    Ok(Stores {
        ledger: Arc::new(PostgresLedgerStore::new(pool.clone())),
        payments: Arc::new(PostgresPaymentStore::new(pool.clone())),
        uploads: Arc::new(PostgresUploadStore::new(pool)),
    })
}

fn build_object_store(config: &AppConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    Ok(match &config.storage.backend {
        StorageBackend::Memory => Arc::new(InMemory::new()),
        StorageBackend::LocalFs { root } => {
            std::fs::create_dir_all(root).with_context(|| format!("failed to create {}", root.display()))?;
            Arc::new(
                LocalFileSystem::new_with_prefix(root)
                    .with_context(|| format!("failed to open storage root {}", root.display()))?,
            )
        }
    })
}
