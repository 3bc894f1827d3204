/// Application context and startup sequencing (Supervisor, C5).
///
/// Wires the durable store, cache tier, Binding Store, Ingester and Validator
/// together in the order spec.md §5 requires: connect durable store (with
/// retry) -> run migrations -> connect cache -> warm up the cache from the
/// durable record -> only then start the background loops and accept
/// traffic.
use crate::cache::{CacheClient, CacheConfig};
use crate::config::ServerConfig;
use crate::db;
use crate::error::BingoResult;
use crate::ingester::DirectoryIngester;
use crate::store::durable::{Entry, PostgresStore};
use crate::store::BindingStore;
use crate::validator::HandleValidator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub type ProdStore = BindingStore<CacheClient, PostgresStore>;

/// Shared application state handed to every axum handler and background task.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub store: Arc<ProdStore>,
    ingester: Arc<DirectoryIngester<CacheClient, PostgresStore>>,
    validator: Arc<HandleValidator<CacheClient, PostgresStore>>,
    ready: Arc<AtomicBool>,
    pub cancel: CancellationToken,
}

impl AppContext {
    /// Build the context and run warm-up to completion. The caller should
    /// not start serving traffic until this returns `Ok`.
    pub async fn new(config: ServerConfig) -> BingoResult<Self> {
        let pool = db::connect_with_retry(&config.postgres_url).await?;
        db::run_migrations(&pool).await?;
        let durable = PostgresStore::new(pool);

        let cache = CacheClient::new(CacheConfig {
            redis_url: config.redis_address.clone(),
        })
        .await?;
        cache.ping().await?;

        let store = Arc::new(BindingStore::new(cache, durable, config.redis_prefix.clone()));
        store.warm_up().await?;

        if let Some(seed) = &config.seed_entry {
            info!(did = %seed.did, handle = %seed.handle, "seeding configured entry");
            store
                .update(Entry::unvalidated(seed.did.clone(), seed.handle.clone()))
                .await?;
        }

        let ingester = Arc::new(DirectoryIngester::new(
            store.clone(),
            config.plc_endpoint.clone(),
            config.tuning.clone(),
        ));
        let validator = Arc::new(HandleValidator::new(store.clone(), config.tuning.clone()));

        Ok(Self {
            config: Arc::new(config),
            store,
            ingester,
            validator,
            ready: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
        })
    }

    /// Spawn the Ingester and Validator background loops. Returns their join
    /// handles so the caller can await a clean shutdown.
    pub fn spawn_background_loops(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let ingester = self.ingester.clone();
        let ingester_cancel = self.cancel.clone();
        let ingester_handle = tokio::spawn(async move {
            ingester.run(ingester_cancel).await;
        });

        let validator = self.validator.clone();
        let validator_cancel = self.cancel.clone();
        let validator_handle = tokio::spawn(async move {
            validator.run(validator_cancel).await;
        });

        vec![ingester_handle, validator_handle]
    }

    /// Whether the service has completed warm-up and is safe to route
    /// traffic to. Always true after `new()` returns successfully; exists as
    /// a seam for a future readiness gate rather than a real toggle today.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}
