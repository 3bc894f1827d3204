/// Cache tier for the bingo lookup service
///
/// Serves as the low-latency read path for `Lookup`/`BulkLookup` and as the
/// durable home of the ingest cursor. The Binding Store (`crate::store`) is the
/// only caller; this module knows nothing about `Entry` shapes, just bytes.
///
/// The `Cache` trait is the narrow interface the core actually needs (get,
/// set, delete, pipelined batch get/set). `CacheClient` is the Redis-backed
/// production implementation; a `HashMap`-backed `FakeCache` stands in for it
/// in tests so the dual-index invariants can be exercised without a live
/// Redis server.
use crate::error::{BingoError, BingoResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{error, info};

/// Cache client configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis connection URL (e.g. "redis://localhost:6379")
    pub redis_url: String,
}

/// Narrow cache interface the Binding Store depends on.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> BingoResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> BingoResult<()>;
    async fn delete(&self, key: &str) -> BingoResult<()>;
    async fn get_many(&self, keys: &[String]) -> BingoResult<Vec<Option<String>>>;
    async fn set_many(&self, pairs: &[(String, String)]) -> BingoResult<()>;
}

/// Redis cache client
#[derive(Clone)]
pub struct CacheClient {
    connection: ConnectionManager,
}

impl CacheClient {
    /// Create a new cache client, connecting immediately.
    pub async fn new(config: CacheConfig) -> BingoResult<Self> {
        info!(url = %config.redis_url, "connecting to cache tier");

        let client = redis::Client::open(config.redis_url.as_str()).map_err(|e| {
            error!(error = %e, "failed to build redis client");
            BingoError::Cache(format!("client creation failed: {e}"))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!(error = %e, "failed to connect to redis");
            BingoError::Cache(format!("connection failed: {e}"))
        })?;

        info!("cache tier connection established");

        Ok(Self { connection })
    }

    /// Ping the cache tier to verify connectivity.
    pub async fn ping(&self) -> BingoResult<()> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| BingoError::Cache(format!("PING failed: {e}")))?;

        if pong != "PONG" {
            return Err(BingoError::Cache("unexpected PING response".to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl Cache for CacheClient {
    async fn get(&self, key: &str) -> BingoResult<Option<String>> {
        let mut conn = self.connection.clone();
        conn.get(key)
            .await
            .map_err(|e| BingoError::Cache(format!("GET {key} failed: {e}")))
    }

    async fn set(&self, key: &str, value: &str) -> BingoResult<()> {
        let mut conn = self.connection.clone();
        conn.set(key, value)
            .await
            .map_err(|e| BingoError::Cache(format!("SET {key} failed: {e}")))
    }

    async fn delete(&self, key: &str) -> BingoResult<()> {
        let mut conn = self.connection.clone();
        conn.del(key)
            .await
            .map_err(|e| BingoError::Cache(format!("DEL {key} failed: {e}")))
    }

    /// Pipelined batch get. Missing keys come back as `None` at the same index
    /// as the requested key, so callers can silently skip them (spec.md §4.1).
    async fn get_many(&self, keys: &[String]) -> BingoResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.get(key);
        }

        let mut conn = self.connection.clone();
        pipe.query_async(&mut conn)
            .await
            .map_err(|e| BingoError::Cache(format!("pipelined GET failed: {e}")))
    }

    /// Pipelined batch set. Used by `BulkUpdateValidation` to write both cache
    /// keys for every entry in one round trip.
    async fn set_many(&self, pairs: &[(String, String)]) -> BingoResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for (key, value) in pairs {
            pipe.set(key, value).ignore();
        }

        let mut conn = self.connection.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| BingoError::Cache(format!("pipelined SET failed: {e}")))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory stand-in for Redis used by store/ingester unit tests.
    #[derive(Default)]
    pub(crate) struct FakeCache {
        data: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl Cache for FakeCache {
        async fn get(&self, key: &str) -> BingoResult<Option<String>> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &str) -> BingoResult<()> {
            self.data.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn delete(&self, key: &str) -> BingoResult<()> {
            self.data.lock().unwrap().remove(key);
            Ok(())
        }

        async fn get_many(&self, keys: &[String]) -> BingoResult<Vec<Option<String>>> {
            let data = self.data.lock().unwrap();
            Ok(keys.iter().map(|k| data.get(k).cloned()).collect())
        }

        async fn set_many(&self, pairs: &[(String, String)]) -> BingoResult<()> {
            let mut data = self.data.lock().unwrap();
            for (k, v) in pairs {
                data.insert(k.clone(), v.clone());
            }
            Ok(())
        }
    }
}
