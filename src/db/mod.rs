/// Durable-store connection management
///
/// The only thing the core needs from the durable tier is a Postgres pool that
/// is actually reachable; migrations and retry/backoff live here so
/// `store::BindingStore::new` stays focused on warm-up.
use crate::error::{BingoError, BingoResult};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info, warn};

/// Connect to Postgres, retrying on ping failure per spec.md §4.1: up to 5
/// attempts with a 5-second backoff between them. If all attempts fail the
/// caller should treat this as a fatal startup error.
pub async fn connect_with_retry(database_url: &str) -> BingoResult<PgPool> {
    const MAX_ATTEMPTS: u32 = 5;
    const BACKOFF: Duration = Duration::from_secs(5);

    let mut last_err = None;

    for attempt in 1..=MAX_ATTEMPTS {
        match try_connect(database_url).await {
            Ok(pool) => {
                info!(attempt, "durable store connection established");
                return Ok(pool);
            }
            Err(e) => {
                warn!(attempt, error = %e, "durable store ping failed");
                last_err = Some(e);
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(BACKOFF).await;
                }
            }
        }
    }

    error!("durable store unreachable after {} attempts", MAX_ATTEMPTS);
    Err(last_err.unwrap_or_else(|| BingoError::Internal("durable store unreachable".to_string())))
}

async fn try_connect(database_url: &str) -> BingoResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}

/// Run the embedded migrations against a freshly connected pool.
pub async fn run_migrations(pool: &PgPool) -> BingoResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| BingoError::Internal(format!("migration failed: {e}")))?;

    Ok(())
}
