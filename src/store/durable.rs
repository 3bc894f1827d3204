/// Durable-store backing for the Binding Store.
///
/// `DurableStore` is the narrow interface `BindingStore` needs from the
/// authoritative record: paged scans for warm-up, a stale scan for the
/// validator, upsert-on-DID, and bulk validity updates. `PostgresStore` is
/// the production implementation; `durable::fake::InMemoryStore` (tests only)
/// keeps the same contract without a live Postgres instance.
///
/// Query shapes are grounded on the sqlc-generated queries in the original
/// Go service (`pkg/store/store_queries/entries.sql.go`), adjusted per
/// spec.md §4.1 invariant 5: `upsert_entry` always writes the caller's
/// `is_valid`/`last_checked_time`, it does not preserve the prior row's
/// validity on conflict the way the original `UpdateEntry` query does — the
/// Ingester relies on this to force `is_valid=false` on a rebind.
use crate::error::BingoResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;

/// One DID<->handle binding as held in the authoritative record.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub did: String,
    pub handle: String,
    pub is_valid: bool,
    pub last_checked_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entry {
    /// Construct a fresh entry as the Ingester would, prior to any validation pass.
    pub fn unvalidated(did: String, handle: String) -> Self {
        let now = Utc::now();
        Self {
            did,
            handle,
            is_valid: false,
            last_checked_time: None,
            created_at: now,
            updated_at: None,
        }
    }
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Page through all entries ordered by DID, for cache warm-up.
    async fn get_entries_page(&self, limit: i64, offset: i64) -> BingoResult<Vec<Entry>>;

    /// Entries never checked, or checked before `older_than`, ordered by DID.
    async fn get_stale_entries(&self, older_than: DateTime<Utc>, limit: i64) -> BingoResult<Vec<Entry>>;

    /// Upsert-on-DID. Overwrites handle, validity and last-checked-time
    /// unconditionally on conflict (see module docs).
    async fn upsert_entry(&self, entry: &Entry) -> BingoResult<()>;

    /// Bulk-set validity and last-checked-time for a batch of DIDs sharing
    /// the same outcome, as produced by one validation page.
    async fn bulk_update_validation(&self, dids: &[String], is_valid: bool, checked_at: DateTime<Utc>) -> BingoResult<()>;
}

/// Postgres-backed `DurableStore`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DurableStore for PostgresStore {
    async fn get_entries_page(&self, limit: i64, offset: i64) -> BingoResult<Vec<Entry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            "SELECT did, handle, is_valid, last_checked_time, created_at, updated_at \
             FROM entries ORDER BY did LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Entry::from).collect())
    }

    async fn get_stale_entries(&self, older_than: DateTime<Utc>, limit: i64) -> BingoResult<Vec<Entry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            "SELECT did, handle, is_valid, last_checked_time, created_at, updated_at \
             FROM entries WHERE last_checked_time IS NULL OR last_checked_time < $1 \
             ORDER BY did LIMIT $2",
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Entry::from).collect())
    }

    async fn upsert_entry(&self, entry: &Entry) -> BingoResult<()> {
        sqlx::query(
            "INSERT INTO entries (did, handle, is_valid, last_checked_time, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, now(), now()) \
             ON CONFLICT (did) DO UPDATE SET \
                handle = EXCLUDED.handle, \
                is_valid = EXCLUDED.is_valid, \
                last_checked_time = EXCLUDED.last_checked_time, \
                updated_at = now()",
        )
        .bind(&entry.did)
        .bind(&entry.handle)
        .bind(entry.is_valid)
        .bind(entry.last_checked_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn bulk_update_validation(
        &self,
        dids: &[String],
        is_valid: bool,
        checked_at: DateTime<Utc>,
    ) -> BingoResult<()> {
        if dids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            "UPDATE entries SET is_valid = $1, last_checked_time = $2, updated_at = now() \
             WHERE did = ANY($3)",
        )
        .bind(is_valid)
        .bind(checked_at)
        .bind(dids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    did: String,
    handle: String,
    is_valid: bool,
    last_checked_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Self {
            did: row.did,
            handle: row.handle,
            is_valid: row.is_valid,
            last_checked_time: row.last_checked_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    /// In-memory `DurableStore` used by store/ingester/validator unit tests.
    #[derive(Default)]
    pub(crate) struct InMemoryStore {
        rows: Mutex<Vec<Entry>>,
    }

    #[async_trait]
    impl DurableStore for InMemoryStore {
        async fn get_entries_page(&self, limit: i64, offset: i64) -> BingoResult<Vec<Entry>> {
            let mut rows = self.rows.lock().unwrap().clone();
            rows.sort_by(|a, b| a.did.cmp(&b.did));
            Ok(rows
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect())
        }

        async fn get_stale_entries(&self, older_than: DateTime<Utc>, limit: i64) -> BingoResult<Vec<Entry>> {
            let mut rows: Vec<Entry> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.last_checked_time.map(|t| t < older_than).unwrap_or(true))
                .cloned()
                .collect();
            rows.sort_by(|a, b| a.did.cmp(&b.did));
            rows.truncate(limit as usize);
            Ok(rows)
        }

        async fn upsert_entry(&self, entry: &Entry) -> BingoResult<()> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(existing) = rows.iter_mut().find(|e| e.did == entry.did) {
                *existing = entry.clone();
            } else {
                rows.push(entry.clone());
            }
            Ok(())
        }

        async fn bulk_update_validation(
            &self,
            dids: &[String],
            is_valid: bool,
            checked_at: DateTime<Utc>,
        ) -> BingoResult<()> {
            let mut rows = self.rows.lock().unwrap();
            for row in rows.iter_mut() {
                if dids.contains(&row.did) {
                    row.is_valid = is_valid;
                    row.last_checked_time = Some(checked_at);
                }
            }
            Ok(())
        }
    }

    /// `DurableStore` backed by a real, in-memory `sqlx::SqlitePool`, exercising
    /// the same narrow trait the production `PostgresStore` implements against
    /// actual SQL rather than a `Vec` (spec.md §9: "Polymorphism over the
    /// durable store. Any engine meeting this interface is acceptable").
    /// Grounded on the teacher's own `SqlitePool::connect(":memory:")` test
    /// fixtures in `actor_store/store.rs` and `admin/moderation.rs`.
    pub(crate) struct SqliteStore {
        pool: sqlx::SqlitePool,
    }

    impl SqliteStore {
        pub(crate) async fn connect() -> Self {
            let pool = sqlx::SqlitePool::connect(":memory:").await.unwrap();
            sqlx::query(
                "CREATE TABLE entries ( \
                    did TEXT PRIMARY KEY, \
                    handle TEXT NOT NULL, \
                    is_valid INTEGER NOT NULL DEFAULT 0, \
                    last_checked_time TEXT, \
                    created_at TEXT NOT NULL, \
                    updated_at TEXT \
                )",
            )
            .execute(&pool)
            .await
            .unwrap();
            Self { pool }
        }
    }

    #[derive(sqlx::FromRow)]
    struct SqliteEntryRow {
        did: String,
        handle: String,
        is_valid: bool,
        last_checked_time: Option<String>,
        created_at: String,
        updated_at: Option<String>,
    }

    fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    impl From<SqliteEntryRow> for Entry {
        fn from(row: SqliteEntryRow) -> Self {
            Self {
                did: row.did,
                handle: row.handle,
                is_valid: row.is_valid,
                last_checked_time: row.last_checked_time.as_deref().map(parse_rfc3339),
                created_at: parse_rfc3339(&row.created_at),
                updated_at: row.updated_at.as_deref().map(parse_rfc3339),
            }
        }
    }

    #[async_trait]
    impl DurableStore for SqliteStore {
        async fn get_entries_page(&self, limit: i64, offset: i64) -> BingoResult<Vec<Entry>> {
            let rows = sqlx::query_as::<_, SqliteEntryRow>(
                "SELECT did, handle, is_valid, last_checked_time, created_at, updated_at \
                 FROM entries ORDER BY did LIMIT ? OFFSET ?",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(crate::error::BingoError::from)?;
            Ok(rows.into_iter().map(Entry::from).collect())
        }

        async fn get_stale_entries(&self, older_than: DateTime<Utc>, limit: i64) -> BingoResult<Vec<Entry>> {
            let cutoff = older_than.to_rfc3339();
            let rows = sqlx::query_as::<_, SqliteEntryRow>(
                "SELECT did, handle, is_valid, last_checked_time, created_at, updated_at \
                 FROM entries WHERE last_checked_time IS NULL OR last_checked_time < ? \
                 ORDER BY did LIMIT ?",
            )
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(crate::error::BingoError::from)?;
            Ok(rows.into_iter().map(Entry::from).collect())
        }

        async fn upsert_entry(&self, entry: &Entry) -> BingoResult<()> {
            sqlx::query(
                "INSERT INTO entries (did, handle, is_valid, last_checked_time, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(did) DO UPDATE SET \
                    handle = excluded.handle, \
                    is_valid = excluded.is_valid, \
                    last_checked_time = excluded.last_checked_time, \
                    updated_at = excluded.updated_at",
            )
            .bind(&entry.did)
            .bind(&entry.handle)
            .bind(entry.is_valid)
            .bind(entry.last_checked_time.map(|t| t.to_rfc3339()))
            .bind(entry.created_at.to_rfc3339())
            .bind(Some(Utc::now().to_rfc3339()))
            .execute(&self.pool)
            .await
            .map_err(crate::error::BingoError::from)?;
            Ok(())
        }

        async fn bulk_update_validation(&self, dids: &[String], is_valid: bool, checked_at: DateTime<Utc>) -> BingoResult<()> {
            if dids.is_empty() {
                return Ok(());
            }
            let checked_at = checked_at.to_rfc3339();
            for did in dids {
                sqlx::query(
                    "UPDATE entries SET is_valid = ?, last_checked_time = ?, updated_at = ? WHERE did = ?",
                )
                .bind(is_valid)
                .bind(&checked_at)
                .bind(Utc::now().to_rfc3339())
                .bind(did)
                .execute(&self.pool)
                .await
                .map_err(crate::error::BingoError::from)?;
            }
            Ok(())
        }
    }
}
