/// Binding Store (C1): the dual-index cache in front of the durable record.
///
/// Every read in the hot path (`Lookup`, `BulkLookup`) is served from the
/// cache tier only; the durable store is the Ingester/Validator's write
/// target and the source of truth replayed into cache on startup. See
/// spec.md §4.1 for the full key schema and write-ordering invariants.
pub mod durable;

use crate::cache::Cache;
use crate::error::{BingoError, BingoResult};
use chrono::{DateTime, SecondsFormat, Utc};
use durable::{DurableStore, Entry};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Wire-exact cache payload: `{handle, did, valid, checked}`, `checked` as
/// nanoseconds-since-epoch. Zero means "never checked", matching the
/// original service's zero-value `uint64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub handle: String,
    pub did: String,
    pub valid: bool,
    pub checked: u64,
}

impl From<&Entry> for CachedEntry {
    fn from(entry: &Entry) -> Self {
        let checked = entry
            .last_checked_time
            .and_then(|t| t.timestamp_nanos_opt())
            .map(|n| n as u64)
            .unwrap_or(0);

        Self {
            handle: entry.handle.clone(),
            did: entry.did.clone(),
            valid: entry.is_valid,
            checked,
        }
    }
}

const WARMUP_PAGE_SIZE: i64 = 1000;

pub struct BindingStore<C: Cache, D: DurableStore> {
    cache: C,
    durable: D,
    prefix: String,
}

impl<C: Cache, D: DurableStore> BindingStore<C, D> {
    pub fn new(cache: C, durable: D, prefix: impl Into<String>) -> Self {
        Self {
            cache,
            durable,
            prefix: prefix.into(),
        }
    }

    fn did_key(&self, did: &str) -> String {
        format!("{}_d_{}", self.prefix, did)
    }

    fn handle_key(&self, handle: &str) -> String {
        format!("{}_h_{}", self.prefix, handle)
    }

    fn cursor_key(&self) -> String {
        format!("{}:last_cursor", self.prefix)
    }

    /// Replay the full durable record into the cache, 1000 rows at a time.
    /// Blocking prerequisite to readiness (spec.md §4.1).
    pub async fn warm_up(&self) -> BingoResult<()> {
        let mut offset: i64 = 0;
        let mut total = 0usize;

        loop {
            let page = self.durable.get_entries_page(WARMUP_PAGE_SIZE, offset).await?;
            let page_len = page.len();
            if page_len == 0 {
                break;
            }

            let mut pairs = Vec::with_capacity(page_len * 2);
            for entry in &page {
                let payload = serde_json::to_string(&CachedEntry::from(entry))
                    .map_err(|e| BingoError::Internal(format!("cache payload encode failed: {e}")))?;
                pairs.push((self.did_key(&entry.did), payload.clone()));
                pairs.push((self.handle_key(&entry.handle), payload));
            }
            self.cache.set_many(&pairs).await?;

            total += page_len;
            offset += WARMUP_PAGE_SIZE;

            if (page_len as i64) < WARMUP_PAGE_SIZE {
                break;
            }
        }

        info!(entries = total, "cache warm-up complete");
        Ok(())
    }

    async fn lookup_by_key(&self, key: String) -> BingoResult<CachedEntry> {
        let raw = self
            .cache
            .get(&key)
            .await?
            .ok_or_else(|| BingoError::NotFound(key.clone()))?;

        serde_json::from_str(&raw)
            .map_err(|e| BingoError::Internal(format!("corrupt cache entry at {key}: {e}")))
    }

    /// Look up a single handle or DID. Rejects empty input.
    pub async fn lookup(&self, handle_or_did: &str) -> BingoResult<CachedEntry> {
        if handle_or_did.is_empty() {
            return Err(BingoError::InvalidArgument("handle or did must not be empty".to_string()));
        }

        let key = if handle_or_did.starts_with("did:") {
            self.did_key(handle_or_did)
        } else {
            self.handle_key(handle_or_did)
        };

        self.lookup_by_key(key).await
    }

    async fn bulk_lookup_by_keys(&self, keys: Vec<String>) -> BingoResult<Vec<CachedEntry>> {
        let raw = self.cache.get_many(&keys).await?;
        let mut out = Vec::with_capacity(raw.len());
        for value in raw.into_iter().flatten() {
            match serde_json::from_str(&value) {
                Ok(entry) => out.push(entry),
                Err(e) => warn!(error = %e, "skipping corrupt cache entry during bulk lookup"),
            }
        }
        Ok(out)
    }

    pub async fn bulk_lookup_by_did(&self, dids: &[String]) -> BingoResult<Vec<CachedEntry>> {
        let keys = dids.iter().map(|d| self.did_key(d)).collect();
        self.bulk_lookup_by_keys(keys).await
    }

    pub async fn bulk_lookup_by_handle(&self, handles: &[String]) -> BingoResult<Vec<CachedEntry>> {
        let keys = handles.iter().map(|h| self.handle_key(h)).collect();
        self.bulk_lookup_by_keys(keys).await
    }

    /// Durable-first write, then dual-index cache reconciliation. If the
    /// entry's handle changed since the last write, the stale handle key is
    /// deleted before the new one is set; a failed delete is fatal (spec.md
    /// §4.1) so a reader never observes two live handle keys pointing at the
    /// same DID.
    pub async fn update(&self, entry: Entry) -> BingoResult<()> {
        self.durable.upsert_entry(&entry).await?;

        let did_key = self.did_key(&entry.did);
        if let Some(previous_raw) = self.cache.get(&did_key).await? {
            if let Ok(previous) = serde_json::from_str::<CachedEntry>(&previous_raw) {
                if previous.handle != entry.handle {
                    self.cache.delete(&self.handle_key(&previous.handle)).await?;
                }
            }
        }

        let payload = serde_json::to_string(&CachedEntry::from(&entry))
            .map_err(|e| BingoError::Internal(format!("cache payload encode failed: {e}")))?;

        self.cache.set(&did_key, &payload).await?;
        self.cache.set(&self.handle_key(&entry.handle), &payload).await?;

        Ok(())
    }

    /// Apply a validation pass's outcome: one durable bulk update per
    /// validity partition, then both cache keys for every entry in a single
    /// pipeline.
    pub async fn bulk_update_validation(&self, results: Vec<(Entry, bool)>) -> BingoResult<()> {
        if results.is_empty() {
            return Ok(());
        }

        let checked_at = Utc::now();
        let valid_dids: Vec<String> = results.iter().filter(|(_, valid)| *valid).map(|(e, _)| e.did.clone()).collect();
        let invalid_dids: Vec<String> = results.iter().filter(|(_, valid)| !*valid).map(|(e, _)| e.did.clone()).collect();

        self.durable.bulk_update_validation(&valid_dids, true, checked_at).await?;
        self.durable.bulk_update_validation(&invalid_dids, false, checked_at).await?;

        let mut pairs = Vec::with_capacity(results.len() * 2);
        for (entry, is_valid) in &results {
            let updated = Entry {
                is_valid: *is_valid,
                last_checked_time: Some(checked_at),
                ..entry.clone()
            };
            let payload = serde_json::to_string(&CachedEntry::from(&updated))
                .map_err(|e| BingoError::Internal(format!("cache payload encode failed: {e}")))?;
            pairs.push((self.did_key(&updated.did), payload.clone()));
            pairs.push((self.handle_key(&updated.handle), payload));
        }

        self.cache.set_many(&pairs).await
    }

    /// Cache-only delete; the durable record is left untouched (spec.md §4.1,
    /// Open Question: whether a durable tombstone should exist is unresolved
    /// upstream, so this mirrors the original behavior rather than guessing).
    pub async fn delete(&self, did: &str) -> BingoResult<()> {
        let did_key = self.did_key(did);
        if let Some(raw) = self.cache.get(&did_key).await? {
            if let Ok(entry) = serde_json::from_str::<CachedEntry>(&raw) {
                self.cache.delete(&self.handle_key(&entry.handle)).await?;
            }
        }
        self.cache.delete(&did_key).await
    }

    /// Entries never checked, or checked before the staleness bound, for the Validator.
    pub async fn stale_entries(&self, older_than: DateTime<Utc>, limit: i64) -> BingoResult<Vec<Entry>> {
        self.durable.get_stale_entries(older_than, limit).await
    }

    pub async fn cursor(&self) -> BingoResult<Option<DateTime<Utc>>> {
        match self.cache.get(&self.cursor_key()).await? {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| BingoError::Internal(format!("corrupt cursor value: {e}"))),
            None => Ok(None),
        }
    }

    pub async fn set_cursor(&self, cursor: DateTime<Utc>) -> BingoResult<()> {
        let raw = cursor.to_rfc3339_opts(SecondsFormat::Nanos, true);
        self.cache.set(&self.cursor_key(), &raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;
    use crate::store::durable::fake::InMemoryStore;

    fn store() -> BindingStore<FakeCache, InMemoryStore> {
        BindingStore::new(FakeCache::default(), InMemoryStore::default(), "bingo")
    }

    #[tokio::test]
    async fn test_lookup_rejects_empty_input() {
        let store = store();
        let err = store.lookup("").await.unwrap_err();
        assert!(matches!(err, BingoError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_lookup_not_found() {
        let store = store();
        let err = store.lookup("alice.bsky.social").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_then_lookup_by_did_and_handle() {
        let store = store();
        let entry = Entry::unvalidated("did:plc:abc123".to_string(), "alice.bsky.social".to_string());
        store.update(entry).await.unwrap();

        let by_did = store.lookup("did:plc:abc123").await.unwrap();
        assert_eq!(by_did.handle, "alice.bsky.social");
        assert!(!by_did.valid);

        let by_handle = store.lookup("alice.bsky.social").await.unwrap();
        assert_eq!(by_handle.did, "did:plc:abc123");
    }

    #[tokio::test]
    async fn test_update_deletes_stale_handle_key_on_rebind() {
        let store = store();
        store
            .update(Entry::unvalidated("did:plc:abc123".to_string(), "old.bsky.social".to_string()))
            .await
            .unwrap();
        store
            .update(Entry::unvalidated("did:plc:abc123".to_string(), "new.bsky.social".to_string()))
            .await
            .unwrap();

        let err = store.lookup("old.bsky.social").await.unwrap_err();
        assert!(err.is_not_found());

        let current = store.lookup("new.bsky.social").await.unwrap();
        assert_eq!(current.did, "did:plc:abc123");
    }

    #[tokio::test]
    async fn test_bulk_update_validation_partitions_by_validity() {
        let store = store();
        let a = Entry::unvalidated("did:plc:a".to_string(), "a.bsky.social".to_string());
        let b = Entry::unvalidated("did:plc:b".to_string(), "b.bsky.social".to_string());
        store.update(a.clone()).await.unwrap();
        store.update(b.clone()).await.unwrap();

        store
            .bulk_update_validation(vec![(a, true), (b, false)])
            .await
            .unwrap();

        let looked_up_a = store.lookup("did:plc:a").await.unwrap();
        let looked_up_b = store.lookup("did:plc:b").await.unwrap();
        assert!(looked_up_a.valid);
        assert!(!looked_up_b.valid);
        assert_ne!(looked_up_a.checked, 0);
    }

    #[tokio::test]
    async fn test_delete_is_cache_only() {
        let store = store();
        let entry = Entry::unvalidated("did:plc:abc123".to_string(), "alice.bsky.social".to_string());
        store.update(entry).await.unwrap();

        store.delete("did:plc:abc123").await.unwrap();
        assert!(store.lookup("did:plc:abc123").await.unwrap_err().is_not_found());
        assert!(store.lookup("alice.bsky.social").await.unwrap_err().is_not_found());

        let stale = store.stale_entries(Utc::now(), 10).await.unwrap();
        assert_eq!(stale.len(), 1, "durable record survives a cache-only delete");
    }

    #[tokio::test]
    async fn test_warm_up_replays_durable_entries_into_cache() {
        let cache = FakeCache::default();
        let durable = InMemoryStore::default();
        durable
            .upsert_entry(&Entry::unvalidated("did:plc:a".to_string(), "a.bsky.social".to_string()))
            .await
            .unwrap();
        durable
            .upsert_entry(&Entry::unvalidated("did:plc:b".to_string(), "b.bsky.social".to_string()))
            .await
            .unwrap();

        let store = BindingStore::new(cache, durable, "bingo");
        store.warm_up().await.unwrap();

        assert!(store.lookup("did:plc:a").await.is_ok());
        assert!(store.lookup("b.bsky.social").await.is_ok());
    }

    #[tokio::test]
    async fn test_cursor_round_trip() {
        let store = store();
        assert!(store.cursor().await.unwrap().is_none());

        let now = Utc::now();
        store.set_cursor(now).await.unwrap();
        let loaded = store.cursor().await.unwrap().unwrap();
        assert_eq!(loaded.timestamp_millis(), now.timestamp_millis());
    }

    /// Same dual-index and rebind invariants, but against a real (in-memory)
    /// SQLite-backed durable tier instead of the plain `Vec` fake, showing the
    /// `DurableStore` trait is satisfied by an actual SQL engine (spec.md §9).
    #[tokio::test]
    async fn test_rebind_against_sqlite_backed_durable_store() {
        use crate::store::durable::fake::SqliteStore;

        let store = BindingStore::new(FakeCache::default(), SqliteStore::connect().await, "bingo");

        store
            .update(Entry::unvalidated("did:plc:abc123".to_string(), "old.bsky.social".to_string()))
            .await
            .unwrap();
        store
            .update(Entry::unvalidated("did:plc:abc123".to_string(), "new.bsky.social".to_string()))
            .await
            .unwrap();

        assert!(store.lookup("old.bsky.social").await.unwrap_err().is_not_found());
        let current = store.lookup("new.bsky.social").await.unwrap();
        assert_eq!(current.did, "did:plc:abc123");

        let page = store.stale_entries(Utc::now(), 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].handle, "new.bsky.social");
    }
}
