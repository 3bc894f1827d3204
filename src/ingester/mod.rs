/// Directory Ingester (C2): tails the PLC directory's append-only NDJSON feed
/// and replays each operation's handle binding into the Binding Store.
///
/// Grounded directly on `fetchDirectoryEntries` in the original
/// `pkg/plc/plc.go`: same outer ticker, same inner pull-until-caught-up loop,
/// same `at://` prefix stripping, same cursor persistence. One intentional
/// fix (spec.md §9, REDESIGN FLAGS): the request-duration histogram is only
/// observed when a response was actually received, not on transport failure.
use crate::cache::Cache;
use crate::config::TuningConfig;
use crate::metrics;
use crate::rate_limit::DirectoryRateLimiter;
use crate::store::durable::{DurableStore, Entry};
use crate::store::BindingStore;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
struct DirectoryJsonlRow {
    did: String,
    operation: Operation,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(rename = "alsoKnownAs", default)]
    also_known_as: Vec<String>,
}

pub struct DirectoryIngester<C: Cache, D: DurableStore> {
    store: Arc<BindingStore<C, D>>,
    http: reqwest::Client,
    endpoint: String,
    limiter: DirectoryRateLimiter,
    tuning: TuningConfig,
}

impl<C: Cache, D: DurableStore> DirectoryIngester<C, D> {
    pub fn new(store: Arc<BindingStore<C, D>>, endpoint: String, tuning: TuningConfig) -> Self {
        let limiter = DirectoryRateLimiter::new(tuning.directory_rate_per_sec, tuning.directory_burst);
        Self {
            store,
            http: reqwest::Client::new(),
            endpoint,
            limiter,
            tuning,
        }
    }

    /// Run the outer ticker until cancelled: fetch immediately, then again
    /// every `tuning.ingest_tick` (spec.md §4.2).
    pub async fn run(&self, cancel: CancellationToken) {
        self.fetch_directory_entries().await;

        let mut interval = tokio::time::interval(self.tuning.ingest_tick);
        interval.tick().await; // first tick fires immediately; already consumed above

        loop {
            tokio::select! {
                _ = interval.tick() => self.fetch_directory_entries().await,
                _ = cancel.cancelled() => {
                    info!("ingester cancelled");
                    return;
                }
            }
        }
    }

    /// Pull pages from the directory until a page returns one record or
    /// fewer, meaning the tail has caught up (kept as the original's exit
    /// condition, see DESIGN.md).
    async fn fetch_directory_entries(&self) {
        info!("fetching directory entries...");

        loop {
            let cursor = match self.store.cursor().await {
                Ok(c) => c,
                Err(e) => {
                    error!(error = %e, "failed to load ingest cursor");
                    break;
                }
            };

            let mut request = self.http.get(&self.endpoint);
            if let Some(after) = cursor {
                request = request.query(&[("after", after.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true))]);
            }

            self.limiter.wait().await;

            let start = Instant::now();
            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    // No status code to label the histogram with; the original
                    // service crashed here, this one just logs and backs off
                    // to the next tick.
                    error!(error = %e, "failed to fetch directory entries");
                    break;
                }
            };

            let status = response.status();
            metrics::record_plc_directory_request(status.as_u16(), start.elapsed().as_secs_f64());

            let body = match response.text().await {
                Ok(b) => b,
                Err(e) => {
                    error!(error = %e, "failed to read directory response body");
                    break;
                }
            };

            let mut new_entries = Vec::new();
            for line in body.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<DirectoryJsonlRow>(line) {
                    Ok(row) => new_entries.push(row),
                    Err(e) => {
                        warn!(error = %e, "failed to unmarshal directory entry, skipping");
                    }
                }
            }

            if new_entries.len() <= 1 {
                break;
            }

            for row in &new_entries {
                let had_handle = match row.operation.also_known_as.first() {
                    Some(aka) => {
                        let handle = aka.strip_prefix("at://").unwrap_or(aka);
                        if handle.is_empty() {
                            false
                        } else {
                            let entry = Entry::unvalidated(row.did.clone(), handle.to_string());
                            if let Err(e) = self.store.update(entry).await {
                                metrics::record_store_update_failure();
                                error!(did = %row.did, error = %e, "failed to update entry");
                            }
                            true
                        }
                    }
                    None => false,
                };
                metrics::record_directory_record_ingested(had_handle);
            }

            let new_cursor = new_entries.last().map(|e| e.created_at);
            if let Some(new_cursor) = new_cursor {
                if let Err(e) = self.store.set_cursor(new_cursor).await {
                    error!(error = %e, "failed to persist ingest cursor");
                }
            }

            info!(count = new_entries.len(), "fetched new directory entries");
        }

        info!("finished fetching directory entries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;
    use crate::store::durable::fake::InMemoryStore;

    fn store() -> Arc<BindingStore<FakeCache, InMemoryStore>> {
        Arc::new(BindingStore::new(FakeCache::default(), InMemoryStore::default(), "bingo"))
    }

    #[test]
    fn test_directory_jsonl_row_parses_handle_from_also_known_as() {
        let line = r#"{"did":"did:plc:abc123","operation":{"alsoKnownAs":["at://alice.bsky.social"],"type":"plc_operation"},"cid":"bafy","nullified":false,"createdAt":"2026-01-01T00:00:00.000000000Z"}"#;
        let row: DirectoryJsonlRow = serde_json::from_str(line).unwrap();
        assert_eq!(row.did, "did:plc:abc123");
        assert_eq!(row.operation.also_known_as[0], "at://alice.bsky.social");
    }

    #[test]
    fn test_directory_jsonl_row_tolerates_missing_also_known_as() {
        let line = r#"{"did":"did:plc:abc123","operation":{"type":"plc_tombstone"},"cid":"bafy","nullified":true,"createdAt":"2026-01-01T00:00:00.000000000Z"}"#;
        let row: DirectoryJsonlRow = serde_json::from_str(line).unwrap();
        assert!(row.operation.also_known_as.is_empty());
    }

    #[tokio::test]
    async fn test_ingester_constructs_against_a_fake_store() {
        let ingester = DirectoryIngester::new(store(), "https://plc.directory/export".to_string(), TuningConfig::default());
        assert_eq!(ingester.endpoint, "https://plc.directory/export");
    }
}
