/// Handle Validator (C3): confirms a DID still controls the handle it claims.
///
/// Two probes, in order (spec.md §4.3): a DNS TXT lookup for
/// `_atproto.<handle>` looking for an exact `did=<did>` value, and — only if
/// that doesn't match — an HTTPS GET of `https://<handle>/.well-known/atproto-did`,
/// scanned line by line for one equal to the DID exactly, with the response
/// required to be a literal 200. A DNS error alone does not mark an entry
/// invalid; it just means the HTTPS fallback gets a chance. Only a failed (or
/// mismatched) HTTPS probe is a confirmed invalid.
///
/// Grounded on the original `ValidateHandle`/`ValidateHandlePage` in
/// `pkg/plc/plc.go`: same two probes, same page-then-sleep loop shape, same
/// weighted semaphore fan-out bound (20).
use crate::cache::Cache;
use crate::config::TuningConfig;
use crate::metrics;
use crate::rate_limit::ProviderRateLimiter;
use crate::store::durable::{DurableStore, Entry};
use crate::store::BindingStore;
use chrono::Utc;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub struct HandleValidator<C: Cache, D: DurableStore> {
    store: Arc<BindingStore<C, D>>,
    http: reqwest::Client,
    dns: TokioAsyncResolver,
    provider_limiter: Arc<ProviderRateLimiter>,
    tuning: TuningConfig,
}

impl<C: Cache + 'static, D: DurableStore + 'static> HandleValidator<C, D> {
    pub fn new(store: Arc<BindingStore<C, D>>, tuning: TuningConfig) -> Self {
        let dns = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        let provider_limiter = Arc::new(ProviderRateLimiter::new(tuning.provider_rate_per_sec, tuning.provider_burst));

        Self {
            store,
            http: reqwest::Client::new(),
            dns,
            provider_limiter,
            tuning,
        }
    }

    /// Run the outer validation loop until cancelled: validate a page, sleep
    /// only when the page wasn't full (spec.md §4.3).
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                info!("validation loop cancelled");
                return;
            }

            match self.validate_handle_page(self.tuning.validation_page_size).await {
                Ok(full) => {
                    if !full {
                        tokio::select! {
                            _ = tokio::time::sleep(self.tuning.time_between_validation_loops) => {}
                            _ = cancel.cancelled() => return,
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "validation page failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.tuning.time_between_validation_loops) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
            }
        }
    }

    /// Validate one page of stale entries. Returns `true` if the page was
    /// full (meaning there's likely more stale work waiting).
    #[instrument(skip(self))]
    pub async fn validate_handle_page(&self, page_size: i64) -> crate::error::BingoResult<bool> {
        let start = Instant::now();
        let older_than = Utc::now() - chrono::Duration::from_std(self.tuning.validation_ttl).unwrap();

        let entries = self.store.stale_entries(older_than, page_size).await?;
        let query_done = Instant::now();

        if entries.is_empty() {
            return Ok(false);
        }

        let semaphore = Arc::new(Semaphore::new(self.tuning.validation_fanout));
        let results = Arc::new(Mutex::new(Vec::with_capacity(entries.len())));
        let mut handles = Vec::with_capacity(entries.len());

        for entry in entries.clone() {
            let semaphore = semaphore.clone();
            let results = results.clone();
            let http = self.http.clone();
            let dns = self.dns.clone();
            let provider_limiter = self.provider_limiter.clone();

            let permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            handles.push(tokio::spawn(async move {
                let probe_start = Instant::now();
                let valid = validate_handle(&dns, &http, &provider_limiter, &entry.did, &entry.handle).await;
                metrics::record_handle_validation(valid, probe_start.elapsed().as_secs_f64());
                results.lock().await.push((entry, valid));
                drop(permit);
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        let validation_done = Instant::now();

        let results = Arc::try_unwrap(results).expect("all tasks finished").into_inner();
        let num_valid = results.iter().filter(|(_, v)| *v).count();
        let num_invalid = results.len() - num_valid;

        self.store.bulk_update_validation(results).await?;
        let update_done = Instant::now();

        info!(
            valid = num_valid,
            invalid = num_invalid,
            query_time = query_done.duration_since(start).as_secs_f64(),
            validation_time = validation_done.duration_since(query_done).as_secs_f64(),
            update_time = update_done.duration_since(validation_done).as_secs_f64(),
            total_time = update_done.duration_since(start).as_secs_f64(),
            "finished validating directory entries"
        );

        Ok(entries.len() as i64 >= page_size)
    }
}

/// Pure decision: does any TXT record at `_atproto.<handle>` assert this DID?
/// Split out from the DNS I/O so the verdict logic is testable without a
/// resolver (SPEC_FULL §10.4).
fn txt_records_confirm(did: &str, txt_records: &[String]) -> bool {
    let expected = format!("did={did}");
    txt_records.iter().any(|record| record == &expected)
}

/// Pure decision: does a successful well-known HTTPS response confirm this
/// DID? `status` is `None` on transport failure. Per spec.md §4.3 the status
/// must be exactly 200, and the DID may appear on any line of the body, not
/// just the first.
fn https_body_confirms(did: &str, status: Option<u16>, body: &str) -> bool {
    match status {
        Some(200) => body.lines().any(|line| line.trim() == did),
        _ => false,
    }
}

/// Validate one handle against the DID it claims to belong to. DNS first,
/// HTTPS fallback second; only the HTTPS probe can confirm invalidity.
async fn validate_handle(
    dns: &TokioAsyncResolver,
    http: &reqwest::Client,
    provider_limiter: &ProviderRateLimiter,
    did: &str,
    handle: &str,
) -> bool {
    if let Ok(lookup) = dns.txt_lookup(format!("_atproto.{handle}")).await {
        let records: Vec<String> = lookup.iter().map(|record| record.to_string()).collect();
        if txt_records_confirm(did, &records) {
            return true;
        }
    }

    // Only `.bsky.social` handles share the per-provider budget (spec.md §4.3).
    if handle.ends_with(".bsky.social") {
        provider_limiter.wait().await;
    }

    let url = format!("https://{handle}/.well-known/atproto-did");
    let response = match http.get(&url).timeout(Duration::from_secs(10)).send().await {
        Ok(resp) => resp,
        Err(_) => return https_body_confirms(did, None, ""),
    };

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    https_body_confirms(did, Some(status), &body)
}
