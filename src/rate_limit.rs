/// Outbound rate limiting for the Directory Ingester and Handle Validator.
///
/// Unlike the teacher's inbound HTTP middleware limiter, these two buckets
/// gate calls this service makes to *other* services: the PLC directory
/// endpoint and `.bsky.social`'s well-known endpoint (spec.md §4.2, §4.3).
/// Both are shared, un-keyed buckets — one bucket per resource, not one per
/// caller — so every concurrent validator probe waits on the same limiter.
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::num::NonZeroU32;

type Limiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn build(rate_per_sec: u32, burst: u32) -> Limiter {
    let quota = Quota::per_second(NonZeroU32::new(rate_per_sec).unwrap_or(NonZeroU32::new(1).unwrap()))
        .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::new(1).unwrap()));
    GovernorLimiter::direct(quota)
}

/// Token bucket gating GETs to the PLC directory: 2 req/s, burst 1.
pub struct DirectoryRateLimiter(Limiter);

impl DirectoryRateLimiter {
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        Self(build(rate_per_sec, burst))
    }

    /// Block until a token is available.
    pub async fn wait(&self) {
        self.0.until_ready().await;
    }
}

/// Token bucket gating HTTPS well-known probes against `.bsky.social`
/// handles: 10 req/s, burst 1. Shared across every concurrent validation
/// probe in a page.
pub struct ProviderRateLimiter(Limiter);

impl ProviderRateLimiter {
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        Self(build(rate_per_sec, burst))
    }

    pub async fn wait(&self) {
        self.0.until_ready().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_directory_limiter_allows_burst_then_throttles() {
        let limiter = DirectoryRateLimiter::new(2, 1);
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed().as_millis() >= 400, "second call should wait for a fresh token");
    }

    #[tokio::test]
    async fn test_provider_limiter_constructs_with_spec_defaults() {
        let limiter = ProviderRateLimiter::new(10, 1);
        limiter.wait().await;
    }
}
