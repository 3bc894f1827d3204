/// Configuration management for the bingo lookup service
use std::time::Duration;

/// Main server configuration, assembled from CLI flags with environment fallbacks.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub redis_address: String,
    pub redis_prefix: String,
    pub postgres_url: String,
    pub plc_endpoint: String,
    /// Optional known-good entry to seed on startup, as a smoke check that the
    /// dual-index write path works end to end. Off by default.
    pub seed_entry: Option<SeedEntry>,
    pub tuning: TuningConfig,
}

#[derive(Debug, Clone)]
pub struct SeedEntry {
    pub did: String,
    pub handle: String,
}

/// Fixed tuning constants from spec.md, broken out so tests can shrink them
/// (smaller pages, shorter TTLs) without inventing new CLI surface.
#[derive(Debug, Clone)]
pub struct TuningConfig {
    /// How often the ingester's outer ticker fires.
    pub ingest_tick: Duration,
    /// Directory endpoint token bucket: requests per second.
    pub directory_rate_per_sec: u32,
    /// Directory endpoint token bucket: burst size.
    pub directory_burst: u32,
    /// `.bsky.social` HTTPS probe token bucket: requests per second.
    pub provider_rate_per_sec: u32,
    /// `.bsky.social` HTTPS probe token bucket: burst size.
    pub provider_burst: u32,
    /// Entries pulled per validation page.
    pub validation_page_size: i64,
    /// Maximum concurrent probes within one validation page.
    pub validation_fanout: usize,
    /// Staleness bound after which an Entry must be re-probed.
    pub validation_ttl: Duration,
    /// Sleep between validator passes when the last page wasn't full.
    pub time_between_validation_loops: Duration,
    /// Graceful shutdown grace window.
    pub shutdown_grace: Duration,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            ingest_tick: Duration::from_secs(30),
            directory_rate_per_sec: 2,
            directory_burst: 1,
            provider_rate_per_sec: 10,
            provider_burst: 1,
            validation_page_size: 1200,
            validation_fanout: 20,
            validation_ttl: Duration::from_secs(12 * 3600),
            time_between_validation_loops: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Load configuration from CLI flags (`--flag value` or `--flag=value`) with
    /// environment variable fallbacks, matching spec.md §6.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let args: Vec<String> = std::env::args().collect();

        let port = flag_or_env(&args, "--port", "PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid --port/PORT value"))?;

        let redis_address = flag_or_env(&args, "--redis-address", "REDIS_ADDRESS")
            .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());

        let redis_prefix =
            flag_or_env(&args, "--redis-prefix", "REDIS_PREFIX").unwrap_or_else(|| "bingo".to_string());

        let postgres_url = flag_or_env(&args, "--postgres-url", "POSTGRES_URL").ok_or_else(|| {
            anyhow::anyhow!("--postgres-url or POSTGRES_URL must be set")
        })?;

        let plc_endpoint = flag_or_env(&args, "--plc-endpoint", "PLC_ENDPOINT")
            .unwrap_or_else(|| "https://plc.directory/export".to_string());

        let seed_entry = flag_or_env(&args, "--seed-entry", "SEED_ENTRY")
            .map(|raw| parse_seed_entry(&raw))
            .transpose()?;

        Ok(Self {
            port,
            redis_address,
            redis_prefix,
            postgres_url,
            plc_endpoint,
            seed_entry,
            tuning: TuningConfig::default(),
        })
    }
}

/// Parse `--seed-entry`/`SEED_ENTRY`'s `<did>,<handle>` form into a `SeedEntry`.
/// Off by default; only reachable when the flag or env var is actually set.
fn parse_seed_entry(raw: &str) -> anyhow::Result<SeedEntry> {
    let (did, handle) = raw
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("--seed-entry/SEED_ENTRY must be formatted as '<did>,<handle>'"))?;

    let (did, handle) = (did.trim(), handle.trim());
    if did.is_empty() || handle.is_empty() {
        return Err(anyhow::anyhow!("--seed-entry/SEED_ENTRY must not have an empty did or handle"));
    }

    Ok(SeedEntry {
        did: did.to_string(),
        handle: handle.to_string(),
    })
}

/// Look for `--flag value` / `--flag=value` in argv, falling back to an env var.
fn flag_or_env(args: &[String], flag: &str, env_var: &str) -> Option<String> {
    for (i, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&format!("{flag}=")) {
            return Some(value.to_string());
        }
        if arg == flag {
            return args.get(i + 1).cloned();
        }
    }
    std::env::var(env_var).ok()
}
