// SPDX-License-Identifier: EUPL-1.2

//! Configuration module

use anyhow::Context;
use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::lifecycle::TransitionPolicy;
use crate::scanner::{RetryPolicy, ScannerSettings};
use crate::scheduler::SchedulerSettings;
use crate::severity::SeverityTable;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Optional Redis URL for the evidence store
    pub redis_url: Option<String>,

    pub listen_addr: String,

    /// Shared secret for the scan trigger endpoints
    pub scan_secret: Option<String>,

    /// Base used to build public evidence URLs
    pub public_base_url: String,

    pub scheduler: SchedulerSettings,
    pub scanner: ScannerSettings,

    /// Seed for the simulated platforms
    pub scan_seed: u64,

    /// `(platform, endpoint)` pairs served by HTTP search adapters
    pub platform_endpoints: Vec<(String, String)>,

    /// Interval for the in-process scheduler, `None` when disabled
    pub scan_interval: Option<Duration>,

    pub transitions: TransitionPolicy,
    pub severity: SeverityTable,
    pub min_similarity: f64,
}

/// Read a variable, falling back to `default` when it is missing or malformed.
fn parsed<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("{key}={raw:?} is not valid, using default");
            default
        }),
        Err(_) => default,
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `a, B ,c` → `["a", "b", "c"]`
pub fn parse_platform_list(raw: &str) -> Vec<String> {
    let mut names: Vec<String> = raw
        .split(',')
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    let mut seen = HashSet::new();
    names.retain(|n| seen.insert(n.clone()));
    names
}

/// `name=url,name=url`. Entries without `=` are skipped with a warning.
pub fn parse_endpoints(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .filter_map(|entry| match entry.split_once('=') {
            Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
                Some((name.trim().to_ascii_lowercase(), url.trim().to_string()))
            }
            _ => {
                tracing::warn!("Ignoring malformed PLATFORM_ENDPOINTS entry {entry:?}");
                None
            }
        })
        .collect()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Missing or malformed numbers fall back to their defaults; a missing
    /// `DATABASE_URL` or an invalid `SEVERITY_RULES` table is an error.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let severity = match non_empty("SEVERITY_RULES") {
            Some(raw) => SeverityTable::from_json(&raw).context("SEVERITY_RULES")?,
            None => SeverityTable::default(),
        };

        let transitions = match non_empty("ALERT_TRANSITIONS") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!("{e}, using permissive transitions");
                TransitionPolicy::Permissive
            }),
            None => TransitionPolicy::Permissive,
        };

        let defaults = Self::default();
        let platforms = non_empty("SCAN_PLATFORMS")
            .map(|raw| parse_platform_list(&raw))
            .unwrap_or(defaults.scheduler.platforms);

        let scheduler = SchedulerSettings {
            batch_size: parsed("SCAN_BATCH_SIZE", 10i64).max(1),
            cooldown: chrono::Duration::hours(parsed("SCAN_COOLDOWN_HOURS", 24i64).max(1)),
            stale_run_after: chrono::Duration::minutes(
                parsed("SCAN_STALE_RUN_MINUTES", 60i64).max(1),
            ),
            platforms,
        };

        let scanner = ScannerSettings {
            max_in_flight: parsed("SCAN_MAX_IN_FLIGHT", 4usize).max(1),
            adapter_timeout: Duration::from_secs(parsed("SCAN_ADAPTER_TIMEOUT_SECS", 10u64).max(1)),
            retry: RetryPolicy {
                max_retries: parsed("SCAN_RETRY_ATTEMPTS", 0u32),
                backoff: Duration::from_millis(parsed("SCAN_RETRY_BACKOFF_MS", 500u64)),
            },
        };

        let interval = parsed("SCAN_INTERVAL_SECS", 0u64);

        Ok(Self {
            database_url,
            redis_url: non_empty("REDIS_URL"),
            listen_addr: non_empty("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            scan_secret: non_empty("SCAN_SECRET"),
            public_base_url: non_empty("PUBLIC_BASE_URL").unwrap_or(defaults.public_base_url),
            scheduler,
            scanner,
            scan_seed: parsed("SCAN_SEED", 0u64),
            platform_endpoints: non_empty("PLATFORM_ENDPOINTS")
                .map(|raw| parse_endpoints(&raw))
                .unwrap_or_default(),
            scan_interval: (interval > 0).then(|| Duration::from_secs(interval)),
            transitions,
            severity,
            min_similarity: parsed("ALERT_MIN_SIMILARITY", 0.0f64).clamp(0.0, 100.0),
        })
    }
}

impl Default for Config {
    /// Built-in defaults with no database configured.
    fn default() -> Self {
        Self {
            database_url: String::new(),
            redis_url: None,
            listen_addr: "0.0.0.0:3100".into(),
            scan_secret: None,
            public_base_url: "http://localhost:3100".into(),
            scheduler: SchedulerSettings::default(),
            scanner: ScannerSettings::default(),
            scan_seed: 0,
            platform_endpoints: Vec::new(),
            scan_interval: None,
            transitions: TransitionPolicy::Permissive,
            severity: SeverityTable::default(),
            min_similarity: 0.0,
        }
    }
}
