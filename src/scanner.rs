// SPDX-License-Identifier: EUPL-1.2

//! Platform scanning: adapter trait, adapter registry and the concurrent scanner.
//!
//! A platform is anything that can answer one `search` call. Adding a platform
//! means registering another [`PlatformAdapter`] under its name; the scanner
//! never branches on the concrete type.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};

use crate::fingerprint::{self, Media};
use crate::models::{AssetFingerprint, ScanCandidate};

/// Failure of a single platform. Never escapes the scanner.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

/// What the scanner asks every platform for.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanQuery {
    pub title: String,
    pub keywords: Vec<String>,
    pub max_results: usize,
}

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Registry key, e.g. `twitter`.
    fn name(&self) -> &str;

    async fn search(
        &self,
        fingerprint: &AssetFingerprint,
        query: &ScanQuery,
    ) -> Result<Vec<ScanCandidate>, AdapterError>;
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Name → adapter table.
pub struct PlatformRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn PlatformAdapter>>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
        }
    }

    /// Register an adapter, replacing any previous one with the same name.
    pub async fn register(&self, adapter: Arc<dyn PlatformAdapter>) {
        let name = adapter.name().to_string();
        let previous = self.adapters.write().await.insert(name.clone(), adapter);
        if previous.is_some() {
            tracing::info!("Replaced platform adapter '{name}'");
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.read().await.get(name).cloned()
    }

    /// Registered platform names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

/// Opt-in retries for failed or timed-out adapters. The default never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Linear backoff: `backoff * attempt`.
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub max_in_flight: usize,
    pub adapter_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            adapter_timeout: Duration::from_secs(10),
            retry: RetryPolicy::none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformFailure {
    pub platform: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub candidates: Vec<ScanCandidate>,
    pub failures: Vec<PlatformFailure>,
    pub duration_ms: u64,
}

/// Fans a query out to many platforms with bounded concurrency.
pub struct PlatformScanner {
    registry: Arc<PlatformRegistry>,
    settings: ScannerSettings,
}

impl PlatformScanner {
    pub fn new(registry: Arc<PlatformRegistry>, settings: ScannerSettings) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &Arc<PlatformRegistry> {
        &self.registry
    }

    /// Search a single platform, honouring timeout and retry settings.
    pub async fn scan_platform(
        &self,
        platform: &str,
        fingerprint: &AssetFingerprint,
        query: &ScanQuery,
    ) -> Result<Vec<ScanCandidate>, AdapterError> {
        let adapter = self
            .registry
            .get(platform)
            .await
            .ok_or_else(|| {
                AdapterError::Unavailable(format!("no adapter registered for '{platform}'"))
            })?;
        run_adapter(adapter.as_ref(), fingerprint, query, &self.settings).await
    }

    /// Search every named platform concurrently. Per-platform failures are
    /// collected in the report and never abort the other platforms.
    pub async fn scan(
        &self,
        platforms: &[String],
        fingerprint: &AssetFingerprint,
        query: &ScanQuery,
    ) -> ScanReport {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.settings.max_in_flight.max(1)));
        let mut report = ScanReport::default();
        let mut handles = Vec::new();

        for name in platforms {
            let Some(adapter) = self.registry.get(name).await else {
                report.failures.push(PlatformFailure {
                    platform: name.clone(),
                    error: "no adapter registered".into(),
                });
                continue;
            };

            let sem = semaphore.clone();
            let fingerprint = fingerprint.clone();
            let query = query.clone();
            let settings = self.settings.clone();

            let handle = tokio::spawn(async move {
                match sem.acquire_owned().await {
                    Ok(_permit) => {
                        run_adapter(adapter.as_ref(), &fingerprint, &query, &settings).await
                    }
                    Err(_) => Err(AdapterError::Unavailable("scanner shut down".into())),
                }
            });
            handles.push((name.clone(), handle));
        }

        for (platform, handle) in handles {
            match handle.await {
                Ok(Ok(mut found)) => {
                    tracing::debug!("{platform}: {} candidate(s)", found.len());
                    for c in &mut found {
                        if c.platform.is_empty() {
                            c.platform = platform.clone();
                        }
                    }
                    report.candidates.extend(found);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Platform '{platform}' failed: {e}");
                    report.failures.push(PlatformFailure {
                        platform,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Platform '{platform}' task aborted: {e}");
                    report.failures.push(PlatformFailure {
                        platform,
                        error: format!("adapter task aborted: {e}"),
                    });
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        report
    }
}

async fn run_adapter(
    adapter: &dyn PlatformAdapter,
    fingerprint: &AssetFingerprint,
    query: &ScanQuery,
    settings: &ScannerSettings,
) -> Result<Vec<ScanCandidate>, AdapterError> {
    let mut attempt = 0;
    loop {
        let search = adapter.search(fingerprint, query);
        let result = match tokio::time::timeout(settings.adapter_timeout, search).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(settings.adapter_timeout)),
        };
        match result {
            Ok(mut candidates) => {
                if query.max_results > 0 {
                    candidates.truncate(query.max_results);
                }
                return Ok(candidates);
            }
            Err(e) if attempt < settings.retry.max_retries => {
                attempt += 1;
                tracing::debug!("{} attempt {attempt} failed ({e}), retrying", adapter.name());
                tokio::time::sleep(settings.retry.delay(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ── Simulated platform ────────────────────────────────────────────────────────

/// Deterministic stand-in for a real platform.
///
/// Results depend only on `(seed, platform name, asset id)`, so a fixed seed
/// reproduces the same candidates on every run.
pub struct SimulatedPlatform {
    name: String,
    seed: u64,
    max_candidates: usize,
    watermark_rate: f64,
}

impl SimulatedPlatform {
    pub fn new(name: impl Into<String>, seed: u64) -> Self {
        Self {
            name: name.into(),
            seed,
            max_candidates: 3,
            watermark_rate: 0.3,
        }
    }

    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max;
        self
    }

    fn rng_for(&self, fingerprint: &AssetFingerprint) -> StdRng {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(fingerprint.asset_id.as_bytes());
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        StdRng::seed_from_u64(self.seed ^ u64::from_le_bytes(head))
    }
}

/// Flip `count` distinct bits of a hex hash. Non-hex input is returned as-is.
fn flip_bits(hash: &str, count: usize, rng: &mut StdRng) -> String {
    let digits: Option<Vec<u32>> = hash.chars().map(|c| c.to_digit(16)).collect();
    let Some(mut nibbles) = digits else {
        return hash.to_string();
    };
    let bits = nibbles.len() * 4;
    for bit in rand::seq::index::sample(rng, bits, count.min(bits)) {
        nibbles[bit / 4] ^= 1 << (3 - bit % 4);
    }
    nibbles
        .into_iter()
        .filter_map(|n| char::from_digit(n, 16))
        .collect()
}

#[async_trait]
impl PlatformAdapter for SimulatedPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        fingerprint: &AssetFingerprint,
        query: &ScanQuery,
    ) -> Result<Vec<ScanCandidate>, AdapterError> {
        let mut rng = self.rng_for(fingerprint);
        let bits = fingerprint.perceptual_hash.len() * 4;
        let count = rng.gen_range(0..=self.max_candidates);

        let candidates = (0..count)
            .map(|_| {
                let flips = rng.gen_range(0..=bits / 3);
                let perceptual_hash = flip_bits(&fingerprint.perceptual_hash, flips, &mut rng);
                let watermark_id = fingerprint
                    .watermark_id
                    .clone()
                    .filter(|_| rng.gen_bool(self.watermark_rate));
                let title = rng.gen_bool(0.3).then(|| query.title.clone());
                let post: u32 = rng.gen();
                ScanCandidate {
                    platform: self.name.clone(),
                    source_url: format!("https://{}.example/post/{post:08x}", self.name),
                    discovered_at: Utc::now(),
                    thumbnail_ref: None,
                    perceptual_hash: Some(perceptual_hash),
                    watermark_id,
                    title,
                    author: None,
                }
            })
            .collect();
        Ok(candidates)
    }
}

// ── HTTP search adapter ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    perceptual_hash: &'a str,
    title: &'a str,
    keywords: &'a [String],
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    candidates: Vec<RemoteCandidate>,
}

#[derive(Debug, Deserialize)]
struct RemoteCandidate {
    source_url: String,
    discovered_at: Option<DateTime<Utc>>,
    thumbnail_ref: Option<String>,
    perceptual_hash: Option<String>,
    watermark_id: Option<String>,
    title: Option<String>,
    author: Option<String>,
    /// Raw media, base64. Fingerprinted locally when no hash is supplied.
    media_base64: Option<String>,
}

/// Adapter for a platform search service speaking the JSON contract above.
pub struct HttpSearchAdapter {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSearchAdapter {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("asset-sentinel/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            client,
        })
    }

    fn candidate_from(&self, remote: RemoteCandidate) -> ScanCandidate {
        let mut perceptual_hash = remote.perceptual_hash;
        let mut watermark_id = remote.watermark_id;

        if let Some(media) = remote.media_base64.as_deref() {
            match STANDARD.decode(media) {
                Ok(bytes) => {
                    let fp = fingerprint::extract(uuid::Uuid::nil(), &Media::from_bytes(&bytes));
                    perceptual_hash.get_or_insert(fp.perceptual_hash);
                    if watermark_id.is_none() {
                        watermark_id = fp.watermark_id;
                    }
                }
                Err(e) => tracing::debug!(
                    "{}: undecodable media for {}: {e}",
                    self.name,
                    remote.source_url
                ),
            }
        }

        ScanCandidate {
            platform: self.name.clone(),
            source_url: remote.source_url,
            discovered_at: remote.discovered_at.unwrap_or_else(Utc::now),
            thumbnail_ref: remote.thumbnail_ref,
            perceptual_hash,
            watermark_id,
            title: remote.title,
            author: remote.author,
        }
    }
}

#[async_trait]
impl PlatformAdapter for HttpSearchAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        fingerprint: &AssetFingerprint,
        query: &ScanQuery,
    ) -> Result<Vec<ScanCandidate>, AdapterError> {
        let body = SearchRequest {
            perceptual_hash: &fingerprint.perceptual_hash,
            title: &query.title,
            keywords: &query.keywords,
            max_results: query.max_results,
        };
        let response: SearchResponse = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))?;

        Ok(response
            .candidates
            .into_iter()
            .map(|c| self.candidate_from(c))
            .collect())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
