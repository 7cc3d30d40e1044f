// SPDX-License-Identifier: EUPL-1.2

//! Batch scan scheduling.
//!
//! A run is reserved in the store before any platform is contacted, so two
//! overlapping invocations can never scan the same asset in the same window.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{SentinelError, StoreError};
use crate::models::{
    AssetRecord, AssetStatus, ScanRun, ScanRunCompletion, ScanRunStatus, ScheduledScanSummary,
};
use crate::pipeline::{DetectionPipeline, PipelineError};
use crate::store::{AssetRegistry, ChainRegistry, ScanRunRepository};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub batch_size: i64,
    /// Minimum gap between completed scans of one asset; also the bucket width
    pub cooldown: Duration,
    /// RUNNING runs older than this are presumed abandoned
    pub stale_run_after: Duration,
    pub platforms: Vec<String>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            cooldown: Duration::hours(24),
            stale_run_after: Duration::minutes(60),
            platforms: ["twitter", "instagram", "tiktok", "pinterest", "etsy"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Index of the cool-down window containing `at`.
pub fn day_bucket(at: DateTime<Utc>, cooldown: Duration) -> i64 {
    at.timestamp().div_euclid(cooldown.num_seconds().max(1))
}

pub struct ScanScheduler {
    assets: Arc<dyn AssetRegistry>,
    runs: Arc<dyn ScanRunRepository>,
    chain: Arc<dyn ChainRegistry>,
    pipeline: Arc<DetectionPipeline>,
    settings: SchedulerSettings,
}

/// What one executed run produced.
struct RunResult {
    run: ScanRun,
    alerts_created: usize,
    errors: Vec<String>,
    /// Set when the outcome could not be written back to the run.
    write_error: Option<StoreError>,
}

impl ScanScheduler {
    pub fn new(
        assets: Arc<dyn AssetRegistry>,
        runs: Arc<dyn ScanRunRepository>,
        chain: Arc<dyn ChainRegistry>,
        pipeline: Arc<DetectionPipeline>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            assets,
            runs,
            chain,
            pipeline,
            settings,
        }
    }

    /// One scheduled batch. Safe to invoke concurrently or repeatedly.
    pub async fn run_once(&self) -> Result<ScheduledScanSummary, SentinelError> {
        let now = Utc::now();
        let mut summary = ScheduledScanSummary::default();

        let abandoned = self
            .runs
            .fail_stale(now - self.settings.stale_run_after, now)
            .await?;
        if abandoned > 0 {
            tracing::warn!("Marked {abandoned} abandoned scan run(s) as FAILED");
        }

        let due = self
            .assets
            .list_due_for_scan(now - self.settings.cooldown, self.settings.batch_size)
            .await?;
        tracing::info!("Scheduled scan: {} asset(s) due", due.len());

        let bucket = day_bucket(now, self.settings.cooldown);
        for asset in due {
            match self.chain.is_registered(&asset).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!("Asset {} not confirmed on chain, skipping", asset.id);
                    continue;
                }
                Err(e) => {
                    summary
                        .errors
                        .push(format!("asset {}: chain lookup failed: {e}", asset.id));
                    continue;
                }
            }

            let reserved = self
                .runs
                .reserve(asset.id, bucket, &self.settings.platforms, Utc::now())
                .await;
            let run = match reserved {
                Ok(Some(run)) => run,
                Ok(None) => {
                    tracing::debug!("Asset {} already reserved for bucket {bucket}", asset.id);
                    continue;
                }
                Err(e) => {
                    tracing::error!("Reserving a scan run for asset {} failed: {e}", asset.id);
                    summary
                        .errors
                        .push(format!("asset {}: reservation failed: {e}", asset.id));
                    continue;
                }
            };

            let result = self.execute(&asset, run).await;
            summary.scanned += 1;
            summary.alerts_created += result.alerts_created;
            summary.errors.extend(result.errors);
            if let Some(e) = result.write_error {
                summary
                    .errors
                    .push(format!("asset {}: recording run outcome failed: {e}", asset.id));
            }
        }

        tracing::info!(
            "Scheduled scan finished: {} scanned, {} alert(s), {} error(s)",
            summary.scanned,
            summary.alerts_created,
            summary.errors.len()
        );
        Ok(summary)
    }

    /// Scan one asset now, optionally over a subset of platforms.
    ///
    /// Shares the reservation with scheduled batches: a second scan inside the
    /// same window is refused with [`SentinelError::ScanInProgress`].
    pub async fn scan_asset(
        &self,
        asset_id: Uuid,
        platforms: Option<Vec<String>>,
    ) -> Result<ScanRun, SentinelError> {
        let asset = self
            .assets
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| SentinelError::NotFound(format!("asset {asset_id}")))?;

        if asset.status != AssetStatus::Registered {
            return Err(SentinelError::Validation(format!(
                "asset {asset_id} is {}, only registered assets are scanned",
                asset.status.as_str()
            )));
        }
        if !self.chain.is_registered(&asset).await? {
            return Err(SentinelError::Validation(format!(
                "asset {asset_id} has no confirmed on-chain registration"
            )));
        }

        let platforms = self.resolve_platforms(platforms).await?;
        let bucket = day_bucket(Utc::now(), self.settings.cooldown);
        let run = self
            .runs
            .reserve(asset.id, bucket, &platforms, Utc::now())
            .await?
            .ok_or_else(|| {
                SentinelError::ScanInProgress(format!(
                    "asset {asset_id} already has a scan in this window"
                ))
            })?;

        let result = self.execute(&asset, run).await;
        match result.write_error {
            Some(e) => Err(e.into()),
            None => Ok(result.run),
        }
    }

    pub async fn runs_for_asset(
        &self,
        asset_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ScanRun>, SentinelError> {
        if self.assets.get_asset(asset_id).await?.is_none() {
            return Err(SentinelError::NotFound(format!("asset {asset_id}")));
        }
        Ok(self.runs.list_for_asset(asset_id, limit).await?)
    }

    async fn resolve_platforms(
        &self,
        requested: Option<Vec<String>>,
    ) -> Result<Vec<String>, SentinelError> {
        let Some(requested) = requested else {
            return Ok(self.settings.platforms.clone());
        };
        let mut platforms: Vec<String> = requested
            .iter()
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        platforms.sort();
        platforms.dedup();
        if platforms.is_empty() {
            return Err(SentinelError::Validation("platforms must not be empty".into()));
        }

        let known = self.pipeline.scanner().registry().names().await;
        let unknown: Vec<&str> = platforms
            .iter()
            .filter(|p| !known.contains(p))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(SentinelError::Validation(format!(
                "unknown platform(s): {}. Registered: {}",
                unknown.join(", "),
                known.join(", ")
            )));
        }
        Ok(platforms)
    }

    /// Run the pipeline for a reserved run and write its outcome back.
    ///
    /// Alerts raised before a store error still count towards the run.
    async fn execute(&self, asset: &AssetRecord, mut run: ScanRun) -> RunResult {
        let (outcome, store_error) = match self.pipeline.run(asset, &run.platforms).await {
            Ok(outcome) => (outcome, None),
            Err(PipelineError { partial, source }) => {
                tracing::error!("Scan of asset {} failed: {source}", asset.id);
                (partial, Some(source))
            }
        };

        let mut errors: Vec<String> = outcome
            .failures
            .iter()
            .map(|f| format!("asset {}: {}: {}", asset.id, f.platform, f.error))
            .collect();
        let all_failed = !run.platforms.is_empty() && outcome.failures.len() >= run.platforms.len();
        let error = match (&store_error, all_failed) {
            (Some(e), _) => Some(e.to_string()),
            (None, true) => Some("every platform failed".to_string()),
            (None, false) => None,
        };
        if let Some(e) = &store_error {
            errors.push(format!("asset {}: {e}", asset.id));
        }

        let alerts_created = outcome.alerts.len();
        let completion = ScanRunCompletion {
            status: if error.is_some() { ScanRunStatus::Failed } else { ScanRunStatus::Completed },
            completed_at: Utc::now(),
            candidates_found: outcome.candidates_found as i32,
            alerts_created: alerts_created as i32,
            error,
        };

        let write_error = match self.runs.complete(run.id, completion.clone()).await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!("Recording the outcome of scan run {} failed: {e}", run.id);
                Some(e)
            }
        };
        tracing::info!(
            "Scan run {} for asset {}: {} ({} candidate(s), {alerts_created} alert(s))",
            run.id,
            asset.id,
            completion.status.as_str(),
            completion.candidates_found
        );

        run.status = completion.status;
        run.completed_at = Some(completion.completed_at);
        run.candidates_found = completion.candidates_found;
        run.alerts_created = completion.alerts_created;
        run.error = completion.error;
        RunResult {
            run,
            alerts_created,
            errors,
            write_error,
        }
    }
}
