// SPDX-License-Identifier: EUPL-1.2

//! Detection pipeline for one asset: scan → score → classify → package → alert.

use std::sync::Arc;

use crate::error::SentinelError;
use crate::evidence::EvidencePackager;
use crate::lifecycle::AlertLifecycle;
use crate::models::{Alert, AssetRecord, DetectionResult, ScanCandidate};
use crate::scanner::{PlatformFailure, PlatformScanner, ScanQuery};
use crate::severity::SeverityTable;
use crate::similarity;
use crate::store::AlertRepository;

/// Candidates returned per platform and asset.
const MAX_RESULTS_PER_PLATFORM: usize = 25;

#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub candidates_found: usize,
    pub detections: Vec<DetectionResult>,
    pub alerts: Vec<Alert>,
    /// Candidates dropped because an alert for the same source already exists
    pub duplicates: usize,
    pub failures: Vec<PlatformFailure>,
}

/// A store error cut the run short. `partial` holds what was already persisted.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct PipelineError {
    pub partial: PipelineOutcome,
    pub source: SentinelError,
}

fn same_text(a: Option<&str>, b: Option<&str>) -> bool {
    match (a.map(str::trim), b.map(str::trim)) {
        (Some(a), Some(b)) if !a.is_empty() => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

/// Score and classify one candidate against the asset it was found for.
pub fn assess(
    asset: &AssetRecord,
    candidate: ScanCandidate,
    table: &SeverityTable,
) -> DetectionResult {
    let fingerprint = &asset.fingerprint;
    let similarity_score = similarity::compare(
        Some(fingerprint.perceptual_hash.as_str()),
        candidate.perceptual_hash.as_deref(),
    );
    let watermark_found = match (&fingerprint.watermark_id, &candidate.watermark_id) {
        (Some(ours), Some(found)) => ours == found,
        _ => false,
    };
    let metadata_match = same_text(Some(asset.title.as_str()), candidate.title.as_deref())
        || same_text(asset.creator.as_deref(), candidate.author.as_deref());
    let severity = table.classify(similarity_score, watermark_found, metadata_match);

    DetectionResult {
        candidate,
        similarity_score,
        watermark_found,
        metadata_match,
        severity,
    }
}

pub struct DetectionPipeline {
    scanner: Arc<PlatformScanner>,
    severity: SeverityTable,
    packager: Arc<EvidencePackager>,
    alerts: Arc<dyn AlertRepository>,
    lifecycle: Arc<AlertLifecycle>,
    min_similarity: f64,
}

impl DetectionPipeline {
    pub fn new(
        scanner: Arc<PlatformScanner>,
        severity: SeverityTable,
        packager: Arc<EvidencePackager>,
        alerts: Arc<dyn AlertRepository>,
        lifecycle: Arc<AlertLifecycle>,
    ) -> Self {
        Self {
            scanner,
            severity,
            packager,
            alerts,
            lifecycle,
            min_similarity: 0.0,
        }
    }

    /// Drop candidates scoring below `min` instead of alerting on them.
    pub fn with_min_similarity(mut self, min: f64) -> Self {
        self.min_similarity = min.clamp(0.0, 100.0);
        self
    }

    pub fn scanner(&self) -> &Arc<PlatformScanner> {
        &self.scanner
    }

    /// Scan `platforms` for copies of `asset` and raise an alert per new detection.
    ///
    /// Platform failures end up in the outcome. A store error stops the run and
    /// is returned together with the alerts raised before it.
    pub async fn run(
        &self,
        asset: &AssetRecord,
        platforms: &[String],
    ) -> Result<PipelineOutcome, PipelineError> {
        let query = ScanQuery {
            title: asset.title.clone(),
            keywords: asset.creator.iter().cloned().collect(),
            max_results: MAX_RESULTS_PER_PLATFORM,
        };
        let report = self
            .scanner
            .scan(platforms, &asset.fingerprint, &query)
            .await;
        tracing::debug!(
            "Asset {}: {} candidate(s) from {} platform(s) in {}ms",
            asset.id,
            report.candidates.len(),
            platforms.len(),
            report.duration_ms
        );

        let mut outcome = PipelineOutcome {
            candidates_found: report.candidates.len(),
            failures: report.failures,
            ..Default::default()
        };

        match self.raise_alerts(asset, report.candidates, &mut outcome).await {
            Ok(()) => Ok(outcome),
            Err(source) => Err(PipelineError {
                partial: outcome,
                source,
            }),
        }
    }

    async fn raise_alerts(
        &self,
        asset: &AssetRecord,
        candidates: Vec<ScanCandidate>,
        outcome: &mut PipelineOutcome,
    ) -> Result<(), SentinelError> {
        for candidate in candidates {
            let known = self
                .alerts
                .exists_for_source(asset.id, &candidate.source_url)
                .await?;
            if known {
                outcome.duplicates += 1;
                continue;
            }

            let detection = assess(asset, candidate, &self.severity);
            if detection.similarity_score < self.min_similarity {
                tracing::debug!(
                    "Ignoring {} (score {} below {})",
                    detection.candidate.source_url,
                    detection.similarity_score,
                    self.min_similarity
                );
                continue;
            }

            let evidence = self.packager.create_evidence(asset, &detection).await;
            let created = self
                .lifecycle
                .create_alert(asset, &detection, evidence)
                .await?;
            match created {
                Some(alert) => outcome.alerts.push(alert),
                // Another scan raised it between the check and the insert.
                None => outcome.duplicates += 1,
            }
            outcome.detections.push(detection);
        }
        Ok(())
    }
}
