// SPDX-License-Identifier: EUPL-1.2

//! Evidence packaging.
//!
//! An [`EvidencePackage`] bundles an asset snapshot, the detection and any
//! supporting file references. Its canonical form is JSON with sorted object
//! keys; the content id is derived from those bytes and never changes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::content_store::{self, ContentRef, ContentStore};
use crate::models::{AssetRecord, DetectionResult, Severity};

pub const EVIDENCE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub asset_id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub creator: Option<String>,
    pub content_hash: String,
    pub perceptual_hash: String,
    pub watermark_id: Option<String>,
    pub chain_tx_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSnapshot {
    pub platform: String,
    pub source_url: String,
    pub discovered_at: DateTime<Utc>,
    pub candidate_hash: Option<String>,
    pub similarity_score: f64,
    pub watermark_found: bool,
    pub metadata_match: bool,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReference {
    /// `source`, `thumbnail` or `screenshot`
    pub kind: String,
    pub reference: String,
}

/// Result of trying to capture the infringing page.
///
/// `Unavailable` means no capture was attempted (no capturer configured or the
/// platform does not allow it); `Failed` means an attempt was made and failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScreenshotOutcome {
    Captured { reference: String },
    Unavailable,
    Failed { reason: String },
}

#[async_trait]
pub trait ScreenshotCapturer: Send + Sync {
    async fn capture(&self, source_url: &str) -> ScreenshotOutcome;
}

/// Capturer used when no screenshot service is configured.
pub struct NoScreenshots;

#[async_trait]
impl ScreenshotCapturer for NoScreenshots {
    async fn capture(&self, _source_url: &str) -> ScreenshotOutcome {
        ScreenshotOutcome::Unavailable
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePackage {
    pub version: u32,
    pub asset: AssetSnapshot,
    pub detection: DetectionSnapshot,
    pub files: Vec<FileReference>,
    pub screenshot: ScreenshotOutcome,
    pub verified_at: DateTime<Utc>,
}

/// Rebuild every object with its keys in lexicographic order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

impl EvidencePackage {
    pub fn build(
        asset: &AssetRecord,
        detection: &DetectionResult,
        screenshot: ScreenshotOutcome,
    ) -> Self {
        let candidate = &detection.candidate;

        let mut files = vec![FileReference {
            kind: "source".into(),
            reference: candidate.source_url.clone(),
        }];
        if let Some(thumb) = &candidate.thumbnail_ref {
            files.push(FileReference {
                kind: "thumbnail".into(),
                reference: thumb.clone(),
            });
        }
        if let ScreenshotOutcome::Captured { reference } = &screenshot {
            files.push(FileReference {
                kind: "screenshot".into(),
                reference: reference.clone(),
            });
        }

        Self {
            version: EVIDENCE_VERSION,
            asset: AssetSnapshot {
                asset_id: asset.id,
                owner_id: asset.owner_id,
                title: asset.title.clone(),
                creator: asset.creator.clone(),
                content_hash: asset.fingerprint.content_hash.clone(),
                perceptual_hash: asset.fingerprint.perceptual_hash.clone(),
                watermark_id: asset.fingerprint.watermark_id.clone(),
                chain_tx_hash: asset.chain_tx_hash.clone(),
            },
            detection: DetectionSnapshot {
                platform: candidate.platform.clone(),
                source_url: candidate.source_url.clone(),
                discovered_at: candidate.discovered_at,
                candidate_hash: candidate.perceptual_hash.clone(),
                similarity_score: detection.similarity_score,
                watermark_found: detection.watermark_found,
                metadata_match: detection.metadata_match,
                severity: detection.severity,
            },
            files,
            screenshot,
            verified_at: Utc::now(),
        }
    }

    /// Field-order-stable serialization used for content addressing.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&canonicalize(serde_json::to_value(self)?))
    }

    pub fn content_address(&self) -> Result<String, serde_json::Error> {
        Ok(content_store::content_id(&self.canonical_bytes()?))
    }
}

/// A package plus where (if anywhere) it was stored.
#[derive(Debug, Clone, Serialize)]
pub struct PackagedEvidence {
    pub package: EvidencePackage,
    pub content: Option<ContentRef>,
    pub storage_error: Option<String>,
}

pub struct EvidencePackager {
    store: Arc<dyn ContentStore>,
    screenshots: Arc<dyn ScreenshotCapturer>,
}

impl EvidencePackager {
    pub fn new(store: Arc<dyn ContentStore>, screenshots: Arc<dyn ScreenshotCapturer>) -> Self {
        Self { store, screenshots }
    }

    /// Build, serialize and store the evidence for one detection.
    ///
    /// Never fails: when the store is unreachable the package is returned
    /// without a content reference so alert creation can proceed.
    pub async fn create_evidence(
        &self,
        asset: &AssetRecord,
        detection: &DetectionResult,
    ) -> PackagedEvidence {
        let screenshot = self
            .screenshots
            .capture(&detection.candidate.source_url)
            .await;
        let package = EvidencePackage::build(asset, detection, screenshot);

        let stored = match package.canonical_bytes() {
            Ok(bytes) => self.store.put(&bytes).await.map_err(|e| e.to_string()),
            Err(e) => Err(format!("serialization failed: {e}")),
        };

        match stored {
            Ok(content) => {
                tracing::debug!("Evidence stored as {}", content.id);
                PackagedEvidence {
                    package,
                    content: Some(content),
                    storage_error: None,
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Evidence for {} not stored, continuing without content reference: {e}",
                    detection.candidate.source_url
                );
                PackagedEvidence {
                    package,
                    content: None,
                    storage_error: Some(e),
                }
            }
        }
    }
}
