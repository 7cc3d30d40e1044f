// SPDX-License-Identifier: EUPL-1.2

//! Domain models for Asset Sentinel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::evidence::EvidencePackage;

// ── Assets ────────────────────────────────────────────────────────────────────

/// Stable identity of a finalized asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFingerprint {
    pub asset_id: Uuid,
    /// SHA-256 of the raw media bytes, lowercase hex
    pub content_hash: String,
    /// 64-bit block-average hash, lowercase hex
    pub perceptual_hash: String,
    pub watermark_id: Option<String>,
}

/// Registration state as seen by the asset registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Pending,
    Registered,
    Archived,
}

impl AssetStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetStatus::Pending => "pending",
            AssetStatus::Registered => "registered",
            AssetStatus::Archived => "archived",
        }
    }
}

impl FromStr for AssetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AssetStatus::Pending),
            "registered" => Ok(AssetStatus::Registered),
            "archived" => Ok(AssetStatus::Archived),
            other => Err(format!("unknown asset status '{other}'")),
        }
    }
}

/// The registry's view of an asset, as consumed by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub creator: Option<String>,
    pub status: AssetStatus,
    /// Registration transaction, present once the asset is anchored on chain
    pub chain_tx_hash: Option<String>,
    pub fingerprint: AssetFingerprint,
    pub created_at: DateTime<Utc>,
}

// ── Detection ─────────────────────────────────────────────────────────────────

/// A raw match reported by a platform adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCandidate {
    pub platform: String,
    pub source_url: String,
    pub discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub thumbnail_ref: Option<String>,
    #[serde(default)]
    pub perceptual_hash: Option<String>,
    /// Watermark id recovered from the candidate media, if any
    #[serde(default)]
    pub watermark_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// A scored and classified candidate. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub candidate: ScanCandidate,
    pub similarity_score: f64,
    pub watermark_found: bool,
    pub metadata_match: bool,
    pub severity: Severity,
}

// ── Alerts ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    New,
    Reviewing,
    Confirmed,
    FalsePositive,
    TakedownSent,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::New => "NEW",
            AlertStatus::Reviewing => "REVIEWING",
            AlertStatus::Confirmed => "CONFIRMED",
            AlertStatus::FalsePositive => "FALSE_POSITIVE",
            AlertStatus::TakedownSent => "TAKEDOWN_SENT",
            AlertStatus::Resolved => "RESOLVED",
        }
    }

    /// Whether entering this status stamps `resolved_at`.
    pub fn is_resolution(self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::FalsePositive)
    }

    /// Edges of the review graph. Only consulted under strict transitions.
    pub fn can_transition_to(self, next: AlertStatus) -> bool {
        use AlertStatus::*;
        matches!(
            (self, next),
            (New, Reviewing)
                | (Reviewing, Confirmed)
                | (Reviewing, FalsePositive)
                | (Confirmed, TakedownSent)
                | (TakedownSent, Resolved)
                | (FalsePositive, Resolved)
        )
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(AlertStatus::New),
            "REVIEWING" => Ok(AlertStatus::Reviewing),
            "CONFIRMED" => Ok(AlertStatus::Confirmed),
            "FALSE_POSITIVE" => Ok(AlertStatus::FalsePositive),
            "TAKEDOWN_SENT" => Ok(AlertStatus::TakedownSent),
            "RESOLVED" => Ok(AlertStatus::Resolved),
            other => Err(format!("unknown alert status '{other}'")),
        }
    }
}

/// An infringement alert. Created by the pipeline, mutated only by lifecycle actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub owner_id: Uuid,
    pub platform: String,
    pub source_url: String,
    pub similarity_score: f64,
    pub severity: Severity,
    pub status: AlertStatus,
    /// Content id of the stored evidence package
    pub evidence_ref: Option<String>,
    pub evidence_url: Option<String>,
    pub evidence: EvidencePackage,
    pub detected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub action_taken: Option<String>,
    pub notes: Option<String>,
}

/// One applied lifecycle action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_id: Uuid,
    pub from_status: AlertStatus,
    pub to_status: AlertStatus,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

/// Conditional status write: applies only while the alert is still in `expected`.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub expected: AlertStatus,
    pub status: AlertStatus,
    pub resolved_at: Option<DateTime<Utc>>,
    pub action_taken: String,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

/// Request body for `POST /alerts/:id/action`.
#[derive(Debug, Deserialize)]
pub struct AlertActionRequest {
    #[serde(default)]
    pub action: String,
    pub notes: Option<String>,
    /// Optimistic-concurrency guard: reject if the alert has moved on
    pub expected_status: Option<String>,
}

/// Query string for `GET /alerts`.
#[derive(Debug, Default, Deserialize)]
pub struct AlertQuery {
    pub owner_id: Option<Uuid>,
    pub asset_id: Option<Uuid>,
    pub status: Option<String>,
    pub severity: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Parsed form of [`AlertQuery`], handed to the repository.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub owner_id: Option<Uuid>,
    pub asset_id: Option<Uuid>,
    pub status: Option<AlertStatus>,
    pub severity: Option<Severity>,
    pub limit: i64,
    pub offset: i64,
}

// ── Scan runs ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanRunStatus {
    Running,
    Completed,
    Failed,
}

impl ScanRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanRunStatus::Running => "RUNNING",
            ScanRunStatus::Completed => "COMPLETED",
            ScanRunStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for ScanRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(ScanRunStatus::Running),
            "COMPLETED" => Ok(ScanRunStatus::Completed),
            "FAILED" => Ok(ScanRunStatus::Failed),
            other => Err(format!("unknown scan run status '{other}'")),
        }
    }
}

/// A reserved unit of scanning work for one asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRun {
    pub id: Uuid,
    pub asset_id: Uuid,
    /// Cool-down window index; unique together with `asset_id`
    pub day_bucket: i64,
    pub platforms: Vec<String>,
    pub status: ScanRunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub candidates_found: i32,
    pub alerts_created: i32,
    pub error: Option<String>,
}

/// Terminal outcome written back when a run finishes.
#[derive(Debug, Clone)]
pub struct ScanRunCompletion {
    pub status: ScanRunStatus,
    pub completed_at: DateTime<Utc>,
    pub candidates_found: i32,
    pub alerts_created: i32,
    pub error: Option<String>,
}

/// Response for `POST /scans/scheduled`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScheduledScanSummary {
    pub scanned: usize,
    pub errors: Vec<String>,
    pub alerts_created: usize,
}

/// Request body for `POST /assets/:id/scan`.
#[derive(Debug, Default, Deserialize)]
pub struct ManualScanRequest {
    pub platforms: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_status_parses_case_insensitively() {
        assert_eq!("false_positive".parse::<AlertStatus>(), Ok(AlertStatus::FalsePositive));
        assert_eq!(" Reviewing ".parse::<AlertStatus>(), Ok(AlertStatus::Reviewing));
        assert!("ESCALATED".parse::<AlertStatus>().is_err());
    }

    #[test]
    fn review_graph_edges() {
        assert!(AlertStatus::New.can_transition_to(AlertStatus::Reviewing));
        assert!(AlertStatus::Confirmed.can_transition_to(AlertStatus::TakedownSent));
        assert!(AlertStatus::FalsePositive.can_transition_to(AlertStatus::Resolved));
        assert!(!AlertStatus::New.can_transition_to(AlertStatus::Resolved));
        assert!(!AlertStatus::Resolved.can_transition_to(AlertStatus::Reviewing));
    }

    #[test]
    fn severity_serializes_uppercase() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
        let status = serde_json::to_string(&AlertStatus::TakedownSent).unwrap();
        assert_eq!(status, "\"TAKEDOWN_SENT\"");
    }
}
