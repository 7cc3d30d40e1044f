// SPDX-License-Identifier: EUPL-1.2

//! Alert lifecycle: creation by the pipeline and operator actions afterwards.
//!
//! Every status write is conditional on the status observed when the action
//! was validated. Two operators racing on the same alert cannot silently
//! overwrite each other; the loser gets [`SentinelError::Concurrency`].

use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::SentinelError;
use crate::evidence::PackagedEvidence;
use crate::models::{
    Alert, AlertActionRequest, AlertEvent, AlertStatus, AssetRecord, DetectionResult, StatusUpdate,
};
use crate::store::AlertRepository;

/// Whether operator actions must follow the review graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionPolicy {
    /// Any valid action may be applied from any status.
    #[default]
    Permissive,
    /// Only edges of [`AlertStatus::can_transition_to`] are accepted.
    Strict,
}

impl FromStr for TransitionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permissive" => Ok(TransitionPolicy::Permissive),
            "strict" => Ok(TransitionPolicy::Strict),
            other => Err(format!("unknown transition policy '{other}'")),
        }
    }
}

/// Statuses an operator may request. `NEW` is only ever assigned on creation.
pub fn parse_action(action: &str) -> Result<AlertStatus, SentinelError> {
    match action.parse::<AlertStatus>() {
        Ok(AlertStatus::New) | Err(_) => Err(SentinelError::Validation(format!(
            "Invalid action '{action}'. Expected one of \
             REVIEWING, CONFIRMED, FALSE_POSITIVE, TAKEDOWN_SENT, RESOLVED"
        ))),
        Ok(status) => Ok(status),
    }
}

pub struct AlertLifecycle {
    alerts: Arc<dyn AlertRepository>,
    policy: TransitionPolicy,
}

impl AlertLifecycle {
    pub fn new(alerts: Arc<dyn AlertRepository>, policy: TransitionPolicy) -> Self {
        Self { alerts, policy }
    }

    /// Persist a NEW alert for a detection. Returns `None` when an alert for
    /// the same `(asset_id, source_url)` already exists.
    pub async fn create_alert(
        &self,
        asset: &AssetRecord,
        detection: &DetectionResult,
        evidence: PackagedEvidence,
    ) -> Result<Option<Alert>, SentinelError> {
        let now = Utc::now();
        let (evidence_ref, evidence_url) = match evidence.content {
            Some(content) => (Some(content.id), Some(content.url)),
            None => (None, None),
        };
        let alert = Alert {
            id: Uuid::new_v4(),
            asset_id: asset.id,
            owner_id: asset.owner_id,
            platform: detection.candidate.platform.clone(),
            source_url: detection.candidate.source_url.clone(),
            similarity_score: detection.similarity_score,
            severity: detection.severity,
            status: AlertStatus::New,
            evidence_ref,
            evidence_url,
            evidence: evidence.package,
            detected_at: now,
            updated_at: now,
            resolved_at: None,
            action_taken: None,
            notes: None,
        };

        if !self.alerts.insert_alert(&alert).await? {
            tracing::debug!("Alert for {} on asset {} already exists", alert.source_url, asset.id);
            return Ok(None);
        }
        tracing::info!(
            "Created {} alert {} for asset {} on {} (score {})",
            alert.severity,
            alert.id,
            asset.id,
            alert.platform,
            alert.similarity_score
        );
        Ok(Some(alert))
    }

    /// Apply an operator action.
    ///
    /// Checks run in order: action name (400), alert existence (404), the
    /// caller's `expected_status` pin (409), the review graph under
    /// [`TransitionPolicy::Strict`] (422). Nothing is written unless all pass.
    pub async fn apply_action(
        &self,
        alert_id: Uuid,
        req: AlertActionRequest,
    ) -> Result<Alert, SentinelError> {
        let next = parse_action(&req.action)?;
        let expected = req
            .expected_status
            .as_deref()
            .map(|s| s.parse::<AlertStatus>().map_err(SentinelError::Validation))
            .transpose()?;

        let current = self
            .alerts
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| SentinelError::NotFound(format!("alert {alert_id}")))?;

        if let Some(expected) = expected {
            if expected != current.status {
                return Err(SentinelError::Concurrency(format!(
                    "alert {alert_id} is {}, not {expected}",
                    current.status
                )));
            }
        }

        if self.policy == TransitionPolicy::Strict && !current.status.can_transition_to(next) {
            return Err(SentinelError::InvalidTransition {
                from: current.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        let update = StatusUpdate {
            expected: current.status,
            status: next,
            resolved_at: next.is_resolution().then_some(now),
            action_taken: next.as_str().to_string(),
            notes: req.notes,
            at: now,
        };

        let updated = self
            .alerts
            .update_status(alert_id, &update)
            .await?
            .ok_or_else(|| {
                SentinelError::Concurrency(format!("alert {alert_id} changed while updating"))
            })?;

        tracing::info!("Alert {alert_id}: {} -> {}", current.status, updated.status);
        Ok(updated)
    }

    pub async fn history(&self, alert_id: Uuid) -> Result<Vec<AlertEvent>, SentinelError> {
        if self.alerts.get_alert(alert_id).await?.is_none() {
            return Err(SentinelError::NotFound(format!("alert {alert_id}")));
        }
        Ok(self.alerts.history(alert_id).await?)
    }
}
