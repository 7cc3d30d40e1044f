// SPDX-License-Identifier: EUPL-1.2

//! Handlers for infringement alerts.
//!
//! ## Endpoints
//!
//! - `GET  /alerts`              — List alerts (filterable by owner/asset/status/severity)
//! - `GET  /alerts/:id`          — Get a single alert
//! - `GET  /alerts/:id/history`  — Lifecycle events, oldest first
//! - `POST /alerts/:id/action`   — Apply an operator action

use crate::{
    db::AppState,
    error::SentinelError,
    models::{Alert, AlertActionRequest, AlertFilter, AlertQuery, AlertStatus, Severity},
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

fn filter_from(q: AlertQuery) -> Result<AlertFilter, SentinelError> {
    Ok(AlertFilter {
        owner_id: q.owner_id,
        asset_id: q.asset_id,
        status: q
            .status
            .as_deref()
            .map(str::parse::<AlertStatus>)
            .transpose()
            .map_err(SentinelError::Validation)?,
        severity: q
            .severity
            .as_deref()
            .map(str::parse::<Severity>)
            .transpose()
            .map_err(SentinelError::Validation)?,
        limit: q.limit.unwrap_or(50).clamp(1, 200),
        offset: q.offset.unwrap_or(0).max(0),
    })
}

// ── List ──────────────────────────────────────────────────────────────────────

/// `GET /alerts` — List alerts, newest first.
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AlertQuery>,
) -> Result<Json<Value>, SentinelError> {
    let filter = filter_from(q)?;
    let alerts = state.alerts.list_alerts(&filter).await?;

    Ok(Json(json!({
        "count": alerts.len(),
        "offset": filter.offset,
        "alerts": alerts,
    })))
}

// ── Get one ───────────────────────────────────────────────────────────────────

/// `GET /alerts/:id` — Get a single alert by UUID.
pub async fn get_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Alert>, SentinelError> {
    let alert = state
        .alerts
        .get_alert(id)
        .await?
        .ok_or_else(|| SentinelError::NotFound(format!("alert {id}")))?;
    Ok(Json(alert))
}

/// `GET /alerts/:id/history`
pub async fn alert_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, SentinelError> {
    let events = state.lifecycle.history(id).await?;
    Ok(Json(json!({
        "alert_id": id,
        "count": events.len(),
        "events": events,
    })))
}

// ── Action ────────────────────────────────────────────────────────────────────

/// `POST /alerts/:id/action` — Move an alert through its lifecycle.
///
/// Body: `{ "action": "CONFIRMED", "notes": "...", "expected_status": "REVIEWING" }`
pub async fn alert_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AlertActionRequest>,
) -> Result<Json<Alert>, SentinelError> {
    let alert = state.lifecycle.apply_action(id, req).await?;
    Ok(Json(alert))
}
