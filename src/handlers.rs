// SPDX-License-Identifier: EUPL-1.2

//! Axum route handlers for health, scanning and evidence retrieval.

use crate::{
    auth,
    content_store,
    db::AppState,
    error::{SentinelError, StoreError},
    models::{ManualScanRequest, ScanRun, ScheduledScanSummary},
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

// ── Health ────────────────────────────────────────────────────────────────────

/// `GET /health` — Health check
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "asset-sentinel",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Scans ─────────────────────────────────────────────────────────────────────

/// `POST /scans/scheduled` — Run one scheduler batch.
///
/// Called by an external cron; requires the shared scan secret.
pub async fn trigger_scheduled_scan(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ScheduledScanSummary>, SentinelError> {
    auth::verify_scan_secret(state.scan_secret.as_deref(), &headers)?;
    let summary = state.scheduler.run_once().await?;
    Ok(Json(summary))
}

/// `POST /assets/:id/scan` — Scan one asset now.
///
/// Body (optional): `{ "platforms": ["twitter", "etsy"] }`
pub async fn scan_asset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ScanRun>), SentinelError> {
    auth::verify_scan_secret(state.scan_secret.as_deref(), &headers)?;
    let platforms = manual_scan_request(&body)?.and_then(|req| req.platforms);
    let run = state.scheduler.scan_asset(id, platforms).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

/// An absent or blank body means "use the defaults"; anything else must parse.
fn manual_scan_request(body: &[u8]) -> Result<Option<ManualScanRequest>, SentinelError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| SentinelError::Validation(format!("invalid scan request: {e}")))
}

#[derive(Debug, Deserialize)]
pub struct ScanRunQuery {
    pub limit: Option<i64>,
}

/// `GET /assets/:id/scans` — Recent scan runs for an asset, newest first.
pub async fn list_asset_scans(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(q): Query<ScanRunQuery>,
) -> Result<Json<Value>, SentinelError> {
    let limit = q.limit.unwrap_or(20).clamp(1, 100);
    let runs = state.scheduler.runs_for_asset(id, limit).await?;
    Ok(Json(json!({
        "asset_id": id,
        "count": runs.len(),
        "runs": runs,
    })))
}

// ── Evidence ──────────────────────────────────────────────────────────────────

fn is_content_id(id: &str) -> bool {
    id.len() == 43 && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// `GET /evidence/:content_id` — Stored evidence package, byte for byte.
///
/// The bytes are re-hashed before they are served; a mismatch means the
/// store was tampered with and is reported as a server error.
pub async fn get_evidence(
    State(state): State<Arc<AppState>>,
    Path(content_id): Path<String>,
) -> Result<impl IntoResponse, SentinelError> {
    if !is_content_id(&content_id) {
        return Err(SentinelError::Validation(format!("'{content_id}' is not a content id")));
    }

    let bytes = state
        .evidence
        .get(&content_id)
        .await
        .map_err(|e| SentinelError::Internal(e.into()))?
        .ok_or_else(|| SentinelError::NotFound(format!("evidence {content_id}")))?;

    if content_store::content_id(&bytes) != content_id {
        let reason = format!("evidence {content_id} does not match its address");
        return Err(StoreError::Corrupt(reason).into());
    }

    Ok(([(header::CONTENT_TYPE, "application/json")], bytes))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_returns_ok() {
        let resp = health().await;
        assert_eq!(resp.0["status"], "ok");
        assert_eq!(resp.0["service"], "asset-sentinel");
    }

    #[test]
    fn manual_scan_body_must_parse_when_present() {
        assert!(manual_scan_request(b"").unwrap().is_none());
        assert!(manual_scan_request(b"  \n").unwrap().is_none());

        let req = manual_scan_request(br#"{"platforms":["etsy"]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(req.platforms, Some(vec!["etsy".to_string()]));

        let malformed: [&[u8]; 3] = [br#"{"platforms":"myspace"}"#, b"{", b"null"];
        for bad in malformed {
            let err = manual_scan_request(bad).unwrap_err();
            assert!(matches!(err, SentinelError::Validation(_)));
        }
    }

    #[test]
    fn content_id_shape() {
        assert!(is_content_id(&content_store::content_id(b"x")));
        assert!(!is_content_id("../../etc/passwd"));
        assert!(!is_content_id(""));
    }
}
