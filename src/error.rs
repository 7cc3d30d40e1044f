// SPDX-License-Identifier: EUPL-1.2

//! Error types for Asset Sentinel.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Persistence failures from the registry, alert and scan-run stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Application-level errors returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Concurrent update: {0}")]
    Concurrency(String),

    #[error("Scan already reserved: {0}")]
    ScanInProgress(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Not configured: {0}")]
    Unconfigured(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for SentinelError {
    fn from(e: sqlx::Error) -> Self {
        SentinelError::Store(StoreError::Database(e))
    }
}

impl IntoResponse for SentinelError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            SentinelError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            SentinelError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            SentinelError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Missing or invalid scan secret".into(),
            ),
            SentinelError::Concurrency(msg) => (
                StatusCode::CONFLICT,
                format!("Concurrent update, retry: {msg}"),
            ),
            SentinelError::ScanInProgress(msg) => (StatusCode::CONFLICT, msg.clone()),
            SentinelError::InvalidTransition { from, to } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("Cannot move alert from {from} to {to}"),
            ),
            SentinelError::Unconfigured(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            SentinelError::Store(e) => {
                tracing::error!("Store error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".into())
            }
            SentinelError::Internal(e) => {
                tracing::error!("Internal error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
