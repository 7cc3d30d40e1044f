// SPDX-License-Identifier: EUPL-1.2

//! Asset Sentinel — finds unauthorized copies of registered creative assets
//! on external platforms and tracks the resulting alerts.
//!
//! ## Endpoints
//!
//! - `GET  /health`                — Health check
//! - `GET  /alerts`                — List alerts
//! - `GET  /alerts/:id`            — Get one alert
//! - `GET  /alerts/:id/history`    — Lifecycle events of an alert
//! - `POST /alerts/:id/action`     — Apply an operator action
//! - `POST /scans/scheduled`       — Run one scheduler batch (scan secret)
//! - `POST /assets/:id/scan`       — Scan one asset now (scan secret)
//! - `GET  /assets/:id/scans`      — Recent scan runs for an asset
//! - `GET  /evidence/:content_id`  — Stored evidence package

pub mod auth;
pub mod config;
pub mod content_store;
pub mod db;
pub mod error;
pub mod evidence;
pub mod fingerprint;
pub mod handlers;
pub mod handlers_alerts;
pub mod lifecycle;
pub mod models;
pub mod pipeline;
pub mod postgres;
pub mod scanner;
pub mod scheduler;
pub mod severity;
pub mod similarity;
pub mod store;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use db::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/alerts", get(handlers_alerts::list_alerts))
        .route("/alerts/:id", get(handlers_alerts::get_alert))
        .route("/alerts/:id/history", get(handlers_alerts::alert_history))
        .route("/alerts/:id/action", post(handlers_alerts::alert_action))
        .route("/scans/scheduled", post(handlers::trigger_scheduled_scan))
        .route("/assets/:id/scan", post(handlers::scan_asset))
        .route("/assets/:id/scans", get(handlers::list_asset_scans))
        .route("/evidence/:content_id", get(handlers::get_evidence))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
