// SPDX-License-Identifier: EUPL-1.2

//! HTTP-level tests over in-memory collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use asset_sentinel::content_store::MemoryContentStore;
use asset_sentinel::db::Backends;
use asset_sentinel::evidence::NoScreenshots;
use asset_sentinel::lifecycle::TransitionPolicy;
use asset_sentinel::models::{AssetFingerprint, AssetRecord, AssetStatus, ScanCandidate};
use asset_sentinel::scanner::{AdapterError, PlatformAdapter, PlatformRegistry, ScanQuery};
use asset_sentinel::scheduler::SchedulerSettings;
use asset_sentinel::store::{MemoryStore, RecordedChainRegistry};
use asset_sentinel::{build_router, AppState, Config};

const SECRET: &str = "test-scan-secret";
const ASSET_HASH: &str = "0123456789abcdef0123456789abcdef01234567";
// First four nibbles differ in every bit: 16 of 160 bits.
const COPY_HASH: &str = "fedc456789abcdef0123456789abcdef01234567";

fn asset_id() -> Uuid {
    Uuid::from_u128(0xa55e7)
}

fn owner_id() -> Uuid {
    Uuid::from_u128(0x0a11ce)
}

/// Reports the same near-copy for every asset it is asked about.
struct CopyCat;

#[async_trait]
impl PlatformAdapter for CopyCat {
    fn name(&self) -> &str {
        "twitter"
    }

    async fn search(
        &self,
        fp: &AssetFingerprint,
        _: &ScanQuery,
    ) -> Result<Vec<ScanCandidate>, AdapterError> {
        Ok(vec![ScanCandidate {
            platform: "twitter".into(),
            source_url: format!("https://twitter.example/status/{}", fp.asset_id.simple()),
            discovered_at: Utc::now(),
            thumbnail_ref: None,
            perceptual_hash: Some(COPY_HASH.into()),
            watermark_id: fp.watermark_id.clone(),
            title: None,
            author: None,
        }])
    }
}

async fn server_with(secret: Option<&str>, transitions: TransitionPolicy) -> TestServer {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_asset(AssetRecord {
            id: asset_id(),
            owner_id: owner_id(),
            title: "Salt Marsh, Evening".into(),
            creator: Some("A. Ferreira".into()),
            status: AssetStatus::Registered,
            chain_tx_hash: Some("0xfeed".into()),
            fingerprint: AssetFingerprint {
                asset_id: asset_id(),
                content_hash: "cd".repeat(32),
                perceptual_hash: ASSET_HASH.into(),
                watermark_id: Some("wm-marsh".into()),
            },
            created_at: Utc::now(),
        })
        .await;

    let platforms = Arc::new(PlatformRegistry::new());
    platforms.register(Arc::new(CopyCat)).await;

    let backends = Backends {
        assets: store.clone(),
        runs: store.clone(),
        alerts: store,
        chain: Arc::new(RecordedChainRegistry),
        evidence: Arc::new(MemoryContentStore::new("http://sentinel.test")),
        screenshots: Arc::new(NoScreenshots),
        platforms,
    };
    let config = Config {
        scan_secret: secret.map(String::from),
        transitions,
        scheduler: SchedulerSettings {
            platforms: vec!["twitter".into()],
            ..Default::default()
        },
        ..Config::default()
    };

    let state = Arc::new(AppState::assemble(backends, &config));
    TestServer::new(build_router(state)).unwrap()
}

async fn server() -> TestServer {
    server_with(Some(SECRET), TransitionPolicy::Permissive).await
}

fn secret_header(value: &str) -> (HeaderName, HeaderValue) {
    (HeaderName::from_static("x-scan-secret"), HeaderValue::from_str(value).unwrap())
}

/// Run one batch and return the id of the single alert it raised.
async fn scan_and_get_alert(server: &TestServer) -> String {
    let (name, value) = secret_header(SECRET);
    let summary: Value = server
        .post("/scans/scheduled")
        .add_header(name, value)
        .await
        .json();
    assert_eq!(summary["alerts_created"], 1);

    let list: Value = server.get("/alerts").await.json();
    list["alerts"][0]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_ok() {
    let server = server().await;
    let resp = server.get("/health").await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>()["service"], "asset-sentinel");
}

#[tokio::test]
async fn scheduled_scan_requires_secret() {
    let server = server().await;

    let resp = server.post("/scans/scheduled").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let (name, value) = secret_header("wrong");
    let resp = server
        .post("/scans/scheduled")
        .add_header(name, value)
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let resp = server
        .post("/scans/scheduled")
        .add_header(
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&format!("Bearer {SECRET}")).unwrap(),
        )
        .await;
    resp.assert_status_ok();
}

#[tokio::test]
async fn unconfigured_secret_is_service_unavailable() {
    let server = server_with(None, TransitionPolicy::Permissive).await;
    let (name, value) = secret_header(SECRET);
    let resp = server
        .post("/scans/scheduled")
        .add_header(name, value)
        .await;
    resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn scheduled_scan_reports_summary_and_is_idempotent() {
    let server = server().await;

    let (name, value) = secret_header(SECRET);
    let first = server
        .post("/scans/scheduled")
        .add_header(name, value)
        .await;
    first.assert_status_ok();
    first.assert_json(&json!({ "scanned": 1, "errors": [], "alerts_created": 1 }));

    let (name, value) = secret_header(SECRET);
    let second = server
        .post("/scans/scheduled")
        .add_header(name, value)
        .await;
    second.assert_json(&json!({ "scanned": 0, "errors": [], "alerts_created": 0 }));

    let list: Value = server.get("/alerts").await.json();
    assert_eq!(list["count"], 1);
    let alert = &list["alerts"][0];
    assert_eq!(alert["similarity_score"], 90.0);
    assert_eq!(alert["severity"], "CRITICAL");
    assert_eq!(alert["status"], "NEW");
    assert!(alert["evidence_ref"].is_string());
    assert!(alert["resolved_at"].is_null());

    let runs: Value = server
        .get(&format!("/assets/{}/scans", asset_id()))
        .await
        .json();
    assert_eq!(runs["count"], 1);
    assert_eq!(runs["runs"][0]["status"], "COMPLETED");
}

#[tokio::test]
async fn alert_filters_apply() {
    let server = server().await;
    scan_and_get_alert(&server).await;

    let mine: Value = server
        .get(&format!("/alerts?owner_id={}&severity=critical", owner_id()))
        .await
        .json();
    assert_eq!(mine["count"], 1);

    let other: Value = server
        .get(&format!("/alerts?owner_id={}", Uuid::from_u128(1)))
        .await
        .json();
    assert_eq!(other["count"], 0);

    let resolved: Value = server.get("/alerts?status=RESOLVED").await.json();
    assert_eq!(resolved["count"], 0);

    server.get("/alerts?status=OPEN").await.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_action_is_rejected_and_alert_unchanged() {
    let server = server().await;
    let id = scan_and_get_alert(&server).await;

    let resp = server
        .post(&format!("/alerts/{id}/action"))
        .json(&json!({ "action": "ESCALATE" }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);

    let alert: Value = server.get(&format!("/alerts/{id}")).await.json();
    assert_eq!(alert["status"], "NEW");
    assert!(alert["action_taken"].is_null());

    let history: Value = server.get(&format!("/alerts/{id}/history")).await.json();
    assert_eq!(history["count"], 0);
}

#[tokio::test]
async fn unknown_alert_is_not_found() {
    let server = server().await;
    let missing = Uuid::from_u128(404);

    server
        .get(&format!("/alerts/{missing}"))
        .await
        .assert_status_not_found();
    server
        .post(&format!("/alerts/{missing}/action"))
        .json(&json!({ "action": "CONFIRMED" }))
        .await
        .assert_status_not_found();
    server
        .get(&format!("/alerts/{missing}/history"))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn actions_move_alert_and_record_history() {
    let server = server().await;
    let id = scan_and_get_alert(&server).await;

    let resp = server
        .post(&format!("/alerts/{id}/action"))
        .json(&json!({ "action": "resolved", "notes": "host removed the post" }))
        .await;
    resp.assert_status_ok();
    let alert: Value = resp.json();
    assert_eq!(alert["status"], "RESOLVED");
    assert_eq!(alert["action_taken"], "RESOLVED");
    assert!(alert["resolved_at"].is_string());

    // Stale pin: the caller still believes the alert is NEW.
    let resp = server
        .post(&format!("/alerts/{id}/action"))
        .json(&json!({ "action": "REVIEWING", "expected_status": "NEW" }))
        .await;
    resp.assert_status(StatusCode::CONFLICT);

    let history: Value = server.get(&format!("/alerts/{id}/history")).await.json();
    assert_eq!(history["count"], 1);
    assert_eq!(history["events"][0]["from_status"], "NEW");
    assert_eq!(history["events"][0]["to_status"], "RESOLVED");
}

#[tokio::test]
async fn strict_transitions_reject_skipped_steps() {
    let server = server_with(Some(SECRET), TransitionPolicy::Strict).await;
    let id = scan_and_get_alert(&server).await;

    let resp = server
        .post(&format!("/alerts/{id}/action"))
        .json(&json!({ "action": "TAKEDOWN_SENT" }))
        .await;
    resp.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    server
        .post(&format!("/alerts/{id}/action"))
        .json(&json!({ "action": "REVIEWING" }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn evidence_is_served_by_content_id() {
    let server = server().await;
    let id = scan_and_get_alert(&server).await;

    let alert: Value = server.get(&format!("/alerts/{id}")).await.json();
    let content_id = alert["evidence_ref"].as_str().unwrap().to_string();
    assert_eq!(alert["evidence_url"], format!("http://sentinel.test/evidence/{content_id}"));

    let resp = server.get(&format!("/evidence/{content_id}")).await;
    resp.assert_status_ok();
    let package: Value = resp.json();
    assert_eq!(package["version"], 1);
    assert_eq!(package["detection"]["watermark_found"], true);
    assert_eq!(package["screenshot"]["outcome"], "unavailable");

    let unknown = "A".repeat(43);
    server
        .get(&format!("/evidence/{unknown}"))
        .await
        .assert_status_not_found();
    server
        .get("/evidence/not-a-content-id")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn manual_scan_conflicts_within_window() {
    let server = server().await;
    let path = format!("/assets/{}/scan", asset_id());

    let (name, value) = secret_header(SECRET);
    let resp = server
        .post(&path)
        .add_header(name, value)
        .json(&json!({ "platforms": ["twitter"] }))
        .await;
    resp.assert_status(StatusCode::CREATED);
    assert_eq!(resp.json::<Value>()["alerts_created"], 1);

    let (name, value) = secret_header(SECRET);
    let resp = server.post(&path).add_header(name, value).await;
    resp.assert_status(StatusCode::CONFLICT);

    let (name, value) = secret_header(SECRET);
    let resp = server
        .post(&format!("/assets/{}/scan", Uuid::from_u128(5)))
        .add_header(name, value)
        .await;
    resp.assert_status_not_found();

    let (name, value) = secret_header(SECRET);
    let resp = server
        .post(&path)
        .add_header(name, value)
        .json(&json!({ "platforms": ["myspace"] }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_manual_scan_body_is_rejected_without_reserving() {
    let server = server().await;
    let path = format!("/assets/{}/scan", asset_id());

    let (name, value) = secret_header(SECRET);
    let resp = server
        .post(&path)
        .add_header(name, value)
        .json(&json!({ "platforms": "myspace" }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);

    let runs: Value = server
        .get(&format!("/assets/{}/scans", asset_id()))
        .await
        .json();
    assert_eq!(runs["count"], 0);

    let (name, value) = secret_header(SECRET);
    server
        .post(&path)
        .add_header(name, value)
        .await
        .assert_status(StatusCode::CREATED);
}
