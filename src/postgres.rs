// SPDX-License-Identifier: EUPL-1.2

//! PostgreSQL implementation of the registry, scan-run and alert repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgPool};
use uuid::Uuid;

use crate::error::StoreError;
use crate::evidence::EvidencePackage;
use crate::models::{
    Alert, AlertEvent, AlertFilter, AssetFingerprint, AssetRecord, ScanRun, ScanRunCompletion,
    ScanRunStatus, StatusUpdate,
};
use crate::store::{AlertRepository, AssetRegistry, ScanRunRepository};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn corrupt(table: &str, e: String) -> StoreError {
    StoreError::Corrupt(format!("{table}: {e}"))
}

// ── Rows ──────────────────────────────────────────────────────────────────────

#[derive(FromRow)]
struct AssetRow {
    id: Uuid,
    owner_id: Uuid,
    title: String,
    creator: Option<String>,
    status: String,
    chain_tx_hash: Option<String>,
    content_hash: String,
    perceptual_hash: String,
    watermark_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AssetRow> for AssetRecord {
    type Error = StoreError;

    fn try_from(r: AssetRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            owner_id: r.owner_id,
            title: r.title,
            creator: r.creator,
            status: r.status.parse().map_err(|e| corrupt("assets", e))?,
            chain_tx_hash: r.chain_tx_hash,
            fingerprint: AssetFingerprint {
                asset_id: r.id,
                content_hash: r.content_hash,
                perceptual_hash: r.perceptual_hash,
                watermark_id: r.watermark_id,
            },
            created_at: r.created_at,
        })
    }
}

#[derive(FromRow)]
struct ScanRunRow {
    id: Uuid,
    asset_id: Uuid,
    day_bucket: i64,
    platforms: Vec<String>,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    candidates_found: i32,
    alerts_created: i32,
    error: Option<String>,
}

impl TryFrom<ScanRunRow> for ScanRun {
    type Error = StoreError;

    fn try_from(r: ScanRunRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            asset_id: r.asset_id,
            day_bucket: r.day_bucket,
            platforms: r.platforms,
            status: r.status.parse().map_err(|e| corrupt("scan_runs", e))?,
            started_at: r.started_at,
            completed_at: r.completed_at,
            candidates_found: r.candidates_found,
            alerts_created: r.alerts_created,
            error: r.error,
        })
    }
}

#[derive(FromRow)]
struct AlertRow {
    id: Uuid,
    asset_id: Uuid,
    owner_id: Uuid,
    platform: String,
    source_url: String,
    similarity_score: f64,
    severity: String,
    status: String,
    evidence_ref: Option<String>,
    evidence_url: Option<String>,
    evidence: Json<EvidencePackage>,
    detected_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    action_taken: Option<String>,
    notes: Option<String>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = StoreError;

    fn try_from(r: AlertRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            asset_id: r.asset_id,
            owner_id: r.owner_id,
            platform: r.platform,
            source_url: r.source_url,
            similarity_score: r.similarity_score,
            severity: r.severity.parse().map_err(|e| corrupt("alerts", e))?,
            status: r.status.parse().map_err(|e| corrupt("alerts", e))?,
            evidence_ref: r.evidence_ref,
            evidence_url: r.evidence_url,
            evidence: r.evidence.0,
            detected_at: r.detected_at,
            updated_at: r.updated_at,
            resolved_at: r.resolved_at,
            action_taken: r.action_taken,
            notes: r.notes,
        })
    }
}

#[derive(FromRow)]
struct AlertEventRow {
    alert_id: Uuid,
    from_status: String,
    to_status: String,
    notes: Option<String>,
    at: DateTime<Utc>,
}

impl TryFrom<AlertEventRow> for AlertEvent {
    type Error = StoreError;

    fn try_from(r: AlertEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            alert_id: r.alert_id,
            from_status: r
                .from_status
                .parse()
                .map_err(|e| corrupt("alert_events", e))?,
            to_status: r.to_status.parse().map_err(|e| corrupt("alert_events", e))?,
            notes: r.notes,
            at: r.at,
        })
    }
}

fn convert<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[async_trait]
impl AssetRegistry for PgStore {
    async fn get_asset(&self, id: Uuid) -> Result<Option<AssetRecord>, StoreError> {
        sqlx::query_as::<_, AssetRow>("SELECT * FROM assets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(AssetRecord::try_from)
            .transpose()
    }

    async fn list_due_for_scan(
        &self,
        completed_after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AssetRecord>, StoreError> {
        let rows = sqlx::query_as::<_, AssetRow>(
            "SELECT a.* FROM assets a
             LEFT JOIN LATERAL (
                 SELECT MAX(r.started_at) AS last_started FROM scan_runs r WHERE r.asset_id = a.id
             ) last ON TRUE
             WHERE a.status = 'registered'
               AND NOT EXISTS (
                   SELECT 1 FROM scan_runs r
                   WHERE r.asset_id = a.id
                     AND (r.status = 'RUNNING'
                          OR (r.status = 'COMPLETED' AND r.completed_at > $1))
               )
             ORDER BY last.last_started ASC NULLS FIRST, a.created_at ASC, a.id ASC
             LIMIT $2",
        )
        .bind(completed_after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }
}

// ── Scan runs ─────────────────────────────────────────────────────────────────

#[async_trait]
impl ScanRunRepository for PgStore {
    async fn reserve(
        &self,
        asset_id: Uuid,
        day_bucket: i64,
        platforms: &[String],
        started_at: DateTime<Utc>,
    ) -> Result<Option<ScanRun>, StoreError> {
        // A FAILED run in the same window is re-claimed; a COMPLETED one holds
        // the slot. A RUNNING run elsewhere trips the partial unique index.
        let reserved = sqlx::query_as::<_, ScanRunRow>(
            "INSERT INTO scan_runs (id, asset_id, day_bucket, platforms, status, started_at)
             VALUES ($1, $2, $3, $4, 'RUNNING', $5)
             ON CONFLICT (asset_id, day_bucket) DO UPDATE
             SET id = EXCLUDED.id, platforms = EXCLUDED.platforms, status = 'RUNNING',
                 started_at = EXCLUDED.started_at, completed_at = NULL,
                 candidates_found = 0, alerts_created = 0, error = NULL
             WHERE scan_runs.status = 'FAILED'
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(asset_id)
        .bind(day_bucket)
        .bind(platforms)
        .bind(started_at)
        .fetch_optional(&self.pool)
        .await;

        match reserved {
            Ok(row) => row.map(ScanRun::try_from).transpose(),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn complete(
        &self,
        run_id: Uuid,
        completion: ScanRunCompletion,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE scan_runs
             SET status = $2, completed_at = $3, candidates_found = $4,
                 alerts_created = $5, error = $6
             WHERE id = $1",
        )
        .bind(run_id)
        .bind(completion.status.as_str())
        .bind(completion.completed_at)
        .bind(completion.candidates_found)
        .bind(completion.alerts_created)
        .bind(&completion.error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!("scan run {run_id} vanished")));
        }
        Ok(())
    }

    async fn fail_stale(
        &self,
        started_before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE scan_runs
             SET status = $3, completed_at = $2, error = 'abandoned: exceeded stale-run window'
             WHERE status = 'RUNNING' AND started_at < $1",
        )
        .bind(started_before)
        .bind(at)
        .bind(ScanRunStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_for_asset(&self, asset_id: Uuid, limit: i64) -> Result<Vec<ScanRun>, StoreError> {
        let rows = sqlx::query_as::<_, ScanRunRow>(
            "SELECT * FROM scan_runs WHERE asset_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(asset_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }
}

// ── Alerts ────────────────────────────────────────────────────────────────────

#[async_trait]
impl AlertRepository for PgStore {
    async fn insert_alert(&self, alert: &Alert) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO alerts
               (id, asset_id, owner_id, platform, source_url, similarity_score, severity, status,
                evidence_ref, evidence_url, evidence, detected_at, updated_at, resolved_at,
                action_taken, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
             ON CONFLICT (asset_id, source_url) DO NOTHING",
        )
        .bind(alert.id)
        .bind(alert.asset_id)
        .bind(alert.owner_id)
        .bind(&alert.platform)
        .bind(&alert.source_url)
        .bind(alert.similarity_score)
        .bind(alert.severity.as_str())
        .bind(alert.status.as_str())
        .bind(&alert.evidence_ref)
        .bind(&alert.evidence_url)
        .bind(Json(&alert.evidence))
        .bind(alert.detected_at)
        .bind(alert.updated_at)
        .bind(alert.resolved_at)
        .bind(&alert.action_taken)
        .bind(&alert.notes)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn exists_for_source(
        &self,
        asset_id: Uuid,
        source_url: &str,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM alerts WHERE asset_id = $1 AND source_url = $2)",
        )
        .bind(asset_id)
        .bind(source_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>, StoreError> {
        sqlx::query_as::<_, AlertRow>("SELECT * FROM alerts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Alert::try_from)
            .transpose()
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            "SELECT * FROM alerts
             WHERE ($1::uuid IS NULL OR owner_id = $1)
               AND ($2::uuid IS NULL OR asset_id = $2)
               AND ($3::text IS NULL OR status = $3)
               AND ($4::text IS NULL OR severity = $4)
             ORDER BY detected_at DESC, id
             LIMIT $5 OFFSET $6",
        )
        .bind(filter.owner_id)
        .bind(filter.asset_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.severity.map(|s| s.as_str()))
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }

    async fn update_status(
        &self,
        id: Uuid,
        update: &StatusUpdate,
    ) -> Result<Option<Alert>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, AlertRow>(
            "UPDATE alerts
             SET status = $3, resolved_at = $4, action_taken = $5,
                 notes = COALESCE($6, notes), updated_at = $7
             WHERE id = $1 AND status = $2
             RETURNING *",
        )
        .bind(id)
        .bind(update.expected.as_str())
        .bind(update.status.as_str())
        .bind(update.resolved_at)
        .bind(&update.action_taken)
        .bind(&update.notes)
        .bind(update.at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            "INSERT INTO alert_events (alert_id, from_status, to_status, notes, at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(update.expected.as_str())
        .bind(update.status.as_str())
        .bind(&update.notes)
        .bind(update.at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Alert::try_from(row).map(Some)
    }

    async fn history(&self, id: Uuid) -> Result<Vec<AlertEvent>, StoreError> {
        let rows = sqlx::query_as::<_, AlertEventRow>(
            "SELECT alert_id, from_status, to_status, notes, at
             FROM alert_events WHERE alert_id = $1 ORDER BY at, id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }
}
