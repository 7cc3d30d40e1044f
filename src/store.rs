// SPDX-License-Identifier: EUPL-1.2

//! Collaborator interfaces consumed by the pipeline, plus an in-memory backend.
//!
//! The PostgreSQL backend lives in [`crate::postgres`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Alert, AlertEvent, AlertFilter, AssetRecord, AssetStatus, ScanRun, ScanRunCompletion,
    ScanRunStatus, StatusUpdate,
};

/// Read side of the asset registry.
#[async_trait]
pub trait AssetRegistry: Send + Sync {
    async fn get_asset(&self, id: Uuid) -> Result<Option<AssetRecord>, StoreError>;

    /// Registered assets with no running scan and no scan completed after
    /// `completed_after`, least recently scanned first.
    async fn list_due_for_scan(
        &self,
        completed_after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AssetRecord>, StoreError>;
}

#[async_trait]
pub trait ScanRunRepository: Send + Sync {
    /// Atomically reserve a run for `(asset_id, day_bucket)`.
    /// Returns `None` when a completed run already holds that slot or the
    /// asset has a run in progress. A failed run in the slot is replaced.
    async fn reserve(
        &self,
        asset_id: Uuid,
        day_bucket: i64,
        platforms: &[String],
        started_at: DateTime<Utc>,
    ) -> Result<Option<ScanRun>, StoreError>;

    async fn complete(&self, run_id: Uuid, completion: ScanRunCompletion) -> Result<(), StoreError>;

    /// Fail runs still RUNNING that started before `started_before`.
    async fn fail_stale(
        &self,
        started_before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn list_for_asset(&self, asset_id: Uuid, limit: i64) -> Result<Vec<ScanRun>, StoreError>;
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Insert a new alert. Returns `false` if one already exists for the same
    /// `(asset_id, source_url)`.
    async fn insert_alert(&self, alert: &Alert) -> Result<bool, StoreError>;

    async fn exists_for_source(&self, asset_id: Uuid, source_url: &str) -> Result<bool, StoreError>;

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>, StoreError>;

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError>;

    /// Apply `update` only while the alert is still in `update.expected`,
    /// recording an [`AlertEvent`]. `None` if the alert moved on or is gone.
    async fn update_status(
        &self,
        id: Uuid,
        update: &StatusUpdate,
    ) -> Result<Option<Alert>, StoreError>;

    async fn history(&self, id: Uuid) -> Result<Vec<AlertEvent>, StoreError>;
}

/// Confirms on-chain registration before an asset is scheduled.
#[async_trait]
pub trait ChainRegistry: Send + Sync {
    async fn is_registered(&self, asset: &AssetRecord) -> Result<bool, StoreError>;
}

/// Trusts the registration transaction recorded by the registry.
pub struct RecordedChainRegistry;

#[async_trait]
impl ChainRegistry for RecordedChainRegistry {
    async fn is_registered(&self, asset: &AssetRecord) -> Result<bool, StoreError> {
        Ok(asset
            .chain_tx_hash
            .as_deref()
            .is_some_and(|tx| !tx.trim().is_empty()))
    }
}

// ── In-memory backend ─────────────────────────────────────────────────────────

/// Process-local implementation of every repository, used by tests and local runs.
#[derive(Default)]
pub struct MemoryStore {
    assets: RwLock<HashMap<Uuid, AssetRecord>>,
    alerts: RwLock<HashMap<Uuid, Alert>>,
    events: RwLock<Vec<AlertEvent>>,
    runs: RwLock<Vec<ScanRun>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_asset(&self, asset: AssetRecord) {
        self.assets.write().await.insert(asset.id, asset);
    }

    pub async fn alert_count(&self) -> usize {
        self.alerts.read().await.len()
    }
}

#[async_trait]
impl AssetRegistry for MemoryStore {
    async fn get_asset(&self, id: Uuid) -> Result<Option<AssetRecord>, StoreError> {
        Ok(self.assets.read().await.get(&id).cloned())
    }

    async fn list_due_for_scan(
        &self,
        completed_after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AssetRecord>, StoreError> {
        let assets = self.assets.read().await;
        let runs = self.runs.read().await;

        let mut due: Vec<(Option<DateTime<Utc>>, &AssetRecord)> = assets
            .values()
            .filter(|a| a.status == AssetStatus::Registered)
            .filter(|a| {
                !runs.iter().any(|r| {
                    r.asset_id == a.id
                        && (r.status == ScanRunStatus::Running
                            || (r.status == ScanRunStatus::Completed
                                && r.completed_at.is_some_and(|at| at > completed_after)))
                })
            })
            .map(|a| {
                let last = runs
                    .iter()
                    .filter(|r| r.asset_id == a.id)
                    .map(|r| r.started_at)
                    .max();
                (last, a)
            })
            .collect();

        due.sort_by(|(la, a), (lb, b)| {
            la.cmp(lb)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, a)| a.clone())
            .collect())
    }
}

#[async_trait]
impl ScanRunRepository for MemoryStore {
    async fn reserve(
        &self,
        asset_id: Uuid,
        day_bucket: i64,
        platforms: &[String],
        started_at: DateTime<Utc>,
    ) -> Result<Option<ScanRun>, StoreError> {
        let mut runs = self.runs.write().await;
        let taken = runs.iter().any(|r| {
            r.asset_id == asset_id
                && (r.status == ScanRunStatus::Running
                    || (r.day_bucket == day_bucket && r.status == ScanRunStatus::Completed))
        });
        if taken {
            return Ok(None);
        }
        // A failed run in the same window gives its slot up.
        runs.retain(|r| !(r.asset_id == asset_id && r.day_bucket == day_bucket));
        let run = ScanRun {
            id: Uuid::new_v4(),
            asset_id,
            day_bucket,
            platforms: platforms.to_vec(),
            status: ScanRunStatus::Running,
            started_at,
            completed_at: None,
            candidates_found: 0,
            alerts_created: 0,
            error: None,
        };
        runs.push(run.clone());
        Ok(Some(run))
    }

    async fn complete(
        &self,
        run_id: Uuid,
        completion: ScanRunCompletion,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| StoreError::Corrupt(format!("scan run {run_id} vanished")))?;
        run.status = completion.status;
        run.completed_at = Some(completion.completed_at);
        run.candidates_found = completion.candidates_found;
        run.alerts_created = completion.alerts_created;
        run.error = completion.error;
        Ok(())
    }

    async fn fail_stale(
        &self,
        started_before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut runs = self.runs.write().await;
        let mut failed = 0;
        for run in runs
            .iter_mut()
            .filter(|r| r.status == ScanRunStatus::Running && r.started_at < started_before)
        {
            run.status = ScanRunStatus::Failed;
            run.completed_at = Some(at);
            run.error = Some("abandoned: exceeded stale-run window".into());
            failed += 1;
        }
        Ok(failed)
    }

    async fn list_for_asset(&self, asset_id: Uuid, limit: i64) -> Result<Vec<ScanRun>, StoreError> {
        let runs = self.runs.read().await;
        let mut mine: Vec<ScanRun> = runs
            .iter()
            .filter(|r| r.asset_id == asset_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        mine.truncate(limit.max(0) as usize);
        Ok(mine)
    }
}

#[async_trait]
impl AlertRepository for MemoryStore {
    async fn insert_alert(&self, alert: &Alert) -> Result<bool, StoreError> {
        let mut alerts = self.alerts.write().await;
        let duplicate = alerts
            .values()
            .any(|a| a.asset_id == alert.asset_id && a.source_url == alert.source_url);
        if duplicate {
            return Ok(false);
        }
        alerts.insert(alert.id, alert.clone());
        Ok(true)
    }

    async fn exists_for_source(
        &self,
        asset_id: Uuid,
        source_url: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .any(|a| a.asset_id == asset_id && a.source_url == source_url))
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>, StoreError> {
        Ok(self.alerts.read().await.get(&id).cloned())
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError> {
        let alerts = self.alerts.read().await;
        let mut matching: Vec<Alert> = alerts
            .values()
            .filter(|a| filter.owner_id.map_or(true, |o| a.owner_id == o))
            .filter(|a| filter.asset_id.map_or(true, |id| a.asset_id == id))
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .filter(|a| filter.severity.map_or(true, |s| a.severity == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.detected_at.cmp(&a.detected_at).then(a.id.cmp(&b.id)));
        Ok(matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn update_status(
        &self,
        id: Uuid,
        update: &StatusUpdate,
    ) -> Result<Option<Alert>, StoreError> {
        let mut alerts = self.alerts.write().await;
        let Some(alert) = alerts.get_mut(&id) else {
            return Ok(None);
        };
        if alert.status != update.expected {
            return Ok(None);
        }
        alert.status = update.status;
        alert.resolved_at = update.resolved_at;
        alert.action_taken = Some(update.action_taken.clone());
        if update.notes.is_some() {
            alert.notes = update.notes.clone();
        }
        alert.updated_at = update.at;
        let updated = alert.clone();

        self.events.write().await.push(AlertEvent {
            alert_id: id,
            from_status: update.expected,
            to_status: update.status,
            notes: update.notes.clone(),
            at: update.at,
        });
        Ok(Some(updated))
    }

    async fn history(&self, id: Uuid) -> Result<Vec<AlertEvent>, StoreError> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.alert_id == id)
            .cloned()
            .collect())
    }
}

/// Fault-injecting wrappers over [`MemoryStore`].
#[cfg(test)]
pub(crate) mod faults {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn outage(what: &str) -> StoreError {
        StoreError::Corrupt(format!("{what}: connection reset"))
    }

    /// Accepts the first `allowed` alert inserts, then fails every write.
    pub struct FlakyAlerts {
        inner: Arc<MemoryStore>,
        allowed: usize,
        inserts: AtomicUsize,
    }

    impl FlakyAlerts {
        pub fn new(inner: Arc<MemoryStore>, allowed: usize) -> Self {
            Self {
                inner,
                allowed,
                inserts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AlertRepository for FlakyAlerts {
        async fn insert_alert(&self, alert: &Alert) -> Result<bool, StoreError> {
            if self.inserts.fetch_add(1, Ordering::SeqCst) >= self.allowed {
                return Err(outage("insert_alert"));
            }
            self.inner.insert_alert(alert).await
        }

        async fn exists_for_source(
            &self,
            asset_id: Uuid,
            source_url: &str,
        ) -> Result<bool, StoreError> {
            self.inner.exists_for_source(asset_id, source_url).await
        }

        async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>, StoreError> {
            self.inner.get_alert(id).await
        }

        async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError> {
            self.inner.list_alerts(filter).await
        }

        async fn update_status(
            &self,
            id: Uuid,
            update: &StatusUpdate,
        ) -> Result<Option<Alert>, StoreError> {
            self.inner.update_status(id, update).await
        }

        async fn history(&self, id: Uuid) -> Result<Vec<AlertEvent>, StoreError> {
            self.inner.history(id).await
        }
    }

    /// Fails reservations for one asset and, optionally, every completion write.
    pub struct FlakyRuns {
        inner: Arc<MemoryStore>,
        reserve_fails_for: Option<Uuid>,
        fail_complete: bool,
    }

    impl FlakyRuns {
        pub fn new(
            inner: Arc<MemoryStore>,
            reserve_fails_for: Option<Uuid>,
            fail_complete: bool,
        ) -> Self {
            Self {
                inner,
                reserve_fails_for,
                fail_complete,
            }
        }
    }

    #[async_trait]
    impl ScanRunRepository for FlakyRuns {
        async fn reserve(
            &self,
            asset_id: Uuid,
            day_bucket: i64,
            platforms: &[String],
            at: DateTime<Utc>,
        ) -> Result<Option<ScanRun>, StoreError> {
            if self.reserve_fails_for == Some(asset_id) {
                return Err(outage("reserve"));
            }
            self.inner.reserve(asset_id, day_bucket, platforms, at).await
        }

        async fn complete(
            &self,
            run_id: Uuid,
            completion: ScanRunCompletion,
        ) -> Result<(), StoreError> {
            if self.fail_complete {
                return Err(outage("complete"));
            }
            self.inner.complete(run_id, completion).await
        }

        async fn fail_stale(
            &self,
            older_than: DateTime<Utc>,
            at: DateTime<Utc>,
        ) -> Result<u64, StoreError> {
            self.inner.fail_stale(older_than, at).await
        }

        async fn list_for_asset(
            &self,
            asset_id: Uuid,
            limit: i64,
        ) -> Result<Vec<ScanRun>, StoreError> {
            self.inner.list_for_asset(asset_id, limit).await
        }
    }
}
