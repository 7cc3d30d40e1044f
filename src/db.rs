// SPDX-License-Identifier: EUPL-1.2

//! Database connection pool, evidence store, and application state.

use redis::aio::ConnectionManager;
use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::content_store::{ContentStore, PgContentStore, RedisContentStore};
use crate::evidence::{EvidencePackager, NoScreenshots, ScreenshotCapturer};
use crate::lifecycle::AlertLifecycle;
use crate::pipeline::DetectionPipeline;
use crate::postgres::PgStore;
use crate::scanner::{HttpSearchAdapter, PlatformRegistry, PlatformScanner, SimulatedPlatform};
use crate::scheduler::ScanScheduler;
use crate::store::{
    AlertRepository, AssetRegistry, ChainRegistry, RecordedChainRegistry, ScanRunRepository,
};

/// Collaborators the service is assembled from.
pub struct Backends {
    pub assets: Arc<dyn AssetRegistry>,
    pub runs: Arc<dyn ScanRunRepository>,
    pub alerts: Arc<dyn AlertRepository>,
    pub chain: Arc<dyn ChainRegistry>,
    pub evidence: Arc<dyn ContentStore>,
    pub screenshots: Arc<dyn ScreenshotCapturer>,
    pub platforms: Arc<PlatformRegistry>,
}

/// Shared application state injected into every Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub alerts: Arc<dyn AlertRepository>,
    pub lifecycle: Arc<AlertLifecycle>,
    pub scheduler: Arc<ScanScheduler>,
    pub evidence: Arc<dyn ContentStore>,
    /// Secret for `POST /scans/scheduled` and `POST /assets/:id/scan`.
    /// When `None`, both endpoints answer 503.
    pub scan_secret: Option<String>,
}

impl AppState {
    /// Connect to PostgreSQL (required, migrations applied) and Redis
    /// (optional, falls back to storing evidence in PostgreSQL).
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let pool = PgPool::connect(&config.database_url).await?;
        tracing::info!("Connected to database");

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Migrations applied");

        let redis = connect_redis(config.redis_url.as_deref()).await;
        let evidence: Arc<dyn ContentStore> = match redis {
            Some(conn) => Arc::new(RedisContentStore::new(conn, config.public_base_url.clone())),
            None => Arc::new(PgContentStore::new(pool.clone(), config.public_base_url.clone())),
        };

        if config.scan_secret.is_some() {
            tracing::info!("SCAN_SECRET set — scan triggers are enabled");
        } else {
            tracing::warn!("SCAN_SECRET not set — scan triggers will answer 503");
        }

        let store = Arc::new(PgStore::new(pool));
        let backends = Backends {
            assets: store.clone(),
            runs: store.clone(),
            alerts: store,
            chain: Arc::new(RecordedChainRegistry),
            evidence,
            screenshots: Arc::new(NoScreenshots),
            platforms: platform_registry(config).await?,
        };
        Ok(Self::assemble(backends, config))
    }

    /// Wire the pipeline, lifecycle and scheduler over `backends`.
    pub fn assemble(backends: Backends, config: &Config) -> Self {
        let scanner = Arc::new(PlatformScanner::new(backends.platforms, config.scanner.clone()));
        let packager = Arc::new(EvidencePackager::new(
            backends.evidence.clone(),
            backends.screenshots,
        ));
        let lifecycle = Arc::new(AlertLifecycle::new(backends.alerts.clone(), config.transitions));
        let pipeline = Arc::new(
            DetectionPipeline::new(
                scanner,
                config.severity.clone(),
                packager,
                backends.alerts.clone(),
                lifecycle.clone(),
            )
            .with_min_similarity(config.min_similarity),
        );
        let scheduler = Arc::new(ScanScheduler::new(
            backends.assets,
            backends.runs,
            backends.chain,
            pipeline,
            config.scheduler.clone(),
        ));

        Self {
            alerts: backends.alerts,
            lifecycle,
            scheduler,
            evidence: backends.evidence,
            scan_secret: config.scan_secret.clone(),
        }
    }
}

async fn connect_redis(url: Option<&str>) -> Option<ConnectionManager> {
    let Some(url) = url else {
        tracing::info!("REDIS_URL not set — evidence stored in PostgreSQL");
        return None;
    };
    match redis::Client::open(url) {
        Ok(client) => match ConnectionManager::new(client).await {
            Ok(mgr) => {
                tracing::info!("Redis evidence store connected: {}", url);
                Some(mgr)
            }
            Err(e) => {
                tracing::warn!("Redis connect failed (evidence stored in PostgreSQL): {e}");
                None
            }
        },
        Err(e) => {
            tracing::warn!("Redis URL invalid (evidence stored in PostgreSQL): {e}");
            None
        }
    }
}

/// One adapter per configured platform: HTTP when an endpoint is configured,
/// simulated otherwise. Endpoints for platforms outside `SCAN_PLATFORMS` are
/// registered too, so manual scans can target them.
pub async fn platform_registry(config: &Config) -> anyhow::Result<Arc<PlatformRegistry>> {
    let registry = Arc::new(PlatformRegistry::new());

    for name in &config.scheduler.platforms {
        if !config.platform_endpoints.iter().any(|(p, _)| p == name) {
            tracing::warn!("Platform '{name}' has no search endpoint, using simulated adapter");
            registry
                .register(Arc::new(SimulatedPlatform::new(name.clone(), config.scan_seed)))
                .await;
        }
    }
    for (name, endpoint) in &config.platform_endpoints {
        tracing::info!("Platform '{name}' searches via {endpoint}");
        registry
            .register(Arc::new(HttpSearchAdapter::new(name.clone(), endpoint.clone())?))
            .await;
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn endpoints_replace_simulated_platforms() {
        let config = Config {
            platform_endpoints: vec![
                ("etsy".into(), "http://search.test/etsy".into()),
                ("flickr".into(), "http://search.test/flickr".into()),
            ],
            ..Config::default()
        };
        let registry = platform_registry(&config).await.unwrap();
        assert_eq!(
            registry.names().await,
            vec!["etsy", "flickr", "instagram", "pinterest", "tiktok", "twitter"]
        );
    }
}
