// SPDX-License-Identifier: EUPL-1.2

use asset_sentinel::{build_router, AppState, Config};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "asset_sentinel=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let state = Arc::new(AppState::connect(&config).await?);

    if let Some(period) = config.scan_interval {
        let scheduler = state.scheduler.clone();
        tracing::info!("In-process scheduler every {}s", period.as_secs());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = scheduler.run_once().await {
                    tracing::error!("Scheduled scan failed: {e}");
                }
            }
        });
    }

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("Asset Sentinel listening on http://{}", config.listen_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
