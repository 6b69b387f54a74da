pub mod aggregate;
pub mod api;
pub mod clock;
pub mod config;
pub mod enrich;
pub mod error;
pub mod feeds;
pub mod models;
pub mod pipeline;
mod utils;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use api::AppState;
use clock::SystemClock;
use config::AppConfig;
use pipeline::Aggregator;

/// Serves the configured routes until ctrl-c.
pub async fn run(config: AppConfig) -> Result<()> {
    let aggregator = Aggregator::new(&config, Arc::new(SystemClock))?;
    let bind_addr = config.bind_addr.clone();
    let route_ids: Vec<String> = config.routes.iter().map(|route| route.id.clone()).collect();
    let app = api::router(AppState::new(config, aggregator));

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("unable to bind {bind_addr}"))?;
    info!(
        "listening on {} with routes {}",
        listener.local_addr()?,
        route_ids.join(", ")
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("unable to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
