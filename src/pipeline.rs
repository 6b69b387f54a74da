use std::sync::Arc;

use reqwest::Client;
use tracing::info;

use crate::aggregate;
use crate::clock::Clock;
use crate::config::{AppConfig, RouteConfig, SourceConfig};
use crate::enrich;
use crate::error::AppError;
use crate::feeds::{self, base, SourceReport};
use crate::models::NormalizedEvent;

/// Runs the fetch, normalize, assemble and enrich stages for a route.
pub struct Aggregator {
    client: Client,
    clock: Arc<dyn Clock>,
    enrich_concurrency: usize,
}

impl Aggregator {
    pub fn new(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Self, AppError> {
        let client = base::build_client(config).map_err(|err| AppError::Client(err.to_string()))?;
        Ok(Self::with_client(client, clock, config.enrich_concurrency))
    }

    pub fn with_client(client: Client, clock: Arc<dyn Clock>, enrich_concurrency: usize) -> Self {
        Self {
            client,
            clock,
            enrich_concurrency,
        }
    }

    /// Fetches every source of the route and assembles the result.
    pub async fn run_route(&self, route: &RouteConfig) -> Vec<NormalizedEvent> {
        let reports = feeds::fetch_all(&self.client, &route.sources).await;
        let fetched: usize = reports.iter().map(|report| report.events.len()).sum();
        let batches = reports.into_iter().map(|report| report.events).collect();

        let events = aggregate::assemble(batches, route, self.clock.now());
        info!(
            "route {}: {} fetched, {} kept",
            route.id,
            fetched,
            events.len()
        );
        events
    }

    /// Image backfill for routes that ask for it. Callers pass the slice
    /// they are about to serve so pages only pay for their own lookups.
    pub async fn enrich(
        &self,
        route: &RouteConfig,
        events: Vec<NormalizedEvent>,
    ) -> Vec<NormalizedEvent> {
        if !route.backfill_images {
            return events;
        }
        enrich::backfill_images(&self.client, events, self.enrich_concurrency).await
    }

    pub async fn run_source(&self, source: &SourceConfig) -> SourceReport {
        feeds::fetch_source(&self.client, source).await
    }
}
