pub mod base;
pub mod ical;
pub mod json_api;
pub mod rss;

use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, SourceConfig, SourceFormat};
use crate::error::{ItemError, SourceError};
use crate::models::{EventDraft, NormalizedEvent};

/// Turns one raw source body into normalized events. A body that cannot be
/// read at all fails the source; bad items are skipped inside.
pub trait FeedFormat: Send + Sync {
    fn normalize(&self, source: &SourceConfig, body: &str)
        -> Result<Vec<NormalizedEvent>, SourceError>;
}

pub fn adapter_for(format: &SourceFormat) -> Box<dyn FeedFormat + '_> {
    match format {
        SourceFormat::Ical => Box::new(ical::IcalFeed),
        SourceFormat::Rss => Box::new(rss::RssFeed),
        SourceFormat::Json(spec) => Box::new(json_api::JsonFeed { spec }),
    }
}

pub(crate) fn collect_items<I>(source_id: &str, items: I) -> Vec<NormalizedEvent>
where
    I: IntoIterator<Item = Result<EventDraft, ItemError>>,
{
    let mut events = Vec::new();
    for item in items {
        match item {
            Ok(draft) => events.push(draft.build(source_id)),
            Err(err) => debug!("{source_id}: skipping item: {err}"),
        }
    }
    events
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub source_id: String,
    pub events: Vec<NormalizedEvent>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub format: &'static str,
}

#[derive(Clone, Debug, Serialize)]
pub struct RouteInfo {
    pub id: String,
    pub paginated: bool,
    pub sources: Vec<SourceInfo>,
}

pub fn list_routes(config: &AppConfig) -> Vec<RouteInfo> {
    config
        .routes
        .iter()
        .map(|route| RouteInfo {
            id: route.id.clone(),
            paginated: route.paginate,
            sources: route
                .sources
                .iter()
                .map(|source| SourceInfo {
                    id: source.id.clone(),
                    name: source.name.clone(),
                    url: source.url.clone(),
                    format: source.format.label(),
                })
                .collect(),
        })
        .collect()
}

/// Fetches and normalizes one source. Never fails: errors are logged and
/// reported next to an empty batch.
pub async fn fetch_source(client: &Client, source: &SourceConfig) -> SourceReport {
    let outcome = match base::fetch_text(client, &source.url).await {
        Ok(body) => adapter_for(&source.format).normalize(source, &body),
        Err(err) => Err(err),
    };

    match outcome {
        Ok(events) => {
            debug!("{}: {} events", source.id, events.len());
            SourceReport {
                source_id: source.id.clone(),
                events,
                error: None,
            }
        }
        Err(err) => {
            warn!("source {} ({}) failed: {err}", source.id, source.url);
            SourceReport {
                source_id: source.id.clone(),
                events: Vec::new(),
                error: Some(err.to_string()),
            }
        }
    }
}

/// Fetches every source concurrently and waits for all of them to settle.
/// Reports come back in source order.
pub async fn fetch_all(client: &Client, sources: &[SourceConfig]) -> Vec<SourceReport> {
    let reports = join_all(sources.iter().map(|source| fetch_source(client, source))).await;
    let failed = reports.iter().filter(|report| report.error.is_some()).count();
    if failed > 0 {
        info!("{failed} of {} sources failed", reports.len());
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JsonSpec;
    use crate::test_support;

    fn client() -> Client {
        base::build_client(&AppConfig::default()).expect("client")
    }

    #[tokio::test]
    async fn fetch_source_reports_events() {
        let base_url = test_support::spawn_upstream().await;
        let source = SourceConfig::new(
            "theatre-cite",
            "Théâtre de la Cité",
            &format!("{base_url}/theatre.json"),
            SourceFormat::Json(JsonSpec {
                items_path: Some("spectacles".to_string()),
                ..JsonSpec::default()
            }),
        );
        let report = fetch_source(&client(), &source).await;
        assert!(report.error.is_none());
        assert_eq!(report.events.len(), 2);
        assert!(report.events.iter().all(|event| event.source_id == "theatre-cite"));
    }

    #[tokio::test]
    async fn failures_stay_inside_the_source() {
        let base_url = test_support::spawn_upstream().await;
        let sources = vec![
            SourceConfig::new("gone", "Gone", &format!("{base_url}/missing"), SourceFormat::Rss),
            SourceConfig::new(
                "maintenance",
                "Maintenance",
                &format!("{base_url}/broken.xml"),
                SourceFormat::Rss,
            ),
            SourceConfig::new("offline", "Offline", &test_support::unreachable_url(), SourceFormat::Ical),
            SourceConfig::new(
                "agenda",
                "Agenda",
                &format!("{base_url}/agenda.xml"),
                SourceFormat::Rss,
            ),
        ];

        let reports = fetch_all(&client(), &sources).await;
        let ids: Vec<&str> = reports.iter().map(|report| report.source_id.as_str()).collect();
        assert_eq!(ids, vec!["gone", "maintenance", "offline", "agenda"]);

        for report in &reports[..3] {
            assert!(report.events.is_empty());
            assert!(report.error.is_some(), "{} should report its failure", report.source_id);
        }
        assert!(reports[0].error.as_deref().unwrap().contains("404"));
        assert!(reports[3].error.is_none());
        assert_eq!(reports[3].events.len(), 2);
    }

    #[test]
    fn route_listing_labels_formats() {
        let routes = list_routes(&AppConfig::default());
        let theater = routes.iter().find(|route| route.id == "theater").unwrap();
        assert!(!theater.paginated);
        assert!(theater.sources.iter().all(|source| source.format == "json"));
    }
}
