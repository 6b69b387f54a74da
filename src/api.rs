use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::aggregate;
use crate::config::{AppConfig, RouteConfig};
use crate::error::AppError;
use crate::feeds::{self, RouteInfo, SourceReport};
use crate::pipeline::Aggregator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub aggregator: Arc<Aggregator>,
}

impl AppState {
    pub fn new(config: AppConfig, aggregator: Aggregator) -> Self {
        Self {
            config: Arc::new(config),
            aggregator: Arc::new(aggregator),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/routes", get(list_routes))
        .route("/api/sources/:id", get(source_events))
        .route("/api/:route", get(route_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn list_routes(State(state): State<AppState>) -> Json<Vec<RouteInfo>> {
    Json(feeds::list_routes(&state.config))
}

async fn source_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SourceReport>, AppError> {
    let source = state
        .config
        .find_source(&id)
        .ok_or_else(|| AppError::UnknownSource(id.clone()))?;
    Ok(Json(state.aggregator.run_source(source).await))
}

/// Raw query values; junk falls back to the defaults instead of a 400.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl PageQuery {
    /// 1-based page and clamped limit for `route`.
    pub fn resolve(&self, route: &RouteConfig, max_page_size: usize) -> (usize, usize) {
        let page = parse_number(self.page.as_deref()).unwrap_or(1).max(1);
        let max = max_page_size.max(1) as i64;
        let limit = parse_number(self.limit.as_deref())
            .unwrap_or(route.default_limit as i64)
            .clamp(1, max);
        (page as usize, limit as usize)
    }
}

fn parse_number(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|value| value.trim().parse().ok())
}

async fn route_events(
    State(state): State<AppState>,
    Path(route_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Response, AppError> {
    let route = state
        .config
        .find_route(&route_id)
        .ok_or_else(|| AppError::UnknownRoute(route_id.clone()))?;
    let cache_control = route
        .cache_control
        .as_deref()
        .map(HeaderValue::from_str)
        .transpose()
        .map_err(|err| AppError::Internal(format!("route {}: cache_control: {err}", route.id)))?;

    let events = state.aggregator.run_route(route).await;
    let mut response = if route.paginate {
        let (page, limit) = query.resolve(route, state.config.max_page_size);
        let mut page = aggregate::paginate(events, page, limit);
        page.events = state.aggregator.enrich(route, page.events).await;
        Json(page).into_response()
    } else {
        Json(state.aggregator.enrich(route, events).await).into_response()
    };

    if let Some(value) = cache_control {
        response.headers_mut().insert(header::CACHE_CONTROL, value);
    }
    Ok(response)
}
