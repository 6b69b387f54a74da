use std::{collections::HashSet, fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::utils;

pub const CONFIG_ENV: &str = "TOULOUSE_AGENDA_CONFIG";
/// About a century; longer windows are treated as configuration mistakes.
pub const MAX_HORIZON_DAYS: i64 = 36_500;
pub const MEETUP_CACHE_CONTROL: &str =
    "public, s-maxage=604800, stale-while-revalidate=604800";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind_addr: String,
    pub request_timeout_seconds: u64,
    pub user_agent: String,
    pub enrich_concurrency: usize,
    pub max_page_size: usize,
    pub routes: Vec<RouteConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3080".to_string(),
            request_timeout_seconds: 20,
            user_agent: "ToulouseAgenda/0.1 (+https://github.com/toulouse-agenda)".to_string(),
            enrich_concurrency: 8,
            max_page_size: 100,
            routes: default_routes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub id: String,
    pub sources: Vec<SourceConfig>,
    /// Drop events that started before "now".
    #[serde(default)]
    pub upcoming_only: bool,
    #[serde(default)]
    pub horizon_days: Option<i64>,
    #[serde(default)]
    pub undated: UndatedPolicy,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub dedup: DedupPolicy,
    #[serde(default)]
    pub paginate: bool,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default)]
    pub cache_control: Option<String>,
    #[serde(default)]
    pub backfill_images: bool,
}

impl RouteConfig {
    pub fn new(id: &str, sources: Vec<SourceConfig>) -> Self {
        Self {
            id: id.to_string(),
            sources,
            upcoming_only: false,
            horizon_days: None,
            undated: UndatedPolicy::default(),
            order: SortOrder::default(),
            dedup: DedupPolicy::default(),
            paginate: false,
            default_limit: default_limit(),
            cache_control: None,
            backfill_images: false,
        }
    }

    pub fn has_time_window(&self) -> bool {
        self.upcoming_only || self.horizon_days.is_some()
    }

    pub fn find_source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|source| source.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    pub format: SourceFormat,
    /// Fallback event link built from the item uid, e.g.
    /// `https://www.meetup.com/events/{uid}/`.
    #[serde(default)]
    pub link_template: Option<String>,
}

impl SourceConfig {
    pub fn new(id: &str, name: &str, url: &str, format: SourceFormat) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            format,
            link_template: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceFormat {
    Ical,
    Rss,
    Json(JsonSpec),
}

impl SourceFormat {
    pub fn label(&self) -> &'static str {
        match self {
            SourceFormat::Ical => "ical",
            SourceFormat::Rss => "rss",
            SourceFormat::Json(_) => "json",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JsonSpec {
    /// Dotted path to the item array; the document root when absent.
    pub items_path: Option<String>,
    pub fields: JsonFields,
}

/// Candidate key names per normalized field, tried in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JsonFields {
    pub uid: Vec<String>,
    pub title: Vec<String>,
    pub link: Vec<String>,
    pub start: Vec<String>,
    pub end: Vec<String>,
    pub location: Vec<String>,
    pub description: Vec<String>,
    pub image: Vec<String>,
    pub category: Vec<String>,
}

impl Default for JsonFields {
    fn default() -> Self {
        fn keys(names: &[&str]) -> Vec<String> {
            names.iter().map(|name| name.to_string()).collect()
        }
        Self {
            uid: keys(&["id", "uid"]),
            title: keys(&["title", "name"]),
            link: keys(&["url", "link"]),
            start: keys(&["start", "startDate", "date", "showtime"]),
            end: keys(&["end", "endDate"]),
            location: keys(&["location", "venue", "cinema"]),
            description: keys(&["description", "synopsis", "summary"]),
            image: keys(&["image", "poster", "thumbnail"]),
            category: keys(&["category", "genre"]),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UndatedPolicy {
    Exclude,
    First,
    #[default]
    Last,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    #[default]
    Merge,
    Replace,
}

impl AppConfig {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(utils::config_path);
        if !path.exists() {
            info!("no config at {}, using built-in routes", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&contents)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config.validate()?;
        info!(
            "loaded {} routes from {}",
            config.routes.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_page_size == 0 {
            bail!("max_page_size must be at least 1");
        }
        let mut route_ids = HashSet::new();
        for route in &self.routes {
            if route.id.trim().is_empty() {
                bail!("route id must not be empty");
            }
            if !route_ids.insert(route.id.as_str()) {
                bail!("duplicate route id: {}", route.id);
            }
            if route.default_limit == 0 {
                bail!("route {}: default_limit must be at least 1", route.id);
            }
            if let Some(value) = route.cache_control.as_deref() {
                HeaderValue::from_str(value)
                    .with_context(|| format!("route {}: invalid cache_control", route.id))?;
            }
            if matches!(route.horizon_days, Some(days) if !(0..=MAX_HORIZON_DAYS).contains(&days)) {
                bail!(
                    "route {}: horizon_days must be between 0 and {MAX_HORIZON_DAYS}",
                    route.id
                );
            }
            let mut source_ids = HashSet::new();
            for source in &route.sources {
                if !source_ids.insert(source.id.as_str()) {
                    bail!("route {}: duplicate source id {}", route.id, source.id);
                }
            }
        }
        Ok(())
    }

    pub fn find_route(&self, id: &str) -> Option<&RouteConfig> {
        self.routes.iter().find(|route| route.id == id)
    }

    /// First source with this id across all routes.
    pub fn find_source(&self, id: &str) -> Option<&SourceConfig> {
        self.routes.iter().find_map(|route| route.find_source(id))
    }
}

fn default_limit() -> usize {
    20
}

fn meetup_source(group: &str, name: &str) -> SourceConfig {
    SourceConfig {
        link_template: Some(format!("https://www.meetup.com/{group}/events/{{uid}}/")),
        ..SourceConfig::new(
            group,
            name,
            &format!("https://www.meetup.com/{group}/events/ical/"),
            SourceFormat::Ical,
        )
    }
}

fn default_routes() -> Vec<RouteConfig> {
    let meetup = RouteConfig {
        upcoming_only: true,
        horizon_days: Some(30),
        undated: UndatedPolicy::Exclude,
        paginate: true,
        cache_control: Some(MEETUP_CACHE_CONTROL.to_string()),
        backfill_images: true,
        ..RouteConfig::new(
            "meetup",
            vec![
                meetup_source("toulouse-rust", "Rust Toulouse"),
                meetup_source("tolosa-js", "Tolosa JS"),
                meetup_source("toulouse-data-science", "Toulouse Data Science"),
                meetup_source("python-toulouse", "Python Toulouse"),
                meetup_source("toulouse-devops", "Toulouse DevOps"),
            ],
        )
    };

    let agenda = RouteConfig {
        upcoming_only: true,
        undated: UndatedPolicy::Exclude,
        ..RouteConfig::new(
            "agenda",
            vec![
                SourceConfig::new(
                    "toulouse-fr",
                    "Agenda Toulouse.fr",
                    "https://www.toulouse.fr/agenda/rss",
                    SourceFormat::Rss,
                ),
                SourceConfig::new(
                    "toulouse-tourisme",
                    "Toulouse Tourisme",
                    "https://www.toulouse-tourisme.com/agenda/rss",
                    SourceFormat::Rss,
                ),
            ],
        )
    };

    let press = RouteConfig {
        order: SortOrder::Descending,
        ..RouteConfig::new(
            "press",
            vec![
                SourceConfig::new(
                    "la-depeche",
                    "La Dépêche",
                    "https://www.ladepeche.fr/communes/toulouse,31555.rss",
                    SourceFormat::Rss,
                ),
                SourceConfig::new(
                    "actu-toulouse",
                    "Actu Toulouse",
                    "https://actu.fr/occitanie/toulouse_31555/rss.xml",
                    SourceFormat::Rss,
                ),
            ],
        )
    };

    let theater = RouteConfig {
        upcoming_only: true,
        undated: UndatedPolicy::Exclude,
        ..RouteConfig::new(
            "theater",
            vec![
                SourceConfig::new(
                    "theatre-cite",
                    "Théâtre de la Cité",
                    "https://theatre-cite.com/api/spectacles.json",
                    SourceFormat::Json(JsonSpec {
                        items_path: Some("spectacles".to_string()),
                        fields: JsonFields::default(),
                    }),
                ),
                SourceConfig::new(
                    "cinema-abc",
                    "Cinéma ABC",
                    "https://abc-toulouse.fr/api/seances.json",
                    SourceFormat::Json(JsonSpec {
                        items_path: Some("data.showtimes".to_string()),
                        fields: JsonFields::default(),
                    }),
                ),
            ],
        )
    };

    vec![meetup, agenda, press, theater]
}
