use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::{DedupPolicy, RouteConfig, SortOrder, UndatedPolicy};
use crate::models::{DedupKey, NormalizedEvent};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub events: Vec<NormalizedEvent>,
    pub total_events: usize,
    pub current_page: usize,
    pub total_pages: usize,
}

/// Merge, dedupe, window-filter and sort the batches of one route.
pub fn assemble(
    batches: Vec<Vec<NormalizedEvent>>,
    route: &RouteConfig,
    now: DateTime<Utc>,
) -> Vec<NormalizedEvent> {
    let merged = merge(batches);
    let unique = dedupe(merged, route.dedup);
    let windowed = filter_window(unique, route, now);
    sort_events(windowed, route.order, route.undated)
}

pub fn merge(batches: Vec<Vec<NormalizedEvent>>) -> Vec<NormalizedEvent> {
    batches.into_iter().flatten().collect()
}

/// One record per dedup key, kept at the position of its first occurrence.
pub fn dedupe(events: Vec<NormalizedEvent>, policy: DedupPolicy) -> Vec<NormalizedEvent> {
    let mut slots: HashMap<DedupKey, usize> = HashMap::with_capacity(events.len());
    let mut out: Vec<NormalizedEvent> = Vec::with_capacity(events.len());

    for event in events {
        let key = event.dedup_key();
        match slots.get(&key).copied() {
            Some(idx) => match policy {
                DedupPolicy::Replace => out[idx] = event,
                DedupPolicy::Merge => overlay(&mut out[idx], event),
            },
            None => {
                slots.insert(key, out.len());
                out.push(event);
            }
        }
    }

    out
}

/// Later values win wherever they carry data; gaps keep the earlier value.
fn overlay(existing: &mut NormalizedEvent, incoming: NormalizedEvent) {
    let real_title = incoming.has_real_title();
    let real_location = incoming.has_real_location();
    if real_title {
        existing.title = incoming.title;
    }
    if real_location {
        existing.location = incoming.location;
    }
    if incoming.link.is_some() {
        existing.link = incoming.link;
    }
    if incoming.start_time.is_some() {
        existing.start_time = incoming.start_time;
    }
    if incoming.end_time.is_some() {
        existing.end_time = incoming.end_time;
    }
    if incoming.description.is_some() {
        existing.description = incoming.description;
    }
    if incoming.image.is_some() {
        existing.image = incoming.image;
    }
    if incoming.category.is_some() {
        existing.category = incoming.category;
    }
    existing.source_id = incoming.source_id;
}

/// Inclusive `[now, now + horizon]` check. Undated events never fit a window.
pub fn within_window(event: &NormalizedEvent, route: &RouteConfig, now: DateTime<Utc>) -> bool {
    let start = match event.start_time {
        Some(start) => start,
        None => return false,
    };
    if route.upcoming_only && start < now {
        return false;
    }
    match route.horizon_days {
        Some(days) => start >= now && horizon_end(now, days).map_or(true, |end| start <= end),
        None => true,
    }
}

/// `now + days`, or `None` when that lies past chrono's range.
pub fn horizon_end(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    Duration::try_days(days).and_then(|span| now.checked_add_signed(span))
}

pub fn filter_window(
    events: Vec<NormalizedEvent>,
    route: &RouteConfig,
    now: DateTime<Utc>,
) -> Vec<NormalizedEvent> {
    if !route.has_time_window() {
        return events;
    }
    events
        .into_iter()
        .filter(|event| within_window(event, route, now))
        .collect()
}

/// Stable chronological sort. Undated events are dropped or pinned to one
/// end regardless of `order`.
pub fn sort_events(
    events: Vec<NormalizedEvent>,
    order: SortOrder,
    undated: UndatedPolicy,
) -> Vec<NormalizedEvent> {
    let (mut dated, undated_events): (Vec<_>, Vec<_>) =
        events.into_iter().partition(NormalizedEvent::is_dated);

    dated.sort_by(|a, b| {
        let ordering = compare_start(a, b);
        match order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    });

    match undated {
        UndatedPolicy::Exclude => dated,
        UndatedPolicy::Last => {
            dated.extend(undated_events);
            dated
        }
        UndatedPolicy::First => {
            let mut out = undated_events;
            out.extend(dated);
            out
        }
    }
}

pub fn compare_start(a: &NormalizedEvent, b: &NormalizedEvent) -> Ordering {
    a.start_time.cmp(&b.start_time)
}

/// Slices one page out of the assembled list. `page` is 1-based.
pub fn paginate(events: Vec<NormalizedEvent>, page: usize, limit: usize) -> Page {
    let page = page.max(1);
    let limit = limit.max(1);
    let total_events = events.len();
    let total_pages = total_events.div_ceil(limit);
    let offset = (page - 1).saturating_mul(limit);
    let events = events.into_iter().skip(offset).take(limit).collect();
    Page {
        events,
        total_events,
        current_page: page,
        total_pages,
    }
}
