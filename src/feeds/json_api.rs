use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::base;
use super::ical::IcalValue;
use super::FeedFormat;
use crate::config::{JsonSpec, SourceConfig};
use crate::error::{ItemError, SourceError};
use crate::models::{EventDraft, NormalizedEvent};

pub struct JsonFeed<'a> {
    pub spec: &'a JsonSpec,
}

impl FeedFormat for JsonFeed<'_> {
    fn normalize(
        &self,
        source: &SourceConfig,
        body: &str,
    ) -> Result<Vec<NormalizedEvent>, SourceError> {
        let document: Value =
            serde_json::from_str(body).map_err(|err| SourceError::Parse(err.to_string()))?;
        let items = match self.spec.items_path.as_deref() {
            Some(path) => lookup_path(&document, path),
            None => Some(&document),
        }
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SourceError::Parse(format!(
                "no item array at {}",
                self.spec.items_path.as_deref().unwrap_or("document root")
            ))
        })?;

        let drafts = items.iter().map(|item| self.normalize_item(source, item));
        Ok(super::collect_items(&source.id, drafts))
    }
}

impl JsonFeed<'_> {
    /// Title, start and a wrapped link must be readable or the item is
    /// dropped; other fields fall back to nothing when their shape is odd.
    fn normalize_item(&self, source: &SourceConfig, item: &Value) -> Result<EventDraft, ItemError> {
        let object = item.as_object().ok_or(ItemError::NotAnObject)?;
        let fields = &self.spec.fields;
        let optional_text = |keys: &[String], field: &'static str| {
            lenient(&source.id, pick_text(object, keys, field))
        };

        let title = pick_text(object, &fields.title, "title")?;
        let start_time = pick_time(object, &fields.start)?;
        let link = match pick_link(object, &fields.link) {
            LinkPick::Wrapped(link) => Some(link?),
            LinkPick::Loose(link) => lenient(&source.id, link),
        };

        Ok(EventDraft {
            uid: optional_text(&fields.uid, "uid"),
            title,
            link: base::absolute_url(&source.url, link),
            start_time,
            end_time: lenient(&source.id, pick_time(object, &fields.end)),
            location: optional_text(&fields.location, "location"),
            description: optional_text(&fields.description, "description")
                .and_then(|text| base::feed_text(&text)),
            image: base::absolute_url(&source.url, optional_text(&fields.image, "image")),
            category: optional_text(&fields.category, "category"),
        })
    }
}

fn lenient<T>(source_id: &str, value: Result<Option<T>, ItemError>) -> Option<T> {
    value.unwrap_or_else(|err| {
        debug!("{source_id}: ignoring field: {err}");
        None
    })
}

/// Follows a dotted path (`data.showtimes`) through nested objects.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
}

/// First candidate key holding something: nulls, blank strings and empty
/// arrays let later keys through.
fn pick<'a>(object: &'a Map<String, Value>, keys: &[String]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| match key.split_once('.') {
            Some((head, rest)) => object.get(head).and_then(|inner| lookup_path(inner, rest)),
            None => object.get(key),
        })
        .find(|value| match value {
            Value::Null => false,
            Value::String(text) => !text.trim().is_empty(),
            Value::Array(values) => !values.is_empty(),
            _ => true,
        })
}

/// Links come either bare or wrapped as `{ "val": .. }`, the way calendar
/// exports hand out property values. A wrapper without a string inside is
/// a malformed item; any other odd shape is just a missing link.
fn pick_link(object: &Map<String, Value>, keys: &[String]) -> LinkPick {
    match pick(object, keys) {
        Some(value) if value.get("val").is_some() => LinkPick::Wrapped(
            IcalValue::deserialize(value)
                .map_err(|err| ItemError::Field {
                    field: "link",
                    reason: err.to_string(),
                })
                .and_then(|wrapped| wrapped.into_text("link")),
        ),
        Some(value) => LinkPick::Loose(value_text(value, "link")),
        None => LinkPick::Loose(Ok(None)),
    }
}

enum LinkPick {
    Wrapped(Result<String, ItemError>),
    Loose(Result<Option<String>, ItemError>),
}

fn pick_text(
    object: &Map<String, Value>,
    keys: &[String],
    field: &'static str,
) -> Result<Option<String>, ItemError> {
    match pick(object, keys) {
        Some(value) => value_text(value, field),
        None => Ok(None),
    }
}

/// Text out of a listing value: strings, numbers, `{ "val": .. }` wrappers,
/// named objects and the first element of arrays.
pub fn value_text(value: &Value, field: &'static str) -> Result<Option<String>, ItemError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(base::clean_text(text)).filter(|text| !text.is_empty())),
        Value::Number(number) => Ok(Some(number.to_string())),
        Value::Bool(_) => Err(ItemError::Field {
            field,
            reason: "boolean where text was expected".to_string(),
        }),
        Value::Array(values) => match values.first() {
            Some(first) => value_text(first, field),
            None => Ok(None),
        },
        Value::Object(map) => {
            for key in ["val", "name", "url", "title"] {
                if let Some(inner) = map.get(key) {
                    return value_text(inner, field);
                }
            }
            Err(ItemError::Field {
                field,
                reason: "object without a text value".to_string(),
            })
        }
    }
}

fn pick_time(
    object: &Map<String, Value>,
    keys: &[String],
) -> Result<Option<DateTime<Utc>>, ItemError> {
    let value = match pick(object, keys) {
        Some(value) => value,
        None => return Ok(None),
    };
    if let Some(seconds) = value.as_i64() {
        // Millisecond timestamps are common in listing APIs.
        let parsed = if seconds.abs() >= 100_000_000_000 {
            Utc.timestamp_millis_opt(seconds).single()
        } else {
            Utc.timestamp_opt(seconds, 0).single()
        };
        return parsed
            .map(Some)
            .ok_or_else(|| ItemError::Date(seconds.to_string()));
    }
    match value_text(value, "date")? {
        Some(text) => base::parse_feed_date(&text, base::LOCAL_TZ)
            .map(Some)
            .ok_or(ItemError::Date(text)),
        None => Ok(None),
    }
}
