use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::base;
use super::FeedFormat;
use crate::config::SourceConfig;
use crate::error::{ItemError, SourceError};
use crate::models::{EventDraft, NormalizedEvent};

/// A property value as calendar libraries hand it back: either the bare
/// string or a wrapper carrying the property parameters next to `val`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IcalValue {
    Text(String),
    Wrapped {
        #[serde(default)]
        params: Map<String, Value>,
        val: Value,
    },
}

impl IcalValue {
    pub fn into_text(self, field: &'static str) -> Result<String, ItemError> {
        match self {
            IcalValue::Text(text) => Ok(text),
            IcalValue::Wrapped {
                val: Value::String(text),
                ..
            } => Ok(text),
            IcalValue::Wrapped { val, .. } => Err(ItemError::Field {
                field,
                reason: format!("expected a string value, got {val}"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub value: String,
}

impl Property {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    pub fn to_value(&self) -> IcalValue {
        if self.params.is_empty() {
            return IcalValue::Text(self.value.clone());
        }
        let params = self
            .params
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        IcalValue::Wrapped {
            params,
            val: Value::String(self.value.clone()),
        }
    }
}

#[derive(Debug, Default)]
pub struct Calendar {
    pub timezone: Option<Tz>,
    pub events: Vec<Vec<Property>>,
}

pub struct IcalFeed;

impl FeedFormat for IcalFeed {
    fn normalize(
        &self,
        source: &SourceConfig,
        body: &str,
    ) -> Result<Vec<NormalizedEvent>, SourceError> {
        if !body.contains("BEGIN:VCALENDAR") {
            return Err(SourceError::Parse("missing BEGIN:VCALENDAR".to_string()));
        }
        let calendar = parse_calendar(body);
        let tz = calendar.timezone.unwrap_or(base::LOCAL_TZ);
        let items = calendar
            .events
            .iter()
            .map(|props| normalize_vevent(source, props, tz));
        Ok(super::collect_items(&source.id, items))
    }
}

pub fn parse_calendar(body: &str) -> Calendar {
    let mut calendar = Calendar::default();
    let mut current: Option<Vec<Property>> = None;
    // Depth of components nested inside the current VEVENT (VALARM, ...).
    let mut nested = 0usize;

    for line in unfold(body) {
        let prop = match parse_property(&line) {
            Some(prop) => prop,
            None => continue,
        };
        let name = prop.name.clone();
        let marker = prop.value.trim().to_ascii_uppercase();
        match name.as_str() {
            "BEGIN" => {
                if current.is_some() {
                    nested += 1;
                } else if marker == "VEVENT" {
                    current = Some(Vec::new());
                    nested = 0;
                }
            }
            "END" if current.is_some() => {
                if nested > 0 {
                    nested -= 1;
                } else if marker == "VEVENT" {
                    if let Some(props) = current.take() {
                        calendar.events.push(props);
                    }
                }
            }
            "X-WR-TIMEZONE" if current.is_none() => {
                calendar.timezone = prop.value.trim().parse::<Tz>().ok();
            }
            _ => {
                if let Some(props) = current.as_mut() {
                    if nested == 0 {
                        props.push(prop);
                    }
                }
            }
        }
    }

    calendar
}

/// Joins folded content lines (continuations start with a space or tab).
pub fn unfold(body: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in body.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if raw.starts_with(' ') || raw.starts_with('\t') {
            if let Some(last) = lines.last_mut() {
                last.push_str(&raw[1..]);
                continue;
            }
        }
        if !raw.is_empty() {
            lines.push(raw.to_string());
        }
    }
    lines
}

pub fn parse_property(line: &str) -> Option<Property> {
    let mut in_quotes = false;
    let mut split_at = None;
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                split_at = Some(idx);
                break;
            }
            _ => {}
        }
    }
    let split_at = split_at?;
    let (head, value) = (&line[..split_at], &line[split_at + 1..]);

    let mut parts = split_unquoted(head, ';').into_iter();
    let name = parts.next()?.trim().to_ascii_uppercase();
    if name.is_empty() {
        return None;
    }
    let params = parts
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            Some((
                key.trim().to_ascii_uppercase(),
                value.trim().trim_matches('"').to_string(),
            ))
        })
        .collect();

    Some(Property {
        name,
        params,
        value: value.to_string(),
    })
}

fn split_unquoted(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, ch) in input.char_indices() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == separator && !in_quotes {
            parts.push(&input[start..idx]);
            start = idx + ch.len_utf8();
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Decodes TEXT escapes (`\n`, `\,`, `\;`, `\\`).
pub fn unescape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

pub fn parse_ical_datetime(prop: &Property, default_tz: Tz) -> Result<DateTime<Utc>, ItemError> {
    let value = prop.value.trim();
    let invalid = || ItemError::Date(format!("{}: {value}", prop.name));

    let is_date = prop
        .param("VALUE")
        .map(|kind| kind.eq_ignore_ascii_case("DATE"))
        .unwrap_or(false)
        || value.len() == 8;
    if is_date {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").map_err(|_| invalid())?;
        let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?;
        return base::local_to_utc(midnight, default_tz).ok_or_else(invalid);
    }

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").map_err(|_| invalid())?;
        return Ok(Utc.from_utc_datetime(&naive));
    }

    let tz = prop
        .param("TZID")
        .and_then(|tzid| tzid.trim_start_matches('/').parse::<Tz>().ok())
        .unwrap_or(default_tz);
    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").map_err(|_| invalid())?;
    base::local_to_utc(naive, tz).ok_or_else(invalid)
}

fn text_of(props: &[Property], name: &str) -> Option<String> {
    props
        .iter()
        .find(|prop| prop.name == name)
        .map(|prop| base::clean_text(&unescape_text(&prop.value)))
        .filter(|text| !text.is_empty())
}

fn normalize_vevent(
    source: &SourceConfig,
    props: &[Property],
    tz: Tz,
) -> Result<EventDraft, ItemError> {
    let find = |name: &str| props.iter().find(|prop| prop.name == name);

    let start_time = find("DTSTART")
        .map(|prop| parse_ical_datetime(prop, tz))
        .transpose()?;
    let end_time = find("DTEND")
        .map(|prop| parse_ical_datetime(prop, tz))
        .transpose()?;

    let uid = text_of(props, "UID");
    let link = match find("URL") {
        Some(prop) => Some(prop.to_value().into_text("url")?),
        None => None,
    }
    .map(|url| url.trim().to_string())
    .filter(|url| !url.is_empty())
    .or_else(|| base::link_from_uid(source.link_template.as_deref(), uid.as_deref()));

    let description = find("DESCRIPTION")
        .map(|prop| unescape_text(&prop.value).trim().to_string())
        .filter(|text| !text.is_empty());

    Ok(EventDraft {
        uid,
        title: text_of(props, "SUMMARY"),
        link,
        start_time,
        end_time,
        location: text_of(props, "LOCATION"),
        description,
        image: None,
        category: text_of(props, "CATEGORIES"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceFormat;
    use crate::models::UNTITLED;
    use chrono::Timelike;
    use serde_json::json;

    const SAMPLE_ICS: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
PRODID:-//Meetup//RemoteApi//EN\r
X-WR-TIMEZONE:Europe/Paris\r
BEGIN:VEVENT\r
UID:event_305512345@meetup.com\r
DTSTART;TZID=Europe/Paris:20250120T190000\r
DTEND;TZID=Europe/Paris:20250120T220000\r
SUMMARY:Rust Toulouse #12 : async\\, tokio et axum\r
DESCRIPTION:Rendez-vous chez Le Wagon.\\nPizzas offertes \\; venez nombreu\r
 x !\r
LOCATION:Le Wagon\\, 12 rue Gabriel Péri\\, Toulouse\r
URL;VALUE=URI:https://www.meetup.com/toulouse-rust/events/305512345/\r
BEGIN:VALARM\r
TRIGGER:-PT1H\r
DESCRIPTION:Reminder\r
END:VALARM\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:event_305599999@meetup.com\r
DTSTART:20250205T173000Z\r
SUMMARY:Apéro Tolosa JS\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:broken@meetup.com\r
DTSTART:not-a-date\r
SUMMARY:Broken\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:allday@meetup.com\r
DTSTART;VALUE=DATE:20250301\r
END:VEVENT\r
END:VCALENDAR\r
";

    fn source() -> SourceConfig {
        SourceConfig {
            link_template: Some("https://www.meetup.com/tolosa-js/events/{uid}/".to_string()),
            ..SourceConfig::new(
                "tolosa-js",
                "Tolosa JS",
                "https://www.meetup.com/tolosa-js/events/ical/",
                SourceFormat::Ical,
            )
        }
    }

    #[test]
    fn parses_meetup_calendar() {
        let events = IcalFeed
            .normalize(&source(), SAMPLE_ICS)
            .expect("parse calendar");
        assert_eq!(events.len(), 3, "the broken DTSTART is skipped");

        let first = &events[0];
        assert_eq!(first.title, "Rust Toulouse #12 : async, tokio et axum");
        assert_eq!(
            first.start_time,
            Some(Utc.with_ymd_and_hms(2025, 1, 20, 18, 0, 0).unwrap())
        );
        assert_eq!(first.end_time.map(|end| end.hour()), Some(21));
        assert_eq!(first.location, "Le Wagon, 12 rue Gabriel Péri, Toulouse");
        assert_eq!(
            first.description.as_deref(),
            Some("Rendez-vous chez Le Wagon.\nPizzas offertes ; venez nombreux !")
        );
        assert_eq!(
            first.link.as_deref(),
            Some("https://www.meetup.com/toulouse-rust/events/305512345/")
        );
        assert_eq!(first.uid.as_deref(), Some("event_305512345@meetup.com"));
        assert_eq!(first.source_id, "tolosa-js");

        let second = &events[1];
        assert_eq!(
            second.link.as_deref(),
            Some("https://www.meetup.com/tolosa-js/events/305599999/"),
            "missing URL falls back to the uid template"
        );
        assert_eq!(second.start_time.map(|start| start.hour()), Some(17));

        let all_day = &events[2];
        assert_eq!(all_day.title, UNTITLED);
        assert_eq!(
            all_day.start_time,
            Some(Utc.with_ymd_and_hms(2025, 2, 28, 23, 0, 0).unwrap())
        );
    }

    #[test]
    fn rejects_non_calendar_bodies() {
        assert!(IcalFeed.normalize(&source(), "<html></html>").is_err());
    }

    #[test]
    fn unwraps_url_values() {
        let wrapped: IcalValue =
            serde_json::from_value(json!({ "val": "https://example.com/e" })).expect("wrapper");
        assert_eq!(
            wrapped.into_text("url").expect("string"),
            "https://example.com/e"
        );

        let plain: IcalValue =
            serde_json::from_value(json!("https://example.com/e")).expect("plain");
        assert_eq!(plain.into_text("url").expect("string"), "https://example.com/e");

        let with_params: IcalValue = serde_json::from_value(json!({
            "params": { "VALUE": "URI" },
            "val": "https://example.com/e"
        }))
        .expect("wrapper with params");
        assert_eq!(
            with_params.into_text("url").expect("string"),
            "https://example.com/e"
        );

        let malformed: IcalValue =
            serde_json::from_value(json!({ "val": 42 })).expect("numeric wrapper");
        assert!(malformed.into_text("url").is_err());
    }

    #[test]
    fn property_with_params_becomes_wrapper() {
        let prop = parse_property("URL;VALUE=URI:https://example.com/e").expect("property");
        assert_eq!(prop.param("value"), Some("URI"));
        assert!(matches!(prop.to_value(), IcalValue::Wrapped { .. }));
        assert_eq!(
            prop.to_value().into_text("url").expect("string"),
            "https://example.com/e"
        );

        let quoted = parse_property("ORGANIZER;CN=\"Doe: Jane\":mailto:jane@example.com")
            .expect("quoted param");
        assert_eq!(quoted.param("CN"), Some("Doe: Jane"));
        assert_eq!(quoted.value, "mailto:jane@example.com");
    }
}
