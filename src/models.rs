use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const UNTITLED: &str = "Événement sans titre";
pub const UNKNOWN_LOCATION: &str = "Lieu non précisé";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub id: String, // sha256 of the dedup key
    pub uid: Option<String>,
    pub title: String,
    pub link: Option<String>,
    pub start_time: Option<DateTime<Utc>>, // None marks the event as undated
    pub end_time: Option<DateTime<Utc>>,
    pub location: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub category: Option<String>,
    pub source_id: String,
}

/// Loose field bag filled in by the format adapters before the record is
/// sealed with placeholders and an id.
#[derive(Debug, Default, Clone)]
pub struct EventDraft {
    pub uid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub category: Option<String>,
}

impl EventDraft {
    pub fn build(self, source_id: &str) -> NormalizedEvent {
        let title = non_empty(self.title).unwrap_or_else(|| UNTITLED.to_string());
        let location = non_empty(self.location).unwrap_or_else(|| UNKNOWN_LOCATION.to_string());
        let uid = non_empty(self.uid);
        let mut event = NormalizedEvent {
            id: String::new(),
            uid,
            title,
            link: non_empty(self.link),
            start_time: self.start_time,
            end_time: self.end_time,
            location,
            description: non_empty(self.description),
            image: non_empty(self.image),
            category: non_empty(self.category),
            source_id: source_id.to_string(),
        };
        event.id = event.dedup_key().digest();
        event
    }
}

impl NormalizedEvent {
    pub fn dedup_key(&self) -> DedupKey {
        match self.uid.as_deref() {
            Some(uid) if !uid.trim().is_empty() => DedupKey::Uid(uid.trim().to_string()),
            _ => DedupKey::TitleStart {
                title: self.title.trim().to_string(),
                start: self.start_time,
            },
        }
    }

    pub fn is_dated(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn has_real_location(&self) -> bool {
        self.location != UNKNOWN_LOCATION
    }

    pub fn has_real_title(&self) -> bool {
        self.title != UNTITLED
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Uid(String),
    TitleStart {
        title: String,
        start: Option<DateTime<Utc>>,
    },
}

impl DedupKey {
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            DedupKey::Uid(uid) => {
                hasher.update(b"uid|");
                hasher.update(uid.as_bytes());
            }
            DedupKey::TitleStart { title, start } => {
                hasher.update(title.as_bytes());
                hasher.update(b"|");
                match start {
                    Some(start) => hasher.update(start.to_rfc3339().as_bytes()),
                    None => hasher.update(b"undated"),
                }
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn build_fills_placeholders() {
        let event = EventDraft {
            title: Some("   ".to_string()),
            ..Default::default()
        }
        .build("agenda");
        assert_eq!(event.title, UNTITLED);
        assert_eq!(event.location, UNKNOWN_LOCATION);
        assert!(!event.has_real_title());
        assert!(!event.is_dated());
        assert_eq!(event.source_id, "agenda");
        assert_eq!(event.id.len(), 64);
    }

    #[test]
    fn uid_takes_precedence_in_dedup_key() {
        let start = Utc.with_ymd_and_hms(2025, 1, 20, 18, 0, 0).unwrap();
        let a = EventDraft {
            uid: Some("event_1@meetup.com".to_string()),
            title: Some("Rust Toulouse".to_string()),
            start_time: Some(start),
            ..Default::default()
        }
        .build("a");
        let b = EventDraft {
            uid: Some("event_1@meetup.com".to_string()),
            title: Some("Rust Toulouse #12".to_string()),
            ..Default::default()
        }
        .build("b");
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn title_and_start_form_the_fallback_key() {
        let start = Utc.with_ymd_and_hms(2025, 1, 20, 18, 0, 0).unwrap();
        let dated = EventDraft {
            title: Some("Marché de Noël".to_string()),
            start_time: Some(start),
            ..Default::default()
        }
        .build("a");
        let undated = EventDraft {
            title: Some("Marché de Noël".to_string()),
            ..Default::default()
        }
        .build("a");
        assert_ne!(dated.dedup_key(), undated.dedup_key());
        assert_ne!(dated.id, undated.id);
    }
}
