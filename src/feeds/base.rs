use std::time::Duration;

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::Html;

use crate::config::AppConfig;
use crate::error::SourceError;

/// Floating times in Toulouse feeds are local.
pub const LOCAL_TZ: Tz = chrono_tz::Europe::Paris;

static CDATA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("valid cdata regex"));

pub fn build_client(config: &AppConfig) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_seconds))
        .user_agent(config.user_agent.clone())
        .build()
}

pub async fn fetch_text(client: &Client, url: &str) -> Result<String, SourceError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| SourceError::Http(format!("{url}: {err}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status(status));
    }
    response
        .text()
        .await
        .map_err(|err| SourceError::Http(format!("unable to read body of {url}: {err}")))
}

pub fn clean_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

pub fn strip_cdata(input: &str) -> String {
    CDATA_RE.replace_all(input, "$1").into_owned()
}

/// Free text from a feed field: CDATA markers dropped, tags stripped,
/// entities decoded, whitespace collapsed.
pub fn feed_text(raw: &str) -> Option<String> {
    let unwrapped = strip_cdata(raw);
    let mut text = fragment_text(&unwrapped);
    // Escaped markup (`&lt;p&gt;`) only turns into tags after the first pass.
    if text.contains('<') && text.contains('>') {
        text = fragment_text(&text);
    }
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn fragment_text(input: &str) -> String {
    let fragment = Html::parse_fragment(input);
    clean_text(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
}

pub fn absolute_url(base: &str, href: Option<String>) -> Option<String> {
    let href = href?.trim().to_string();
    if href.is_empty() {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href);
    }
    let base_url = reqwest::Url::parse(base).ok()?;
    base_url.join(&href).ok().map(|u| u.to_string())
}

/// Dates as they appear in RSS, Atom and JSON listings.
pub fn parse_feed_date(text: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let cleaned = clean_text(text);
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(&cleaned) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&cleaned) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(&cleaned, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }

    let datetime_formats = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
        "%d/%m/%Y %H:%M",
    ];
    for fmt in datetime_formats.iter() {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&cleaned, fmt) {
            return local_to_utc(naive, tz);
        }
    }

    for fmt in ["%Y-%m-%d", "%d/%m/%Y"].iter() {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, fmt) {
            return local_to_utc(date.and_hms_opt(0, 0, 0)?, tz);
        }
    }

    None
}

pub fn local_to_utc(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(dt, _) => Some(dt.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

/// Builds an event link from a source template and an item uid. Only the
/// local part of the uid is used, after its last `_` (`event_123@meetup.com`
/// gives `123`).
pub fn link_from_uid(template: Option<&str>, uid: Option<&str>) -> Option<String> {
    let template = template?;
    let uid = uid?.trim();
    let local = uid.split('@').next().unwrap_or(uid);
    let id = local.rsplit('_').next().unwrap_or(local);
    if id.is_empty() {
        return None;
    }
    Some(template.replace("{uid}", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn feed_text_strips_cdata_and_markup() {
        assert_eq!(
            feed_text("<![CDATA[<p>Concert <b>gratuit</b> au Capitole</p>]]>").as_deref(),
            Some("Concert gratuit au Capitole")
        );
        assert_eq!(
            feed_text("&lt;p&gt;Rock &amp;amp; Roll&lt;/p&gt;").as_deref(),
            Some("Rock & Roll")
        );
        assert_eq!(feed_text("<![CDATA[   ]]>"), None);
    }

    #[test]
    fn parses_common_feed_dates() {
        let rfc2822 = parse_feed_date("Mon, 20 Jan 2025 19:30:00 +0100", LOCAL_TZ)
            .expect("rfc2822 date");
        assert_eq!(rfc2822.hour(), 18);

        let iso = parse_feed_date("2025-01-20T19:30:00+01:00", LOCAL_TZ).expect("iso date");
        assert_eq!(iso, rfc2822);

        let floating = parse_feed_date("2025-07-14 22:00:00", LOCAL_TZ).expect("floating date");
        assert_eq!(floating.hour(), 20);

        let day = parse_feed_date("14/07/2025", LOCAL_TZ).expect("french date");
        assert_eq!(day.to_rfc3339(), "2025-07-13T22:00:00+00:00");

        assert!(parse_feed_date("bientôt", LOCAL_TZ).is_none());
        assert!(parse_feed_date("  ", LOCAL_TZ).is_none());
    }

    #[test]
    fn resolves_relative_urls() {
        assert_eq!(
            absolute_url("https://www.toulouse.fr/agenda/rss", Some("/evenement/42".to_string())),
            Some("https://www.toulouse.fr/evenement/42".to_string())
        );
        assert_eq!(
            absolute_url("https://a.fr/", Some("https://b.fr/x".to_string())),
            Some("https://b.fr/x".to_string())
        );
        assert_eq!(absolute_url("https://a.fr/", Some("  ".to_string())), None);
    }

    #[test]
    fn builds_links_from_uids() {
        let template = Some("https://www.meetup.com/toulouse-rust/events/{uid}/");
        assert_eq!(
            link_from_uid(template, Some("event_305512345@meetup.com")).as_deref(),
            Some("https://www.meetup.com/toulouse-rust/events/305512345/")
        );
        assert_eq!(
            link_from_uid(template, Some("abc")).as_deref(),
            Some("https://www.meetup.com/toulouse-rust/events/abc/")
        );
        assert_eq!(link_from_uid(None, Some("abc")), None);
        assert_eq!(link_from_uid(template, None), None);
    }
}
