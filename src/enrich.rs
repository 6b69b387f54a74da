use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;

use crate::feeds::base;
use crate::models::NormalizedEvent;

static OG_IMAGE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="og:image"], meta[property="og:image:url"]"#)
        .expect("og:image selector")
});
static TWITTER_IMAGE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[name="twitter:image"]"#).expect("twitter:image selector")
});

/// Fills missing images from each event's own page. Lookups run
/// `concurrency` at a time and the event order is preserved; a failed
/// lookup leaves the event as it was.
pub async fn backfill_images(
    client: &Client,
    events: Vec<NormalizedEvent>,
    concurrency: usize,
) -> Vec<NormalizedEvent> {
    stream::iter(events)
        .map(|event| enrich_event(client, event))
        .buffered(concurrency.max(1))
        .collect()
        .await
}

async fn enrich_event(client: &Client, mut event: NormalizedEvent) -> NormalizedEvent {
    if event.image.is_some() {
        return event;
    }
    let link = match event.link.as_deref() {
        Some(link) => link.to_string(),
        None => return event,
    };
    match base::fetch_text(client, &link).await {
        Ok(html) => match extract_preview_image(&html, &link) {
            Some(image) => event.image = Some(image),
            None => debug!("no preview image on {link}"),
        },
        Err(err) => debug!("preview lookup failed for {link}: {err}"),
    }
    event
}

pub fn extract_preview_image(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    [&*OG_IMAGE_SELECTOR, &*TWITTER_IMAGE_SELECTOR]
        .into_iter()
        .find_map(|selector| {
            document
                .select(selector)
                .filter_map(|meta| meta.value().attr("content"))
                .find(|content| !content.trim().is_empty())
                .map(str::to_string)
        })
        .and_then(|content| base::absolute_url(page_url, Some(content)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_open_graph_image() {
        let html = r#"<html><head>
            <meta property="og:title" content="Rust Toulouse">
            <meta property="og:image" content="https://secure.meetupstatic.com/photos/event/rust.jpeg">
            <meta name="twitter:image" content="https://secure.meetupstatic.com/photos/event/other.jpeg">
        </head><body></body></html>"#;
        assert_eq!(
            extract_preview_image(html, "https://www.meetup.com/toulouse-rust/events/1/").as_deref(),
            Some("https://secure.meetupstatic.com/photos/event/rust.jpeg")
        );
    }

    #[test]
    fn falls_back_to_twitter_image_and_resolves_relative_urls() {
        let html = r#"<html><head>
            <meta property="og:image" content="  ">
            <meta name="twitter:image" content="/media/affiche.png">
        </head></html>"#;
        assert_eq!(
            extract_preview_image(html, "https://www.theatre-cite.com/spectacle/42").as_deref(),
            Some("https://www.theatre-cite.com/media/affiche.png")
        );
        assert_eq!(extract_preview_image("<html></html>", "https://a.fr/"), None);
    }
}
