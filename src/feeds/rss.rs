use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::base;
use super::FeedFormat;
use crate::config::SourceConfig;
use crate::error::{ItemError, SourceError};
use crate::models::{EventDraft, NormalizedEvent};

pub const DEFAULT_IMAGE: &str = "/images/categories/default.jpg";

pub struct CategoryImage {
    pub name: &'static str,
    pub image: &'static str,
    pub keywords: &'static [&'static str],
}

/// Display images per agenda category. Order matters for keyword matching:
/// the first category with a keyword found in the title wins.
pub const CATEGORY_IMAGES: &[CategoryImage] = &[
    CategoryImage {
        name: "Festival",
        image: "/images/categories/festival.jpg",
        keywords: &["festival"],
    },
    CategoryImage {
        name: "Concert",
        image: "/images/categories/concert.jpg",
        keywords: &["concert", "jazz", "rock", "récital", "orchestre", "chorale", "musique"],
    },
    CategoryImage {
        name: "Théâtre",
        image: "/images/categories/theatre.jpg",
        keywords: &["théâtre", "theatre", "comédie", "pièce", "spectacle"],
    },
    CategoryImage {
        name: "Danse",
        image: "/images/categories/danse.jpg",
        keywords: &["danse", "ballet", "flamenco"],
    },
    CategoryImage {
        name: "Exposition",
        image: "/images/categories/exposition.jpg",
        keywords: &["exposition", "expo ", "vernissage", "musée"],
    },
    CategoryImage {
        name: "Cinéma",
        image: "/images/categories/cinema.jpg",
        keywords: &["cinéma", "cinema", "film", "projection", "avant-première"],
    },
    CategoryImage {
        name: "Conférence",
        image: "/images/categories/conference.jpg",
        keywords: &["conférence", "conference", "débat", "table ronde", "rencontre"],
    },
    CategoryImage {
        name: "Jeune public",
        image: "/images/categories/jeune-public.jpg",
        keywords: &["jeune public", "enfant", "famille", "atelier"],
    },
    CategoryImage {
        name: "Sport",
        image: "/images/categories/sport.jpg",
        keywords: &["match", "marathon", "stade", "course à pied", "rugby"],
    },
    CategoryImage {
        name: "Marché",
        image: "/images/categories/marche.jpg",
        keywords: &["marché", "brocante", "vide-grenier"],
    },
];

static ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<item\b[^>]*>(.*?)</item>").expect("valid item regex"));
static ENTRY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<entry\b[^>]*>(.*?)</entry>").expect("valid entry regex"));
static LINK_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<link\b([^>]*?)/?>").expect("valid link tag regex"));
static ENCLOSURE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<enclosure\b([^>]*?)/?>").expect("valid enclosure regex"));
static MEDIA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<media:(?:content|thumbnail)\b([^>]*?)/?>").expect("valid media regex")
});
static CATEGORY_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<category\b([^>]*?)/?>").expect("valid category tag regex"));
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([\w:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid attribute regex")
});

const ELEMENTS: &[&str] = &[
    "title",
    "link",
    "description",
    "content:encoded",
    "summary",
    "content",
    "pubDate",
    "dc:date",
    "published",
    "updated",
    "guid",
    "id",
    "category",
    "location",
    "ev:location",
];

static ELEMENT_RES: Lazy<HashMap<&'static str, Regex>> = Lazy::new(|| {
    ELEMENTS
        .iter()
        .map(|tag| {
            let pattern = format!(r"(?is)<{tag}\b[^>]*>(.*?)</{tag}>", tag = regex::escape(tag));
            (*tag, Regex::new(&pattern).expect("valid element regex"))
        })
        .collect()
});

pub struct RssFeed;

impl FeedFormat for RssFeed {
    fn normalize(
        &self,
        source: &SourceConfig,
        body: &str,
    ) -> Result<Vec<NormalizedEvent>, SourceError> {
        let blocks = item_blocks(body);
        if blocks.is_empty() && !looks_like_feed(body) {
            return Err(SourceError::Parse("no <rss> or <feed> document".to_string()));
        }
        let items = blocks
            .into_iter()
            .map(|block| normalize_item(source, block));
        Ok(super::collect_items(&source.id, items))
    }
}

fn looks_like_feed(body: &str) -> bool {
    let head: String = body.chars().take(512).collect::<String>().to_lowercase();
    head.contains("<rss") || head.contains("<feed") || head.contains("<rdf:rdf")
}

fn item_blocks(body: &str) -> Vec<&str> {
    let items: Vec<&str> = ITEM_RE
        .captures_iter(body)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if !items.is_empty() {
        return items;
    }
    ENTRY_RE
        .captures_iter(body)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

fn element_raw<'a>(block: &'a str, tag: &str) -> Option<&'a str> {
    ELEMENT_RES
        .get(tag)?
        .captures(block)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn element_text(block: &str, tags: &[&str]) -> Option<String> {
    tags.iter()
        .filter_map(|tag| element_raw(block, tag))
        .find_map(base::feed_text)
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    ATTR_RE.captures_iter(attrs).find_map(|caps| {
        let key = caps.get(1)?.as_str();
        if !key.eq_ignore_ascii_case(name) {
            return None;
        }
        caps.get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().replace("&amp;", "&"))
    })
}

fn item_link(block: &str) -> Option<String> {
    if let Some(text) = element_text(block, &["link"]) {
        return Some(text);
    }
    let mut fallback = None;
    for caps in LINK_TAG_RE.captures_iter(block) {
        let attrs = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let href = match attribute(attrs, "href") {
            Some(href) => href,
            None => continue,
        };
        match attribute(attrs, "rel").as_deref() {
            None | Some("alternate") => return Some(href),
            _ => {
                fallback.get_or_insert(href);
            }
        }
    }
    fallback
}

/// RSS carries the category as element text, Atom as a `term` attribute.
fn item_category(block: &str) -> Option<String> {
    element_text(block, &["category"]).or_else(|| {
        CATEGORY_TAG_RE.captures_iter(block).find_map(|caps| {
            let attrs = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            attribute(attrs, "term")
                .or_else(|| attribute(attrs, "label"))
                .map(|term| base::clean_text(&term))
                .filter(|term| !term.is_empty())
        })
    })
}

fn item_image(block: &str) -> Option<String> {
    for caps in ENCLOSURE_RE.captures_iter(block) {
        let attrs = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let is_image = attribute(attrs, "type")
            .map(|kind| kind.to_lowercase().starts_with("image/"))
            .unwrap_or(false);
        if is_image {
            if let Some(url) = attribute(attrs, "url") {
                return Some(url);
            }
        }
    }
    MEDIA_RE.captures_iter(block).find_map(|caps| {
        let attrs = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        attribute(attrs, "url")
    })
}

/// Table entry for an explicit category, matched case-insensitively.
pub fn category_for_name(category: &str) -> Option<&'static CategoryImage> {
    let wanted = category.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    CATEGORY_IMAGES
        .iter()
        .find(|entry| wanted.contains(&entry.name.to_lowercase()))
}

/// Table entry whose keyword appears in the title, case-insensitively.
pub fn category_for_title(title: &str) -> Option<&'static CategoryImage> {
    let lowered = title.to_lowercase();
    CATEGORY_IMAGES.iter().find(|entry| {
        entry
            .keywords
            .iter()
            .any(|keyword| lowered.contains(keyword))
    })
}

/// Picks the display image: the item's own image, else the category table,
/// else a title keyword, else the default. Returns the matched category
/// name alongside.
pub fn select_image(
    explicit: Option<String>,
    category: Option<&str>,
    title: &str,
) -> (String, Option<&'static str>) {
    let matched = category
        .and_then(category_for_name)
        .or_else(|| category_for_title(title));
    let image = explicit
        .or_else(|| matched.map(|entry| entry.image.to_string()))
        .unwrap_or_else(|| DEFAULT_IMAGE.to_string());
    (image, matched.map(|entry| entry.name))
}

fn normalize_item(source: &SourceConfig, block: &str) -> Result<EventDraft, ItemError> {
    let title = element_text(block, &["title"]);

    let start_time = match element_text(block, &["pubDate", "dc:date", "published", "updated"]) {
        Some(text) => Some(
            base::parse_feed_date(&text, base::LOCAL_TZ).ok_or(ItemError::Date(text))?,
        ),
        None => None,
    };

    let link = base::absolute_url(&source.url, item_link(block));
    let explicit_image = base::absolute_url(&source.url, item_image(block));
    let category = item_category(block);
    let (image, matched) = select_image(
        explicit_image,
        category.as_deref(),
        title.as_deref().unwrap_or_default(),
    );

    Ok(EventDraft {
        uid: element_text(block, &["guid", "id"]),
        title,
        link,
        start_time,
        end_time: None,
        location: element_text(block, &["ev:location", "location"]),
        description: element_text(block, &["description", "content:encoded", "summary", "content"]),
        image: Some(image),
        category: category.or_else(|| matched.map(str::to_string)),
    })
}
