pub mod atom;
pub mod dates;
pub mod json;
pub mod opml;
pub mod rss;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::util;

/// The canonical feed shape every ingestion path produces: classical
/// parsers, the transform rules, and script output all converge here.
/// The serde names follow JSON Feed so script `module.exports` objects
/// deserialize directly.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(
        rename = "home_page_url",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub site_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    #[serde(rename = "id", default, skip_serializing_if = "String::is_empty")]
    pub guid: String,
    #[serde(
        rename = "date_published",
        default,
        with = "dates::serde_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<DateTime<Utc>>,
    #[serde(rename = "url", default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(
        rename = "content_html",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub content: String,
    #[serde(skip)]
    pub image_url: Option<String>,
    #[serde(skip)]
    pub audio_url: Option<String>,
}

impl Feed {
    /// Newest first; items with no date at the end. The sort is
    /// stable so same-instant items keep their document order.
    pub fn sort_items_newest_first(&mut self) {
        self.items.sort_by(|a, b| match (&a.date, &b.date) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (Some(_), None) => std::cmp::Ordering::Less,
            (Some(a), Some(b)) => b.cmp(a),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Rss,
    Atom,
    Json,
}

const LOOKUP_SIZE: usize = 2048;

/// Looks at the first couple of kilobytes to decide how to parse the
/// payload. Leading BOM bytes are skipped before the probe.
pub fn sniff(data: &[u8]) -> Option<Format> {
    let lookup = &data[..data.len().min(LOOKUP_SIZE)];
    let mut lookup = trim_ascii_whitespace(lookup);
    while let Some(first) = lookup.first() {
        match first {
            0xEF | 0xBB | 0xBF | 0xFE | 0xFF => lookup = &lookup[1..],
            _ => break,
        }
    }

    match lookup.first() {
        Some(b'<') => {
            let mut reader = quick_xml::Reader::from_reader(lookup);
            let mut buf = Vec::new();
            loop {
                match reader.read_event_into(&mut buf) {
                    Ok(quick_xml::events::Event::Start(el))
                    | Ok(quick_xml::events::Event::Empty(el)) => {
                        match el.local_name().as_ref() {
                            b"rss" => return Some(Format::Rss),
                            b"feed" => return Some(Format::Atom),
                            _ => {}
                        }
                    }
                    Ok(quick_xml::events::Event::Eof) | Err(_) => return None,
                    Ok(_) => {}
                }
                buf.clear();
            }
        }
        Some(b'{') => Some(Format::Json),
        _ => None,
    }
}

fn trim_ascii_whitespace(mut data: &[u8]) -> &[u8] {
    while let Some((first, rest)) = data.split_first() {
        if first.is_ascii_whitespace() {
            data = rest;
        } else {
            break;
        }
    }
    while let Some((last, rest)) = data.split_last() {
        if last.is_ascii_whitespace() {
            data = rest;
        } else {
            break;
        }
    }
    data
}

fn strip_bom(data: &[u8]) -> &[u8] {
    if let Some(rest) = data.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        rest
    } else if let Some(rest) = data.strip_prefix(&[0xFE, 0xFF]) {
        rest
    } else if let Some(rest) = data.strip_prefix(&[0xFF]) {
        rest
    } else {
        data
    }
}

/// Parses feed bytes into the canonical shape and resolves the site
/// URL against `base_url`, then every item URL against the site URL.
pub fn parse(data: &[u8], base_url: &str) -> AppResult<Feed> {
    let format = sniff(data).ok_or_else(|| AppError::Parse("unknown feed format".into()))?;
    let data = strip_bom(data);
    let mut feed = match format {
        Format::Rss => rss::parse(data)?,
        Format::Atom => atom::parse(data)?,
        Format::Json => json::parse(data)?,
    };

    if !base_url.is_empty() {
        feed.site_url = util::absolute_url(&feed.site_url, base_url);
    }
    let item_base = if feed.site_url.is_empty() {
        base_url
    } else {
        &feed.site_url
    };
    if !item_base.is_empty() {
        for item in &mut feed.items {
            item.url = util::absolute_url(&item.url, item_base);
        }
    }
    Ok(feed)
}
