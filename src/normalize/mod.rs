//! Canonicalization from the loosely-typed objects route handlers and
//! transforms produce into JSON Feed 1.1.

pub mod rewrite;
pub mod sanitize;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::errors::AppResult;
use crate::feed::dates;
use crate::util;

pub const JSON_FEED_VERSION: &str = "https://jsonfeed.org/version/1.1";

/// Tolerant intermediate shape: weak dates, sum-typed author and
/// category fields, unknown keys ignored.
#[derive(Debug, Default, Deserialize)]
pub struct RouteData {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub author: Option<AuthorValue>,
    #[serde(default)]
    pub language: String,
    #[serde(default, rename = "feedLink")]
    pub feed_link: String,
    #[serde(default)]
    pub item: Vec<RouteItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RouteItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "pubDate", with = "dates::serde_opt")]
    pub pub_date: Option<DateTime<Utc>>,
    #[serde(default, with = "dates::serde_opt")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub category: Option<CategoryValue>,
    #[serde(default)]
    pub author: Option<AuthorValue>,
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub banner: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub enclosure_url: String,
    #[serde(default)]
    pub enclosure_type: String,
    #[serde(default)]
    pub enclosure_title: String,
    #[serde(default)]
    pub enclosure_length: Option<i64>,
    #[serde(default)]
    pub itunes_duration: Option<Value>,
    #[serde(default)]
    pub content: RouteContent,
}

#[derive(Debug, Default, Deserialize)]
pub struct RouteContent {
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub text: String,
}

/// `author` arrives as a name, a `{name, url, avatar}` object, or an
/// array of either.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AuthorValue {
    Name(String),
    Full {
        #[serde(default)]
        name: Option<Value>,
        #[serde(default)]
        url: Option<Value>,
        #[serde(default)]
        avatar: Option<Value>,
    },
    Many(Vec<AuthorValue>),
    Other(Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CategoryValue {
    One(String),
    Many(Vec<Value>),
    Other(Value),
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct JsonFeed {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(rename = "home_page_url", skip_serializing_if = "String::is_empty")]
    pub home_page_url: String,
    #[serde(rename = "feed_url", skip_serializing_if = "String::is_empty")]
    pub feed_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub language: String,
    pub items: Vec<JsonFeedItem>,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct JsonFeedItem {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(rename = "content_html", skip_serializing_if = "String::is_empty")]
    pub content_html: String,
    #[serde(rename = "content_text", skip_serializing_if = "String::is_empty")]
    pub content_text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(rename = "banner_image", skip_serializing_if = "String::is_empty")]
    pub banner_image: String,
    #[serde(
        rename = "date_published",
        with = "dates::serde_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_published: Option<DateTime<Utc>>,
    #[serde(
        rename = "date_modified",
        with = "dates::serde_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub language: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct Author {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub avatar: String,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct Attachment {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(rename = "mime_type", skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(rename = "size_in_bytes", skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<i64>,
    #[serde(rename = "duration_in_seconds", skip_serializing_if = "Option::is_none")]
    pub duration_in_seconds: Option<Value>,
}

/// Canonicalizes any ingestion-path output into a JSON Feed 1.1
/// document.
pub fn to_json_feed(value: Value) -> AppResult<JsonFeed> {
    let mut data: RouteData = serde_json::from_value(value)?;

    let base_url = resolve_home_url(&data.link);
    if let Some(resolved) = &base_url {
        data.link = resolved.to_string();
    }
    let base = base_url.as_ref().map(Url::as_str).unwrap_or_default();

    data.title = util::collapse_whitespace(&data.title);
    data.description = util::collapse_whitespace(&data.description);

    // Body rewriting dominates normalization time; fan out over the
    // items and join.
    let worker_count = data.item.len().clamp(1, 8);
    let chunk_size = data.item.len().div_ceil(worker_count);
    if !data.item.is_empty() {
        std::thread::scope(|scope| {
            for chunk in data.item.chunks_mut(chunk_size) {
                scope.spawn(move || {
                    for item in chunk {
                        normalize_item(item, base);
                    }
                });
            }
        });
    }

    data.item.sort_by(|a, b| match (&a.pub_date, &b.pub_date) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (Some(_), None) => std::cmp::Ordering::Less,
        (Some(a), Some(b)) => b.cmp(a),
    });

    let mut feed = JsonFeed {
        version: JSON_FEED_VERSION.to_string(),
        title: data.title.clone(),
        home_page_url: data.link,
        feed_url: data.feed_link,
        description: util::first_non_empty(&[&data.description, &data.title]).to_string(),
        icon: data.image,
        authors: data.author.map(|author| authors_of(&author)).unwrap_or_default(),
        language: data.language,
        items: Vec::with_capacity(data.item.len()),
    };

    for item in data.item {
        let content_html = util::first_non_empty(&[
            item.content.html.as_str(),
            item.description.as_str(),
            item.title.as_str(),
        ])
        .to_string();
        feed.items.push(JsonFeedItem {
            id: util::first_non_empty(&[&item.guid, &item.id, &item.link]).to_string(),
            url: item.link,
            title: item.title,
            content_html,
            content_text: item.content.text,
            image: item.image,
            banner_image: item.banner,
            date_published: item.pub_date,
            date_modified: item.updated,
            authors: item.author.map(|author| authors_of(&author)).unwrap_or_default(),
            tags: item.category.map(|category| tags_of(&category)).unwrap_or_default(),
            language: item.language,
            attachments: if item.enclosure_url.is_empty() {
                Vec::new()
            } else {
                vec![Attachment {
                    url: item.enclosure_url,
                    mime_type: item.enclosure_type,
                    title: item.enclosure_title,
                    size_in_bytes: item.enclosure_length,
                    duration_in_seconds: item.itunes_duration,
                }]
            },
        });
    }
    Ok(feed)
}

fn normalize_item(item: &mut RouteItem, base: &str) {
    if !item.link.is_empty() && !base.is_empty() {
        let resolved = util::absolute_url(&item.link, base);
        if !resolved.is_empty() {
            item.link = resolved;
        }
    }

    let unescaped = html_escape::decode_html_entities(&item.description);
    item.description = rewrite::rewrite_content(&unescaped, base);

    item.title =
        util::collapse_whitespace(&html_escape::decode_html_entities(&item.title));
    item.content.html = item.content.html.trim().to_string();
    item.content.text = item.content.text.trim().to_string();
}

/// The feed's home URL; a missing scheme defaults to http.
fn resolve_home_url(link: &str) -> Option<Url> {
    if link.is_empty() {
        return None;
    }
    match Url::parse(link) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&format!("http://{link}")).ok()
        }
        Err(_) => None,
    }
}

fn authors_of(value: &AuthorValue) -> Vec<Author> {
    match value {
        AuthorValue::Name(name) => vec![Author {
            name: name.clone(),
            ..Default::default()
        }],
        AuthorValue::Full { name, url, avatar } => vec![Author {
            name: scalar_string(name),
            url: scalar_string(url),
            avatar: scalar_string(avatar),
        }],
        AuthorValue::Many(entries) => entries.iter().flat_map(authors_of).collect(),
        AuthorValue::Other(other) => vec![Author {
            name: scalar_to_string(other),
            ..Default::default()
        }],
    }
}

fn tags_of(value: &CategoryValue) -> Vec<String> {
    match value {
        CategoryValue::One(tag) => vec![tag.clone()],
        CategoryValue::Many(entries) => entries
            .iter()
            .filter(|entry| !entry.is_null())
            .map(scalar_to_string)
            .collect(),
        CategoryValue::Other(other) => vec![scalar_to_string(other)],
    }
}

fn scalar_string(value: &Option<Value>) -> String {
    value.as_ref().map(scalar_to_string).unwrap_or_default()
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn it_builds_a_json_feed_from_route_data() {
        let feed = to_json_feed(json!({
            "title": "  Example \n Site ",
            "link": "example.com",
            "item": [
                {
                    "title": "B &amp; A",
                    "link": "/posts/1",
                    "description": "<p>hi <img data-src=\"/i.png\"></p>",
                    "pubDate": "Sat, 01 Jan 2000 08:00:00 GMT",
                    "author": "alice",
                    "category": ["x", "y"],
                },
            ]
        }))
        .unwrap();

        assert_eq!(feed.version, JSON_FEED_VERSION);
        assert_eq!(feed.title, "Example Site");
        assert_eq!(feed.home_page_url, "http://example.com/");
        let item = &feed.items[0];
        assert_eq!(item.url, "http://example.com/posts/1");
        assert_eq!(item.title, "B & A");
        assert!(item.content_html.contains("src=\"http://example.com/i.png\""));
        assert_eq!(item.id, "http://example.com/posts/1");
        assert_eq!(item.authors[0].name, "alice");
        assert_eq!(item.tags, vec!["x", "y"]);
        assert_eq!(
            item.date_published.unwrap().timestamp_millis(),
            946713600000
        );
    }

    #[test]
    fn items_sort_newest_first_with_undated_last() {
        let feed = to_json_feed(json!({
            "title": "t",
            "item": [
                {"title": "old", "pubDate": "2000-01-01T00:00:00Z"},
                {"title": "undated"},
                {"title": "new", "pubDate": "2020-01-01T00:00:00Z"},
            ]
        }))
        .unwrap();
        let titles: Vec<&str> = feed.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "old", "undated"]);
    }

    #[test]
    fn author_shapes_coerce() {
        let feed = to_json_feed(json!({
            "title": "t",
            "author": [{"name": "a", "url": "https://a.example"}, "b"],
            "item": []
        }))
        .unwrap();
        assert_eq!(feed.authors.len(), 2);
        assert_eq!(feed.authors[0].name, "a");
        assert_eq!(feed.authors[0].url, "https://a.example");
        assert_eq!(feed.authors[1].name, "b");
    }

    #[test]
    fn enclosures_become_attachments() {
        let feed = to_json_feed(json!({
            "title": "t",
            "item": [{
                "title": "ep",
                "link": "https://x/e1",
                "enclosure_url": "https://x/e1.mp3",
                "enclosure_type": "audio/mpeg",
                "itunes_duration": "12:34",
            }]
        }))
        .unwrap();
        let attachment = &feed.items[0].attachments[0];
        assert_eq!(attachment.url, "https://x/e1.mp3");
        assert_eq!(attachment.mime_type, "audio/mpeg");
        assert_eq!(attachment.duration_in_seconds, Some(json!("12:34")));
    }

    #[test]
    fn description_falls_back_to_title() {
        let feed = to_json_feed(json!({"title": "only title", "item": []})).unwrap();
        assert_eq!(feed.description, "only title");
    }

    #[test]
    fn ms_epoch_dates_are_accepted() {
        let feed = to_json_feed(json!({
            "title": "t",
            "item": [{"title": "a", "pubDate": 946713600000i64}]
        }))
        .unwrap();
        assert_eq!(
            feed.items[0].date_published.unwrap().timestamp_millis(),
            946713600000
        );
    }
}
