use serde::Deserialize;

use super::{dates, Feed, FeedItem};
use crate::errors::{AppError, AppResult};
use crate::util;

#[derive(Debug, Default, Deserialize)]
struct JsonFeedDoc {
    #[serde(default)]
    title: String,
    #[serde(default)]
    home_page_url: String,
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Debug, Default, Deserialize)]
struct JsonFeedItem {
    #[serde(default)]
    id: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    content_text: String,
    #[serde(default)]
    content_html: String,
    #[serde(default)]
    date_published: String,
    #[serde(default)]
    date_modified: String,
}

pub fn parse(data: &[u8]) -> AppResult<Feed> {
    let doc: JsonFeedDoc =
        serde_json::from_slice(data).map_err(|err| AppError::Parse(format!("json feed: {err}")))?;

    let items = doc
        .items
        .into_iter()
        .map(|item| FeedItem {
            guid: item.id,
            date: dates::parse_date(util::first_non_empty(&[
                item.date_published.as_str(),
                item.date_modified.as_str(),
            ])),
            url: item.url,
            title: item.title,
            content: util::first_non_empty(&[
                item.content_html.as_str(),
                item.content_text.as_str(),
                item.summary.as_str(),
            ])
            .to_string(),
            image_url: None,
            audio_url: None,
        })
        .collect();

    Ok(Feed {
        title: doc.title,
        site_url: doc.home_page_url,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_a_json_feed() {
        let feed = parse(
            br#"{
                "version": "https://jsonfeed.org/version/1.1",
                "title": "World",
                "home_page_url": "https://example.org/",
                "items": [
                    {
                        "id": "865816855",
                        "url": "https://example.org/a",
                        "title": "A",
                        "content_html": "<p>body</p>",
                        "date_published": "2020-05-29T23:30:03Z"
                    },
                    {
                        "id": "2",
                        "url": "https://example.org/b",
                        "title": "B",
                        "summary": "fallback",
                        "date_modified": "2020-05-29T20:00:34Z"
                    }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(feed.title, "World");
        assert_eq!(feed.items[0].content, "<p>body</p>");
        assert_eq!(
            feed.items[0].date.unwrap(),
            chrono::DateTime::parse_from_rfc3339("2020-05-29T23:30:03Z").unwrap()
        );
        assert_eq!(feed.items[1].content, "fallback");
        assert_eq!(
            feed.items[1].date.unwrap(),
            chrono::DateTime::parse_from_rfc3339("2020-05-29T20:00:34Z").unwrap()
        );
    }
}
