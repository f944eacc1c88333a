use serde_json::Value;

use super::{path, JsonRule};
use crate::errors::{AppError, AppResult};
use crate::feed::{dates, Feed, FeedItem};
use crate::fetch::{FetchOutcome, Fetcher};

pub async fn apply(rule: &JsonRule, fetcher: &Fetcher) -> AppResult<Feed> {
    let headers: Vec<(String, String)> = rule
        .headers
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let page = match fetcher.get(&rule.url, &headers, None).await? {
        FetchOutcome::Fetched(page) => page,
        FetchOutcome::NotModified => return Err(AppError::Transport("unexpected 304".into())),
    };
    let document: Value = serde_json::from_slice(&page.bytes)
        .map_err(|err| AppError::Parse(format!("json rule: {err}")))?;
    Ok(extract(rule, &document))
}

fn extract(rule: &JsonRule, document: &Value) -> Feed {
    let mut feed = Feed {
        site_url: rule.home_page_url.clone(),
        ..Default::default()
    };
    if !rule.title.is_empty() {
        feed.title = path::query_string(document, &rule.title);
    }

    // An empty items path treats the document root as the array.
    for entry in path::query_array(document, &rule.items) {
        let mut item = FeedItem::default();

        if !rule.item_title.is_empty() {
            item.title = path::query_string(&entry, &rule.item_title);
        }
        if !rule.item_url.is_empty() {
            item.url = path::query_string(&entry, &rule.item_url);
            if !item.url.is_empty() && !rule.item_url_prefix.is_empty() {
                item.url = format!("{}{}", rule.item_url_prefix, item.url);
            }
            item.guid = item.url.clone();
        }
        if !rule.item_content.is_empty() {
            item.content = path::query_string(&entry, &rule.item_content);
        }
        if !rule.item_date_published.is_empty() {
            item.date = dates::parse_date(&path::query_string(&entry, &rule.item_date_published));
        }

        if item.url.is_empty() && item.content.is_empty() {
            continue;
        }
        feed.items.push(item);
    }

    feed.sort_items_newest_first();
    feed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule() -> JsonRule {
        JsonRule {
            url: "https://api.example.com/posts".into(),
            home_page_url: "https://example.com".into(),
            title: "meta.name".into(),
            items: "data.posts".into(),
            item_title: "headline".into(),
            item_url: "slug".into(),
            item_url_prefix: "https://example.com/p/".into(),
            item_content: "body.html".into(),
            item_date_published: "published_at".into(),
            ..Default::default()
        }
    }

    fn document() -> Value {
        json!({
            "meta": {"name": "API Blog"},
            "data": {"posts": [
                {
                    "headline": "One",
                    "slug": "one",
                    "body": {"html": "<p>first</p>"},
                    "published_at": "2024-01-01T00:00:00Z"
                },
                {
                    "headline": "Two",
                    "slug": "two",
                    "body": {"html": "<p>second</p>"},
                    "published_at": "2024-02-01T00:00:00Z"
                }
            ]}
        })
    }

    #[test]
    fn it_projects_items_through_paths() {
        let feed = extract(&rule(), &document());
        assert_eq!(feed.title, "API Blog");
        assert_eq!(feed.items.len(), 2);
        // Sorted newest first.
        assert_eq!(feed.items[0].title, "Two");
        assert_eq!(feed.items[0].url, "https://example.com/p/two");
        assert_eq!(feed.items[0].guid, "https://example.com/p/two");
        assert_eq!(feed.items[1].content, "<p>first</p>");
    }

    #[test]
    fn empty_items_path_means_root_array() {
        let rule = JsonRule {
            item_title: "t".into(),
            item_content: "c".into(),
            ..Default::default()
        };
        let feed = extract(&rule, &json!([{"t": "a", "c": "x"}, {"t": "b", "c": "y"}]));
        assert_eq!(feed.items.len(), 2);
    }
}
