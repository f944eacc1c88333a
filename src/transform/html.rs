use scraper::{ElementRef, Html, Selector};

use super::HtmlRule;
use crate::errors::{AppError, AppResult};
use crate::feed::{dates, Feed, FeedItem};
use crate::fetch::{FetchOutcome, Fetcher};
use crate::normalize::sanitize;
use crate::util;

pub async fn apply(rule: &HtmlRule, fetcher: &Fetcher) -> AppResult<Feed> {
    let page = match fetcher.get(&rule.url, &[], None).await? {
        FetchOutcome::Fetched(page) => page,
        FetchOutcome::NotModified => return Err(AppError::Transport("unexpected 304".into())),
    };
    extract(rule, &page.text())
}

fn compile(selector: &str) -> AppResult<Selector> {
    Selector::parse(selector)
        .map_err(|err| AppError::rule(format!("invalid selector {selector:?}: {err}")))
}

fn compile_optional(selector: &str) -> AppResult<Option<Selector>> {
    if selector.is_empty() {
        return Ok(None);
    }
    compile(selector).map(Some)
}

fn extract(rule: &HtmlRule, body: &str) -> AppResult<Feed> {
    let document = Html::parse_document(body);

    let mut feed = Feed {
        site_url: rule.url.clone(),
        ..Default::default()
    };

    let title_selector = if rule.title.is_empty() {
        "title"
    } else {
        &rule.title
    };
    let title_selector = compile(title_selector)?;
    feed.title = document
        .select(&title_selector)
        .next()
        .map(|el| util::collapse_whitespace(&el.text().collect::<Vec<_>>().concat()))
        .unwrap_or_default();

    let title_sel = compile_optional(&rule.item_title)?;
    let url_sel = compile_optional(&rule.item_url)?;
    let content_sel = compile_optional(&rule.item_content)?;
    let date_sel = compile_optional(&rule.item_date_published)?;
    let items_sel = compile(&rule.items)?;

    let url_attr = if rule.item_url_attr.is_empty() {
        "href"
    } else {
        &rule.item_url_attr
    };

    for element in document.select(&items_sel) {
        let mut item = FeedItem::default();

        let title_el = scoped(element, &title_sel);
        if let Some(el) = title_el {
            item.title = util::collapse_whitespace(&el.text().collect::<Vec<_>>().concat());
        }

        if let Some(el) = scoped(element, &url_sel) {
            if let Some(href) = el.attr(url_attr) {
                item.url = util::absolute_url(href, &rule.url);
                item.guid = item.url.clone();
            }
        }

        if let Some(el) = scoped(element, &content_sel) {
            item.content = sanitize::sanitize(&rule.url, &el.html());
            item.content = item.content.trim().to_string();
        }

        let date_el = scoped(element, &date_sel);
        if rule.item_date_published_attr.is_empty() {
            if let Some(el) = date_el {
                let text: String = el.text().collect::<Vec<_>>().concat();
                item.date = dates::parse_date(&text);
            }
        } else if let Some(el) = date_el {
            if let Some(value) = el.attr(&rule.item_date_published_attr) {
                item.date = dates::parse_date(value);
            }
        }

        // An item with neither a resolvable link nor any content is
        // selector noise.
        if item.url.is_empty() && item.content.is_empty() {
            continue;
        }
        feed.items.push(item);
    }

    feed.sort_items_newest_first();
    Ok(feed)
}

/// The sub-selected element, or the item element itself when the rule
/// leaves the field's selector empty.
fn scoped<'a>(element: ElementRef<'a>, selector: &Option<Selector>) -> Option<ElementRef<'a>> {
    match selector {
        Some(selector) => element.select(selector).next(),
        None => Some(element),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
        <html><head><title>  Example   Blog </title></head>
        <body>
          <article class="post">
            <h2><a href="/posts/2">Second</a></h2>
            <div class="body"><p>Later entry</p></div>
            <time datetime="2024-02-01T00:00:00Z">Feb 1</time>
          </article>
          <article class="post">
            <h2><a href="/posts/1">First</a></h2>
            <div class="body"><p>Earlier entry</p></div>
            <time datetime="2024-01-01T00:00:00Z">Jan 1</time>
          </article>
          <article class="post"><h2>No link, no content</h2></article>
        </body></html>"#;

    fn rule() -> HtmlRule {
        HtmlRule {
            url: "https://example.com/blog".into(),
            items: "article.post".into(),
            item_title: "h2".into(),
            item_url: "h2 a".into(),
            item_content: ".body".into(),
            item_date_published: "time".into(),
            item_date_published_attr: "datetime".into(),
            ..Default::default()
        }
    }

    #[test]
    fn it_extracts_items_with_scoped_selectors() {
        let feed = extract(&rule(), PAGE).unwrap();
        assert_eq!(feed.title, "Example Blog");
        assert_eq!(feed.site_url, "https://example.com/blog");
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.items[0].title, "Second");
        assert_eq!(feed.items[0].url, "https://example.com/posts/2");
        assert_eq!(feed.items[0].guid, "https://example.com/posts/2");
        assert!(feed.items[0].content.contains("Later entry"));
    }

    #[test]
    fn it_sorts_newest_first() {
        let feed = extract(&rule(), PAGE).unwrap();
        assert!(feed.items[0].date.unwrap() > feed.items[1].date.unwrap());
    }

    #[test]
    fn date_from_inner_text() {
        let mut rule = rule();
        rule.item_date_published_attr = String::new();
        rule.item_date_published = "time".into();
        let page = PAGE.replace("Feb 1", "2024-02-01T08:00:00Z");
        let feed = extract(&rule, &page).unwrap();
        assert_eq!(
            feed.items[0].date.unwrap(),
            chrono::DateTime::parse_from_rfc3339("2024-02-01T08:00:00Z").unwrap()
        );
    }

    #[test]
    fn invalid_selectors_are_rule_errors() {
        let mut rule = rule();
        rule.items = ":::".into();
        assert!(extract(&rule, PAGE).is_err());
    }
}
