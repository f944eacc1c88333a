pub mod html;
pub mod json;
pub mod path;
pub mod script;

use std::collections::HashMap;

use url::Url;

use crate::errors::{AppError, AppResult};

/// Scheme marking a feed URL as a synthetic rule rather than a
/// classical subscription.
pub const SCHEME: &str = "feedloom";

pub fn is_synthetic(url: &str) -> bool {
    url.starts_with("feedloom:")
}

/// An HTML-scraping rule: CSS selectors cut a page into items.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HtmlRule {
    pub url: String,
    pub title: String,
    pub items: String,
    pub item_title: String,
    pub item_url: String,
    pub item_url_attr: String,
    pub item_content: String,
    pub item_date_published: String,
    pub item_date_published_attr: String,
}

/// A JSON rule: path expressions project a document into items.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JsonRule {
    pub url: String,
    pub home_page_url: String,
    pub headers: HashMap<String, String>,
    pub title: String,
    pub items: String,
    pub item_title: String,
    pub item_url: String,
    pub item_url_prefix: String,
    pub item_content: String,
    pub item_date_published: String,
}

/// A script rule: the script's `module.exports` is the feed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScriptRule {
    pub script: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Html(HtmlRule),
    Json(JsonRule),
    Script(ScriptRule),
}

impl Rule {
    /// Decodes a synthetic feed URL: the host picks the rule kind and
    /// the query string carries the fields. Map-valued fields are
    /// JSON-encoded query values.
    pub fn from_url(raw: &str) -> AppResult<Rule> {
        let url = Url::parse(raw)?;
        if url.scheme() != SCHEME {
            return Err(AppError::bad_request(format!(
                "not a synthetic feed url: {raw}"
            )));
        }
        let kind = url.host_str().unwrap_or_default().to_string();
        let query: HashMap<String, String> = url
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        Rule::from_parts(&kind, &query)
    }

    pub fn from_parts(kind: &str, query: &HashMap<String, String>) -> AppResult<Rule> {
        let field = |name: &str| query.get(name).cloned().unwrap_or_default();
        match kind {
            "html" => Ok(Rule::Html(HtmlRule {
                url: field("url"),
                title: field("title"),
                items: field("items"),
                item_title: field("item_title"),
                item_url: field("item_url"),
                item_url_attr: field("item_url_attr"),
                item_content: field("item_content"),
                item_date_published: field("item_date_published"),
                item_date_published_attr: field("item_date_published_attr"),
            })),
            "json" => {
                let headers = match query.get("headers") {
                    Some(raw) if !raw.is_empty() => serde_json::from_str(raw)
                        .map_err(|err| AppError::rule(format!("invalid headers: {err}")))?,
                    _ => HashMap::new(),
                };
                Ok(Rule::Json(JsonRule {
                    url: field("url"),
                    home_page_url: field("home_page_url"),
                    headers,
                    title: field("title"),
                    items: field("items"),
                    item_title: field("item_title"),
                    item_url: field("item_url"),
                    item_url_prefix: field("item_url_prefix"),
                    item_content: field("item_content"),
                    item_date_published: field("item_date_published"),
                }))
            }
            "js" => Ok(Rule::Script(ScriptRule {
                script: field("script"),
            })),
            other => Err(AppError::bad_request(format!(
                "invalid rule kind: {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_decodes_an_html_rule_url() {
        let rule = Rule::from_url(
            "feedloom://html?url=https%3A%2F%2Fexample.com&items=.post&item_url=a&item_url_attr=href",
        )
        .unwrap();
        let Rule::Html(rule) = rule else {
            panic!("expected an html rule")
        };
        assert_eq!(rule.url, "https://example.com");
        assert_eq!(rule.items, ".post");
        assert_eq!(rule.item_url, "a");
        assert_eq!(rule.item_url_attr, "href");
    }

    #[test]
    fn it_decodes_json_rule_headers() {
        let rule = Rule::from_url(
            "feedloom://json?url=https%3A%2F%2Fapi.example.com&headers=%7B%22x-token%22%3A%22t%22%7D",
        )
        .unwrap();
        let Rule::Json(rule) = rule else {
            panic!("expected a json rule")
        };
        assert_eq!(rule.headers.get("x-token").map(String::as_str), Some("t"));
    }

    #[test]
    fn it_rejects_unknown_rule_kinds() {
        assert!(Rule::from_url("feedloom://csv?url=x").is_err());
    }

    #[test]
    fn every_rule_field_round_trips() {
        let query: HashMap<String, String> = [
            ("url", "https://e.com"),
            ("title", "t"),
            ("items", ".i"),
            ("item_title", ".t"),
            ("item_url", "a"),
            ("item_url_attr", "data-href"),
            ("item_content", ".c"),
            ("item_date_published", ".d"),
            ("item_date_published_attr", "datetime"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let Rule::Html(rule) = Rule::from_parts("html", &query).unwrap() else {
            panic!()
        };
        assert_eq!(rule.item_date_published_attr, "datetime");
        assert_eq!(rule.item_content, ".c");
    }
}
