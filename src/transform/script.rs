use std::sync::Arc;

use super::ScriptRule;
use crate::errors::{AppError, AppResult};
use crate::feed::Feed;
use crate::runtime::{Registry, Runtime};

/// Runs the rule's script in a fresh runtime and deserializes whatever
/// it assigned to `module.exports` into the canonical feed shape.
pub async fn apply(rule: &ScriptRule, registry: Arc<Registry>) -> AppResult<Feed> {
    let script = rule.script.clone();
    let value = tokio::task::spawn_blocking(move || {
        Runtime::new(registry)?.eval_module_exports(&script)
    })
    .await
    .map_err(|err| AppError::Script(format!("script task: {err}")))??;

    if value.is_null() {
        return Ok(Feed::default());
    }
    let mut feed: Feed = serde_json::from_value(value)
        .map_err(|err| AppError::Script(format!("exports shape: {err}")))?;
    feed.items
        .retain(|item| !item.url.is_empty() || !item.content.is_empty());
    feed.sort_items_newest_first();
    Ok(feed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, Memory};
    use crate::fetch::Fetcher;

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(
            Arc::new(Cache::new(Box::new(Memory::new()))),
            Arc::new(Fetcher::new()),
            tokio::runtime::Handle::current(),
            String::new(),
            String::new(),
        ))
    }

    #[tokio::test]
    async fn script_exports_become_a_feed() {
        let rule = ScriptRule {
            script: r#"
                module.exports = {
                    title: 'Scripted',
                    home_page_url: 'https://example.com',
                    items: [
                        {
                            id: 'https://example.com/1',
                            url: 'https://example.com/1',
                            title: 'one',
                            content_html: '<p>hi</p>',
                            date_published: '2024-01-01T00:00:00Z',
                        },
                        { title: 'linkless and empty' },
                    ],
                };
            "#
            .into(),
        };
        let feed = apply(&rule, registry()).await.unwrap();
        assert_eq!(feed.title, "Scripted");
        // The link-less, content-less item is dropped.
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].guid, "https://example.com/1");
        assert_eq!(
            feed.items[0].date.unwrap(),
            chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap()
        );
    }

    #[tokio::test]
    async fn script_failures_surface_as_errors() {
        let rule = ScriptRule {
            script: "throw new Error('bad scrape')".into(),
        };
        let result = apply(&rule, registry()).await;
        assert!(matches!(result, Err(AppError::Script(_))));
    }
}
