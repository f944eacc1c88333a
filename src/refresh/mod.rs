//! The scheduled refresh engine: a fixed worker pool fed by a channel,
//! a ticker armed from the `refresh_rate` setting, and on-demand
//! triggers from the API. Workers record per-feed errors and never get
//! cancelled mid-job.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::errors::{AppError, AppResult};
use crate::feed as feed_parser;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::models::{Feed, HttpState, Item, ItemStatus, NewItem};
use crate::runtime::Registry;
use crate::transform::{self, Rule};
use crate::util;
use crate::DbPool;

const WORKER_COUNT: usize = 10;
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct Refresher {
    pool: DbPool,
    fetcher: Arc<Fetcher>,
    registry: Arc<Registry>,
    jobs: mpsc::Sender<Feed>,
    pending: AtomicI32,
    last_refreshed: RwLock<Option<DateTime<Utc>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Refresher {
    /// Builds the engine and spawns its workers, the daily maintenance
    /// task, and an initial favicon sweep.
    pub fn start(pool: DbPool, fetcher: Arc<Fetcher>, registry: Arc<Registry>) -> Arc<Refresher> {
        let (jobs, rx) = mpsc::channel::<Feed>(1);
        let refresher = Arc::new(Refresher {
            pool,
            fetcher,
            registry,
            jobs,
            pending: AtomicI32::new(0),
            last_refreshed: RwLock::new(None),
            ticker: Mutex::new(None),
        });

        let rx = Arc::new(Mutex::new(rx));
        for _ in 0..WORKER_COUNT {
            let refresher = refresher.clone();
            let rx = rx.clone();
            tokio::spawn(async move { refresher.worker(rx).await });
        }

        {
            let refresher = refresher.clone();
            tokio::spawn(async move { refresher.maintenance().await });
        }
        {
            let refresher = refresher.clone();
            tokio::spawn(async move { refresher.find_favicons().await });
        }

        refresher
    }

    pub fn pending(&self) -> i32 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        *self.last_refreshed.read().unwrap()
    }

    /// Re-arms the ticker. The previous loop is aborted and awaited
    /// before the new one starts, so no stale tick can fire after this
    /// returns. Rate changes serialize on the ticker mutex.
    pub async fn set_refresh_rate(self: &Arc<Self>, minutes: i64) {
        let mut ticker = self.ticker.lock().await;
        if let Some(previous) = ticker.take() {
            previous.abort();
            let _ = previous.await;
            log::info!("auto-refresh: stopped");
        }
        if minutes <= 0 {
            return;
        }

        log::info!("auto-refresh {minutes}m: starting");
        let refresher = self.clone();
        *ticker = Some(tokio::spawn(async move {
            let period = Duration::from_secs(minutes as u64 * 60);
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                log::info!("auto-refresh {minutes}m: firing");
                refresher.refresh_all().await;
            }
        }));
    }

    pub async fn refresh_all(&self) {
        let feeds = {
            let mut conn = match self.pool.get() {
                Ok(conn) => conn,
                Err(err) => {
                    log::error!("refresh: no database connection: {err}");
                    return;
                }
            };
            match Feed::list(&mut conn) {
                Ok(feeds) => feeds,
                Err(err) => {
                    log::error!("refresh: failed to list feeds: {err}");
                    return;
                }
            }
        };
        *self.last_refreshed.write().unwrap() = Some(Utc::now());
        self.refresh_feeds(feeds).await;
    }

    /// Enqueues jobs; the pool caps concurrency, extra ticks just
    /// queue more work.
    pub async fn refresh_feeds(&self, feeds: Vec<Feed>) {
        log::info!("refreshing {} feeds", feeds.len());
        self.pending.fetch_add(feeds.len() as i32, Ordering::SeqCst);
        for feed in feeds {
            if self.jobs.send(feed).await.is_err() {
                self.pending.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    async fn worker(self: Arc<Self>, rx: Arc<Mutex<mpsc::Receiver<Feed>>>) {
        loop {
            let feed = {
                let mut rx = rx.lock().await;
                match rx.recv().await {
                    Some(feed) => feed,
                    None => return,
                }
            };
            let feed_id = feed.id;
            let result = self.refresh_one(feed).await;
            if let Ok(mut conn) = self.pool.get() {
                match &result {
                    Ok(()) => Feed::set_error(&mut conn, feed_id, None),
                    Err(err) => {
                        log::warn!("refresh feed {feed_id}: {err}");
                        Feed::set_error(&mut conn, feed_id, Some(&err.to_string()));
                    }
                }
            }
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn refresh_one(&self, feed: Feed) -> AppResult<()> {
        let mut conn = self.pool.get()?;
        let mut state = Feed::get_http_state(&mut conn, feed.id)?;
        drop(conn);

        let Some(parsed) =
            load_feed(&feed.feed_link, &mut state, &self.fetcher, &self.registry).await?
        else {
            // 304: nothing new, nothing recorded; the worker clears
            // any previous error.
            return Ok(());
        };

        let items = convert_items(parsed.items, feed.id);
        let mut conn = self.pool.get()?;
        let state = (!state.is_empty()).then_some(&state);
        Item::create_batch(&mut conn, feed.id, items, Utc::now(), state)?;
        Ok(())
    }

    /// Daily retention plus storage upkeep.
    async fn maintenance(&self) {
        loop {
            if let Ok(mut conn) = self.pool.get() {
                crate::models::item::delete_old_items(&mut conn);
                crate::models::item::vacuum(&mut conn);
                crate::models::item::optimize(&mut conn);
            }
            tokio::time::sleep(MAINTENANCE_INTERVAL).await;
        }
    }

    async fn find_favicons(&self) {
        let feeds = {
            let Ok(mut conn) = self.pool.get() else { return };
            match Feed::list_missing_icons(&mut conn) {
                Ok(feeds) => feeds,
                Err(_) => return,
            }
        };
        for feed in feeds {
            self.find_feed_favicon(&feed).await;
        }
    }

    pub async fn find_feed_favicon(&self, feed: &Feed) {
        for raw_url in [&feed.link, &feed.feed_link] {
            let host = util::url_domain(raw_url);
            if host.is_empty() {
                continue;
            }
            let icon_url = format!("https://icons.duckduckgo.com/ip3/{host}.ico");
            match self.fetcher.get(&icon_url, &[], None).await {
                Ok(FetchOutcome::Fetched(page)) => {
                    if let Ok(mut conn) = self.pool.get() {
                        Feed::update_icon(&mut conn, feed.id, &page.bytes);
                    }
                    return;
                }
                Ok(FetchOutcome::NotModified) => {}
                Err(AppError::Transport(err)) if err.contains("404") => {}
                Err(err) => log::info!("favicon for feed {}: {err}", feed.id),
            }
        }
    }
}

/// Classical URLs are fetched and parsed; `feedloom://` URLs run
/// through the transform engine. `None` means not modified.
pub async fn load_feed(
    feed_link: &str,
    state: &mut HttpState,
    fetcher: &Fetcher,
    registry: &Arc<Registry>,
) -> AppResult<Option<feed_parser::Feed>> {
    if transform::is_synthetic(feed_link) {
        let feed = match Rule::from_url(feed_link)? {
            Rule::Html(rule) => transform::html::apply(&rule, fetcher).await?,
            Rule::Json(rule) => transform::json::apply(&rule, fetcher).await?,
            Rule::Script(rule) => transform::script::apply(&rule, registry.clone()).await?,
        };
        return Ok(Some(feed));
    }

    let page = match fetcher.get(feed_link, &[], Some(&*state)).await? {
        FetchOutcome::NotModified => return Ok(None),
        FetchOutcome::Fetched(page) => page,
    };
    if let Some(new_state) = page.http_state() {
        *state = new_state;
    }
    let parsed = feed_parser::parse(&page.bytes, feed_link)?;
    Ok(Some(parsed))
}

/// Canonical parser output into insertable rows: guid falls back to
/// the link, missing dates to the ingest instant, and items with
/// neither a link nor content are skipped.
pub fn convert_items(items: Vec<feed_parser::FeedItem>, feed_id: i32) -> Vec<NewItem> {
    let now = Utc::now();
    items
        .into_iter()
        .filter(|item| !item.url.is_empty() || !item.content.is_empty())
        .map(|item| {
            let content_text = util::extract_text(&item.content);
            NewItem {
                guid: util::first_non_empty(&[&item.guid, &item.url]).to_string(),
                feed_id,
                title: item.title,
                link: item.url,
                content: item.content,
                content_text,
                date: item.date.unwrap_or(now),
                date_arrived: now,
                status: ItemStatus::Unread,
                image: item.image_url,
                audio_url: item.audio_url,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedItem;

    #[test]
    fn convert_fills_guid_and_date_fallbacks() {
        let items = vec![
            FeedItem {
                url: "https://example.com/1".into(),
                title: "no guid".into(),
                ..Default::default()
            },
            FeedItem {
                guid: "g2".into(),
                url: "https://example.com/2".into(),
                date: crate::feed::dates::parse_date("2020-01-01T00:00:00Z"),
                content: "<p>text</p>".into(),
                ..Default::default()
            },
            FeedItem::default(), // no link, no content: dropped
        ];
        let converted = convert_items(items, 7);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].guid, "https://example.com/1");
        assert_eq!(converted[0].status, ItemStatus::Unread);
        assert_eq!(converted[1].guid, "g2");
        assert_eq!(converted[1].content_text, "text");
        assert_eq!(
            converted[1].date,
            crate::feed::dates::parse_date("2020-01-01T00:00:00Z").unwrap()
        );
    }
}
