use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::AppResult;
use crate::schema::{feeds, items};

use super::ItemStatus;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable)]
#[diesel(table_name = feeds)]
pub struct Feed {
    pub id: i32,
    pub folder_id: Option<i32>,
    pub title: String,
    pub link: String,
    pub feed_link: String,
    pub icon: Option<Vec<u8>>,
    pub error: Option<String>,
    pub size: i32,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = feeds)]
pub struct NewFeed<'a> {
    pub folder_id: Option<i32>,
    pub title: &'a str,
    pub link: &'a str,
    pub feed_link: &'a str,
}

/// Partial update sent by the feed editor.
#[derive(Debug, Default, Deserialize)]
pub struct FeedEditor {
    pub title: Option<String>,
    pub feed_link: Option<String>,
    /// `Some(None)` moves the feed out of any folder.
    pub folder_id: Option<Option<i32>>,
}

/// The conditional-GET header pair cached per feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpState {
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

impl HttpState {
    pub fn is_empty(&self) -> bool {
        self.last_modified.is_none() && self.etag.is_none()
    }
}

/// Aggregate view consumed by the status endpoint.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FeedState {
    pub unread: i64,
    pub starred: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refreshed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Feed {
    /// Inserts a subscription; re-subscribing to a known feed link
    /// only moves it to the requested folder.
    pub fn create(
        conn: &mut SqliteConnection,
        title: &str,
        link: &str,
        feed_link: &str,
        folder_id: Option<i32>,
    ) -> AppResult<Feed> {
        let title = if title.is_empty() { feed_link } else { title };
        let feed = diesel::insert_into(feeds::table)
            .values(&NewFeed {
                folder_id,
                title,
                link,
                feed_link,
            })
            .on_conflict(feeds::feed_link)
            .do_update()
            .set(feeds::folder_id.eq(folder_id))
            .get_result(conn)?;
        Ok(feed)
    }

    pub fn get(conn: &mut SqliteConnection, feed_id: i32) -> AppResult<Feed> {
        Ok(feeds::table.find(feed_id).first(conn)?)
    }

    pub fn list(conn: &mut SqliteConnection) -> AppResult<Vec<Feed>> {
        Ok(feeds::table
            .order(diesel::dsl::sql::<diesel::sql_types::Text>("title collate nocase"))
            .load(conn)?)
    }

    pub fn list_in_folder(conn: &mut SqliteConnection, folder_id: i32) -> AppResult<Vec<Feed>> {
        Ok(feeds::table
            .filter(feeds::folder_id.eq(folder_id))
            .order(diesel::dsl::sql::<diesel::sql_types::Text>("title collate nocase"))
            .load(conn)?)
    }

    pub fn list_missing_icons(conn: &mut SqliteConnection) -> AppResult<Vec<Feed>> {
        Ok(feeds::table.filter(feeds::icon.is_null()).load(conn)?)
    }

    pub fn edit(conn: &mut SqliteConnection, feed_id: i32, editor: &FeedEditor) -> AppResult<()> {
        conn.transaction(|conn| {
            if let Some(title) = &editor.title {
                diesel::update(feeds::table.find(feed_id))
                    .set(feeds::title.eq(title))
                    .execute(conn)?;
            }
            if let Some(feed_link) = &editor.feed_link {
                diesel::update(feeds::table.find(feed_id))
                    .set(feeds::feed_link.eq(feed_link))
                    .execute(conn)?;
            }
            if let Some(folder_id) = editor.folder_id {
                diesel::update(feeds::table.find(feed_id))
                    .set(feeds::folder_id.eq(folder_id))
                    .execute(conn)?;
            }
            Ok(())
        })
    }

    pub fn delete(conn: &mut SqliteConnection, feed_id: i32) -> AppResult<()> {
        diesel::delete(feeds::table.find(feed_id)).execute(conn)?;
        Ok(())
    }

    /// Records the outcome of the latest refresh; `None` clears a
    /// previous error.
    pub fn set_error(conn: &mut SqliteConnection, feed_id: i32, error: Option<&str>) {
        let result = diesel::update(feeds::table.find(feed_id))
            .set(feeds::error.eq(error))
            .execute(conn);
        if let Err(err) = result {
            log::warn!("failed to record feed error for {feed_id}: {err}");
        }
    }

    pub fn get_http_state(conn: &mut SqliteConnection, feed_id: i32) -> AppResult<HttpState> {
        let (last_modified, etag) = feeds::table
            .find(feed_id)
            .select((feeds::last_modified, feeds::etag))
            .first::<(Option<String>, Option<String>)>(conn)?;
        Ok(HttpState {
            last_modified,
            etag,
        })
    }

    pub fn get_icon(conn: &mut SqliteConnection, feed_id: i32) -> AppResult<Option<Vec<u8>>> {
        Ok(feeds::table
            .find(feed_id)
            .select(feeds::icon)
            .first(conn)?)
    }

    pub fn update_icon(conn: &mut SqliteConnection, feed_id: i32, icon: &[u8]) {
        let result = diesel::update(feeds::table.find(feed_id))
            .set(feeds::icon.eq(icon))
            .execute(conn);
        if let Err(err) = result {
            log::warn!("failed to store feed icon for {feed_id}: {err}");
        }
    }

    /// Unread/starred counts plus refresh bookkeeping, keyed by feed.
    pub fn state(conn: &mut SqliteConnection) -> AppResult<HashMap<i32, FeedState>> {
        let counts: Vec<(i32, i32)> = items::table
            .filter(items::status.ne(ItemStatus::Read as i32))
            .select((items::feed_id, items::status))
            .load(conn)?;

        let mut result: HashMap<i32, FeedState> = HashMap::new();
        for (feed_id, status) in counts {
            let state = result.entry(feed_id).or_default();
            if status == ItemStatus::Unread as i32 {
                state.unread += 1;
            } else if status == ItemStatus::Starred as i32 {
                state.starred += 1;
            }
        }

        let meta: Vec<(i32, Option<DateTime<Utc>>, Option<String>)> = feeds::table
            .select((feeds::id, feeds::last_refreshed, feeds::error))
            .load(conn)?;
        for (feed_id, last_refreshed, error) in meta {
            let state = result.entry(feed_id).or_default();
            state.last_refreshed = last_refreshed;
            state.error = error;
        }
        Ok(result)
    }
}
