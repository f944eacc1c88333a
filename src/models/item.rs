use chrono::{DateTime, Duration, Utc};
use diesel::backend::Backend;
use diesel::deserialize::{self, FromSql};
use diesel::prelude::*;
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::{Bool, Integer};
use diesel::sqlite::Sqlite;
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;
use crate::schema::{feeds, items};

use super::HttpState;

#[repr(i32)]
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, AsExpression, FromSqlRow)]
#[diesel(sql_type = Integer)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Unread,
    Read,
    Starred,
}

impl<DB> FromSql<Integer, DB> for ItemStatus
where
    DB: Backend,
    i32: FromSql<Integer, DB>,
{
    fn from_sql(bytes: DB::RawValue<'_>) -> deserialize::Result<Self> {
        match i32::from_sql(bytes)? {
            0 => Ok(ItemStatus::Unread),
            1 => Ok(ItemStatus::Read),
            2 => Ok(ItemStatus::Starred),
            _ => Err("Unrecognized enum variant".into()),
        }
    }
}

impl<DB> ToSql<Integer, DB> for ItemStatus
where
    DB: Backend,
    i32: ToSql<Integer, DB>,
{
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, DB>) -> serialize::Result {
        match self {
            ItemStatus::Unread => 0.to_sql(out),
            ItemStatus::Read => 1.to_sql(out),
            ItemStatus::Starred => 2.to_sql(out),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Queryable, Identifiable, Selectable)]
#[diesel(table_name = items)]
pub struct Item {
    pub id: i32,
    pub guid: String,
    pub feed_id: i32,
    pub title: String,
    pub link: String,
    pub content: String,
    #[serde(skip_serializing)]
    pub content_text: String,
    pub date: DateTime<Utc>,
    pub date_arrived: DateTime<Utc>,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "podcast_url")]
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = items)]
pub struct NewItem {
    pub guid: String,
    pub feed_id: i32,
    pub title: String,
    pub link: String,
    pub content: String,
    pub content_text: String,
    pub date: DateTime<Utc>,
    pub date_arrived: DateTime<Utc>,
    pub status: ItemStatus,
    pub image: Option<String>,
    pub audio_url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ItemFilter {
    pub folder_id: Option<i32>,
    pub feed_id: Option<i32>,
    pub status: Option<ItemStatus>,
    pub search: Option<String>,
    /// Cursor: item id of the last row of the previous page.
    pub after: Option<i32>,
    #[serde(default)]
    pub oldest_first: bool,
}

type BoxedCond = Box<dyn BoxableExpression<items::table, Sqlite, SqlType = Bool>>;

/// Builds the WHERE clause for a filter. Returns `None` when the
/// cursor points at a row that no longer exists, which matches no
/// items at all.
fn conditions(
    conn: &mut SqliteConnection,
    filter: &ItemFilter,
    include_boundary: bool,
) -> AppResult<Option<Vec<BoxedCond>>> {
    let mut cond: Vec<BoxedCond> = Vec::new();

    if let Some(folder_id) = filter.folder_id {
        let feed_ids = feeds::table
            .filter(feeds::folder_id.eq(folder_id))
            .select(feeds::id);
        cond.push(Box::new(items::feed_id.eq_any(feed_ids)));
    }
    if let Some(feed_id) = filter.feed_id {
        cond.push(Box::new(items::feed_id.eq(feed_id)));
    }
    if let Some(status) = filter.status {
        cond.push(Box::new(items::status.eq(status)));
    }
    if let Some(search) = &filter.search {
        for word in search.split_whitespace() {
            let pattern = format!("%{word}%");
            cond.push(Box::new(
                items::title
                    .like(pattern.clone())
                    .or(items::content_text.like(pattern)),
            ));
        }
    }
    if let Some(after) = filter.after {
        let anchor: Option<(DateTime<Utc>, i32)> = items::table
            .find(after)
            .select((items::date, items::id))
            .first(conn)
            .optional()?;
        let Some((anchor_date, anchor_id)) = anchor else {
            return Ok(None);
        };
        let boundary: BoxedCond = match (filter.oldest_first, include_boundary) {
            (false, false) => Box::new(
                items::date
                    .lt(anchor_date)
                    .or(items::date.eq(anchor_date).and(items::id.lt(anchor_id))),
            ),
            (false, true) => Box::new(
                items::date
                    .lt(anchor_date)
                    .or(items::date.eq(anchor_date).and(items::id.le(anchor_id))),
            ),
            (true, false) => Box::new(
                items::date
                    .gt(anchor_date)
                    .or(items::date.eq(anchor_date).and(items::id.gt(anchor_id))),
            ),
            (true, true) => Box::new(
                items::date
                    .gt(anchor_date)
                    .or(items::date.eq(anchor_date).and(items::id.ge(anchor_id))),
            ),
        };
        cond.push(boundary);
    }

    Ok(Some(cond))
}

fn combine(cond: Vec<BoxedCond>) -> BoxedCond {
    let mut combined: BoxedCond = Box::new(diesel::dsl::sql::<Bool>("1"));
    for c in cond {
        combined = Box::new(combined.and(c));
    }
    combined
}

impl Item {
    pub fn list(
        conn: &mut SqliteConnection,
        filter: &ItemFilter,
        limit: i64,
    ) -> AppResult<Vec<Item>> {
        let Some(cond) = conditions(conn, filter, false)? else {
            return Ok(Vec::new());
        };
        let mut query = items::table.into_boxed().filter(combine(cond));
        query = if filter.oldest_first {
            query.order((items::date.asc(), items::id.asc()))
        } else {
            query.order((items::date.desc(), items::id.desc()))
        };
        Ok(query.limit(limit).load(conn)?)
    }

    pub fn get(conn: &mut SqliteConnection, item_id: i32) -> AppResult<Item> {
        Ok(items::table.find(item_id).first(conn)?)
    }

    pub fn update_status(
        conn: &mut SqliteConnection,
        item_id: i32,
        status: ItemStatus,
    ) -> AppResult<()> {
        diesel::update(items::table.find(item_id))
            .set(items::status.eq(status))
            .execute(conn)?;
        Ok(())
    }

    /// Transitions UNREAD items matching the filter to READ. STARRED
    /// items are never demoted. The cursor bound includes the
    /// boundary row so "mark everything up to here" covers the row
    /// the user is looking at.
    pub fn mark_read(conn: &mut SqliteConnection, filter: &ItemFilter) -> AppResult<()> {
        let Some(cond) = conditions(conn, filter, true)? else {
            return Ok(());
        };
        diesel::update(
            items::table
                .filter(combine(cond))
                .filter(items::status.ne(ItemStatus::Starred)),
        )
        .set(items::status.eq(ItemStatus::Read))
        .execute(conn)?;
        Ok(())
    }

    /// Inserts a refreshed batch inside one transaction. Items are
    /// sorted newest-first and inserted in reverse so that a partial
    /// failure still leaves the newest remaining items the newest.
    /// Re-ingesting a known `(feed_id, guid)` is a no-op.
    pub fn create_batch(
        conn: &mut SqliteConnection,
        feed_id: i32,
        mut new_items: Vec<NewItem>,
        refreshed_at: DateTime<Utc>,
        http_state: Option<&HttpState>,
    ) -> AppResult<()> {
        conn.transaction(|conn| {
            new_items.sort_by(|a, b| b.date.cmp(&a.date));
            for item in new_items.iter().rev() {
                diesel::insert_into(items::table)
                    .values(item)
                    .on_conflict((items::feed_id, items::guid))
                    .do_nothing()
                    .execute(conn)?;
            }

            diesel::update(feeds::table.find(feed_id))
                .set(feeds::last_refreshed.eq(refreshed_at))
                .execute(conn)?;

            if !new_items.is_empty() {
                let current: i32 = feeds::table
                    .find(feed_id)
                    .select(feeds::size)
                    .first(conn)?;
                let batch = new_items.len() as i32;
                if batch > current {
                    diesel::update(feeds::table.find(feed_id))
                        .set(feeds::size.eq(batch))
                        .execute(conn)?;
                }
            }

            if let Some(state) = http_state {
                diesel::update(feeds::table.find(feed_id))
                    .set((
                        feeds::last_modified.eq(state.last_modified.clone()),
                        feeds::etag.eq(state.etag.clone()),
                    ))
                    .execute(conn)?;
            }
            Ok(())
        })
    }
}

pub const ITEMS_KEEP_SIZE: i64 = 50;
pub const ITEMS_KEEP_DAYS: i64 = 90;

/// Deletes old articles to reclaim space.
///
/// The rules:
///   - Never delete unread/starred entries.
///   - Keep at least as many read articles as the feed has ever
///     provided in one batch (floor of 50), so rarely-updated feeds
///     do not lose items that would reappear as unread.
///   - Only prune entries that arrived more than 90 days ago.
pub fn delete_old_items(conn: &mut SqliteConnection) {
    let feed_limits: Vec<(i32, i32)> = match feeds::table.select((feeds::id, feeds::size)).load(conn)
    {
        Ok(rows) => rows,
        Err(err) => {
            log::warn!("retention: failed to list feeds: {err}");
            return;
        }
    };

    let arrived_cutoff = Utc::now() - Duration::days(ITEMS_KEEP_DAYS);
    for (feed_id, size) in feed_limits {
        let keep = ITEMS_KEEP_SIZE.max(size as i64);
        let anchor: Option<(DateTime<Utc>, i32)> = items::table
            .filter(items::feed_id.eq(feed_id))
            .filter(items::status.eq(ItemStatus::Read))
            .order((items::date.desc(), items::id.desc()))
            .offset(keep)
            .limit(1)
            .select((items::date, items::id))
            .first(conn)
            .optional()
            .unwrap_or(None);
        let Some((anchor_date, anchor_id)) = anchor else {
            continue;
        };

        let result = diesel::delete(
            items::table
                .filter(items::feed_id.eq(feed_id))
                .filter(items::status.eq(ItemStatus::Read))
                .filter(
                    items::date
                        .lt(anchor_date)
                        .or(items::date.eq(anchor_date).and(items::id.le(anchor_id))),
                )
                .filter(items::date_arrived.lt(arrived_cutoff)),
        )
        .execute(conn);
        match result {
            Ok(0) => {}
            Ok(deleted) => log::info!("deleted {deleted} old items (feed: {feed_id})"),
            Err(err) => log::warn!("retention: failed to prune feed {feed_id}: {err}"),
        }
    }
}

pub fn optimize(conn: &mut SqliteConnection) {
    if let Err(err) = diesel::sql_query("pragma optimize").execute(conn) {
        log::warn!("pragma optimize failed: {err}");
    }
}

pub fn vacuum(conn: &mut SqliteConnection) {
    if let Err(err) = diesel::sql_query("pragma incremental_vacuum").execute(conn) {
        log::warn!("pragma incremental_vacuum failed: {err}");
    }
}
