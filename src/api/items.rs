use actix_web::{get, put, web, HttpResponse, Scope};
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;
use crate::models::{Item, ItemFilter, ItemStatus};
use crate::normalize::sanitize;
use crate::DbPool;

const PER_PAGE: i64 = 20;

pub fn scope() -> Scope {
    web::scope("/items")
        .service(list)
        .service(mark_read)
        .service(get_item)
        .service(update_status)
}

/// Listing view: empty titles fall back to the content text so the
/// list is never blank, and the body itself stays out of the payload.
#[derive(Serialize)]
struct ItemView {
    id: i32,
    guid: String,
    feed_id: i32,
    title: String,
    link: String,
    date: chrono::DateTime<chrono::Utc>,
    status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "podcast_url")]
    podcast_url: Option<String>,
}

impl From<Item> for ItemView {
    fn from(item: Item) -> Self {
        let title = if item.title.is_empty() {
            item.content_text.clone()
        } else {
            item.title
        };
        ItemView {
            id: item.id,
            guid: item.guid,
            feed_id: item.feed_id,
            title,
            link: item.link,
            date: item.date,
            status: item.status,
            image: item.image,
            podcast_url: item.audio_url,
        }
    }
}

#[get("")]
async fn list(
    pool: web::Data<DbPool>,
    filter: web::Query<ItemFilter>,
) -> AppResult<HttpResponse> {
    let mut conn = pool.get()?;
    let mut items = Item::list(&mut conn, &filter, PER_PAGE + 1)?;
    let has_more = items.len() as i64 > PER_PAGE;
    if has_more {
        items.truncate(PER_PAGE as usize);
    }
    let views: Vec<ItemView> = items.into_iter().map(ItemView::from).collect();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "list": views,
        "has_more": has_more,
    })))
}

#[put("")]
async fn mark_read(
    pool: web::Data<DbPool>,
    filter: web::Query<ItemFilter>,
) -> AppResult<HttpResponse> {
    let mut conn = pool.get()?;
    Item::mark_read(&mut conn, &filter)?;
    Ok(HttpResponse::Ok().finish())
}

#[get("/{id}")]
async fn get_item(pool: web::Data<DbPool>, id: web::Path<i32>) -> AppResult<HttpResponse> {
    let mut conn = pool.get()?;
    let mut item = Item::get(&mut conn, *id)?;
    item.content = sanitize::sanitize(&item.link, &item.content);
    Ok(HttpResponse::Ok().json(item))
}

#[derive(Deserialize)]
struct StatusUpdate {
    status: ItemStatus,
}

#[put("/{id}")]
async fn update_status(
    pool: web::Data<DbPool>,
    id: web::Path<i32>,
    body: web::Json<StatusUpdate>,
) -> AppResult<HttpResponse> {
    let mut conn = pool.get()?;
    Item::update_status(&mut conn, *id, body.status)?;
    Ok(HttpResponse::Ok().finish())
}
