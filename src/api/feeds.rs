use std::sync::Arc;

use actix_web::{delete, get, post, put, web, HttpResponse, Scope};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::models::{Feed, FeedEditor, HttpState, Item};
use crate::refresh::{self, Refresher};
use crate::runtime::Registry;
use crate::DbPool;

pub fn scope() -> Scope {
    web::scope("/feeds")
        .service(list)
        .service(create)
        .service(refresh_all)
        .service(icon)
        .service(refresh_one)
        .service(update)
        .service(delete_feed)
}

/// Feed as the UI sees it; the icon blob stays out of list payloads.
#[derive(Serialize)]
struct FeedView {
    id: i32,
    folder_id: Option<i32>,
    title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    link: String,
    feed_link: String,
    has_icon: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_refreshed: Option<chrono::DateTime<Utc>>,
}

impl From<&Feed> for FeedView {
    fn from(feed: &Feed) -> Self {
        FeedView {
            id: feed.id,
            folder_id: feed.folder_id,
            title: feed.title.clone(),
            link: feed.link.clone(),
            feed_link: feed.feed_link.clone(),
            has_icon: feed.icon.is_some(),
            last_refreshed: feed.last_refreshed,
        }
    }
}

#[get("")]
async fn list(pool: web::Data<DbPool>) -> AppResult<HttpResponse> {
    let mut conn = pool.get()?;
    let feeds = Feed::list(&mut conn)?;
    let views: Vec<FeedView> = feeds.iter().map(FeedView::from).collect();
    Ok(HttpResponse::Ok().json(views))
}

#[derive(Deserialize)]
struct CreateFeed {
    url: String,
    folder_id: Option<i32>,
}

/// Subscribing fetches the source once so the feed gets its title and
/// first batch of items immediately.
#[post("")]
async fn create(
    pool: web::Data<DbPool>,
    refresher: web::Data<Arc<Refresher>>,
    fetcher_registry: web::Data<Arc<Registry>>,
    body: web::Json<CreateFeed>,
) -> AppResult<HttpResponse> {
    let registry = fetcher_registry.get_ref().clone();
    let fetcher = registry.fetcher.clone();

    let mut state = HttpState::default();
    let parsed = refresh::load_feed(&body.url, &mut state, &fetcher, &registry)
        .await?
        .ok_or_else(|| AppError::Transport("unexpected 304".into()))?;

    let feed = {
        let mut conn = pool.get()?;
        Feed::create(
            &mut conn,
            &parsed.title,
            &parsed.site_url,
            &body.url,
            body.folder_id,
        )?
    };

    let items = refresh::convert_items(parsed.items, feed.id);
    let item_count = items.len();
    {
        let mut conn = pool.get()?;
        let state = (!state.is_empty()).then_some(&state);
        Item::create_batch(&mut conn, feed.id, items, Utc::now(), state)?;
    }

    {
        let refresher = refresher.get_ref().clone();
        let feed = feed.clone();
        tokio::spawn(async move { refresher.find_feed_favicon(&feed).await });
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "feed": FeedView::from(&feed),
        "item_count": item_count,
    })))
}

#[post("/refresh")]
async fn refresh_all(refresher: web::Data<Arc<Refresher>>) -> AppResult<HttpResponse> {
    let refresher = refresher.get_ref().clone();
    tokio::spawn(async move { refresher.refresh_all().await });
    Ok(HttpResponse::Ok().finish())
}

#[get("/{id}/icon")]
async fn icon(pool: web::Data<DbPool>, id: web::Path<i32>) -> AppResult<HttpResponse> {
    let mut conn = pool.get()?;
    match Feed::get_icon(&mut conn, *id)? {
        Some(icon) => Ok(HttpResponse::Ok()
            .content_type("image/x-icon")
            .body(icon)),
        None => Err(AppError::NotFound),
    }
}

#[post("/{id}/refresh")]
async fn refresh_one(
    pool: web::Data<DbPool>,
    refresher: web::Data<Arc<Refresher>>,
    id: web::Path<i32>,
) -> AppResult<HttpResponse> {
    let feed = {
        let mut conn = pool.get()?;
        Feed::get(&mut conn, *id)?
    };
    let refresher = refresher.get_ref().clone();
    tokio::spawn(async move { refresher.refresh_feeds(vec![feed]).await });
    Ok(HttpResponse::Ok().finish())
}

#[put("/{id}")]
async fn update(
    pool: web::Data<DbPool>,
    id: web::Path<i32>,
    body: web::Json<FeedEditor>,
) -> AppResult<HttpResponse> {
    let mut conn = pool.get()?;
    Feed::edit(&mut conn, *id, &body)?;
    Ok(HttpResponse::Ok().finish())
}

#[delete("/{id}")]
async fn delete_feed(pool: web::Data<DbPool>, id: web::Path<i32>) -> AppResult<HttpResponse> {
    let mut conn = pool.get()?;
    Feed::delete(&mut conn, *id)?;
    Ok(HttpResponse::Ok().finish())
}

