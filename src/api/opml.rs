use std::sync::Arc;

use actix_web::{get, post, web, HttpResponse, Scope};

use crate::errors::{AppError, AppResult};
use crate::feed::opml::{self, Opml, Outline};
use crate::models::{Feed, Folder};
use crate::refresh::Refresher;
use crate::DbPool;

pub fn scope() -> Scope {
    web::scope("/opml").service(import).service(export)
}

/// Import is idempotent at the feed level: a feed link that already
/// exists only moves into the incoming folder.
#[post("/import")]
async fn import(
    pool: web::Data<DbPool>,
    refresher: web::Data<Arc<Refresher>>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let text = String::from_utf8(body.to_vec())
        .map_err(|err| AppError::bad_request(format!("opml: {err}")))?;
    let document = opml::parse(&text)?;

    let mut errors = Vec::new();
    {
        let mut conn = pool.get()?;
        for outline in &document.body.outlines {
            if outline.is_folder() {
                let folder = match Folder::create(&mut conn, outline.title()) {
                    Ok(folder) => folder,
                    Err(err) => {
                        errors.push(err.to_string());
                        continue;
                    }
                };
                for feed in outline.all_feeds() {
                    if let Err(err) = create_outline_feed(&mut conn, feed, Some(folder.id)) {
                        errors.push(err.to_string());
                    }
                }
            } else if let Err(err) = create_outline_feed(&mut conn, outline, None) {
                errors.push(err.to_string());
            }
        }
    }
    if !errors.is_empty() {
        return Err(AppError::Storage(errors.join("; ")));
    }

    let refresher = refresher.get_ref().clone();
    tokio::spawn(async move { refresher.refresh_all().await });
    Ok(HttpResponse::Ok().finish())
}

fn create_outline_feed(
    conn: &mut diesel::SqliteConnection,
    outline: &Outline,
    folder_id: Option<i32>,
) -> AppResult<()> {
    let Some(xml_url) = outline.xml_url.as_deref() else {
        return Ok(());
    };
    Feed::create(
        conn,
        outline.title(),
        outline.html_url.as_deref().unwrap_or_default(),
        xml_url,
        folder_id,
    )?;
    Ok(())
}

#[get("/export")]
async fn export(pool: web::Data<DbPool>) -> AppResult<HttpResponse> {
    let (feeds, folders) = {
        let mut conn = pool.get()?;
        (Feed::list(&mut conn)?, Folder::list(&mut conn)?)
    };

    let mut document = Opml {
        version: Some("1.1".to_string()),
        ..Default::default()
    };
    document.head.title = "subscriptions".to_string();

    let feed_outline = |feed: &Feed| Outline {
        kind: Some("rss".to_string()),
        text: feed.title.clone(),
        xml_url: Some(feed.feed_link.clone()),
        html_url: (!feed.link.is_empty()).then(|| feed.link.clone()),
        ..Default::default()
    };

    for feed in feeds.iter().filter(|feed| feed.folder_id.is_none()) {
        document.body.outlines.push(feed_outline(feed));
    }
    for folder in &folders {
        let members: Vec<Outline> = feeds
            .iter()
            .filter(|feed| feed.folder_id == Some(folder.id))
            .map(feed_outline)
            .collect();
        if members.is_empty() {
            continue;
        }
        document.body.outlines.push(Outline {
            text: folder.title.clone(),
            outlines: members,
            ..Default::default()
        });
    }

    let xml = opml::render(&document)?;
    Ok(HttpResponse::Ok()
        .content_type("application/xml; charset=utf-8")
        .insert_header((
            "Content-Disposition",
            r#"attachment; filename="subscriptions.opml""#,
        ))
        .body(xml))
}
