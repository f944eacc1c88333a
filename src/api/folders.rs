use std::sync::Arc;

use actix_web::{delete, get, post, put, web, HttpResponse, Scope};
use serde::Deserialize;

use crate::errors::AppResult;
use crate::models::{Feed, Folder, FolderEditor};
use crate::refresh::Refresher;
use crate::DbPool;

pub fn scope() -> Scope {
    web::scope("/folders")
        .service(list)
        .service(create)
        .service(update)
        .service(delete_folder)
        .service(refresh)
}

#[get("")]
async fn list(pool: web::Data<DbPool>) -> AppResult<HttpResponse> {
    let mut conn = pool.get()?;
    Ok(HttpResponse::Ok().json(Folder::list(&mut conn)?))
}

#[derive(Deserialize)]
struct CreateFolder {
    title: String,
}

#[post("")]
async fn create(
    pool: web::Data<DbPool>,
    body: web::Json<CreateFolder>,
) -> AppResult<HttpResponse> {
    let mut conn = pool.get()?;
    let folder = Folder::create(&mut conn, &body.title)?;
    Ok(HttpResponse::Ok().json(folder))
}

#[put("/{id}")]
async fn update(
    pool: web::Data<DbPool>,
    id: web::Path<i32>,
    body: web::Json<FolderEditor>,
) -> AppResult<HttpResponse> {
    let mut conn = pool.get()?;
    Folder::edit(&mut conn, *id, &body)?;
    Ok(HttpResponse::Ok().finish())
}

#[delete("/{id}")]
async fn delete_folder(pool: web::Data<DbPool>, id: web::Path<i32>) -> AppResult<HttpResponse> {
    let mut conn = pool.get()?;
    Folder::delete(&mut conn, *id)?;
    Ok(HttpResponse::Ok().finish())
}

#[post("/{id}/refresh")]
async fn refresh(
    pool: web::Data<DbPool>,
    refresher: web::Data<Arc<Refresher>>,
    id: web::Path<i32>,
) -> AppResult<HttpResponse> {
    let feeds = {
        let mut conn = pool.get()?;
        Feed::list_in_folder(&mut conn, *id)?
    };
    let refresher = refresher.get_ref().clone();
    tokio::spawn(async move { refresher.refresh_feeds(feeds).await });
    Ok(HttpResponse::Ok().finish())
}
