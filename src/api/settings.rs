use std::sync::Arc;

use actix_web::{get, put, web, HttpResponse, Scope};
use serde_json::{Map, Value};

use crate::errors::AppResult;
use crate::models::settings;
use crate::refresh::Refresher;
use crate::DbPool;

pub fn scope() -> Scope {
    web::scope("/settings").service(get_all).service(update)
}

#[get("")]
async fn get_all(pool: web::Data<DbPool>) -> AppResult<HttpResponse> {
    let mut conn = pool.get()?;
    Ok(HttpResponse::Ok().json(settings::get_all(&mut conn)?))
}

#[put("")]
async fn update(
    pool: web::Data<DbPool>,
    refresher: web::Data<Arc<Refresher>>,
    body: web::Json<Map<String, Value>>,
) -> AppResult<HttpResponse> {
    {
        let mut conn = pool.get()?;
        settings::update(&mut conn, &body)?;
    }
    // A refresh-rate change re-arms the scheduler right away.
    if let Some(rate) = body.get(settings::REFRESH_RATE) {
        let minutes = rate.as_i64().unwrap_or(0);
        let refresher = refresher.get_ref().clone();
        tokio::spawn(async move { refresher.set_refresh_rate(minutes).await });
    }
    Ok(HttpResponse::Ok().finish())
}
