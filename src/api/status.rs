use std::sync::Arc;

use actix_web::{get, web, HttpResponse};
use serde_json::json;

use crate::errors::AppResult;
use crate::models::Feed;
use crate::refresh::Refresher;
use crate::DbPool;

#[get("/status")]
pub async fn status(
    pool: web::Data<DbPool>,
    refresher: web::Data<Arc<Refresher>>,
) -> AppResult<HttpResponse> {
    let mut conn = pool.get()?;
    let state = Feed::state(&mut conn)?;
    Ok(HttpResponse::Ok().json(json!({
        "state": state,
        "running": refresher.pending(),
        "last_refreshed": refresher.last_refreshed(),
    })))
}
