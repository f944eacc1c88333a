use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{get, web, HttpResponse};

use crate::errors::AppResult;
use crate::runtime::Registry;
use crate::transform::{self as transform_mod, Rule};

use super::FEED_JSON_CONTENT_TYPE;

/// Preview endpoint: applies a rule passed as query parameters and
/// serves the resulting feed without storing anything.
#[get("/transform/{kind}")]
pub async fn transform(
    registry: web::Data<Arc<Registry>>,
    kind: web::Path<String>,
    query: web::Query<HashMap<String, String>>,
) -> AppResult<HttpResponse> {
    let registry = registry.get_ref().clone();
    let fetcher = registry.fetcher.clone();

    let feed = match Rule::from_parts(&kind, &query)? {
        Rule::Html(rule) => transform_mod::html::apply(&rule, &fetcher).await?,
        Rule::Json(rule) => transform_mod::json::apply(&rule, &fetcher).await?,
        Rule::Script(rule) => transform_mod::script::apply(&rule, registry).await?,
    };

    let mut body = serde_json::to_value(&feed)?;
    if let Some(map) = body.as_object_mut() {
        map.insert(
            "version".to_string(),
            serde_json::Value::String(crate::normalize::JSON_FEED_VERSION.to_string()),
        );
    }
    Ok(HttpResponse::Ok()
        .content_type(FEED_JSON_CONTENT_TYPE)
        .json(body))
}
