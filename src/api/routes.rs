use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{get, web, HttpRequest, HttpResponse};

use crate::errors::{AppError, AppResult};
use crate::normalize;
use crate::runtime::{Registry, Runtime};

use super::FEED_JSON_CONTENT_TYPE;

/// Executes an upstream-catalog route handler and serves its output as
/// a JSON Feed.
#[get("/routes/{namespace}/{tail:.*}")]
pub async fn route_feed(
    registry: web::Data<Arc<Registry>>,
    path: web::Path<(String, String)>,
    request: HttpRequest,
) -> AppResult<HttpResponse> {
    let (namespace, tail) = path.into_inner();
    let queries: HashMap<String, String> = web::Query::<HashMap<String, String>>::from_query(
        request.query_string(),
    )
    .map(|query| query.into_inner())
    .map_err(|err| AppError::bad_request(err.to_string()))?;

    let registry = registry.get_ref().clone();
    let data = tokio::task::spawn_blocking(move || {
        let index = registry.catalog.routes_index(&registry)?;
        let routes = index
            .get(&namespace)
            .ok_or(AppError::NotFound)?;

        let request_path = format!("/{tail}");
        let (location, params) = routes
            .routes
            .iter()
            .find_map(|(pattern, entry)| {
                match_route(pattern, &request_path).map(|params| (entry.location.clone(), params))
            })
            .ok_or(AppError::NotFound)?;

        Runtime::new(registry.clone())?.run_route(
            &namespace,
            &location,
            &request_path,
            &params,
            &queries,
        )
    })
    .await
    .map_err(|err| AppError::Script(format!("route task: {err}")))??;

    let feed = normalize::to_json_feed(data)?;
    Ok(HttpResponse::Ok()
        .content_type(FEED_JSON_CONTENT_TYPE)
        .json(feed))
}

/// Matches a catalog route pattern (`/:user/repo`, optionally ending
/// in a catch-all like `/:path{.+}?`) against a request path and
/// extracts the named parameters.
fn match_route(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let mut params = HashMap::new();

    let pattern_segments: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let mut path_index = 0;
    for (segment_index, segment) in pattern_segments.iter().enumerate() {
        if let Some(rest) = segment.strip_prefix(':') {
            // Catch-all tail: `:name{.+}`, `:name{.+}?`, `:name{.*}?`.
            if let Some(brace) = rest.find('{') {
                let suffix = &rest[brace..];
                let supported = matches!(suffix, "{.+}" | "{.+}?" | "{.*}?");
                if !supported || segment_index != pattern_segments.len() - 1 {
                    return None;
                }
                let name = &rest[..brace];
                let optional = suffix.ends_with('?');
                let start = path_index.min(path_segments.len());
                let joined = path_segments[start..].join("/");
                if joined.is_empty() {
                    if !optional {
                        return None;
                    }
                } else {
                    params.insert(name.to_string(), joined);
                }
                return Some(params);
            }
            let value = path_segments.get(path_index).copied().unwrap_or("");
            if value.is_empty() {
                return None;
            }
            params.insert(rest.to_string(), value.to_string());
            path_index += 1;
            continue;
        }

        if path_segments.get(path_index).copied() != Some(*segment) {
            return None;
        }
        path_index += 1;
    }

    if path_index != path_segments.len() {
        return None;
    }
    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_and_param_segments() {
        let params = match_route("/user/:id", "/user/42").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("42"));
        assert!(match_route("/user/:id", "/other/42").is_none());
        assert!(match_route("/user/:id", "/user").is_none());
        assert!(match_route("/user/:id", "/user/42/extra").is_none());
    }

    #[test]
    fn catch_all_tails() {
        let params = match_route("/repo/:path{.+}", "/repo/a/b/c").unwrap();
        assert_eq!(params.get("path").map(String::as_str), Some("a/b/c"));
        assert!(match_route("/repo/:path{.+}", "/repo").is_none());

        let params = match_route("/repo/:path{.*}?", "/repo").unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn bare_pattern_matches_root() {
        let params = match_route("/", "/").unwrap();
        assert!(params.is_empty());
    }
}
