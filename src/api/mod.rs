pub mod feeds;
pub mod folders;
pub mod items;
pub mod opml;
pub mod routes;
pub mod settings;
pub mod status;
pub mod transform;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            // A path variable that fails to parse is a client error,
            // not a missing resource.
            .app_data(web::PathConfig::default().error_handler(|err, _| {
                actix_web::error::ErrorBadRequest(err.to_string())
            }))
            .service(status::status)
            .service(folders::scope())
            .service(feeds::scope())
            .service(items::scope())
            .service(settings::scope())
            .service(opml::scope())
            .service(transform::transform)
            .service(routes::route_feed),
    );
}

pub const FEED_JSON_CONTENT_TYPE: &str = "application/feed+json; charset=utf-8";
