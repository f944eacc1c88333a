use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use clap::Parser;
use diesel_migrations::MigrationHarness;

use feedloom::cache::{self, Cache};
use feedloom::config::Config;
use feedloom::fetch::Fetcher;
use feedloom::models::settings;
use feedloom::refresh::Refresher;
use feedloom::runtime::Registry;
use feedloom::{api, DbPool, MIGRATIONS};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = Config::parse();

    let db_pool = initialize_db_pool(&config.db);
    let mut conn = db_pool.get().expect("failed to get database connection");
    conn.run_pending_migrations(MIGRATIONS)
        .expect("failed to run migrations");
    drop(conn);

    let cache = Arc::new(build_cache(&config));
    let fetcher = Arc::new(Fetcher::new());
    let registry = Arc::new(Registry::new(
        cache.clone(),
        fetcher.clone(),
        tokio::runtime::Handle::current(),
        config.routes.clone(),
        config.src.clone(),
    ));

    let refresher = Refresher::start(db_pool.clone(), fetcher.clone(), registry.clone());

    // Re-arm the scheduler from the persisted refresh rate, the same
    // way a restart of the original picks up where it left off.
    if let Ok(mut conn) = db_pool.get() {
        match settings::get_i64(&mut conn, settings::REFRESH_RATE) {
            Ok(rate) => {
                refresher.set_refresh_rate(rate).await;
                if rate > 0 {
                    refresher.refresh_all().await;
                }
            }
            Err(err) => log::warn!("failed to read refresh rate: {err}"),
        }
    }

    log::info!("server started on http://{}", config.addr);
    let addr = config.addr.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::Data::new(cache.clone()))
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(refresher.clone()))
            .wrap(middleware::Compress::default())
            .wrap(middleware::Logger::default())
            .configure(api::configure)
    })
    .bind(addr)?
    .run()
    .await
}

fn initialize_db_pool(path: &str) -> DbPool {
    feedloom::build_pool(path, 16).expect("failed to create database pool")
}

fn build_cache(config: &Config) -> Cache {
    if config.no_cache {
        Cache::new(Box::new(cache::Disabled))
    } else if config.redis.is_empty() {
        Cache::new(Box::new(cache::Memory::new()))
    } else {
        let backend =
            cache::Redis::connect(&config.redis).expect("failed to connect to redis");
        Cache::new(Box::new(backend))
    }
}
