use std::sync::Arc;

use diesel_migrations::MigrationHarness;
use tempfile::TempDir;

use feedloom::cache::{Cache, Memory};
use feedloom::fetch::Fetcher;
use feedloom::runtime::Registry;
use feedloom::{DbPool, MIGRATIONS};

/// A migrated SQLite database in a temp dir; the dir handle keeps the
/// file alive for the duration of the test.
pub fn test_pool() -> (TempDir, DbPool) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("feedloom-test.db");
    let pool = feedloom::build_pool(path.to_str().unwrap(), 4).expect("pool");
    pool.get()
        .unwrap()
        .run_pending_migrations(MIGRATIONS)
        .expect("migrations");
    (dir, pool)
}

pub fn test_registry() -> Arc<Registry> {
    Arc::new(Registry::new(
        Arc::new(Cache::new(Box::new(Memory::new()))),
        Arc::new(Fetcher::new()),
        tokio::runtime::Handle::current(),
        String::new(),
        String::new(),
    ))
}
