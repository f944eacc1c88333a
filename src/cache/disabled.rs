use std::time::Duration;

use async_trait::async_trait;

use super::{CacheBackend, CacheResult};

/// No-op backend for `--no-cache`: every lookup misses and nothing is
/// ever stored.
pub struct Disabled;

#[async_trait]
impl CacheBackend for Disabled {
    async fn get(&self, _key: &str, _refresh: bool, _ttl: Duration) -> CacheResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }
}
