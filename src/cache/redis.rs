use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;

use super::{CacheBackend, CacheError, CacheResult};

/// Redis-backed cache for setups that want entries shared across
/// restarts or across instances.
pub struct Redis {
    client: redis::Client,
    manager: OnceCell<ConnectionManager>,
}

impl Redis {
    pub fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|err| CacheError::Backend(err.to_string()))?;
        Ok(Redis {
            client,
            manager: OnceCell::new(),
        })
    }

    /// The manager reconnects on its own; it is built lazily so that
    /// startup does not require redis to be up yet.
    async fn manager(&self) -> CacheResult<ConnectionManager> {
        let manager = self
            .manager
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await
            .map_err(|err| CacheError::Backend(err.to_string()))?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl CacheBackend for Redis {
    async fn get(&self, key: &str, refresh: bool, ttl: Duration) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.manager().await?;
        let value: Option<Vec<u8>> = if refresh {
            redis::cmd("GETEX")
                .arg(key)
                .arg("EX")
                .arg(ttl.as_secs())
                .query_async(&mut conn)
                .await
                .map_err(|err| CacheError::Backend(err.to_string()))?
        } else {
            conn.get(key)
                .await
                .map_err(|err| CacheError::Backend(err.to_string()))?
        };
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.manager().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(|err| CacheError::Backend(err.to_string()))?;
        Ok(())
    }
}
