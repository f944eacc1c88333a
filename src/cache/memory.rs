use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;

use super::{CacheBackend, CacheResult};

const MAX_ENTRIES: usize = 256;

/// Bounded in-memory LRU backend, the default when no redis URL is
/// configured.
pub struct Memory {
    entries: Mutex<LruCache<String, (Vec<u8>, Instant)>>,
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            entries: Mutex::new(LruCache::new(NonZeroUsize::new(MAX_ENTRIES).unwrap())),
        }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for Memory {
    async fn get(&self, key: &str, refresh: bool, ttl: Duration) -> CacheResult<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        let expired = match entries.get_mut(key) {
            Some((value, expires_at)) => {
                if *expires_at > now {
                    if refresh {
                        *expires_at = now + ttl;
                    }
                    return Ok(Some(value.clone()));
                }
                true
            }
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.put(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_entries_miss() {
        let memory = Memory::new();
        memory
            .set("k", b"v".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            memory.get("k", false, Duration::from_secs(1)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn refresh_extends_the_deadline() {
        let memory = Memory::new();
        memory
            .set("k", b"v".to_vec(), Duration::from_millis(40))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        memory
            .get("k", true, Duration::from_millis(40))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(memory
            .get("k", false, Duration::from_secs(1))
            .await
            .unwrap()
            .is_some());
    }
}
