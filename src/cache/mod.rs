mod disabled;
mod memory;
mod redis;

pub use disabled::Disabled;
pub use memory::Memory;
pub use redis::Redis;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;

/// Errors crossing the cache boundary are flattened to strings so a
/// single producer failure can be handed to every waiter of a flight.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend: {0}")]
    Backend(String),
    #[error("{0}")]
    Producer(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// A key-value store with per-entry TTL. Values are opaque bytes;
/// whatever encoding callers use is their business.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// `refresh` extends the entry's TTL on a hit.
    async fn get(&self, key: &str, refresh: bool, ttl: Duration) -> CacheResult<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;
}

type Flight = Arc<OnceCell<CacheResult<Vec<u8>>>>;

/// Cache front-end adding single-flight coalescing on top of any
/// backend: for each key at most one producer runs at a time, and
/// every concurrent caller observes that producer's value or error.
pub struct Cache {
    backend: Box<dyn CacheBackend>,
    flights: Mutex<HashMap<String, Flight>>,
}

impl Cache {
    pub fn new(backend: Box<dyn CacheBackend>) -> Self {
        Cache {
            backend,
            flights: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str, refresh: bool, ttl: Duration) -> CacheResult<Option<Vec<u8>>> {
        self.backend.get(key, refresh, ttl).await
    }

    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        self.backend.set(key, value, ttl).await
    }

    /// Returns the cached value for `key`, or runs `producer` to fill
    /// it. Concurrent callers for the same key share one producer run;
    /// a producer error reaches all of them and is never stored, so
    /// the next call after the flight ends retries.
    pub async fn try_get<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        refresh: bool,
        producer: F,
    ) -> CacheResult<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Vec<u8>>>,
    {
        if let Some(value) = self.backend.get(key, refresh, ttl).await? {
            return Ok(value);
        }

        let flight: Flight = {
            let mut flights = self.flights.lock().unwrap();
            flights.entry(key.to_string()).or_default().clone()
        };

        let result = flight
            .get_or_init(|| async {
                let result = producer().await;
                if let Ok(value) = &result {
                    if let Err(err) = self.backend.set(key, value.clone(), ttl).await {
                        log::warn!("failed to store cache entry {key}: {err}");
                    }
                }
                result
            })
            .await
            .clone();

        // Close the flight: late callers start a fresh producer rather
        // than observing a finished one forever.
        let mut flights = self.flights.lock().unwrap();
        if let Some(current) = flights.get(key) {
            if Arc::ptr_eq(current, &flight) {
                flights.remove(key);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn try_get_runs_one_producer_for_concurrent_callers() {
        let cache = Arc::new(Cache::new(Box::new(Disabled)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..100 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .try_get("k", Duration::from_secs(3600), false, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(b"v".to_vec())
                    })
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), b"v");
        }
        // The disabled backend never stores, so every invocation either
        // joined the single flight or started after it finished. With
        // all tasks racing at once, the flight coalesces them.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn try_get_propagates_errors_without_storing() {
        let cache = Cache::new(Box::new(Memory::new()));
        let result = cache
            .try_get("k", Duration::from_secs(60), false, || async {
                Err(CacheError::Producer("boom".into()))
            })
            .await;
        assert!(matches!(result, Err(CacheError::Producer(_))));

        // The error was not cached: the next producer runs and its
        // value lands in the backend.
        let value = cache
            .try_get("k", Duration::from_secs(60), false, || async {
                Ok(b"ok".to_vec())
            })
            .await
            .unwrap();
        assert_eq!(value, b"ok");
        assert_eq!(
            cache
                .get("k", false, Duration::from_secs(60))
                .await
                .unwrap(),
            Some(b"ok".to_vec())
        );
    }

    #[tokio::test]
    async fn hit_skips_the_producer() {
        let cache = Cache::new(Box::new(Memory::new()));
        cache
            .set("k", b"cached".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let value = cache
            .try_get("k", Duration::from_secs(60), false, || async {
                panic!("producer must not run on a hit")
            })
            .await
            .unwrap();
        assert_eq!(value, b"cached");
    }
}
