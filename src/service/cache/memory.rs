use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::{types::CacheEntry, CacheBackend};
use cyder_tools::log::debug;

#[derive(Debug, Error)]
#[error("Memory cache error: {0}")]
pub struct MemoryCacheError(String);

type Slot<T> = (Arc<CacheEntry<T>>, Option<Instant>);

pub struct MemoryCacheBackend<T>
where
    T: Send + Sync + 'static,
{
    data: Arc<DashMap<String, Slot<T>>>,
}

impl<T> Clone for MemoryCacheBackend<T>
where
    T: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

impl<T> MemoryCacheBackend<T>
where
    T: Send + Sync + 'static,
{
    /// Must be called inside a tokio runtime; a sweeper task is spawned.
    pub fn new() -> Self {
        let backend = Self {
            data: Arc::new(DashMap::new()),
        };
        backend.spawn_cleanup_task(Duration::from_secs(60));
        backend
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    fn spawn_cleanup_task(&self, every: Duration) {
        // Hold a weak handle so dropping the last backend ends the sweeper.
        let data = Arc::downgrade(&self.data);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(data) = data.upgrade() else { break };
                Self::cleanup_expired(&data);
            }
        });
    }

    fn cleanup_expired(data: &DashMap<String, Slot<T>>) {
        let now = Instant::now();
        let before = data.len();
        data.retain(|_, (_, expiration)| expiration.map_or(true, |exp| now < exp));
        let removed = before.saturating_sub(data.len());
        if removed > 0 {
            debug!("Cleaned up {} expired cache entries", removed);
        }
    }
}

#[async_trait]
impl<T> CacheBackend<T> for MemoryCacheBackend<T>
where
    T: Send + Sync + 'static,
{
    type Error = MemoryCacheError;

    async fn get(&self, key: &str) -> Result<Option<Arc<CacheEntry<T>>>, Self::Error> {
        let Some(slot) = self.data.get(key) else {
            return Ok(None);
        };
        let (value, expiration) = slot.value();
        if expiration.is_some_and(|exp| Instant::now() >= exp) {
            drop(slot);
            self.data.remove(key);
            return Ok(None);
        }
        Ok(Some(value.clone()))
    }

    async fn set(&self, key: &str, value: Arc<CacheEntry<T>>, ttl: Option<Duration>) -> Result<(), Self::Error> {
        let expiration = ttl.map(|d| Instant::now() + d);
        self.data.insert(key.to_string(), (value, expiration));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Self::Error> {
        self.data.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), Self::Error> {
        self.data.clear();
        debug!("In-memory cache cleared.");
        Ok(())
    }
}

impl<T> Default for MemoryCacheBackend<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
