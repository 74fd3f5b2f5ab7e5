//! Cache store implementations: Redis (shared) and an in-process map.

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use meteo_cache_core::{CacheError, CacheStore};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// A value held by the in-memory backend, with its own expiry.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub value: String,
    pub expires_at: Instant,
}

impl CachedEntry {
    pub fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Backing store for the proxy cache.
///
/// - **Redis**: shared across proxy instances; expiry enforced by Redis (`SET .. EX`)
/// - **Memory**: single process only; expired entries are dropped on read and by
///   the sweeper
///
/// Errors are returned, not swallowed: the proxy decides how to degrade.
#[derive(Clone)]
pub enum CacheBackend {
    Redis(Pool),
    Memory(Arc<DashMap<String, CachedEntry>>),
}

impl CacheBackend {
    pub fn new_redis(pool: Pool) -> Self {
        CacheBackend::Redis(pool)
    }

    pub fn new_memory() -> Self {
        CacheBackend::Memory(Arc::new(DashMap::new()))
    }

    pub fn mode(&self) -> &'static str {
        match self {
            CacheBackend::Redis(_) => "redis",
            CacheBackend::Memory(_) => "memory",
        }
    }

    /// Number of live entries held in process (always 0 for Redis).
    pub fn local_entries(&self) -> usize {
        match self {
            CacheBackend::Redis(_) => 0,
            CacheBackend::Memory(map) => map.iter().filter(|e| !e.is_expired()).count(),
        }
    }

    /// Drop expired in-memory entries. No-op for Redis.
    pub fn purge_expired(&self) -> usize {
        match self {
            CacheBackend::Redis(_) => 0,
            CacheBackend::Memory(map) => {
                let before = map.len();
                map.retain(|_, entry| !entry.is_expired());
                before.saturating_sub(map.len())
            }
        }
    }

    /// Periodically purge the in-memory backend. Returns `None` for Redis.
    pub fn spawn_sweeper(&self, every: Duration) -> Option<JoinHandle<()>> {
        let CacheBackend::Memory(_) = self else {
            return None;
        };
        let backend = self.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let purged = backend.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "expired cache entries purged");
                }
            }
        }))
    }

    /// Release connections. Called once the server has stopped accepting requests.
    pub fn close(&self) {
        match self {
            CacheBackend::Redis(pool) => {
                pool.close();
                tracing::info!("Redis pool closed");
            }
            CacheBackend::Memory(map) => map.clear(),
        }
    }

    async fn redis_conn(pool: &Pool) -> Result<deadpool_redis::Connection, CacheError> {
        pool.get()
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))
    }
}

/// Remove `key` only if the entry is still expired under the shard lock, so
/// a write that landed after the read is kept.
fn evict_if_expired(map: &DashMap<String, CachedEntry>, key: &str) {
    map.remove_if(key, |_, entry| entry.is_expired());
}

#[async_trait]
impl CacheStore for CacheBackend {
    fn name(&self) -> &'static str {
        self.mode()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self {
            CacheBackend::Redis(pool) => {
                let mut conn = Self::redis_conn(pool).await?;
                conn.get::<_, Option<String>>(key)
                    .await
                    .map_err(|e| CacheError::command(e.to_string()))
            }
            CacheBackend::Memory(map) => {
                match map.get(key) {
                    Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                    Some(_) => {}
                    None => return Ok(None),
                }
                evict_if_expired(map, key);
                Ok(None)
            }
        }
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        match self {
            CacheBackend::Redis(pool) => {
                let mut conn = Self::redis_conn(pool).await?;
                // EX 0 is rejected by Redis
                let ttl_secs = ttl.as_secs().max(1);
                conn.set_ex::<_, _, ()>(key, value, ttl_secs)
                    .await
                    .map_err(|e| CacheError::command(e.to_string()))
            }
            CacheBackend::Memory(map) => {
                map.insert(key.to_string(), CachedEntry::new(value, ttl));
                Ok(())
            }
        }
    }

    async fn ping(&self) -> Result<(), CacheError> {
        match self {
            CacheBackend::Redis(pool) => {
                let mut conn = Self::redis_conn(pool).await?;
                let _pong: String = redis::cmd("PING")
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| CacheError::command(e.to_string()))?;
                Ok(())
            }
            CacheBackend::Memory(_) => Ok(()),
        }
    }
}
