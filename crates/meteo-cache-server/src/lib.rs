pub mod cache;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod upstream;

pub use cache::{CacheBackend, CachedEntry};
pub use config::{
    AppConfig, CacheBackendKind, CacheConfig, LoggingConfig, MetricsConfig, RedisConfig,
    ServerConfig, UpstreamConfig,
};
pub use observability::{apply_logging_level, init_tracing};
pub use server::{AppState, MeteoCacheServer, ServerBuilder, build_app};
pub use upstream::HttpUpstream;

use meteo_cache_core::{CacheError, CacheStore};
use std::time::Duration;

/// Create and connect the configured cache backend.
///
/// ## Failure policy
///
/// Unlike per-request cache errors, which degrade to the upstream, a Redis
/// that cannot be reached at startup is an error: it points at
/// misconfiguration. The ping is retried `connect_retries` times with a
/// linear backoff (`attempt * 100ms`) before giving up.
pub async fn create_cache_backend(
    cache: &CacheConfig,
    config: &RedisConfig,
) -> Result<CacheBackend, CacheError> {
    if cache.backend == CacheBackendKind::Memory {
        tracing::info!("Using in-memory cache (single instance only)");
        return Ok(CacheBackend::new_memory());
    }

    let url = config.connection_url();
    tracing::info!(url = %url, "Connecting to Redis");

    let timeout = Duration::from_millis(config.timeout_ms);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let mut redis_config = deadpool_redis::Config::from_url(url.clone());
    redis_config.pool = Some(pool_config);

    let pool = redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| CacheError::unavailable(format!("failed to create Redis pool: {e}")))?;
    let backend = CacheBackend::new_redis(pool);

    let attempts = config.connect_retries.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match backend.ping().await {
            Ok(()) => {
                tracing::info!(attempt, "✓ Connected to Redis successfully");
                return Ok(backend);
            }
            Err(e) => {
                tracing::warn!(attempt, max_attempts = attempts, error = %e, "Redis not reachable");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_millis(u64::from(attempt) * 100)).await;
                }
            }
        }
    }

    backend.close();
    Err(CacheError::unavailable(format!(
        "could not reach Redis at {url} after {attempts} attempts: {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}
