//! Integration tests for the Redis cache backend.
//!
//! Tests use testcontainers to spin up a real Redis instance.
//!
//! Run with: cargo test -p meteo-cache-server --test redis_cache -- --ignored

use std::time::Duration;

use meteo_cache_core::CacheStore;
use meteo_cache_server::{CacheBackendKind, CacheConfig, RedisConfig, create_cache_backend};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, u16)> = OnceCell::const_new();

/// Get or create the shared Redis container, returning its host port
async fn get_redis_port() -> u16 {
    let (_, port) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            (container, host_port)
        })
        .await;

    *port
}

fn redis_cache_config() -> CacheConfig {
    CacheConfig {
        backend: CacheBackendKind::Redis,
        ..Default::default()
    }
}

async fn redis_config() -> RedisConfig {
    RedisConfig {
        host: "127.0.0.1".into(),
        port: get_redis_port().await,
        pool_size: 4,
        timeout_ms: 5000,
        connect_retries: 3,
        ..Default::default()
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_connect_and_ping() {
    let cache = create_cache_backend(&redis_cache_config(), &redis_config().await)
        .await
        .expect("connect to redis");

    assert_eq!(cache.mode(), "redis");
    assert!(cache.ping().await.is_ok());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_get_set() {
    let cache = create_cache_backend(&redis_cache_config(), &redis_config().await)
        .await
        .expect("connect to redis");

    cache
        .set_with_expiry("redis_test_key", "redis_test_value".into(), Duration::from_secs(60))
        .await
        .expect("set");

    let value = cache.get("redis_test_key").await.expect("get");
    assert_eq!(value.as_deref(), Some("redis_test_value"));
    assert_eq!(cache.get("redis_absent_key").await.expect("get"), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_entries_expire() {
    let cache = create_cache_backend(&redis_cache_config(), &redis_config().await)
        .await
        .expect("connect to redis");

    cache
        .set_with_expiry("redis_expiring", "v".into(), Duration::from_secs(1))
        .await
        .expect("set");
    assert!(cache.get("redis_expiring").await.expect("get").is_some());

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(cache.get("redis_expiring").await.expect("get").is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_entries_are_shared_between_instances() {
    let config = redis_config().await;
    let first = create_cache_backend(&redis_cache_config(), &config)
        .await
        .expect("connect to redis");
    let second = create_cache_backend(&redis_cache_config(), &config)
        .await
        .expect("connect to redis");

    first
        .set_with_expiry("shared_key", "shared_value".into(), Duration::from_secs(60))
        .await
        .expect("set");

    assert_eq!(
        second.get("shared_key").await.expect("get").as_deref(),
        Some("shared_value")
    );
}

#[tokio::test]
async fn test_unreachable_redis_fails_startup() {
    let config = RedisConfig {
        host: "127.0.0.1".into(),
        port: 1,
        pool_size: 2,
        timeout_ms: 200,
        connect_retries: 2,
        ..Default::default()
    };

    let result = create_cache_backend(&redis_cache_config(), &config).await;
    let err = result.err().expect("startup must fail");
    assert!(err.to_string().contains("after 2 attempts"));
}

#[tokio::test]
async fn test_memory_backend_needs_no_redis() {
    let cache = create_cache_backend(
        &CacheConfig {
            backend: CacheBackendKind::Memory,
            ..Default::default()
        },
        &RedisConfig::default(),
    )
    .await
    .expect("memory backend");

    assert_eq!(cache.mode(), "memory");
    assert!(cache.ping().await.is_ok());
}
