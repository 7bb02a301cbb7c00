//! Integration tests for the Redis resolution cache
//!
//! These run only when REDIS_URL points at a live server, e.g.
//! `REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_cache_integration`

use redis::AsyncCommands;
use snip::cache::{RedisCache, ResolutionCache};
use std::time::Duration;

fn redis_url() -> Option<String> {
    std::env::var("REDIS_URL")
        .ok()
        .filter(|url| url.starts_with("redis"))
}

/// Prefix unique per test so runs against a shared server don't collide
fn unique_prefix(name: &str) -> String {
    format!(
        "snip-test:{}:{}:",
        name,
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

async fn raw_connection(url: &str) -> redis::aio::MultiplexedConnection {
    redis::Client::open(url)
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_missing_key_is_a_miss() {
    let Some(url) = redis_url() else { return };
    let cache = RedisCache::new(&url, unique_prefix("miss")).unwrap();

    assert_eq!(cache.get("aB3dE9x").await.unwrap(), None);
}

#[tokio::test]
async fn test_set_then_get_under_prefixed_key() {
    let Some(url) = redis_url() else { return };
    let prefix = unique_prefix("prefix");
    let cache = RedisCache::new(&url, prefix.clone()).unwrap();

    cache
        .set("aB3dE9x", "https://example.com/page", Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(
        cache.get("aB3dE9x").await.unwrap().as_deref(),
        Some("https://example.com/page")
    );

    let mut raw = raw_connection(&url).await;
    let stored: Option<String> = raw.get(format!("{prefix}aB3dE9x")).await.unwrap();
    assert_eq!(stored.as_deref(), Some("https://example.com/page"));
    let unprefixed: Option<String> = raw.get("aB3dE9x").await.unwrap();
    assert_eq!(unprefixed, None);

    cache.delete("aB3dE9x").await.unwrap();
}

#[tokio::test]
async fn test_set_applies_and_refreshes_ttl() {
    let Some(url) = redis_url() else { return };
    let prefix = unique_prefix("ttl");
    let cache = RedisCache::new(&url, prefix.clone()).unwrap();
    let mut raw = raw_connection(&url).await;
    let key = format!("{prefix}aB3dE9x");

    cache
        .set("aB3dE9x", "https://example.com", Duration::from_secs(30))
        .await
        .unwrap();
    let ttl: i64 = raw.ttl(&key).await.unwrap();
    assert!((1..=30).contains(&ttl), "ttl {ttl}");

    cache
        .set("aB3dE9x", "https://example.com", Duration::from_secs(600))
        .await
        .unwrap();
    let ttl: i64 = raw.ttl(&key).await.unwrap();
    assert!(ttl > 30, "ttl was not refreshed: {ttl}");

    cache.delete("aB3dE9x").await.unwrap();
}

#[tokio::test]
async fn test_entry_expires() {
    let Some(url) = redis_url() else { return };
    let cache = RedisCache::new(&url, unique_prefix("expiry")).unwrap();

    // Sub-second TTLs are rounded up to Redis' one second minimum
    cache
        .set("aB3dE9x", "https://example.com", Duration::from_millis(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2_100)).await;

    assert_eq!(cache.get("aB3dE9x").await.unwrap(), None);
}

#[tokio::test]
async fn test_delete_removes_entry() {
    let Some(url) = redis_url() else { return };
    let cache = RedisCache::new(&url, unique_prefix("delete")).unwrap();

    cache
        .set("aB3dE9x", "https://example.com", Duration::from_secs(60))
        .await
        .unwrap();
    cache.delete("aB3dE9x").await.unwrap();
    assert_eq!(cache.get("aB3dE9x").await.unwrap(), None);

    // Deleting an absent key is not an error
    cache.delete("aB3dE9x").await.unwrap();
}

#[tokio::test]
async fn test_ping() {
    let Some(url) = redis_url() else { return };
    let cache = RedisCache::new(&url, unique_prefix("ping")).unwrap();

    cache.ping().await.unwrap();
}
