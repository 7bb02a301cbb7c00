use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CacheResult, ResolutionCache};

#[derive(Debug, Clone)]
struct CachedUrl {
    url: Arc<str>,
    ttl: Duration,
}

/// Expire each entry after the TTL it was written with
struct WrittenTtl;

impl Expiry<String, CachedUrl> for WrittenTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedUrl,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedUrl,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process resolution cache backed by moka
pub struct MemoryCache {
    entries: Cache<String, CachedUrl>,
}

impl MemoryCache {
    pub fn new(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(WrittenTtl)
            .build();

        Self { entries }
    }
}

#[async_trait]
impl ResolutionCache for MemoryCache {
    async fn get(&self, short_code: &str) -> CacheResult<Option<String>> {
        Ok(self
            .entries
            .get(short_code)
            .await
            .map(|entry| entry.url.to_string()))
    }

    async fn set(&self, short_code: &str, original_url: &str, ttl: Duration) -> CacheResult<()> {
        self.entries
            .insert(
                short_code.to_string(),
                CachedUrl {
                    url: Arc::from(original_url),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, short_code: &str) -> CacheResult<()> {
        self.entries.invalidate(short_code).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_is_a_miss_not_an_error() {
        let cache = MemoryCache::new(100);
        assert_eq!(cache.get("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_then_delete() {
        let cache = MemoryCache::new(100);
        cache
            .set("abc1234", "https://example.com", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get("abc1234").await.unwrap().as_deref(),
            Some("https://example.com")
        );

        cache.delete("abc1234").await.unwrap();
        assert_eq!(cache.get("abc1234").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_expire_after_their_ttl() {
        let cache = MemoryCache::new(100);
        cache
            .set("short", "https://example.com", Duration::from_millis(50))
            .await
            .unwrap();
        cache
            .set("long", "https://example.org", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.get("short").await.unwrap(), None);
        assert!(cache.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn overwrite_replaces_the_destination() {
        let cache = MemoryCache::new(100);
        let ttl = Duration::from_secs(60);
        cache.set("code", "https://one.example", ttl).await.unwrap();
        cache.set("code", "https://two.example", ttl).await.unwrap();
        assert_eq!(
            cache.get("code").await.unwrap().as_deref(),
            Some("https://two.example")
        );
    }
}
