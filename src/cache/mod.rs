//! Cache-aside store for short code → destination URL lookups.
//!
//! The cache is a read accelerator only. A missing or expired key is
//! `Ok(None)`; errors are reserved for backend failures, and callers are
//! expected to treat them like a miss.

pub mod memory;
pub mod redis;

pub use memory::MemoryCache;
pub use self::redis::RedisCache;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{CacheBackend, CacheConfig};

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("cache operation failed: {0}")]
    Operation(String),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[async_trait]
pub trait ResolutionCache: Send + Sync {
    async fn get(&self, short_code: &str) -> CacheResult<Option<String>>;

    /// Store or refresh an entry; the TTL restarts on every call
    async fn set(&self, short_code: &str, original_url: &str, ttl: Duration) -> CacheResult<()>;

    async fn delete(&self, short_code: &str) -> CacheResult<()>;
}

/// Build the cache backend selected by configuration
pub async fn build_cache(config: &CacheConfig) -> anyhow::Result<Arc<dyn ResolutionCache>> {
    match config.backend {
        CacheBackend::Memory => {
            tracing::info!(max_entries = config.max_entries, "Using in-process resolution cache");
            Ok(Arc::new(MemoryCache::new(config.max_entries)))
        }
        CacheBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("REDIS_URL must be set when CACHE_BACKEND=redis"))?;
            tracing::info!("Using Redis resolution cache");
            let cache = RedisCache::new(url, config.key_prefix.clone())?;
            // Redis is an accelerator; start anyway and serve from the store
            if let Err(e) = cache.ping().await {
                tracing::warn!(
                    error = %e,
                    "Redis is unreachable at startup, lookups go to the store until it recovers"
                );
            }
            Ok(Arc::new(cache))
        }
    }
}
