use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, trace, warn};

use super::{CacheError, CacheResult, ResolutionCache};

/// Redis-backed resolution cache.
///
/// Keys are `key_prefix + short_code`; values are the bare destination URL.
/// The connection is established on first use, so a Redis server that is
/// down at startup only turns lookups into misses until it comes back.
pub struct RedisCache {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    key_prefix: String,
}

/// Reconnect attempts per connect before giving up; the next call tries again
const CONNECT_RETRIES: usize = 1;

fn map_redis_error(operation: &str, err: redis::RedisError) -> CacheError {
    let message = format!("{operation}: {err}");
    let unreachable = err.is_timeout()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_io_error();
    if unreachable {
        CacheError::Unavailable(message)
    } else {
        CacheError::Operation(message)
    }
}

impl RedisCache {
    /// Validate the URL without connecting
    pub fn new(redis_url: &str, key_prefix: impl Into<String>) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Operation(format!("invalid Redis URL: {e}")))?;

        Ok(Self {
            client,
            conn: OnceCell::new(),
            key_prefix: key_prefix.into(),
        })
    }

    pub async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        conn.ping::<()>()
            .await
            .map_err(|e| map_redis_error("Redis PING failed", e))
    }

    /// The shared connection, established on first success
    async fn connection(&self) -> CacheResult<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                info!("Connecting to Redis cache");
                let config = ConnectionManagerConfig::new().set_number_of_retries(CONNECT_RETRIES);
                ConnectionManager::new_with_config(self.client.clone(), config)
                    .await
                    .map_err(|e| map_redis_error("failed to connect to Redis", e))
            })
            .await?;
        Ok(conn.clone())
    }

    fn key(&self, short_code: &str) -> String {
        format!("{}{}", self.key_prefix, short_code)
    }
}

#[async_trait]
impl ResolutionCache for RedisCache {
    async fn get(&self, short_code: &str) -> CacheResult<Option<String>> {
        let key = self.key(short_code);
        let mut conn = self.connection().await?;

        match conn.get::<_, Option<String>>(&key).await {
            Ok(Some(url)) => {
                trace!(short_code = %short_code, "Redis cache hit");
                Ok(Some(url))
            }
            Ok(None) => {
                trace!(short_code = %short_code, "Redis cache miss");
                Ok(None)
            }
            Err(e) => {
                warn!(short_code = %short_code, error = %e, "Redis GET failed");
                Err(map_redis_error("failed to read from Redis", e))
            }
        }
    }

    async fn set(&self, short_code: &str, original_url: &str, ttl: Duration) -> CacheResult<()> {
        let key = self.key(short_code);
        let mut conn = self.connection().await?;
        let seconds = ttl.as_secs().max(1);

        conn.set_ex::<_, _, ()>(&key, original_url, seconds)
            .await
            .map_err(|e| {
                warn!(short_code = %short_code, error = %e, "Redis SET failed");
                map_redis_error("failed to write to Redis", e)
            })?;

        debug!(short_code = %short_code, ttl_secs = seconds, "cached destination in Redis");
        Ok(())
    }

    async fn delete(&self, short_code: &str) -> CacheResult<()> {
        let key = self.key(short_code);
        let mut conn = self.connection().await?;

        conn.del::<_, ()>(&key).await.map_err(|e| {
            warn!(short_code = %short_code, error = %e, "Redis DEL failed");
            map_redis_error("failed to delete from Redis", e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_url_is_rejected_up_front() {
        assert!(matches!(
            RedisCache::new("not-a-redis-url", "snip:"),
            Err(CacheError::Operation(_))
        ));
    }

    #[test]
    fn keys_carry_the_prefix() {
        let cache = RedisCache::new("redis://127.0.0.1:6379", "snip:").unwrap();
        assert_eq!(cache.key("aB3dE9x"), "snip:aB3dE9x");
    }

    #[test]
    fn errors_are_classified_by_kind() {
        let refused = redis::RedisError::from(std::io::Error::from(
            std::io::ErrorKind::ConnectionRefused,
        ));
        assert!(matches!(map_redis_error("get", refused), CacheError::Unavailable(_)));

        let reset = redis::RedisError::from(std::io::Error::from(
            std::io::ErrorKind::ConnectionReset,
        ));
        assert!(matches!(map_redis_error("get", reset), CacheError::Unavailable(_)));

        // The message mentions a connection but nothing is wrong with it
        let parse = redis::RedisError::from((
            redis::ErrorKind::Parse,
            "unexpected reply on connection",
        ));
        assert!(matches!(map_redis_error("get", parse), CacheError::Operation(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable_not_fatal() {
        // Nothing listens on port 1
        let cache = RedisCache::new("redis://127.0.0.1:1", "snip:").unwrap();

        assert!(matches!(cache.get("aB3dE9x").await, Err(CacheError::Unavailable(_))));
        assert!(matches!(
            cache.set("aB3dE9x", "https://example.com", Duration::from_secs(60)).await,
            Err(CacheError::Unavailable(_))
        ));
        assert!(matches!(cache.ping().await, Err(CacheError::Unavailable(_))));
    }
}
