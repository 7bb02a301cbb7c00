//! The redirect decision and the owner-facing link operations.
//!
//! Resolution is cache-aside: the cache is consulted first and any cache
//! failure is a miss. The store is authoritative and every call to it is
//! bounded by a timeout. A successful resolve hands the click to the
//! aggregator without waiting for it.
//!
//! A cache fill races with deletes: the link may be read just before an
//! owner deletes it and written to the cache just after the delete cleared
//! it. Every delete bumps a deletion epoch between the store delete and the
//! cache delete. A fill compares the epoch it read before its store lookup
//! with the current one, once before writing (skip) and once after (evict).

use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::analytics::{ClickAggregator, ClickEvent};
use crate::cache::ResolutionCache;
use crate::codegen::CodeGenerator;
use crate::config::{CacheConfig, Config};
use crate::models::{Feedback, Link};
use crate::storage::{Storage, StorageError};

/// Minimum time between two feedback submissions from the same owner
pub const FEEDBACK_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const MAX_CODE_LENGTH: usize = 64;
const MAX_URL_LENGTH: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("short code not found")]
    NotFound,
    #[error("link belongs to another owner")]
    Unauthorized,
    #[error("could not allocate a unique short code")]
    DuplicateCode,
    #[error("backing store unavailable")]
    BackingStoreUnavailable,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("feedback message is empty")]
    EmptyFeedback,
    #[error("feedback already submitted recently, retry in {retry_after:?}")]
    FeedbackTooSoon { retry_after: Duration },
}

/// Who followed a redirect
#[derive(Debug, Clone, Default)]
pub struct Visitor {
    pub ip: Option<IpAddr>,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub cache_ttl: Duration,
    pub cache_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        let cache = CacheConfig::default();
        Self {
            cache_ttl: cache.ttl(),
            cache_timeout: cache.timeout(),
            store_timeout: Duration::from_secs(2),
        }
    }
}

impl ResolverOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache_ttl: config.cache.ttl(),
            cache_timeout: config.cache.timeout(),
            store_timeout: config.store_timeout(),
        }
    }
}

pub struct RedirectResolver {
    storage: Arc<dyn Storage>,
    cache: Arc<dyn ResolutionCache>,
    generator: CodeGenerator,
    aggregator: Option<Arc<ClickAggregator>>,
    options: ResolverOptions,
    deletions: Arc<AtomicU64>,
}

impl RedirectResolver {
    pub fn new(
        storage: Arc<dyn Storage>,
        cache: Arc<dyn ResolutionCache>,
        generator: CodeGenerator,
        aggregator: Option<Arc<ClickAggregator>>,
        options: ResolverOptions,
    ) -> Self {
        Self {
            storage,
            cache,
            generator,
            aggregator,
            options,
            deletions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Resolve a short code to its destination and record the visit
    pub async fn resolve(&self, short_code: &str, visitor: Visitor) -> Result<String, ResolveError> {
        if !is_plausible_code(short_code) {
            return Err(ResolveError::NotFound);
        }

        let url = match self.cached(short_code).await {
            Some(url) => url,
            None => {
                let epoch = self.deletions.load(Ordering::SeqCst);
                let link = self
                    .with_store_timeout("find_by_code", self.storage.find_by_code(short_code))
                    .await?
                    .ok_or(ResolveError::NotFound)?;
                self.populate_cache(short_code, &link.original_url, epoch);
                link.original_url
            }
        };

        if let Some(aggregator) = &self.aggregator {
            aggregator.dispatch(ClickEvent::new(short_code, visitor.ip, visitor.user_agent));
        }

        Ok(url)
    }

    async fn cached(&self, short_code: &str) -> Option<String> {
        match tokio::time::timeout(self.options.cache_timeout, self.cache.get(short_code)).await {
            Ok(Ok(Some(url))) => {
                trace!(short_code = %short_code, "resolution cache hit");
                Some(url)
            }
            Ok(Ok(None)) => {
                trace!(short_code = %short_code, "resolution cache miss");
                None
            }
            Ok(Err(e)) => {
                warn!(short_code = %short_code, error = %e, "cache read failed, treating as miss");
                None
            }
            Err(_) => {
                warn!(
                    short_code = %short_code,
                    timeout_ms = self.options.cache_timeout.as_millis() as u64,
                    "cache read timed out, treating as miss"
                );
                None
            }
        }
    }

    /// Repopulate the cache in the background; failures only cost a future miss.
    ///
    /// `epoch` is the deletion epoch observed before the store lookup.
    fn populate_cache(&self, short_code: &str, original_url: &str, epoch: u64) {
        let cache = Arc::clone(&self.cache);
        let deletions = Arc::clone(&self.deletions);
        let short_code = short_code.to_string();
        let original_url = original_url.to_string();
        let ttl = self.options.cache_ttl;
        let timeout = self.options.cache_timeout;

        tokio::spawn(async move {
            if deletions.load(Ordering::SeqCst) != epoch {
                debug!(short_code = %short_code, "link deleted during lookup, skipping cache fill");
                return;
            }

            match tokio::time::timeout(timeout, cache.set(&short_code, &original_url, ttl)).await {
                Ok(Ok(())) => debug!(short_code = %short_code, "resolution cache populated"),
                Ok(Err(e)) => {
                    warn!(short_code = %short_code, error = %e, "failed to populate cache");
                    return;
                }
                Err(_) => {
                    warn!(short_code = %short_code, "cache population timed out");
                    return;
                }
            }

            // A delete that finished clearing the cache before our write landed
            if deletions.load(Ordering::SeqCst) != epoch {
                debug!(short_code = %short_code, "link deleted during cache fill, evicting");
                match tokio::time::timeout(timeout, cache.delete(&short_code)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(short_code = %short_code, error = %e, "failed to evict racing cache fill"),
                    Err(_) => warn!(short_code = %short_code, "evicting racing cache fill timed out"),
                }
            }
        });
    }

    async fn with_store_timeout<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ResolveError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.options.store_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(operation, error = %e, "link store operation failed");
                Err(ResolveError::BackingStoreUnavailable)
            }
            Err(_) => {
                error!(
                    operation,
                    timeout_ms = self.options.store_timeout.as_millis() as u64,
                    "link store operation timed out"
                );
                Err(ResolveError::BackingStoreUnavailable)
            }
        }
    }

    /// Create a new short link for `owner_id`
    pub async fn shorten(&self, owner_id: i64, original_url: &str) -> Result<Link, ResolveError> {
        let original_url = validate_url(original_url)?;

        for attempt in 1..=2 {
            let short_code = match tokio::time::timeout(self.options.store_timeout, self.generator.next()).await {
                Ok(Ok(code)) => code,
                Ok(Err(e)) => {
                    error!(owner_id, error = %e, "code generation failed");
                    return Err(ResolveError::BackingStoreUnavailable);
                }
                Err(_) => {
                    error!(owner_id, "code generation timed out");
                    return Err(ResolveError::BackingStoreUnavailable);
                }
            };

            let link = Link::new(
                short_code,
                owner_id,
                original_url.clone(),
                chrono::Utc::now().timestamp_millis(),
            );

            match tokio::time::timeout(self.options.store_timeout, self.storage.create(&link)).await {
                Ok(Ok(created)) => {
                    info!(owner_id, short_code = %created.short_code, "created short link");
                    return Ok(created);
                }
                Ok(Err(StorageError::Conflict)) => {
                    warn!(owner_id, short_code = %link.short_code, attempt, "short code already taken");
                }
                Ok(Err(StorageError::Other(e))) => {
                    error!(owner_id, error = %e, "failed to persist link");
                    return Err(ResolveError::BackingStoreUnavailable);
                }
                Err(_) => {
                    error!(owner_id, "persisting link timed out");
                    return Err(ResolveError::BackingStoreUnavailable);
                }
            }
        }

        Err(ResolveError::DuplicateCode)
    }

    pub async fn links_for_owner(&self, owner_id: i64) -> Result<Vec<Link>, ResolveError> {
        self.with_store_timeout("find_by_owner", self.storage.find_by_owner(owner_id))
            .await
    }

    /// Click statistics for a link, visible to its owner only
    pub async fn stats(&self, short_code: &str, owner_id: i64) -> Result<Link, ResolveError> {
        let link = self
            .with_store_timeout("find_by_code", self.storage.find_by_code(short_code))
            .await?
            .ok_or(ResolveError::NotFound)?;

        if link.owner_id != owner_id {
            return Err(ResolveError::Unauthorized);
        }
        Ok(link)
    }

    /// Delete an owned link; `false` when nothing owned by `owner_id` matched
    pub async fn delete(&self, short_code: &str, owner_id: i64) -> Result<bool, ResolveError> {
        let deleted = self
            .with_store_timeout(
                "delete_by_code_and_owner",
                self.storage.delete_by_code_and_owner(short_code, owner_id),
            )
            .await?;

        if !deleted {
            debug!(owner_id, short_code = %short_code, "nothing to delete");
            return Ok(false);
        }

        // Must land after the store delete and before the cache delete
        self.deletions.fetch_add(1, Ordering::SeqCst);

        match tokio::time::timeout(self.options.cache_timeout, self.cache.delete(short_code)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(short_code = %short_code, error = %e, "failed to invalidate cache entry"),
            Err(_) => warn!(short_code = %short_code, "cache invalidation timed out"),
        }

        info!(owner_id, short_code = %short_code, "deleted short link");
        Ok(true)
    }

    pub async fn submit_feedback(&self, owner_id: i64, message: &str) -> Result<Feedback, ResolveError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ResolveError::EmptyFeedback);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let interval_ms = FEEDBACK_INTERVAL.as_millis() as i64;

        let latest = self
            .with_store_timeout("latest_feedback_at", self.storage.latest_feedback_at(owner_id))
            .await?;
        if let Some(latest) = latest {
            let elapsed = now.saturating_sub(latest);
            if elapsed < interval_ms {
                let remaining = (interval_ms - elapsed).max(0) as u64;
                return Err(ResolveError::FeedbackTooSoon {
                    retry_after: Duration::from_millis(remaining),
                });
            }
        }

        let feedback = Feedback {
            owner_id,
            message: message.to_string(),
            created_at: now,
        };
        self.with_store_timeout("insert_feedback", self.storage.insert_feedback(&feedback))
            .await?;

        info!(owner_id, "feedback received");
        Ok(feedback)
    }
}

/// Reject requests that cannot name a stored code before touching any backend
fn is_plausible_code(short_code: &str) -> bool {
    !short_code.is_empty()
        && short_code.len() <= MAX_CODE_LENGTH
        && short_code.chars().all(|c| c.is_ascii_alphanumeric())
}

fn validate_url(raw: &str) -> Result<String, ResolveError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ResolveError::InvalidUrl("URL is empty".to_string()));
    }
    if trimmed.len() > MAX_URL_LENGTH {
        return Err(ResolveError::InvalidUrl(format!(
            "URL is longer than {MAX_URL_LENGTH} characters"
        )));
    }

    let parsed = reqwest::Url::parse(trimmed)
        .map_err(|e| ResolveError::InvalidUrl(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ResolveError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ResolveError::InvalidUrl("URL has no host".to_string()));
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_must_be_http_with_a_host() {
        assert!(validate_url("https://example.com/page").is_ok());
        assert_eq!(
            validate_url("  http://example.com  ").unwrap(),
            "http://example.com"
        );
        assert!(matches!(validate_url(""), Err(ResolveError::InvalidUrl(_))));
        assert!(matches!(validate_url("   "), Err(ResolveError::InvalidUrl(_))));
        assert!(matches!(validate_url("ftp://example.com"), Err(ResolveError::InvalidUrl(_))));
        assert!(matches!(validate_url("javascript:alert(1)"), Err(ResolveError::InvalidUrl(_))));
        assert!(matches!(validate_url("not a url"), Err(ResolveError::InvalidUrl(_))));
    }

    #[test]
    fn implausible_codes_are_rejected_early() {
        assert!(is_plausible_code("aB3dE9x"));
        assert!(!is_plausible_code(""));
        assert!(!is_plausible_code("has space"));
        assert!(!is_plausible_code("../etc"));
        assert!(!is_plausible_code(&"a".repeat(65)));
    }
}
