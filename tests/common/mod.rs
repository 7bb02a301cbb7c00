//! Shared fixtures for integration tests
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use snip::analytics::{ClickAggregator, ClickEnricher, GeoError, GeoLocation, GeoLocator};
use snip::cache::{CacheError, CacheResult, MemoryCache, ResolutionCache};
use snip::codegen::CodeGenerator;
use snip::config::{AnalyticsConfig, CodeConfig};
use snip::models::{ClickMetadata, Feedback, Link};
use snip::resolver::{RedirectResolver, ResolverOptions};
use snip::storage::{SqliteStorage, Storage, StorageError, StorageResult};

pub async fn sqlite_storage() -> Arc<SqliteStorage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

/// Storage wrapper that counts lookups and can be told to misbehave
pub struct InstrumentedStorage {
    inner: Arc<dyn Storage>,
    pub find_by_code_calls: AtomicUsize,
    pub failing: AtomicBool,
    pub conflicts_remaining: AtomicUsize,
    /// Milliseconds `find_by_code` sleeps after reading, before returning
    pub lookup_stall_ms: AtomicU64,
}

impl InstrumentedStorage {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            find_by_code_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            conflicts_remaining: AtomicUsize::new(0),
            lookup_stall_ms: AtomicU64::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.find_by_code_calls.load(Ordering::SeqCst)
    }

    pub fn stall_lookups(&self, stall: Duration) {
        self.lookup_stall_ms
            .store(stall.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(anyhow!("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Storage for InstrumentedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn next_sequence(&self, name: &str) -> Result<u64> {
        self.check()?;
        self.inner.next_sequence(name).await
    }

    async fn create(&self, link: &Link) -> StorageResult<Link> {
        self.check()?;
        let forced_conflict = self
            .conflicts_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced_conflict {
            return Err(StorageError::Conflict);
        }
        self.inner.create(link).await
    }

    async fn find_by_code(&self, short_code: &str) -> Result<Option<Link>> {
        self.find_by_code_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let found = self.inner.find_by_code(short_code).await;
        let stall = self.lookup_stall_ms.load(Ordering::SeqCst);
        if stall > 0 {
            tokio::time::sleep(Duration::from_millis(stall)).await;
        }
        found
    }

    async fn find_by_owner(&self, owner_id: i64) -> Result<Vec<Link>> {
        self.check()?;
        self.inner.find_by_owner(owner_id).await
    }

    async fn delete_by_code_and_owner(&self, short_code: &str, owner_id: i64) -> Result<bool> {
        self.check()?;
        self.inner.delete_by_code_and_owner(short_code, owner_id).await
    }

    async fn record_click(&self, short_code: &str, metadata: &ClickMetadata) -> Result<bool> {
        self.check()?;
        self.inner.record_click(short_code, metadata).await
    }

    async fn latest_feedback_at(&self, owner_id: i64) -> Result<Option<i64>> {
        self.check()?;
        self.inner.latest_feedback_at(owner_id).await
    }

    async fn insert_feedback(&self, feedback: &Feedback) -> Result<()> {
        self.check()?;
        self.inner.insert_feedback(feedback).await
    }
}

/// Cache whose backend is always down
pub struct UnreachableCache;

#[async_trait]
impl ResolutionCache for UnreachableCache {
    async fn get(&self, _short_code: &str) -> CacheResult<Option<String>> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn set(&self, _short_code: &str, _url: &str, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn delete(&self, _short_code: &str) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

/// Fixed IP → country table
pub struct FakeGeoLocator {
    countries: HashMap<IpAddr, (&'static str, &'static str)>,
}

impl FakeGeoLocator {
    pub fn new(entries: &[(&str, &'static str, &'static str)]) -> Self {
        Self {
            countries: entries
                .iter()
                .map(|(ip, country, city)| (ip.parse().unwrap(), (*country, *city)))
                .collect(),
        }
    }
}

#[async_trait]
impl GeoLocator for FakeGeoLocator {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoError> {
        let (country, city) = self.countries.get(&ip).ok_or(GeoError::NotFound(ip))?;
        Ok(GeoLocation {
            country: Some(country.to_string()),
            city: Some(city.to_string()),
            ..Default::default()
        })
    }
}

/// Delays lookups for one address, e.g. a geolocation backend stuck on it
pub struct SlowGeoLocator {
    inner: Arc<dyn GeoLocator>,
    slow_ip: IpAddr,
    delay: Duration,
}

impl SlowGeoLocator {
    pub fn new(inner: Arc<dyn GeoLocator>, slow_ip: &str, delay: Duration) -> Self {
        Self {
            inner,
            slow_ip: slow_ip.parse().unwrap(),
            delay,
        }
    }
}

#[async_trait]
impl GeoLocator for SlowGeoLocator {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoError> {
        if ip == self.slow_ip {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.lookup(ip).await
    }
}

pub const INDIA_IP: &str = "49.36.10.1";
pub const USA_IP: &str = "8.8.8.8";

pub fn world_locator() -> Arc<FakeGeoLocator> {
    Arc::new(FakeGeoLocator::new(&[
        (INDIA_IP, "India", "Mumbai"),
        (USA_IP, "USA", "Mountain View"),
    ]))
}

/// Aggregator with the default queue and concurrency
pub fn aggregator(storage: Arc<dyn Storage>, geo: Arc<dyn GeoLocator>) -> Arc<ClickAggregator> {
    let enricher = ClickEnricher::new(
        storage,
        geo,
        Duration::from_millis(500),
        Duration::from_secs(2),
    );
    Arc::new(ClickAggregator::start(enricher, &AnalyticsConfig::default()))
}

pub struct Harness {
    pub storage: Arc<InstrumentedStorage>,
    pub cache: Arc<dyn ResolutionCache>,
    pub aggregator: Option<Arc<ClickAggregator>>,
    pub resolver: Arc<RedirectResolver>,
}

pub struct HarnessBuilder {
    cache: Option<Arc<dyn ResolutionCache>>,
    geo: Option<Arc<dyn GeoLocator>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            cache: None,
            geo: None,
        }
    }

    pub fn cache(mut self, cache: Arc<dyn ResolutionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn analytics(mut self, geo: Arc<dyn GeoLocator>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub async fn build(self) -> Harness {
        let inner: Arc<dyn Storage> = sqlite_storage().await;
        let storage = Arc::new(InstrumentedStorage::new(inner));
        let dyn_storage: Arc<dyn Storage> = storage.clone();

        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCache::new(1_000)));
        let generator = CodeGenerator::new(dyn_storage.clone(), &CodeConfig::default()).unwrap();
        let aggregator = self
            .geo
            .map(|geo| aggregator(dyn_storage.clone(), geo));

        let resolver = Arc::new(RedirectResolver::new(
            dyn_storage,
            cache.clone(),
            generator,
            aggregator.clone(),
            ResolverOptions::default(),
        ));

        Harness {
            storage,
            cache,
            aggregator,
            resolver,
        }
    }
}

/// Wait for the background cache fill after a miss
pub async fn wait_for_cache(cache: &dyn ResolutionCache, short_code: &str) {
    for _ in 0..100 {
        if let Ok(Some(_)) = cache.get(short_code).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cache was never populated for {short_code}");
}
