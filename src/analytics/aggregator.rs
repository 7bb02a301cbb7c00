//! Asynchronous click aggregation off the redirect hot path.
//!
//! The redirect handler only performs a non-blocking `try_send` into a bounded
//! queue. A single dispatcher task owns the receiving end and fans events out
//! to enrichment tasks, at most `max_in_flight` at a time. When the queue is
//! full the click is dropped and counted; redirects never wait on analytics.
//!
//! On shutdown the dispatcher stops accepting, drains what is already queued
//! and waits for in-flight enrichments up to the configured grace period.
//! Anything still running after that is aborted.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::analytics::geoip::GeoLocator;
use crate::analytics::models::{ClickEvent, UNKNOWN};
use crate::analytics::user_agent;
use crate::config::AnalyticsConfig;
use crate::models::ClickMetadata;
use crate::storage::Storage;

/// Turns a raw click into metadata and merges it into the link's aggregates
pub struct ClickEnricher {
    storage: Arc<dyn Storage>,
    geo: Arc<dyn GeoLocator>,
    geo_timeout: Duration,
    store_timeout: Duration,
}

impl ClickEnricher {
    pub fn new(
        storage: Arc<dyn Storage>,
        geo: Arc<dyn GeoLocator>,
        geo_timeout: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            geo,
            geo_timeout,
            store_timeout,
        }
    }

    /// Country and city for the client, "Unknown" for anything we cannot resolve
    async fn locate(&self, ip: Option<IpAddr>) -> (String, String) {
        let Some(ip) = ip else {
            return (UNKNOWN.to_string(), UNKNOWN.to_string());
        };

        match tokio::time::timeout(self.geo_timeout, self.geo.lookup(ip)).await {
            Ok(Ok(location)) => (location.country_or_unknown(), location.city_or_unknown()),
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "geolocation unavailable");
                (UNKNOWN.to_string(), UNKNOWN.to_string())
            }
            Err(_) => {
                debug!(ip = %ip, timeout_ms = self.geo_timeout.as_millis() as u64, "geolocation timed out");
                (UNKNOWN.to_string(), UNKNOWN.to_string())
            }
        }
    }

    pub async fn metadata(&self, event: &ClickEvent) -> ClickMetadata {
        let (country, city) = self.locate(event.client_ip).await;
        let agent = user_agent::classify(&event.user_agent);

        ClickMetadata {
            clicked_at: event.observed_at,
            country,
            city,
            device: agent.device.to_string(),
            os: agent.os.to_string(),
            browser: agent.browser.to_string(),
        }
    }

    /// Enrich one click and record it. Returns whether a link was updated.
    ///
    /// Failures are logged and swallowed; a lost click never surfaces to the
    /// visitor who caused it.
    pub async fn enrich(&self, event: &ClickEvent) -> bool {
        let metadata = self.metadata(event).await;

        let recorded = tokio::time::timeout(
            self.store_timeout,
            self.storage.record_click(&event.short_code, &metadata),
        )
        .await;

        match recorded {
            Ok(Ok(true)) => {
                debug!(
                    short_code = %event.short_code,
                    country = %metadata.country,
                    browser = %metadata.browser,
                    "click recorded"
                );
                true
            }
            Ok(Ok(false)) => {
                debug!(short_code = %event.short_code, "link no longer exists, click discarded");
                false
            }
            Ok(Err(e)) => {
                error!(short_code = %event.short_code, error = %e, "failed to record click");
                false
            }
            Err(_) => {
                warn!(
                    short_code = %event.short_code,
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "recording click timed out"
                );
                false
            }
        }
    }
}

enum ActorMessage {
    Click(ClickEvent),
    Shutdown,
}

struct Dispatcher {
    receiver: mpsc::Receiver<ActorMessage>,
    enricher: Arc<ClickEnricher>,
    permits: Arc<Semaphore>,
    in_flight: JoinSet<()>,
    drain_grace: Duration,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            tokio::select! {
                msg = self.receiver.recv() => match msg {
                    Some(ActorMessage::Click(event)) => self.spawn_enrich(event).await,
                    Some(ActorMessage::Shutdown) => {
                        info!("Click aggregator received shutdown signal, draining...");
                        break;
                    }
                    None => {
                        warn!("Click aggregator channel closed unexpectedly, draining...");
                        break;
                    }
                },
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    log_join(joined);
                }
            }
        }

        self.drain().await;
    }

    /// Waits for a permit, so a saturated pool backs up into the queue
    async fn spawn_enrich(&mut self, event: ClickEvent) {
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let enricher = Arc::clone(&self.enricher);
        self.in_flight.spawn(async move {
            let _permit = permit;
            enricher.enrich(&event).await;
        });
    }

    async fn drain(mut self) {
        self.receiver.close();
        let grace = self.drain_grace;

        let finished = tokio::time::timeout(grace, async {
            while let Some(msg) = self.receiver.recv().await {
                if let ActorMessage::Click(event) = msg {
                    self.spawn_enrich(event).await;
                }
            }
            while let Some(joined) = self.in_flight.join_next().await {
                log_join(joined);
            }
        })
        .await;

        match finished {
            Ok(()) => info!("Click aggregator drained"),
            Err(_) => {
                warn!(
                    abandoned = self.in_flight.len(),
                    grace_secs = grace.as_secs(),
                    "Click aggregator drain grace period elapsed, aborting remaining enrichments"
                );
                self.in_flight.abort_all();
                while self.in_flight.join_next().await.is_some() {}
            }
        }
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "click enrichment task panicked");
        }
    }
}

/// Handle to the background click pipeline
pub struct ClickAggregator {
    sender: mpsc::Sender<ActorMessage>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl ClickAggregator {
    /// Spawn the dispatcher task. Must be called inside a tokio runtime.
    pub fn start(enricher: ClickEnricher, config: &AnalyticsConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));

        let dispatcher = Dispatcher {
            receiver,
            enricher: Arc::new(enricher),
            permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            in_flight: JoinSet::new(),
            drain_grace: config.drain_grace(),
        };

        info!(
            queue_capacity = config.queue_capacity,
            max_in_flight = config.max_in_flight,
            "Click aggregator started"
        );

        Self {
            sender,
            dispatcher: Mutex::new(Some(tokio::spawn(dispatcher.run()))),
            dropped: AtomicU64::new(0),
        }
    }

    /// Hand a click to the background pipeline without waiting.
    ///
    /// Returns false when the click was dropped (queue full or shut down).
    pub fn dispatch(&self, event: ClickEvent) -> bool {
        match self.sender.try_send(ActorMessage::Click(event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(ActorMessage::Click(event))) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(short_code = %event.short_code, dropped_total = dropped, "Click queue full, dropping click");
                false
            }
            Err(_) => {
                debug!("Click aggregator is shut down, dropping click");
                false
            }
        }
    }

    /// Clicks dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting, drain, and wait for the dispatcher to finish.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn shutdown(&self) {
        let Some(handle) = self.dispatcher.lock().await.take() else {
            return;
        };

        let _ = self.sender.send(ActorMessage::Shutdown).await;

        if let Err(e) = handle.await {
            error!(error = %e, "Click aggregator dispatcher failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::geoip::DisabledLocator;
    use crate::models::Link;
    use crate::storage::SqliteStorage;

    async fn storage_with_link(code: &str) -> Arc<dyn Storage> {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        storage
            .create(&Link::new(code.into(), 1, "https://example.com".into(), 0))
            .await
            .unwrap();
        Arc::new(storage)
    }

    fn enricher(storage: Arc<dyn Storage>) -> ClickEnricher {
        ClickEnricher::new(
            storage,
            Arc::new(DisabledLocator),
            Duration::from_millis(100),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn missing_ip_and_agent_are_unknown() {
        let storage = storage_with_link("abc1234").await;
        let enricher = enricher(storage);
        let event = ClickEvent::new("abc1234", None, "");

        let metadata = enricher.metadata(&event).await;
        assert_eq!(metadata.country, UNKNOWN);
        assert_eq!(metadata.city, UNKNOWN);
        assert_eq!(metadata.device, UNKNOWN);
        assert_eq!(metadata.os, UNKNOWN);
        assert_eq!(metadata.browser, UNKNOWN);
    }

    #[tokio::test]
    async fn enrich_for_deleted_link_records_nothing() {
        let storage = storage_with_link("abc1234").await;
        let enricher = enricher(storage);
        assert!(!enricher.enrich(&ClickEvent::new("gone000", None, "")).await);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_clicks() {
        let storage = storage_with_link("abc1234").await;
        let config = AnalyticsConfig::default();
        let aggregator = ClickAggregator::start(enricher(Arc::clone(&storage)), &config);

        for _ in 0..20 {
            assert!(aggregator.dispatch(ClickEvent::new("abc1234", None, "curl/8.0")));
        }
        aggregator.shutdown().await;

        let link = storage.find_by_code("abc1234").await.unwrap().unwrap();
        assert_eq!(link.clicks, 20);
        assert_eq!(aggregator.dropped(), 0);
    }

    #[tokio::test]
    async fn dispatch_after_shutdown_is_dropped() {
        let storage = storage_with_link("abc1234").await;
        let aggregator =
            ClickAggregator::start(enricher(storage), &AnalyticsConfig::default());
        aggregator.shutdown().await;
        aggregator.shutdown().await;

        assert!(!aggregator.dispatch(ClickEvent::new("abc1234", None, "")));
    }
}
