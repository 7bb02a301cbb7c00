//! Geolocation through an ip-api.com compatible HTTP endpoint

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::analytics::geoip::{GeoError, GeoLocator};
use crate::analytics::models::GeoLocation;

/// Answers memoised before the map is flushed
const MAX_MEMO_ENTRIES: usize = 50_000;

const FIELDS: &str = "status,message,country,countryCode,regionName,city,lat,lon,isp";

#[derive(Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    country: Option<String>,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    #[serde(rename = "regionName")]
    region_name: Option<String>,
    city: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    isp: Option<String>,
}

/// Remote lookups with an in-memory memo of definitive answers.
///
/// `None` in the memo means the service already told us it has nothing for
/// that address. Transport failures are not memoised.
#[derive(Clone)]
pub struct IpApiLocator {
    client: reqwest::Client,
    base_url: String,
    memo: Arc<DashMap<IpAddr, Option<GeoLocation>>>,
}

impl IpApiLocator {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            memo: Arc::new(DashMap::new()),
        })
    }

    async fn fetch(&self, ip: IpAddr) -> Result<Option<GeoLocation>, GeoError> {
        let url = format!("{}/{}?fields={}", self.base_url, ip, FIELDS);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GeoError::Lookup(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(GeoError::Lookup(format!("HTTP {}", resp.status())));
        }

        let body: IpApiResponse = resp
            .json()
            .await
            .map_err(|e| GeoError::Lookup(format!("unreadable response: {e}")))?;

        if body.status != "success" {
            debug!(
                ip = %ip,
                message = body.message.as_deref().unwrap_or(""),
                "geo lookup returned non-success status"
            );
            return Ok(None);
        }

        Ok(Some(GeoLocation {
            country: body.country.filter(|s| !s.is_empty()),
            country_code: body.country_code.filter(|s| !s.is_empty()),
            region: body.region_name.filter(|s| !s.is_empty()),
            city: body.city.filter(|s| !s.is_empty()),
            isp: body.isp.filter(|s| !s.is_empty()),
            latitude: body.lat,
            longitude: body.lon,
        }))
    }
}

#[async_trait]
impl GeoLocator for IpApiLocator {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoError> {
        if is_private(ip) {
            return Err(GeoError::NotFound(ip));
        }

        if let Some(entry) = self.memo.get(&ip) {
            return entry.clone().ok_or(GeoError::NotFound(ip));
        }

        let result = self.fetch(ip).await?;

        if self.memo.len() >= MAX_MEMO_ENTRIES {
            self.memo.clear();
        }
        self.memo.insert(ip, result.clone());

        result.ok_or(GeoError::NotFound(ip))
    }
}

/// Addresses no public geolocation service can place
fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}
