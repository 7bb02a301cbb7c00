//! Data models for click analytics

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

pub const UNKNOWN: &str = "Unknown";

/// A single redirect observed on the hot path, waiting to be enriched.
#[derive(Debug, Clone)]
pub struct ClickEvent {
    pub short_code: String,
    pub client_ip: Option<IpAddr>,
    pub user_agent: String,
    /// Unix epoch milliseconds at which the redirect was served
    pub observed_at: i64,
}

impl ClickEvent {
    pub fn new(short_code: impl Into<String>, client_ip: Option<IpAddr>, user_agent: impl Into<String>) -> Self {
        Self {
            short_code: short_code.into(),
            client_ip,
            user_agent: user_agent.into(),
            observed_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Geographic information derived from an IP address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Country name (e.g. "India")
    pub country: Option<String>,

    /// ISO country code (e.g. "IN")
    pub country_code: Option<String>,

    /// Region/state/province
    pub region: Option<String>,

    pub city: Option<String>,

    /// Network operator, or the ASN organisation when that is all we have
    pub isp: Option<String>,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl GeoLocation {
    pub fn country_or_unknown(&self) -> String {
        non_empty_or_unknown(self.country.as_deref())
    }

    pub fn city_or_unknown(&self) -> String {
        non_empty_or_unknown(self.city.as_deref())
    }
}

fn non_empty_or_unknown(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN.to_string(),
    }
}
