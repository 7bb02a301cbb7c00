//! IP geolocation collaborators.
//!
//! The aggregator only sees [`GeoLocator`]; the concrete backend is picked at
//! startup from configuration.

use anyhow::{Context, Result};
use async_trait::async_trait;
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

use crate::analytics::ip_api::IpApiLocator;
use crate::analytics::models::GeoLocation;
use crate::config::{AnalyticsConfig, GeoProvider};

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geolocation is disabled")]
    Disabled,
    #[error("no geolocation data for {0}")]
    NotFound(IpAddr),
    #[error("geolocation lookup failed: {0}")]
    Lookup(String),
}

#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoError>;
}

/// Build the locator selected by configuration
pub fn build_locator(config: &AnalyticsConfig) -> Result<Arc<dyn GeoLocator>> {
    match config.geo_provider {
        GeoProvider::None => Ok(Arc::new(DisabledLocator)),
        GeoProvider::IpApi => Ok(Arc::new(IpApiLocator::new(
            &config.geo_api_url,
            config.geo_timeout(),
        )?)),
        GeoProvider::Maxmind => Ok(Arc::new(MaxMindLocator::new(
            config.geoip_city_db_path.as_deref(),
            config.geoip_asn_db_path.as_deref(),
        )?)),
    }
}

/// Locator used when geolocation is turned off; every click lands as "Unknown"
pub struct DisabledLocator;

#[async_trait]
impl GeoLocator for DisabledLocator {
    async fn lookup(&self, _ip: IpAddr) -> Result<GeoLocation, GeoError> {
        Err(GeoError::Disabled)
    }
}

/// GeoIP lookups against memory-mapped MaxMind City and ASN databases
#[derive(Clone)]
pub struct MaxMindLocator {
    city_reader: Option<Arc<Reader<Mmap>>>,
    asn_reader: Option<Arc<Reader<Mmap>>>,
}

impl MaxMindLocator {
    pub fn new(city_path: Option<&str>, asn_path: Option<&str>) -> Result<Self> {
        let city_reader = if let Some(path) = city_path {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
            Some(Arc::new(reader))
        } else {
            None
        };

        let asn_reader = if let Some(path) = asn_path {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("Failed to open GeoIP ASN database at {}", path))?;
            Some(Arc::new(reader))
        } else {
            None
        };

        Ok(Self {
            city_reader,
            asn_reader,
        })
    }

    fn lookup_sync(&self, ip: IpAddr) -> Result<GeoLocation, GeoError> {
        let mut location = GeoLocation::default();
        let mut found = false;

        if let Some(ref reader) = self.city_reader {
            let result = reader
                .lookup(ip)
                .map_err(|e| GeoError::Lookup(e.to_string()))?;
            if let Ok(Some(city)) = result.decode::<geoip2::City>() {
                location.country = city.country.names.english.map(|s| s.to_string());
                location.country_code = city.country.iso_code.map(|s| s.to_string());
                if let Some(subdivision) = city.subdivisions.first() {
                    location.region = subdivision.names.english.map(|s| s.to_string());
                }
                location.city = city.city.names.english.map(|s| s.to_string());
                found = true;
            } else if let Ok(Some(country)) = result.decode::<geoip2::Country>() {
                location.country = country.country.names.english.map(|s| s.to_string());
                location.country_code = country.country.iso_code.map(|s| s.to_string());
                found = true;
            }
        }

        if let Some(ref reader) = self.asn_reader {
            if let Ok(result) = reader.lookup(ip) {
                if let Ok(Some(asn)) = result.decode::<geoip2::Asn>() {
                    location.isp = asn.autonomous_system_organization.map(|s| s.to_string());
                    found = true;
                }
            }
        }

        if found {
            Ok(location)
        } else {
            Err(GeoError::NotFound(ip))
        }
    }
}

#[async_trait]
impl GeoLocator for MaxMindLocator {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoError> {
        self.lookup_sync(ip)
    }
}
