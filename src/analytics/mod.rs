//! Visitor click analytics
//!
//! Clicks are captured on the redirect path as lightweight events and
//! enriched in the background with geolocation and User-Agent
//! classification before being merged into the link's aggregates.

pub mod aggregator;
pub mod geoip;
pub mod ip_api;
pub mod ip_extractor;
pub mod models;
pub mod user_agent;

pub use aggregator::{ClickAggregator, ClickEnricher};
pub use geoip::{build_locator, DisabledLocator, GeoError, GeoLocator, MaxMindLocator};
pub use ip_api::IpApiLocator;
pub use ip_extractor::extract_client_ip;
pub use models::{ClickEvent, GeoLocation, UNKNOWN};
