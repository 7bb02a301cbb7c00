use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A shortened URL together with its click aggregates.
///
/// Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub short_code: String,
    pub owner_id: i64,
    pub original_url: String,
    pub created_at: i64,
    pub clicks: i64,
    pub first_click_at: Option<i64>,
    pub last_click_at: Option<i64>,
    pub countries: BTreeSet<String>,
    pub cities: BTreeSet<String>,
    pub devices: BTreeSet<String>,
    pub operating_systems: BTreeSet<String>,
    pub browsers: BTreeSet<String>,
}

impl Link {
    /// A link that has never been clicked
    pub fn new(short_code: String, owner_id: i64, original_url: String, created_at: i64) -> Self {
        Self {
            short_code,
            owner_id,
            original_url,
            created_at,
            clicks: 0,
            first_click_at: None,
            last_click_at: None,
            countries: BTreeSet::new(),
            cities: BTreeSet::new(),
            devices: BTreeSet::new(),
            operating_systems: BTreeSet::new(),
            browsers: BTreeSet::new(),
        }
    }

    pub fn facet_mut(&mut self, facet: Facet) -> &mut BTreeSet<String> {
        match facet {
            Facet::Country => &mut self.countries,
            Facet::City => &mut self.cities,
            Facet::Device => &mut self.devices,
            Facet::Os => &mut self.operating_systems,
            Facet::Browser => &mut self.browsers,
        }
    }
}

/// Click metadata dimension stored as a set on each link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
    Country,
    City,
    Device,
    Os,
    Browser,
}

impl Facet {
    pub const ALL: [Facet; 5] = [
        Facet::Country,
        Facet::City,
        Facet::Device,
        Facet::Os,
        Facet::Browser,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Facet::Country => "country",
            Facet::City => "city",
            Facet::Device => "device",
            Facet::Os => "os",
            Facet::Browser => "browser",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|facet| facet.as_str() == raw)
    }
}

/// Enriched metadata for a single click, ready to be merged into a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickMetadata {
    /// Unix epoch milliseconds at which the redirect was served
    pub clicked_at: i64,
    pub country: String,
    pub city: String,
    pub device: String,
    pub os: String,
    pub browser: String,
}

impl ClickMetadata {
    pub fn facets(&self) -> [(Facet, &str); 5] {
        [
            (Facet::Country, self.country.as_str()),
            (Facet::City, self.city.as_str()),
            (Facet::Device, self.device.as_str()),
            (Facet::Os, self.os.as_str()),
            (Facet::Browser, self.browser.as_str()),
        ]
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facet_names_round_trip() {
        for facet in Facet::ALL {
            assert_eq!(Facet::parse(facet.as_str()), Some(facet));
        }
        assert_eq!(Facet::parse("referrer"), None);
    }

    #[test]
    fn new_link_starts_unclicked() {
        let link = Link::new("abcdefg".into(), 42, "https://example.com".into(), 1_000);
        assert_eq!(link.clicks, 0);
        assert!(link.first_click_at.is_none());
        assert!(link.last_click_at.is_none());
        assert!(link.countries.is_empty());
    }
}
