use crate::models::{Facet, Link};
use sqlx::FromRow;
use std::collections::HashMap;

#[derive(Debug, FromRow)]
pub(crate) struct LinkRow {
    pub short_code: String,
    pub owner_id: i64,
    pub original_url: String,
    pub created_at: i64,
    pub clicks: i64,
    pub first_click_at: Option<i64>,
    pub last_click_at: Option<i64>,
}

impl LinkRow {
    pub fn into_link(self) -> Link {
        let mut link = Link::new(
            self.short_code,
            self.owner_id,
            self.original_url,
            self.created_at,
        );
        link.clicks = self.clicks;
        link.first_click_at = self.first_click_at;
        link.last_click_at = self.last_click_at;
        link
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct FacetRow {
    pub short_code: String,
    pub facet: String,
    pub value: String,
}

pub(crate) fn apply_facets(link: &mut Link, facets: impl IntoIterator<Item = FacetRow>) {
    for row in facets {
        match Facet::parse(&row.facet) {
            Some(facet) => {
                link.facet_mut(facet).insert(row.value);
            }
            None => {
                tracing::warn!(short_code = %row.short_code, facet = %row.facet, "ignoring unknown facet row");
            }
        }
    }
}

/// Attach facet rows to their links, preserving the order of `rows`
pub(crate) fn assemble(rows: Vec<LinkRow>, facets: Vec<FacetRow>) -> Vec<Link> {
    let mut by_code: HashMap<String, Vec<FacetRow>> = HashMap::new();
    for facet in facets {
        by_code.entry(facet.short_code.clone()).or_default().push(facet);
    }

    rows.into_iter()
        .map(|row| {
            let mut link = row.into_link();
            if let Some(facets) = by_code.remove(&link.short_code) {
                apply_facets(&mut link, facets);
            }
            link
        })
        .collect()
}
