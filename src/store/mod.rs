//! Listing persistence boundary.
//!
//! The pipeline only relies on the operation shapes of [`ListingStore`].
//! [`MemoryStore`] and [`JsonFileStore`] are the bundled implementations.

pub mod json;
pub mod memory;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

use crate::models::{Listing, ListingKey};
use async_trait::async_trait;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("duplicate key {0}")]
    DuplicateKey(ListingKey),
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Numeric fields the store can sort and aggregate on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericField {
    Price,
    Size,
    PricePerUnitArea,
    DaysListed,
    InvestmentScore,
}

impl NumericField {
    pub fn value(&self, listing: &Listing) -> Option<f64> {
        match self {
            NumericField::Price => listing.price,
            NumericField::Size => listing.size,
            NumericField::PricePerUnitArea => listing.price_per_unit_area,
            NumericField::DaysListed => Some(listing.days_listed as f64),
            NumericField::InvestmentScore => listing.investment_score,
        }
    }
}

/// Text fields the store can list distinct values of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    City,
    Neighborhood,
    Source,
    PropertyType,
}

impl TextField {
    pub fn value<'a>(&self, listing: &'a Listing) -> Option<&'a str> {
        match self {
            TextField::City => listing.location.city.as_deref(),
            TextField::Neighborhood => listing.location.neighborhood.as_deref(),
            TextField::Source => Some(listing.source.as_str()),
            TextField::PropertyType => listing.property_type.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Conjunction of optional predicates; an empty filter matches everything
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    pub property_type: Option<String>,
    pub operation_type: Option<String>,
    pub price_range: Option<(f64, f64)>,
    pub size_range: Option<(f64, f64)>,
    pub min_score: Option<f64>,
    pub exclude: Option<ListingKey>,
    pub require_price_per_unit_area: bool,
}

impl ListingFilter {
    pub fn in_city(city: impl Into<String>) -> Self {
        Self {
            city: Some(city.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, listing: &Listing) -> bool {
        if !eq_opt(&self.city, listing.location.city.as_deref())
            || !eq_opt(&self.neighborhood, listing.location.neighborhood.as_deref())
            || !eq_opt(&self.property_type, listing.property_type.as_deref())
            || !eq_opt(&self.operation_type, listing.operation_type.as_deref())
        {
            return false;
        }
        if !in_range(self.price_range, listing.price) || !in_range(self.size_range, listing.size) {
            return false;
        }
        if let Some(min) = self.min_score {
            if listing.investment_score.map_or(true, |s| s < min) {
                return false;
            }
        }
        if self.require_price_per_unit_area && listing.price_per_unit_area.is_none() {
            return false;
        }
        if let Some(excluded) = &self.exclude {
            if listing.id == excluded.id && listing.source == excluded.source {
                return false;
            }
        }
        true
    }
}

fn eq_opt(wanted: &Option<String>, actual: Option<&str>) -> bool {
    match wanted {
        Some(w) => actual == Some(w.as_str()),
        None => true,
    }
}

fn in_range(range: Option<(f64, f64)>, value: Option<f64>) -> bool {
    match range {
        Some((lo, hi)) => value.map_or(false, |v| v >= lo && v <= hi),
        None => true,
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListingQuery {
    pub filter: ListingFilter,
    pub sort: Option<(NumericField, SortOrder)>,
    pub limit: Option<usize>,
}

impl ListingQuery {
    pub fn new(filter: ListingFilter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn sorted_by(mut self, field: NumericField, order: SortOrder) -> Self {
        self.sort = Some((field, order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Apply sort and limit to an already filtered result set.
    /// Listings missing the sort field go last in either order.
    pub fn finish(&self, mut listings: Vec<Listing>) -> Vec<Listing> {
        if let Some((field, order)) = self.sort {
            listings.sort_by(|a, b| match (field.value(a), field.value(b)) {
                (Some(x), Some(y)) => {
                    let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
                    match order {
                        SortOrder::Ascending => ord,
                        SortOrder::Descending => ord.reverse(),
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
        }
        if let Some(limit) = self.limit {
            listings.truncate(limit);
        }
        listings
    }
}

/// Mean of a numeric field and the number of listings it was taken over
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Average {
    pub value: f64,
    pub count: usize,
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn find_one(&self, key: &ListingKey) -> StoreResult<Option<Listing>>;

    /// Insert or replace the listing under its key.
    ///
    /// `expect_existing` is what the caller's prior lookup saw. Inserting a
    /// key that appeared in the meantime fails with [`StoreError::DuplicateKey`].
    async fn upsert(&self, listing: Listing, expect_existing: bool) -> StoreResult<()>;

    async fn find(&self, query: &ListingQuery) -> StoreResult<Vec<Listing>>;

    /// `None` when no listing in the filtered set has the field
    async fn average(&self, field: NumericField, filter: &ListingFilter) -> StoreResult<Option<Average>>;

    async fn distinct(&self, field: TextField, filter: &ListingFilter) -> StoreResult<Vec<String>>;
}
