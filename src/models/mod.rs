use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Maximum number of comparables kept on a listing
pub const MAX_COMPARABLES: usize = 10;

/// Physical condition reported by the source
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    New,
    Good,
    NeedsRenovation,
    #[default]
    Unknown,
}

/// Location information for a property
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Unique identity of a listing: external id within a source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListingKey {
    pub id: String,
    pub source: String,
}

impl ListingKey {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for ListingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

/// A superseded price, timestamped when it stopped being current
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub price: Option<f64>,
    pub date: DateTime<Utc>,
}

/// Lightweight reference to a similar listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparableRef {
    pub id: String,
    pub source: String,
    pub price: Option<f64>,
    pub size: Option<f64>,
    pub days_listed: i64,
}

impl From<&Listing> for ComparableRef {
    fn from(listing: &Listing) -> Self {
        Self {
            id: listing.id.clone(),
            source: listing.source.clone(),
            price: listing.price,
            size: listing.size,
            days_listed: listing.days_listed,
        }
    }
}

/// Record handed over by a site extractor, one per fetched page.
///
/// Every numeric field is optional: sources routinely omit them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawListing {
    pub id: String,
    pub source: String,
    pub url: String,
    pub title: Option<String>,
    pub address: Option<String>,
    pub property_type: Option<String>,
    pub operation_type: Option<String>,
    pub price: Option<f64>,
    pub size: Option<f64>,
    pub rooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub floor: Option<i32>,
    pub has_elevator: Option<bool>,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub location: Location,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("listing id is empty")]
    MissingId,
    #[error("listing source is empty")]
    MissingSource,
}

impl RawListing {
    pub fn key(&self) -> ListingKey {
        ListingKey::new(self.id.clone(), self.source.clone())
    }

    /// Check identity fields and drop numeric values that cannot be real
    /// (NaN, infinite, negative). Dropped values become `None`.
    pub fn validate(mut self) -> Result<Self, ValidationError> {
        self.id = self.id.trim().to_string();
        self.source = self.source.trim().to_string();
        if self.id.is_empty() {
            return Err(ValidationError::MissingId);
        }
        if self.source.is_empty() {
            return Err(ValidationError::MissingSource);
        }

        let key = self.key();
        self.price = sanitize(&key, "price", self.price);
        self.size = sanitize(&key, "size", self.size);
        self.location.latitude = self.location.latitude.filter(|v| v.is_finite());
        self.location.longitude = self.location.longitude.filter(|v| v.is_finite());
        self.location.city = non_blank(self.location.city.take());
        self.location.neighborhood = non_blank(self.location.neighborhood.take());

        Ok(self)
    }
}

fn sanitize(key: &ListingKey, field: &str, value: Option<f64>) -> Option<f64> {
    match value {
        Some(v) if v.is_finite() && v >= 0.0 => Some(v),
        Some(v) => {
            debug!("Dropping invalid {} {} for {}", field, v, key);
            None
        }
        None => None,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Stored listing: the merged, scored state of one (id, source) key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub id: String,
    pub source: String,
    pub url: String,
    pub title: Option<String>,
    pub address: Option<String>,
    pub property_type: Option<String>,
    pub operation_type: Option<String>,
    pub price: Option<f64>,
    pub size: Option<f64>,
    pub rooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub floor: Option<i32>,
    pub has_elevator: Option<bool>,
    pub condition: Condition,
    pub features: Vec<String>,
    pub location: Location,
    pub first_detected: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub is_new: bool,
    pub days_listed: i64,
    pub price_per_unit_area: Option<f64>,
    pub price_history: Vec<PricePoint>,
    pub investment_score: Option<f64>,
    pub comparable_listings: Vec<ComparableRef>,
}

impl Listing {
    pub fn key(&self) -> ListingKey {
        ListingKey::new(self.id.clone(), self.source.clone())
    }

    pub fn city(&self) -> Option<&str> {
        self.location.city.as_deref()
    }

    pub fn neighborhood(&self) -> Option<&str> {
        self.location.neighborhood.as_deref()
    }
}

/// `price / size` when both are known and size is positive
pub fn price_per_unit_area(price: Option<f64>, size: Option<f64>) -> Option<f64> {
    match (price, size) {
        (Some(p), Some(s)) if s > 0.0 => Some(p / s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, source: &str) -> RawListing {
        RawListing {
            id: id.to_string(),
            source: source.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_rejects_blank_identity() {
        assert_eq!(raw("  ", "s").validate().unwrap_err(), ValidationError::MissingId);
        assert_eq!(raw("1", "").validate().unwrap_err(), ValidationError::MissingSource);
    }

    #[test]
    fn test_validate_drops_impossible_numbers() {
        let mut r = raw("1", "s");
        r.price = Some(f64::NAN);
        r.size = Some(-3.0);
        r.location.city = Some("   ".to_string());
        let r = r.validate().unwrap();
        assert_eq!(r.price, None);
        assert_eq!(r.size, None);
        assert_eq!(r.location.city, None);
    }

    #[test]
    fn test_price_per_unit_area_guards_zero_size() {
        assert_eq!(price_per_unit_area(Some(200_000.0), Some(100.0)), Some(2000.0));
        assert_eq!(price_per_unit_area(Some(200_000.0), Some(0.0)), None);
        assert_eq!(price_per_unit_area(None, Some(50.0)), None);
    }

    #[test]
    fn test_condition_serializes_snake_case() {
        let json = serde_json::to_string(&Condition::NeedsRenovation).unwrap();
        assert_eq!(json, "\"needs_renovation\"");
    }
}
