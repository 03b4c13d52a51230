use crate::models::{price_per_unit_area, Listing, PricePoint, RawListing};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// What an ingestion did to the stored state of a key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeKind {
    New,
    Unchanged,
    PriceChanged {
        previous: Option<f64>,
        current: Option<f64>,
    },
}

/// Merges a freshly extracted record with its stored counterpart.
///
/// Pure: the caller does the lookup and the upsert around it.
pub struct ListingStateTracker;

impl ListingStateTracker {
    pub fn apply(
        raw: RawListing,
        existing: Option<&Listing>,
        now: DateTime<Utc>,
    ) -> (Listing, ChangeKind) {
        let ppu = price_per_unit_area(raw.price, raw.size);

        let Some(existing) = existing else {
            info!("New property detected: {} from {}", raw.id, raw.source);
            let listing = Self::build(raw, ppu, now, now, true, 0, Vec::new());
            return (listing, ChangeKind::New);
        };

        let first_detected = existing.first_detected;
        let days_listed = (now - first_detected).num_days().max(0);

        let (history, change) = if raw.price != existing.price {
            info!(
                "Price change detected for property {} from {:?} to {:?}",
                raw.id, existing.price, raw.price
            );
            let mut history = existing.price_history.clone();
            history.push(PricePoint {
                price: existing.price,
                date: existing.last_updated,
            });
            let change = ChangeKind::PriceChanged {
                previous: existing.price,
                current: raw.price,
            };
            (history, change)
        } else {
            (existing.price_history.clone(), ChangeKind::Unchanged)
        };

        let mut listing = Self::build(raw, ppu, first_detected, now, false, days_listed, history);
        listing.investment_score = existing.investment_score;
        listing.comparable_listings = existing.comparable_listings.clone();
        (listing, change)
    }

    fn build(
        raw: RawListing,
        price_per_unit_area: Option<f64>,
        first_detected: DateTime<Utc>,
        now: DateTime<Utc>,
        is_new: bool,
        days_listed: i64,
        price_history: Vec<PricePoint>,
    ) -> Listing {
        Listing {
            id: raw.id,
            source: raw.source,
            url: raw.url,
            title: raw.title,
            address: raw.address,
            property_type: raw.property_type,
            operation_type: raw.operation_type,
            price: raw.price,
            size: raw.size,
            rooms: raw.rooms,
            bathrooms: raw.bathrooms,
            floor: raw.floor,
            has_elevator: raw.has_elevator,
            condition: raw.condition,
            features: raw.features,
            location: raw.location,
            first_detected,
            last_updated: now,
            is_new,
            days_listed,
            price_per_unit_area,
            price_history,
            investment_score: None,
            comparable_listings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn raw(price: Option<f64>, size: Option<f64>) -> RawListing {
        RawListing {
            id: "1".to_string(),
            source: "s".to_string(),
            url: "https://example.test/1".to_string(),
            price,
            size,
            ..Default::default()
        }
    }

    #[test]
    fn test_unseen_key_starts_fresh() {
        let now = Utc::now();
        let (listing, change) = ListingStateTracker::apply(raw(Some(200_000.0), Some(100.0)), None, now);

        assert_eq!(change, ChangeKind::New);
        assert!(listing.is_new);
        assert_eq!(listing.days_listed, 0);
        assert!(listing.price_history.is_empty());
        assert_eq!(listing.first_detected, now);
        assert_eq!(listing.last_updated, now);
        assert_eq!(listing.price_per_unit_area, Some(2000.0));
    }

    #[test]
    fn test_unchanged_price_keeps_history() {
        let t0 = Utc::now() - Duration::days(3);
        let (first, _) = ListingStateTracker::apply(raw(Some(100.0), Some(10.0)), None, t0);

        let t1 = t0 + Duration::days(3) + Duration::hours(5);
        let (second, change) = ListingStateTracker::apply(raw(Some(100.0), Some(10.0)), Some(&first), t1);

        assert_eq!(change, ChangeKind::Unchanged);
        assert!(!second.is_new);
        assert_eq!(second.first_detected, t0);
        assert_eq!(second.last_updated, t1);
        assert_eq!(second.days_listed, 3);
        assert_eq!(second.price_history, first.price_history);
    }

    #[test]
    fn test_price_change_records_superseded_price() {
        let t0 = Utc::now() - Duration::days(10);
        let (first, _) = ListingStateTracker::apply(raw(Some(200_000.0), Some(100.0)), None, t0);

        let t1 = t0 + Duration::days(2);
        let (second, change) =
            ListingStateTracker::apply(raw(Some(180_000.0), Some(100.0)), Some(&first), t1);

        assert_eq!(
            change,
            ChangeKind::PriceChanged {
                previous: Some(200_000.0),
                current: Some(180_000.0)
            }
        );
        assert_eq!(
            second.price_history,
            vec![PricePoint {
                price: Some(200_000.0),
                date: t0
            }]
        );
        assert_eq!(second.price_per_unit_area, Some(1800.0));

        let t2 = t1 + Duration::days(1);
        let (third, _) = ListingStateTracker::apply(raw(Some(170_000.0), Some(100.0)), Some(&second), t2);
        assert_eq!(third.price_history.len(), 2);
        assert_eq!(third.price_history[1].price, Some(180_000.0));
        assert_eq!(third.price_history[1].date, t1);
    }

    #[test]
    fn test_transition_to_null_price_counts_as_change() {
        let t0 = Utc::now();
        let (first, _) = ListingStateTracker::apply(raw(Some(100.0), Some(10.0)), None, t0);
        let (second, change) = ListingStateTracker::apply(raw(None, Some(10.0)), Some(&first), t0);

        assert!(matches!(change, ChangeKind::PriceChanged { current: None, .. }));
        assert_eq!(second.price_history.len(), 1);
        assert_eq!(second.price_per_unit_area, None);

        let (third, change) = ListingStateTracker::apply(raw(Some(90.0), Some(10.0)), Some(&second), t0);
        assert!(matches!(change, ChangeKind::PriceChanged { previous: None, .. }));
        assert_eq!(third.price_history[1].price, None);
    }

    #[test]
    fn test_clock_skew_never_yields_negative_days() {
        let t0 = Utc::now();
        let (first, _) = ListingStateTracker::apply(raw(Some(1.0), None), None, t0);
        let (second, _) = ListingStateTracker::apply(raw(Some(1.0), None), Some(&first), t0 - Duration::days(2));
        assert_eq!(second.days_listed, 0);
    }

    #[test]
    fn test_previous_score_carried_until_rescored() {
        let t0 = Utc::now();
        let (mut first, _) = ListingStateTracker::apply(raw(Some(1.0), Some(1.0)), None, t0);
        first.investment_score = Some(64.0);
        let (second, _) = ListingStateTracker::apply(raw(Some(1.0), Some(1.0)), Some(&first), t0);
        assert_eq!(second.investment_score, Some(64.0));
    }
}
