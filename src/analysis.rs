//! Investment opportunity assessment for stored listings.
//!
//! Consumes pipeline events and decides which listings are bargains. Delivery
//! of the resulting notifications is left to whoever subscribes to the log.

use crate::models::{Condition, Listing, ListingKey};
use crate::pipeline::{ChangeKind, ListingEvent};
use crate::store::{ListingFilter, ListingStore, NumericField};
use std::sync::Arc;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct BargainThresholds {
    /// Percent below the area average
    pub min_price_difference: f64,
    pub min_score: f64,
    /// Treat high estimated ROI as a bargain regardless of the price difference
    pub roi_override: bool,
    pub roi_threshold: f64,
    pub roi_min_score: f64,
    pub renovation_cost_per_unit_area: f64,
    /// Samples needed before a neighborhood average is trusted
    pub min_area_samples: usize,
}

impl Default for BargainThresholds {
    fn default() -> Self {
        Self {
            min_price_difference: 15.0,
            min_score: 70.0,
            roi_override: true,
            roi_threshold: 25.0,
            roi_min_score: 75.0,
            renovation_cost_per_unit_area: 500.0,
            min_area_samples: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    pub key: ListingKey,
    pub investment_score: f64,
    pub price_per_unit_area: Option<f64>,
    pub area_average: Option<f64>,
    /// Percent below (+) or above (-) the area average
    pub price_difference: Option<f64>,
    pub estimated_roi: Option<f64>,
    pub is_bargain: bool,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn assess(listing: &Listing, area_average: Option<f64>, thresholds: &BargainThresholds) -> Opportunity {
    let score = listing.investment_score.unwrap_or(0.0);
    let ppu = listing.price_per_unit_area;
    let avg = area_average.filter(|a| *a > 0.0);

    let price_difference = match (ppu, avg) {
        (Some(ppu), Some(avg)) => Some(round2((avg - ppu) / avg * 100.0)),
        _ => None,
    };

    let mut is_bargain = price_difference
        .map_or(false, |d| d >= thresholds.min_price_difference && score >= thresholds.min_score);

    let estimated_roi = match (listing.operation_type.as_deref(), listing.price, listing.size, avg) {
        (Some("sale"), Some(price), Some(size), Some(avg)) => {
            let renovation = if listing.condition == Condition::NeedsRenovation {
                size * thresholds.renovation_cost_per_unit_area
            } else {
                0.0
            };
            let invested = price + renovation;
            (invested > 0.0).then(|| round2((size * avg - invested) / invested * 100.0))
        }
        _ => None,
    };

    if thresholds.roi_override {
        if let Some(roi) = estimated_roi {
            if roi >= thresholds.roi_threshold && score >= thresholds.roi_min_score {
                is_bargain = true;
            }
        }
    }

    Opportunity {
        key: listing.key(),
        investment_score: score,
        price_per_unit_area: ppu,
        area_average: avg,
        price_difference,
        estimated_roi,
        is_bargain,
    }
}

/// Area average price per unit area, from the neighborhood when it has
/// enough samples, otherwise from the whole city
pub async fn area_average(store: &dyn ListingStore, listing: &Listing, min_samples: usize) -> Option<f64> {
    let city = listing.city()?;
    let mut filter = ListingFilter {
        city: Some(city.to_string()),
        neighborhood: listing.neighborhood().map(str::to_string),
        require_price_per_unit_area: true,
        ..Default::default()
    };

    loop {
        match store.average(NumericField::PricePerUnitArea, &filter).await {
            Ok(Some(avg)) if avg.count >= min_samples => return Some(round2(avg.value)),
            Ok(_) if filter.neighborhood.is_some() => filter.neighborhood = None,
            Ok(_) => return None,
            Err(e) => {
                warn!("Error calculating area average price: {}", e);
                return None;
            }
        }
    }
}

/// Watches stored listings and reports bargains
pub struct BargainWatcher {
    store: Arc<dyn ListingStore>,
    thresholds: BargainThresholds,
}

impl BargainWatcher {
    pub fn new(store: Arc<dyn ListingStore>, thresholds: BargainThresholds) -> Self {
        Self { store, thresholds }
    }

    pub async fn evaluate(&self, listing: &Listing) -> Opportunity {
        let avg = area_average(self.store.as_ref(), listing, self.thresholds.min_area_samples).await;
        assess(listing, avg, &self.thresholds)
    }

    /// Consume events until the bus closes. Returns the number of bargains found.
    pub async fn run(self, mut events: Receiver<ListingEvent>) -> usize {
        let mut bargains = 0;
        loop {
            match events.recv().await {
                Ok(ListingEvent::Stored { listing, change, .. }) => {
                    if change == ChangeKind::Unchanged {
                        continue;
                    }
                    let opportunity = self.evaluate(&listing).await;
                    if opportunity.is_bargain {
                        bargains += 1;
                        info!(
                            "🏠 Bargain: {} at {:?} ({:?}% below area, ROI {:?}%, score {})",
                            listing.url,
                            listing.price,
                            opportunity.price_difference,
                            opportunity.estimated_roi,
                            opportunity.investment_score
                        );
                    } else {
                        debug!("{} is not a bargain", opportunity.key);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Bargain watcher lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        bargains
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawListing;
    use crate::pipeline::ListingStateTracker;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn listing(id: &str, price: f64, size: f64, score: f64) -> Listing {
        let raw = RawListing {
            id: id.to_string(),
            source: "idealista".to_string(),
            url: format!("https://example.test/{}", id),
            operation_type: Some("sale".to_string()),
            price: Some(price),
            size: Some(size),
            location: crate::models::Location {
                city: Some("Madrid".to_string()),
                neighborhood: Some("Centro".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let (mut l, _) = ListingStateTracker::apply(raw, None, Utc::now());
        l.investment_score = Some(score);
        l
    }

    #[test]
    fn test_cheap_high_score_listing_is_bargain() {
        let l = listing("1", 80_000.0, 100.0, 80.0);
        let o = assess(&l, Some(1000.0), &BargainThresholds::default());
        assert_eq!(o.price_difference, Some(20.0));
        assert_eq!(o.estimated_roi, Some(25.0));
        assert!(o.is_bargain);
    }

    #[test]
    fn test_roi_override_can_be_disabled() {
        // 10% below average is not enough on its own, ROI 11.11% is too low as well
        let l = listing("1", 90_000.0, 100.0, 90.0);
        assert!(!assess(&l, Some(1000.0), &BargainThresholds::default()).is_bargain);

        // renovation-free ROI of 25% with a 76 score trips only the override
        let thresholds = BargainThresholds {
            min_price_difference: 50.0,
            ..Default::default()
        };
        let l = listing("2", 80_000.0, 100.0, 76.0);
        assert!(assess(&l, Some(1000.0), &thresholds).is_bargain);
        let strict = BargainThresholds {
            roi_override: false,
            ..thresholds
        };
        assert!(!assess(&l, Some(1000.0), &strict).is_bargain);
    }

    #[test]
    fn test_renovation_cost_lowers_roi() {
        let mut l = listing("1", 80_000.0, 100.0, 80.0);
        l.condition = Condition::NeedsRenovation;
        let o = assess(&l, Some(1000.0), &BargainThresholds::default());
        // (100_000 - 130_000) / 130_000
        assert_eq!(o.estimated_roi, Some(-23.08));
    }

    #[test]
    fn test_no_average_means_no_bargain() {
        let l = listing("1", 10_000.0, 100.0, 100.0);
        let o = assess(&l, None, &BargainThresholds::default());
        assert_eq!(o.price_difference, None);
        assert!(!o.is_bargain);
    }

    #[tokio::test]
    async fn test_area_average_falls_back_to_city() {
        let mut listings = vec![];
        for i in 0..5 {
            let mut l = listing(&format!("c{}", i), 100_000.0, 100.0, 50.0);
            l.location.neighborhood = Some("Salamanca".to_string());
            listings.push(l);
        }
        listings.push(listing("n1", 300_000.0, 100.0, 50.0));
        let store = MemoryStore::from_listings(listings);

        let subject = listing("s", 100_000.0, 100.0, 50.0);
        // Centro has one sample, below the minimum of five
        let avg = area_average(&store, &subject, 5).await.unwrap();
        assert!((avg - 1333.33).abs() < 0.01);
    }
}
