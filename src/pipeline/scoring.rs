use crate::models::{ComparableRef, Listing, MAX_COMPARABLES};
use crate::pipeline::model::{features, ModelRegistry, ScoringStrategy};
use crate::store::{ListingFilter, ListingQuery, ListingStore, NumericField};
use std::sync::Arc;
use tracing::{debug, warn};

pub const NEUTRAL_SCORE: f64 = 50.0;
/// Relative size/price tolerance for comparables
pub const COMPARABLE_TOLERANCE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreMethod {
    Model,
    AreaAverage { average: f64 },
    Neutral,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub score: f64,
    pub comparables: Vec<ComparableRef>,
    pub method: ScoreMethod,
}

/// `clamp(100 * (2 - ppu / average), 0, 100)`
pub fn heuristic_score(price_per_unit_area: f64, area_average: f64) -> f64 {
    let ratio = price_per_unit_area / area_average;
    clamp_score(100.0 * (2.0 - ratio))
}

/// Clamp into [0, 100] and round to cents; non-finite input is neutral
pub fn clamp_score(raw: f64) -> f64 {
    if !raw.is_finite() {
        return NEUTRAL_SCORE;
    }
    (raw.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

/// Scores listings for investment potential. Best effort: never fails.
pub struct InvestmentScorer {
    store: Arc<dyn ListingStore>,
    models: Arc<ModelRegistry>,
}

impl InvestmentScorer {
    pub fn new(store: Arc<dyn ListingStore>, models: Arc<ModelRegistry>) -> Self {
        Self { store, models }
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    pub async fn score(&self, listing: &Listing) -> ScoreOutcome {
        let (score, method) = match self.models.strategy() {
            ScoringStrategy::Trained(model) => match features(listing) {
                Some(input) => {
                    let raw = model.predict(&input);
                    if raw.is_finite() {
                        (clamp_score(raw), ScoreMethod::Model)
                    } else {
                        warn!("Model produced {} for {}, using heuristic", raw, listing.key());
                        self.heuristic(listing).await
                    }
                }
                None => self.heuristic(listing).await,
            },
            ScoringStrategy::Heuristic => self.heuristic(listing).await,
        };

        let comparables = self.comparables(listing).await;
        debug!(
            "Scored {} at {} ({:?}, {} comparables)",
            listing.key(),
            score,
            method,
            comparables.len()
        );

        ScoreOutcome {
            score,
            comparables,
            method,
        }
    }

    async fn heuristic(&self, listing: &Listing) -> (f64, ScoreMethod) {
        let neutral = (NEUTRAL_SCORE, ScoreMethod::Neutral);

        let (Some(ppu), Some(city)) = (listing.price_per_unit_area, listing.city()) else {
            return neutral;
        };

        let filter = ListingFilter {
            city: Some(city.to_string()),
            neighborhood: listing.neighborhood().map(str::to_string),
            exclude: Some(listing.key()),
            require_price_per_unit_area: true,
            ..Default::default()
        };

        match self.store.average(NumericField::PricePerUnitArea, &filter).await {
            Ok(Some(avg)) if avg.value > 0.0 => (
                heuristic_score(ppu, avg.value),
                ScoreMethod::AreaAverage { average: avg.value },
            ),
            Ok(_) => neutral,
            Err(e) => {
                warn!("Area average lookup failed for {}: {}", listing.key(), e);
                neutral
            }
        }
    }

    /// Same city, size and price within tolerance, subject excluded
    pub async fn comparables(&self, listing: &Listing) -> Vec<ComparableRef> {
        let (Some(city), Some(price), Some(size)) = (listing.city(), listing.price, listing.size)
        else {
            return Vec::new();
        };

        let filter = ListingFilter {
            city: Some(city.to_string()),
            size_range: Some(tolerance_range(size)),
            price_range: Some(tolerance_range(price)),
            exclude: Some(listing.key()),
            ..Default::default()
        };
        let query = ListingQuery::new(filter).limit(MAX_COMPARABLES);

        match self.store.find(&query).await {
            Ok(found) => found
                .iter()
                .filter(|l| l.id != listing.id || l.source != listing.source)
                .take(MAX_COMPARABLES)
                .map(ComparableRef::from)
                .collect(),
            Err(e) => {
                warn!("Comparable lookup failed for {}: {}", listing.key(), e);
                Vec::new()
            }
        }
    }
}

fn tolerance_range(value: f64) -> (f64, f64) {
    (
        value * (1.0 - COMPARABLE_TOLERANCE),
        value * (1.0 + COMPARABLE_TOLERANCE),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_reference_points() {
        assert_eq!(heuristic_score(1000.0, 1000.0), 100.0);
        assert_eq!(heuristic_score(2000.0, 1000.0), 0.0);
        assert_eq!(heuristic_score(500.0, 1000.0), 100.0);
        assert_eq!(heuristic_score(1500.0, 1000.0), 50.0);
        assert_eq!(heuristic_score(5000.0, 1000.0), 0.0);
    }

    #[test]
    fn test_clamp_score_bounds_and_rounding() {
        assert_eq!(clamp_score(-12.0), 0.0);
        assert_eq!(clamp_score(250.0), 100.0);
        assert_eq!(clamp_score(33.33333), 33.33);
        assert_eq!(clamp_score(f64::NAN), NEUTRAL_SCORE);
        assert_eq!(clamp_score(f64::INFINITY), NEUTRAL_SCORE);
    }

    #[test]
    fn test_tolerance_range() {
        let (lo, hi) = tolerance_range(100.0);
        assert!((lo - 80.0).abs() < 1e-9);
        assert!((hi - 120.0).abs() < 1e-9);
    }
}
