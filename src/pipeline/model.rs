use crate::models::Listing;
use crate::store::{ListingFilter, ListingQuery, ListingStore};
use anyhow::{Context, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{error, info};

pub const FEATURE_COUNT: usize = 5;
pub const MIN_TRAINING_EXAMPLES: usize = 10;

/// `[price_per_unit_area, size, rooms, bathrooms, has_elevator]`
pub type FeatureVector = [f64; FEATURE_COUNT];

/// Model input for a listing. `None` without a price per unit area.
pub fn features(listing: &Listing) -> Option<FeatureVector> {
    let ppu = listing.price_per_unit_area?;
    Some([
        ppu,
        listing.size.unwrap_or(0.0),
        listing.rooms.unwrap_or(0) as f64,
        listing.bathrooms.unwrap_or(0) as f64,
        if listing.has_elevator.unwrap_or(false) { 1.0 } else { 0.0 },
    ])
}

/// Listings that sell fast are labeled as better investments
pub fn training_label(days_listed: i64) -> f64 {
    100.0 / days_listed.max(1) as f64
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub features: FeatureVector,
    pub label: f64,
}

impl TrainingExample {
    pub fn from_listing(listing: &Listing) -> Option<Self> {
        Some(Self {
            features: features(listing)?,
            label: training_label(listing.days_listed),
        })
    }
}

pub trait ScoreModel: Send + Sync {
    /// Raw prediction; the scorer clamps it into [0, 100]
    fn predict(&self, features: &FeatureVector) -> f64;
}

/// Fits a model from examples. Runs on a blocking thread.
pub trait Trainer: Send + Sync {
    fn train(&self, examples: &[TrainingExample]) -> Result<Arc<dyn ScoreModel>>;
}

/// Scoring path chosen once per scoring call
#[derive(Clone)]
pub enum ScoringStrategy {
    Trained(Arc<dyn ScoreModel>),
    Heuristic,
}

impl fmt::Debug for ScoringStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringStrategy::Trained(_) => write!(f, "Trained"),
            ScoringStrategy::Heuristic => write!(f, "Heuristic"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainOutcome {
    Trained { examples: usize },
    Skipped { examples: usize },
    AlreadyRunning,
}

/// Holds the current model snapshot.
///
/// Readers clone the `Arc` and never wait for a retrain; a finished retrain
/// swaps the snapshot in one write.
pub struct ModelRegistry {
    current: RwLock<Option<Arc<dyn ScoreModel>>>,
    retraining: AtomicBool,
    min_examples: usize,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(MIN_TRAINING_EXAMPLES)
    }
}

struct RetrainGuard<'a>(&'a AtomicBool);

impl Drop for RetrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ModelRegistry {
    pub fn new(min_examples: usize) -> Self {
        Self {
            current: RwLock::new(None),
            retraining: AtomicBool::new(false),
            min_examples,
        }
    }

    pub fn strategy(&self) -> ScoringStrategy {
        let current = self.current.read().unwrap_or_else(|p| p.into_inner());
        match current.as_ref() {
            Some(model) => ScoringStrategy::Trained(Arc::clone(model)),
            None => ScoringStrategy::Heuristic,
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.strategy(), ScoringStrategy::Trained(_))
    }

    pub fn install(&self, model: Arc<dyn ScoreModel>) {
        let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
        *current = Some(model);
    }

    /// Rebuild the model from every stored listing with a price per unit area.
    ///
    /// With fewer than `min_examples` examples nothing is trained and the
    /// current snapshot stays in place.
    pub async fn retrain(
        &self,
        store: &dyn ListingStore,
        trainer: Arc<dyn Trainer>,
    ) -> Result<RetrainOutcome> {
        if self
            .retraining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(RetrainOutcome::AlreadyRunning);
        }
        let _guard = RetrainGuard(&self.retraining);

        let query = ListingQuery::new(ListingFilter {
            require_price_per_unit_area: true,
            ..Default::default()
        });
        let listings = store
            .find(&query)
            .await
            .context("Failed to load training listings")?;

        let examples: Vec<TrainingExample> =
            listings.iter().filter_map(TrainingExample::from_listing).collect();

        if examples.len() < self.min_examples {
            info!(
                "Not enough data to train investment model ({} examples). Will use default scoring.",
                examples.len()
            );
            return Ok(RetrainOutcome::Skipped {
                examples: examples.len(),
            });
        }

        let count = examples.len();
        let model = tokio::task::spawn_blocking(move || trainer.train(&examples))
            .await
            .context("Training task panicked")?
            .map_err(|e| {
                error!("Error training investment model: {:#}", e);
                e
            })?;

        self.install(model);
        info!("Trained investment analysis model on {} properties", count);
        Ok(RetrainOutcome::Trained { examples: count })
    }
}
