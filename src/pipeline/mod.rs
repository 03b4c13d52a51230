pub mod events;
pub mod ingest;
pub mod model;
pub mod scoring;
pub mod state;

pub use events::{EventBus, ListingEvent};
pub use ingest::{IngestError, IngestionPipeline, KeyedLocks};
pub use model::{
    FeatureVector, ModelRegistry, RetrainOutcome, ScoreModel, ScoringStrategy, Trainer,
    TrainingExample,
};
pub use scoring::{InvestmentScorer, ScoreMethod, ScoreOutcome, NEUTRAL_SCORE};
pub use state::{ChangeKind, ListingStateTracker};
