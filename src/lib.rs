//! Listing ingestion for the housing scout: resilient fetching, price
//! history tracking and investment scoring of real-estate listings.

pub mod analysis;
pub mod config;
pub mod fetch;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod scrapers;
pub mod store;

pub use config::AppConfig;
pub use models::{Listing, ListingKey, RawListing};
pub use pipeline::IngestionPipeline;
pub use scheduler::Scheduler;
