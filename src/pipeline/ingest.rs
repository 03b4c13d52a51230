use crate::models::{Listing, ListingKey, RawListing, ValidationError};
use crate::pipeline::events::{EventBus, ListingEvent};
use crate::pipeline::scoring::InvestmentScorer;
use crate::pipeline::state::ListingStateTracker;
use crate::store::{ListingStore, StoreError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid listing: {0}")]
    Invalid(#[from] ValidationError),
    #[error("store operation failed for {key}: {source}")]
    Store {
        key: ListingKey,
        #[source]
        source: StoreError,
    },
    #[error("duplicate key on upsert for {0}; concurrent ingestion of the same key")]
    DataIntegrity(ListingKey),
}

type LockMap = DashMap<ListingKey, Arc<AsyncMutex<()>>>;

/// One async mutex per listing key, created on demand and dropped when the
/// last holder or waiter releases it.
#[derive(Default)]
pub struct KeyedLocks {
    entries: Arc<LockMap>,
}

pub struct KeyGuard {
    key: ListingKey,
    entry: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    entries: Arc<LockMap>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &ListingKey) -> KeyGuard {
        let entry = Arc::clone(self.entries.entry(key.clone()).or_default().value());
        // built before waiting so a cancelled waiter still cleans up its entry
        let mut held = KeyGuard {
            key: key.clone(),
            entry,
            guard: None,
            entries: Arc::clone(&self.entries),
        };
        held.guard = Some(Arc::clone(&held.entry).lock_owned().await);
        held
    }

    /// Number of keys currently locked or awaited
    pub fn active(&self) -> usize {
        self.entries.len()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        // map + this guard; anything more is a waiter that still needs the entry
        self.entries.remove_if(&self.key, |_, entry| {
            Arc::ptr_eq(entry, &self.entry) && Arc::strong_count(entry) == 2
        });
    }
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Per-record unit of work: lookup, merge, score, upsert, publish.
///
/// Ingestions of the same key are serialized; different keys run freely.
pub struct IngestionPipeline {
    store: Arc<dyn ListingStore>,
    scorer: InvestmentScorer,
    events: Arc<EventBus>,
    locks: KeyedLocks,
    clock: Clock,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn ListingStore>, scorer: InvestmentScorer, events: Arc<EventBus>) -> Self {
        Self {
            store,
            scorer,
            events,
            locks: KeyedLocks::new(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn ListingStore> {
        &self.store
    }

    pub async fn ingest(&self, raw: RawListing) -> Result<Listing, IngestError> {
        let raw = raw.validate()?;
        let key = raw.key();

        let _lock = self.locks.lock(&key).await;

        let existing = self
            .store
            .find_one(&key)
            .await
            .map_err(|source| IngestError::Store {
                key: key.clone(),
                source,
            })?;

        let now = (self.clock)();
        let (mut listing, change) = ListingStateTracker::apply(raw, existing.as_ref(), now);

        let outcome = self.scorer.score(&listing).await;
        listing.investment_score = Some(outcome.score);
        listing.comparable_listings = outcome.comparables;

        match self.store.upsert(listing.clone(), existing.is_some()).await {
            Ok(()) => {}
            Err(StoreError::DuplicateKey(dup)) => {
                error!("Duplicate key error for property {}", dup);
                return Err(IngestError::DataIntegrity(dup));
            }
            Err(source) => {
                error!("Error saving property {}: {}", key, source);
                return Err(IngestError::Store { key, source });
            }
        }

        // Published under the key lock: events for one key follow upsert order
        debug!("Saved property {} ({:?})", key, change);
        self.events.publish(ListingEvent::Stored {
            listing: Box::new(listing.clone()),
            change,
            method: outcome.method,
        });

        Ok(listing)
    }
}
