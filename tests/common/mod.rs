#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use housing_ingest::fetch::{OutboundRequest, RawResponse, Transport};
use housing_ingest::models::{Listing, ListingKey, Location, RawListing};
use housing_ingest::pipeline::ingest::Clock;
use housing_ingest::pipeline::{EventBus, IngestionPipeline, InvestmentScorer, ModelRegistry};
use housing_ingest::store::{
    Average, ListingFilter, ListingQuery, ListingStore, MemoryStore, NumericField, StoreError,
    StoreResult, TextField,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

pub fn raw(id: &str, price: Option<f64>, size: Option<f64>) -> RawListing {
    RawListing {
        id: id.to_string(),
        source: "s".to_string(),
        url: format!("https://example.test/{}", id),
        price,
        size,
        ..Default::default()
    }
}

pub fn raw_in(id: &str, city: &str, neighborhood: Option<&str>, price: f64, size: f64) -> RawListing {
    RawListing {
        location: Location {
            city: Some(city.to_string()),
            neighborhood: neighborhood.map(str::to_string),
            ..Default::default()
        },
        ..raw(id, Some(price), Some(size))
    }
}

/// Clock that moves forward by `step` on every reading
pub fn stepping_clock(start: DateTime<Utc>, step: Duration) -> Clock {
    let ticks = Arc::new(AtomicI64::new(0));
    Arc::new(move || {
        let n = ticks.fetch_add(1, Ordering::SeqCst);
        start + step * n as i32
    })
}

pub struct Harness {
    pub store: Arc<dyn ListingStore>,
    pub models: Arc<ModelRegistry>,
    pub events: Arc<EventBus>,
    pub pipeline: Arc<IngestionPipeline>,
}

pub fn harness_with(store: Arc<dyn ListingStore>) -> Harness {
    let models = Arc::new(ModelRegistry::default());
    let events = Arc::new(EventBus::new(64));
    let scorer = InvestmentScorer::new(Arc::clone(&store), Arc::clone(&models));
    let pipeline = IngestionPipeline::new(Arc::clone(&store), scorer, Arc::clone(&events))
        .with_clock(stepping_clock(Utc::now() - Duration::days(30), Duration::hours(1)));
    Harness {
        store,
        models,
        events,
        pipeline: Arc::new(pipeline),
    }
}

pub fn harness() -> Harness {
    harness_with(Arc::new(MemoryStore::new()))
}

/// Store whose query operations are down; point lookups and upserts work
pub struct QueryOutageStore {
    pub inner: MemoryStore,
}

#[async_trait]
impl ListingStore for QueryOutageStore {
    async fn find_one(&self, key: &ListingKey) -> StoreResult<Option<Listing>> {
        self.inner.find_one(key).await
    }

    async fn upsert(&self, listing: Listing, expect_existing: bool) -> StoreResult<()> {
        self.inner.upsert(listing, expect_existing).await
    }

    async fn find(&self, _query: &ListingQuery) -> StoreResult<Vec<Listing>> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn average(&self, _field: NumericField, _filter: &ListingFilter) -> StoreResult<Option<Average>> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn distinct(&self, _field: TextField, _filter: &ListingFilter) -> StoreResult<Vec<String>> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// Store that never finds anything on lookup, simulating a lost race
pub struct BlindLookupStore {
    pub inner: MemoryStore,
}

#[async_trait]
impl ListingStore for BlindLookupStore {
    async fn find_one(&self, _key: &ListingKey) -> StoreResult<Option<Listing>> {
        Ok(None)
    }

    async fn upsert(&self, listing: Listing, expect_existing: bool) -> StoreResult<()> {
        self.inner.upsert(listing, expect_existing).await
    }

    async fn find(&self, query: &ListingQuery) -> StoreResult<Vec<Listing>> {
        self.inner.find(query).await
    }

    async fn average(&self, field: NumericField, filter: &ListingFilter) -> StoreResult<Option<Average>> {
        self.inner.average(field, filter).await
    }

    async fn distinct(&self, field: TextField, filter: &ListingFilter) -> StoreResult<Vec<String>> {
        self.inner.distinct(field, filter).await
    }
}

/// Store that yields between lookup and write so unsynchronized
/// read-modify-write cycles would interleave
pub struct SlowStore {
    pub inner: MemoryStore,
}

#[async_trait]
impl ListingStore for SlowStore {
    async fn find_one(&self, key: &ListingKey) -> StoreResult<Option<Listing>> {
        let found = self.inner.find_one(key).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        found
    }

    async fn upsert(&self, listing: Listing, expect_existing: bool) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.upsert(listing, expect_existing).await
    }

    async fn find(&self, query: &ListingQuery) -> StoreResult<Vec<Listing>> {
        self.inner.find(query).await
    }

    async fn average(&self, field: NumericField, filter: &ListingFilter) -> StoreResult<Option<Average>> {
        self.inner.average(field, filter).await
    }

    async fn distinct(&self, field: TextField, filter: &ListingFilter) -> StoreResult<Vec<String>> {
        self.inner.distinct(field, filter).await
    }
}

type Responder = dyn Fn(&OutboundRequest) -> Result<RawResponse> + Send + Sync;

/// Transport answering from a closure and recording every request
pub struct FakeTransport {
    responder: Box<Responder>,
    pub sent: Mutex<Vec<OutboundRequest>>,
}

impl FakeTransport {
    pub fn new(responder: impl Fn(&OutboundRequest) -> Result<RawResponse> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn always(status: u16, body: &str) -> Self {
        let body = body.to_string();
        Self::new(move |_| {
            Ok(RawResponse {
                status,
                body: body.clone(),
            })
        })
    }

    pub fn failing(cause: &str) -> Self {
        let cause = cause.to_string();
        Self::new(move |_| Err(anyhow!(cause.clone())))
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<RawResponse> {
        self.sent.lock().unwrap().push(request.clone());
        (self.responder)(request)
    }
}

/// Transport whose requests never complete
#[derive(Default)]
pub struct StalledTransport {
    pub sent: Mutex<Vec<OutboundRequest>>,
}

#[async_trait]
impl Transport for StalledTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<RawResponse> {
        self.sent.lock().unwrap().push(request.clone());
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Err(anyhow!("stalled transport woke up"))
    }
}
