use crate::models::{Listing, ListingKey};
use crate::store::{
    Average, ListingFilter, ListingQuery, ListingStore, NumericField, StoreError, StoreResult,
    TextField,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

/// Listings held in memory, keyed by (id, source).
///
/// Iteration follows key order so query results are stable.
#[derive(Debug, Default)]
pub struct MemoryStore {
    listings: RwLock<BTreeMap<ListingKey, Listing>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_listings(listings: impl IntoIterator<Item = Listing>) -> Self {
        let map = listings.into_iter().map(|l| (l.key(), l)).collect();
        Self {
            listings: RwLock::new(map),
        }
    }

    pub async fn len(&self) -> usize {
        self.listings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.listings.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<Listing> {
        self.listings.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn find_one(&self, key: &ListingKey) -> StoreResult<Option<Listing>> {
        Ok(self.listings.read().await.get(key).cloned())
    }

    async fn upsert(&self, listing: Listing, expect_existing: bool) -> StoreResult<()> {
        let key = listing.key();
        let mut listings = self.listings.write().await;
        if !expect_existing && listings.contains_key(&key) {
            return Err(StoreError::DuplicateKey(key));
        }
        listings.insert(key, listing);
        Ok(())
    }

    async fn find(&self, query: &ListingQuery) -> StoreResult<Vec<Listing>> {
        let matched: Vec<Listing> = self
            .listings
            .read()
            .await
            .values()
            .filter(|l| query.filter.matches(l))
            .cloned()
            .collect();
        Ok(query.finish(matched))
    }

    async fn average(&self, field: NumericField, filter: &ListingFilter) -> StoreResult<Option<Average>> {
        let listings = self.listings.read().await;
        let (sum, count) = listings
            .values()
            .filter(|l| filter.matches(l))
            .filter_map(|l| field.value(l))
            .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

        if count == 0 {
            return Ok(None);
        }
        Ok(Some(Average {
            value: sum / count as f64,
            count,
        }))
    }

    async fn distinct(&self, field: TextField, filter: &ListingFilter) -> StoreResult<Vec<String>> {
        let listings = self.listings.read().await;
        let values: BTreeSet<String> = listings
            .values()
            .filter(|l| filter.matches(l))
            .filter_map(|l| field.value(l))
            .map(str::to_string)
            .collect();
        Ok(values.into_iter().collect())
    }
}
