use crate::models::{Listing, ListingKey};
use crate::store::{
    Average, ListingFilter, ListingQuery, ListingStore, MemoryStore, NumericField, StoreResult,
    TextField,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// [`MemoryStore`] persisted as a pretty-printed JSON array after every write
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
    flush: Mutex<()>,
}

impl JsonFileStore {
    /// Open the snapshot at `path`, starting empty if it does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        let listings: Vec<Listing> = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        info!("💾 Loaded {} listings from {}", listings.len(), path.display());

        Ok(Self {
            path,
            inner: MemoryStore::from_listings(listings),
            flush: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> StoreResult<()> {
        let _guard = self.flush.lock().await;
        let listings = self.inner.all().await;
        let json = serde_json::to_string_pretty(&listings)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("Saved {} listings to {}", listings.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl ListingStore for JsonFileStore {
    async fn find_one(&self, key: &ListingKey) -> StoreResult<Option<Listing>> {
        self.inner.find_one(key).await
    }

    async fn upsert(&self, listing: Listing, expect_existing: bool) -> StoreResult<()> {
        self.inner.upsert(listing, expect_existing).await?;
        self.persist().await
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawListing;
    use crate::pipeline::state::ListingStateTracker;
    use chrono::Utc;

    fn listing(id: &str, price: f64) -> Listing {
        let raw = RawListing {
            id: id.to_string(),
            source: "booli".to_string(),
            url: format!("https://www.booli.se/annons/{}", id),
            price: Some(price),
            size: Some(50.0),
            ..Default::default()
        };
        ListingStateTracker::apply(raw, None, Utc::now()).0
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("listings.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        store.upsert(listing("a", 1_000_000.0), false).await.unwrap();
        store.upsert(listing("b", 2_000_000.0), false).await.unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let found = reopened
            .find_one(&ListingKey::new("b", "booli"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.price, Some(2_000_000.0));
        assert_eq!(found.price_per_unit_area, Some(40_000.0));
    }

    #[tokio::test]
    async fn test_missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("none.json")).await.unwrap();
        let all = store.find(&ListingQuery::default()).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(JsonFileStore::open(&path).await.is_err());
    }
}
