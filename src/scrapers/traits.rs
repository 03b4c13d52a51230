use crate::fetch::Page;
use crate::models::RawListing;
use anyhow::Result;
use async_trait::async_trait;

/// A listing site the scheduler crawls.
///
/// The site supplies the pages to fetch and turns each fetched page into at
/// most one raw listing. Link discovery and pagination stay inside the site.
#[async_trait]
pub trait SiteSource: Send + Sync {
    /// Name stored as the listing source
    fn source_name(&self) -> &str;

    /// Page URLs to fetch this cycle
    async fn targets(&self) -> Result<Vec<String>>;

    /// Parse one fetched page. `Ok(None)` when the page holds no usable listing.
    fn extract(&self, page: &Page) -> Result<Option<RawListing>>;
}
