use crate::models::PageFilter;
use crate::traits::VectorStore;
use crate::VectorStoreError;
use tracing::{debug, warn};

/// How the guard decides that a document is already in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GuardStrategy {
    /// Any record for the document, on any page.
    #[default]
    Exact,
    /// Only records on pages strictly between `after` and `before`.
    PageWindow { after: u32, before: u32 },
}

impl GuardStrategy {
    /// Only pages 2..=7 are checked.
    pub const MIDDLE_PAGES: GuardStrategy = GuardStrategy::PageWindow {
        after: 1,
        before: 8,
    };

    pub fn page_filter(&self) -> PageFilter {
        match *self {
            GuardStrategy::Exact => PageFilter::All,
            GuardStrategy::PageWindow { after, before } => PageFilter::Between { after, before },
        }
    }
}

/// Skips re-ingestion of documents that already have records.
pub struct DuplicateGuard<'a, S: ?Sized> {
    store: &'a S,
    strategy: GuardStrategy,
}

impl<'a, S> DuplicateGuard<'a, S>
where
    S: VectorStore + ?Sized,
{
    pub fn new(store: &'a S, strategy: GuardStrategy) -> Self {
        Self { store, strategy }
    }

    /// Never fails: store errors are logged and reported as "not indexed".
    pub async fn is_indexed(&self, collection: &str, document_id: &str) -> bool {
        match self.check(collection, document_id).await {
            Ok(found) => {
                debug!(collection, document_id, found, strategy = ?self.strategy, "duplicate check");
                found
            }
            Err(error) => {
                warn!(collection, document_id, %error, "duplicate check failed, treating document as new");
                false
            }
        }
    }

    async fn check(&self, collection: &str, document_id: &str) -> Result<bool, VectorStoreError> {
        if !self.store.collection_exists(collection).await? {
            return Ok(false);
        }
        let count = self
            .store
            .count_document(collection, document_id, self.strategy.page_filter())
            .await?;
        Ok(count > 0)
    }
}
