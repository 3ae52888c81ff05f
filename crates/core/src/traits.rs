use crate::models::{EmbeddedRecord, EmbeddingModelInfo, PageFilter, RetrievedChunk};
use crate::VectorStoreError;
use async_trait::async_trait;

/// Persistence and cosine top-k search over named collections.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn collection_exists(&self, collection: &str) -> Result<bool, VectorStoreError>;

    /// Creates the collection for `model` if missing, or checks that the
    /// existing one was built with the same model.
    async fn ensure_collection(
        &self,
        collection: &str,
        model: &EmbeddingModelInfo,
    ) -> Result<(), VectorStoreError>;

    /// Embedding model recorded for the collection; `None` when the backend has
    /// nothing to read it from yet.
    async fn collection_model(&self, collection: &str)
        -> Result<Option<String>, VectorStoreError>;

    /// Stores the records under freshly assigned ids and returns how many were written.
    async fn upsert(
        &self,
        collection: &str,
        records: &[EmbeddedRecord],
    ) -> Result<usize, VectorStoreError>;

    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, VectorStoreError>;

    async fn count_document(
        &self,
        collection: &str,
        document_id: &str,
        pages: PageFilter,
    ) -> Result<u64, VectorStoreError>;

    /// Deletes the whole collection. Missing collections are not an error.
    async fn drop_collection(&self, collection: &str) -> Result<(), VectorStoreError>;
}
