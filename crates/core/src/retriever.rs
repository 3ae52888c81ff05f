use crate::embeddings::Embedder;
use crate::error::QueryError;
use crate::models::QueryResult;
use crate::traits::VectorStore;
use crate::VectorStoreError;
use std::time::Instant;
use tracing::info;

/// Top-k cosine retrieval against one collection.
pub struct Retriever<'a, S: ?Sized, E: ?Sized> {
    store: &'a S,
    embedder: &'a E,
    collection: String,
}

impl<'a, S, E> Retriever<'a, S, E>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
{
    pub fn new(store: &'a S, embedder: &'a E, collection: impl Into<String>) -> Self {
        Self {
            store,
            embedder,
            collection: collection.into(),
        }
    }

    /// Returns at most `k` chunks, most similar first.
    ///
    /// Refuses to search a collection built with a different embedding model.
    pub async fn search(&self, query: &str, k: usize) -> Result<QueryResult, QueryError> {
        if k == 0 {
            return Ok(QueryResult::default());
        }

        if !self.store.collection_exists(&self.collection).await? {
            return Err(VectorStoreError::MissingCollection(self.collection.clone()).into());
        }
        if let Some(stored) = self.store.collection_model(&self.collection).await? {
            if stored != self.embedder.model_id() {
                return Err(VectorStoreError::ModelMismatch {
                    collection: self.collection.clone(),
                    stored,
                    requested: self.embedder.model_id().to_string(),
                }
                .into());
            }
        }

        let query_vector = self.embedder.embed(query).await?;
        let started = Instant::now();
        let hits = self
            .store
            .search(&self.collection, &query_vector, k)
            .await?;

        info!(
            collection = %self.collection,
            k,
            hits = hits.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieved chunks"
        );
        Ok(hits.into_iter().take(k).collect())
    }
}
