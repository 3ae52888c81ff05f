use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, IngestError};
use crate::models::{ChunkRecord, EmbeddedRecord};
use crate::traits::VectorStore;
use crate::VectorStoreError;
use tracing::{debug, info, warn};

pub const DEFAULT_EMBED_BATCH_SIZE: usize = 64;

/// Embeds chunk records and upserts them into one collection.
pub struct Writer<'a, S: ?Sized, E: ?Sized> {
    store: &'a S,
    embedder: &'a E,
    collection: String,
    batch_size: usize,
}

impl<'a, S, E> Writer<'a, S, E>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
{
    pub fn new(store: &'a S, embedder: &'a E, collection: impl Into<String>) -> Self {
        Self {
            store,
            embedder,
            collection: collection.into(),
            batch_size: DEFAULT_EMBED_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Embeds every record, then writes them in a single upsert.
    ///
    /// Any embedding or store failure fails the whole call; records already
    /// accepted by the store before the failure are not rolled back.
    pub async fn write(&self, records: &[ChunkRecord]) -> Result<usize, IngestError> {
        if records.is_empty() {
            return Ok(0);
        }

        let model = self.embedder.model_info();
        self.store
            .ensure_collection(&self.collection, &model)
            .await?;

        let mut embedded = Vec::with_capacity(records.len());
        for batch in records.chunks(self.batch_size) {
            let texts = batch
                .iter()
                .map(|record| record.text.clone())
                .collect::<Vec<_>>();
            let vectors = self.embedder.embed_many(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "received {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                ))
                .into());
            }

            embedded.extend(batch.iter().zip(vectors).map(|(record, vector)| EmbeddedRecord {
                record: record.clone(),
                vector,
                embedding_model: model.model_id.clone(),
            }));
            debug!(embedded = embedded.len(), total = records.len(), "embedded batch");
        }

        let written = self.store.upsert(&self.collection, &embedded).await?;
        info!(
            collection = %self.collection,
            backend = self.store.backend(),
            written,
            "wrote chunk records"
        );
        Ok(written)
    }

    /// Irreversibly deletes the whole collection.
    pub async fn drop_collection(&self) -> Result<(), VectorStoreError> {
        warn!(collection = %self.collection, backend = self.store.backend(), "dropping collection");
        self.store.drop_collection(&self.collection).await
    }
}
