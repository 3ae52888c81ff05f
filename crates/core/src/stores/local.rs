//! Directory-backed index: one subdirectory per collection holding a
//! manifest, the serialized vectors and their source texts.

use crate::models::{
    ChunkMetadata, EmbeddedRecord, EmbeddingModelInfo, PageFilter, RetrievedChunk,
};
use crate::stores::{cosine_similarity, validate_collection};
use crate::traits::VectorStore;
use crate::VectorStoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

const BACKEND: &str = "local";
const MANIFEST_FILE: &str = "manifest.json";
const VECTORS_FILE: &str = "vectors.json";
const TEXTS_FILE: &str = "texts.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    pub embedding_model: String,
    pub dimensions: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    id: Uuid,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TextEntry {
    id: Uuid,
    text: String,
    metadata: ChunkMetadata,
}

/// Flat exact-search index kept fully in memory while in use.
#[derive(Debug, Clone)]
pub struct LocalIndex {
    pub manifest: IndexManifest,
    vectors: Vec<VectorEntry>,
    texts: Vec<TextEntry>,
}

impl LocalIndex {
    pub fn new(model: &EmbeddingModelInfo) -> Self {
        let now = Utc::now();
        Self {
            manifest: IndexManifest {
                embedding_model: model.model_id.clone(),
                dimensions: model.dimensions,
                created_at: now,
                updated_at: now,
            },
            vectors: Vec::new(),
            texts: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Appends records with fresh ids. Nothing is added if any record is rejected.
    pub fn insert(&mut self, records: &[EmbeddedRecord]) -> Result<usize, VectorStoreError> {
        for record in records {
            if record.embedding_model != self.manifest.embedding_model {
                return Err(VectorStoreError::ModelMismatch {
                    collection: String::new(),
                    stored: self.manifest.embedding_model.clone(),
                    requested: record.embedding_model.clone(),
                });
            }
            if record.vector.len() != self.manifest.dimensions {
                return Err(VectorStoreError::InvalidRequest(format!(
                    "embedding dimension {} != {}",
                    record.vector.len(),
                    self.manifest.dimensions
                )));
            }
        }

        for record in records {
            let id = Uuid::new_v4();
            self.vectors.push(VectorEntry {
                id,
                vector: record.vector.clone(),
            });
            self.texts.push(TextEntry {
                id,
                text: record.record.text.clone(),
                metadata: record.record.metadata.clone(),
            });
        }
        self.manifest.updated_at = Utc::now();
        Ok(records.len())
    }

    pub fn search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, VectorStoreError> {
        if query_vector.len() != self.manifest.dimensions {
            return Err(VectorStoreError::InvalidRequest(format!(
                "query dimension {} != {}",
                query_vector.len(),
                self.manifest.dimensions
            )));
        }

        let mut scored = self
            .vectors
            .iter()
            .zip(&self.texts)
            .map(|(entry, text)| RetrievedChunk {
                text: text.text.clone(),
                metadata: text.metadata.clone(),
                score: cosine_similarity(&entry.vector, query_vector),
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn count_document(&self, document_id: &str, pages: PageFilter) -> u64 {
        self.texts
            .iter()
            .filter(|entry| {
                entry.metadata.document_id == document_id && pages.contains(entry.metadata.page)
            })
            .count() as u64
    }

    pub async fn save(&self, dir: &Path) -> Result<(), VectorStoreError> {
        tokio::fs::create_dir_all(dir).await?;
        write_json(&dir.join(VECTORS_FILE), &self.vectors).await?;
        write_json(&dir.join(TEXTS_FILE), &self.texts).await?;
        write_json(&dir.join(MANIFEST_FILE), &self.manifest).await?;
        Ok(())
    }

    /// Loads the index in `dir`; `None` when no manifest exists there.
    pub async fn load(dir: &Path) -> Result<Option<Self>, VectorStoreError> {
        let Some(manifest) = read_json::<IndexManifest>(&dir.join(MANIFEST_FILE)).await? else {
            return Ok(None);
        };
        let vectors = read_json::<Vec<VectorEntry>>(&dir.join(VECTORS_FILE))
            .await?
            .unwrap_or_default();
        let texts = read_json::<Vec<TextEntry>>(&dir.join(TEXTS_FILE))
            .await?
            .unwrap_or_default();

        let aligned = vectors.len() == texts.len()
            && vectors.iter().zip(&texts).all(|(vector, text)| vector.id == text.id);
        if !aligned {
            return Err(VectorStoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("vectors and texts in {} are out of sync", dir.display()),
            });
        }

        Ok(Some(Self {
            manifest,
            vectors,
            texts,
        }))
    }

    /// Removes the index directory; returns whether anything was deleted.
    pub async fn delete(dir: &Path) -> Result<bool, VectorStoreError> {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), VectorStoreError> {
    let staged = path.with_extension("json.tmp");
    tokio::fs::write(&staged, serde_json::to_vec(value)?).await?;
    tokio::fs::rename(&staged, path).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, VectorStoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

/// `VectorStore` over a root directory of [`LocalIndex`] collections.
pub struct LocalIndexStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalIndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn collection_dir(&self, collection: &str) -> Result<PathBuf, VectorStoreError> {
        validate_collection(collection)?;
        Ok(self.root.join(collection))
    }

    async fn load_existing(&self, collection: &str) -> Result<LocalIndex, VectorStoreError> {
        LocalIndex::load(&self.collection_dir(collection)?)
            .await?
            .ok_or_else(|| VectorStoreError::MissingCollection(collection.to_string()))
    }
}

#[async_trait]
impl VectorStore for LocalIndexStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, VectorStoreError> {
        let manifest = self.collection_dir(collection)?.join(MANIFEST_FILE);
        Ok(tokio::fs::try_exists(manifest).await?)
    }

    async fn ensure_collection(
        &self,
        collection: &str,
        model: &EmbeddingModelInfo,
    ) -> Result<(), VectorStoreError> {
        let _guard = self.write_lock.lock().await;
        let dir = self.collection_dir(collection)?;

        match LocalIndex::load(&dir).await? {
            Some(index) if index.manifest.embedding_model != model.model_id => {
                Err(VectorStoreError::ModelMismatch {
                    collection: collection.to_string(),
                    stored: index.manifest.embedding_model,
                    requested: model.model_id.clone(),
                })
            }
            Some(_) => Ok(()),
            None => {
                LocalIndex::new(model).save(&dir).await?;
                info!(collection, model = %model.model_id, path = %dir.display(), "created local index");
                Ok(())
            }
        }
    }

    async fn collection_model(
        &self,
        collection: &str,
    ) -> Result<Option<String>, VectorStoreError> {
        let index = self.load_existing(collection).await?;
        Ok(Some(index.manifest.embedding_model))
    }

    async fn upsert(
        &self,
        collection: &str,
        records: &[EmbeddedRecord],
    ) -> Result<usize, VectorStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.load_existing(collection).await?;
        let written = index.insert(records).map_err(|error| match error {
            VectorStoreError::ModelMismatch {
                stored, requested, ..
            } => VectorStoreError::ModelMismatch {
                collection: collection.to_string(),
                stored,
                requested,
            },
            other => other,
        })?;

        index.save(&self.collection_dir(collection)?).await?;
        debug!(collection, written, total = index.len(), "wrote local index");
        Ok(written)
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, VectorStoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let index = self.load_existing(collection).await?;
        index.search(query_vector, k)
    }

    async fn count_document(
        &self,
        collection: &str,
        document_id: &str,
        pages: PageFilter,
    ) -> Result<u64, VectorStoreError> {
        let index = self.load_existing(collection).await?;
        Ok(index.count_document(document_id, pages))
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), VectorStoreError> {
        let _guard = self.write_lock.lock().await;
        let dir = self.collection_dir(collection)?;
        if LocalIndex::delete(&dir).await? {
            info!(collection, path = %dir.display(), "dropped local index");
        }
        Ok(())
    }
}
