use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub document_id: String,
    pub source_path: String,
    pub checksum: String,
    pub page_count: usize,
    pub ingested_at: DateTime<Utc>,
}

/// Where a chunk came from. `document_id` is the source file's basename.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChunkMetadata {
    pub page: u32,
    pub document_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRecord {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A chunk together with the vector computed for it, ready for upsert.
#[derive(Debug, Clone)]
pub struct EmbeddedRecord {
    pub record: ChunkRecord,
    pub vector: Vec<f32>,
    pub embedding_model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelInfo {
    pub model_id: String,
    pub dimensions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f64,
}

/// Index-aligned retrieval output, ordered by descending similarity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub texts: Vec<String>,
    pub metadata: Vec<ChunkMetadata>,
    pub scores: Vec<f64>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }
}

impl FromIterator<RetrievedChunk> for QueryResult {
    fn from_iter<I: IntoIterator<Item = RetrievedChunk>>(iter: I) -> Self {
        let mut result = QueryResult::default();
        for chunk in iter {
            result.texts.push(chunk.text);
            result.metadata.push(chunk.metadata);
            result.scores.push(chunk.score);
        }
        result
    }
}

/// Page range restriction used by document existence checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageFilter {
    #[default]
    All,
    /// Pages strictly between `after` and `before`.
    Between { after: u32, before: u32 },
}

impl PageFilter {
    pub fn contains(&self, page: u32) -> bool {
        match *self {
            PageFilter::All => true,
            PageFilter::Between { after, before } => page > after && page < before,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<ChunkMetadata>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub header_footer_margin: f32,
    pub max_page_chars: usize,
    pub embed_batch_size: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            header_footer_margin: 50.0,
            max_page_chars: 1_000_000,
            embed_batch_size: 64,
        }
    }
}
