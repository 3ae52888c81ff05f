pub mod answer;
pub mod chunking;
pub mod cleaning;
pub mod collector;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod guard;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod retriever;
pub mod retry;
pub mod session;
pub mod stores;
pub mod traits;
pub mod writer;

pub use answer::{render_prompt, AnswerComposer, QaService, DEFAULT_TOP_K, NOT_IN_CONTEXT};
pub use chunking::{chunk_pages, split_text, ChunkingConfig};
pub use cleaning::TextCleaner;
pub use collector::{document_id, tag_page_chunks};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    CleanError, EmbeddingError, IngestError, LanguageModelError, QueryError, VectorStoreError,
};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use guard::{DuplicateGuard, GuardStrategy};
pub use ingest::{
    digest_file, discover_pdf_files, DocumentOutcome, IndexedDocument, IngestionPipeline,
    IngestionReport, SkippedPdf,
};
pub use llm::{LanguageModel, OpenAiChatModel};
pub use models::{
    Answer, ChunkMetadata, ChunkRecord, DocumentFingerprint, EmbeddedRecord, EmbeddingModelInfo,
    IngestionOptions, PageFilter, QueryResult, RetrievedChunk,
};
pub use retriever::Retriever;
pub use retry::{RequestFailure, RetryPolicy};
pub use session::{Exchange, QaSession};
pub use stores::{LocalIndex, LocalIndexStore, QdrantStore};
pub use traits::VectorStore;
pub use writer::{Writer, DEFAULT_EMBED_BATCH_SIZE};
