use crate::retry::RequestFailure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document unreadable: {path}: {reason}")]
    DocumentUnreadable { path: String, reason: String },

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking parameters: {0}")]
    InvalidChunkingParameters(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store failed: {0}")]
    Store(#[from] VectorStoreError),
}

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("page text has {chars} characters, limit is {limit}")]
    PageTooLarge { chars: usize, limit: usize },
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(#[from] RequestFailure),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding client misconfigured: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("{backend} request failed: {source}")]
    Request {
        backend: String,
        #[source]
        source: RequestFailure,
    },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("collection does not exist: {0}")]
    MissingCollection(String),

    #[error("collection {collection} was built with embedding model {stored}, query uses {requested}")]
    ModelMismatch {
        collection: String,
        stored: String,
        requested: String,
    },

    #[error("invalid store request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Error)]
pub enum LanguageModelError {
    #[error("language model request failed: {0}")]
    Request(#[from] RequestFailure),

    #[error("invalid language model response: {0}")]
    InvalidResponse(String),

    #[error("language model client misconfigured: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] VectorStoreError),

    #[error("answer generation failed: {0}")]
    Generation(#[from] LanguageModelError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
