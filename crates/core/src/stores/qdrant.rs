use crate::models::{
    ChunkMetadata, EmbeddedRecord, EmbeddingModelInfo, PageFilter, RetrievedChunk,
};
use crate::retry::{RequestFailure, RetryPolicy};
use crate::stores::validate_collection;
use crate::traits::VectorStore;
use crate::VectorStoreError;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "qdrant";

pub struct QdrantStore {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
    retry: RetryPolicy,
}

impl QdrantStore {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        retry: RetryPolicy,
    ) -> Result<Self, VectorStoreError> {
        let parsed = Url::parse(endpoint)?;
        let client = retry.http_client().map_err(|error| VectorStoreError::Request {
            backend: BACKEND.to_string(),
            source: RequestFailure::Http(error),
        })?;

        Ok(Self {
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            client,
            retry,
        })
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, RequestFailure> {
        let url = format!("{}{}", self.endpoint, path);
        let response = self
            .retry
            .send(|| {
                let mut request = self.client.request(method.clone(), &url);
                if let Some(body) = body {
                    request = request.json(body);
                }
                if let Some(key) = &self.api_key {
                    request = request.header("api-key", key);
                }
                request
            })
            .await?;

        Ok(response.json::<Value>().await?)
    }

    async fn collection_info(&self, collection: &str) -> Result<Option<Value>, VectorStoreError> {
        validate_collection(collection)?;
        match self
            .call(Method::GET, &format!("/collections/{collection}"), None)
            .await
        {
            Ok(info) => Ok(Some(info)),
            Err(failure) if failure.status() == Some(StatusCode::NOT_FOUND) => Ok(None),
            Err(failure) => Err(request_error(failure)),
        }
    }

    /// Calls a collection-scoped endpoint, mapping 404 to `MissingCollection`.
    async fn collection_call(
        &self,
        method: Method,
        collection: &str,
        suffix: &str,
        body: &Value,
    ) -> Result<Value, VectorStoreError> {
        validate_collection(collection)?;
        self.call(method, &format!("/collections/{collection}{suffix}"), Some(body))
            .await
            .map_err(|failure| {
                if failure.status() == Some(StatusCode::NOT_FOUND) {
                    VectorStoreError::MissingCollection(collection.to_string())
                } else {
                    request_error(failure)
                }
            })
    }
}

fn request_error(source: RequestFailure) -> VectorStoreError {
    VectorStoreError::Request {
        backend: BACKEND.to_string(),
        source,
    }
}

fn malformed(details: impl Into<String>) -> VectorStoreError {
    VectorStoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: details.into(),
    }
}

pub(crate) fn document_filter(document_id: &str, pages: PageFilter) -> Value {
    let mut must = vec![json!({ "key": "document_id", "match": { "value": document_id } })];
    if let PageFilter::Between { after, before } = pages {
        must.push(json!({ "key": "page", "range": { "gt": after, "lt": before } }));
    }
    json!({ "must": must })
}

pub(crate) fn point_payload(record: &EmbeddedRecord) -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "vector": record.vector,
        "payload": {
            "text": record.record.text,
            "page": record.record.metadata.page,
            "document_id": record.record.metadata.document_id,
            "embedding_model": record.embedding_model,
        },
    })
}

pub(crate) fn parse_hits(parsed: &Value) -> Result<Vec<RetrievedChunk>, VectorStoreError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("search response has no result array"))?;

    let mut result = Vec::with_capacity(hits.len());
    for hit in hits {
        let text = hit
            .pointer("/payload/text")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("hit payload has no text"))?
            .to_string();
        let document_id = hit
            .pointer("/payload/document_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let page = hit
            .pointer("/payload/page")
            .and_then(Value::as_u64)
            .and_then(|page| u32::try_from(page).ok())
            .unwrap_or_default();
        let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);

        result.push(RetrievedChunk {
            text,
            metadata: ChunkMetadata { page, document_id },
            score,
        });
    }

    result.sort_by(|left, right| right.score.total_cmp(&left.score));
    Ok(result)
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, VectorStoreError> {
        Ok(self.collection_info(collection).await?.is_some())
    }

    async fn ensure_collection(
        &self,
        collection: &str,
        model: &EmbeddingModelInfo,
    ) -> Result<(), VectorStoreError> {
        match self.collection_info(collection).await? {
            None => {
                let body = json!({
                    "vectors": { "size": model.dimensions, "distance": "Cosine" },
                });
                self.call(Method::PUT, &format!("/collections/{collection}"), Some(&body))
                    .await
                    .map_err(request_error)?;
                info!(collection, model = %model.model_id, dimensions = model.dimensions, "created qdrant collection");
                Ok(())
            }
            Some(info) => {
                let size = info
                    .pointer("/result/config/params/vectors/size")
                    .and_then(Value::as_u64);
                if size.is_some_and(|size| size as usize != model.dimensions) {
                    return Err(VectorStoreError::InvalidRequest(format!(
                        "collection {collection} stores {}-dimensional vectors, model {} produces {}",
                        size.unwrap_or_default(),
                        model.model_id,
                        model.dimensions
                    )));
                }

                match self.collection_model(collection).await? {
                    Some(stored) if stored != model.model_id => Err(VectorStoreError::ModelMismatch {
                        collection: collection.to_string(),
                        stored,
                        requested: model.model_id.clone(),
                    }),
                    _ => Ok(()),
                }
            }
        }
    }

    async fn collection_model(
        &self,
        collection: &str,
    ) -> Result<Option<String>, VectorStoreError> {
        let body = json!({
            "limit": 1,
            "with_payload": ["embedding_model"],
            "with_vector": false,
        });
        let parsed = self
            .collection_call(Method::POST, collection, "/points/scroll", &body)
            .await?;

        Ok(parsed
            .pointer("/result/points/0/payload/embedding_model")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn upsert(
        &self,
        collection: &str,
        records: &[EmbeddedRecord],
    ) -> Result<usize, VectorStoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let points = records.iter().map(point_payload).collect::<Vec<_>>();
        self.collection_call(
            Method::PUT,
            collection,
            "/points?wait=true",
            &json!({ "points": points }),
        )
        .await?;

        debug!(collection, points = records.len(), "upserted points");
        Ok(records.len())
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

        let body = json!({
            "vector": query_vector,
            "limit": k,
            "with_payload": true,
        });
        let parsed = self
            .collection_call(Method::POST, collection, "/points/search", &body)
            .await?;

        let mut hits = parse_hits(&parsed)?;
        hits.truncate(k);
        Ok(hits)
    }

    async fn count_document(
        &self,
        collection: &str,
        document_id: &str,
        pages: PageFilter,
    ) -> Result<u64, VectorStoreError> {
        let body = json!({
            "filter": document_filter(document_id, pages),
            "exact": true,
        });
        let parsed = self
            .collection_call(Method::POST, collection, "/points/count", &body)
            .await?;

        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed("count response has no result.count"))
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), VectorStoreError> {
        validate_collection(collection)?;
        match self
            .call(Method::DELETE, &format!("/collections/{collection}"), None)
            .await
        {
            Ok(_) => {
                info!(collection, "dropped qdrant collection");
                Ok(())
            }
            Err(failure) if failure.status() == Some(StatusCode::NOT_FOUND) => Ok(()),
            Err(failure) => Err(request_error(failure)),
        }
    }
}
