use crate::error::LanguageModelError;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Single-shot completion of `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String, LanguageModelError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: Option<u32>,
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiChatModel {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    retry: RetryPolicy,
}

impl OpenAiChatModel {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self, LanguageModelError> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(LanguageModelError::Config("missing chat model name".to_string()));
        }

        let base = Url::parse(base_url)
            .map_err(|error| LanguageModelError::Config(format!("{base_url}: {error}")))?;
        let client = retry
            .http_client()
            .map_err(|error| LanguageModelError::Config(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: chat_endpoint(&base),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model,
            temperature: 0.3,
            max_tokens: None,
            retry,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

fn chat_endpoint(base: &Url) -> String {
    let base = base.as_str().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, prompt: &str) -> Result<String, LanguageModelError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        debug!(endpoint = %self.endpoint, prompt_chars = prompt.len(), "requesting completion");

        let response = self
            .retry
            .send(|| {
                let request = self.client.post(&self.endpoint).json(&body);
                match &self.api_key {
                    Some(key) => request.bearer_auth(key),
                    None => request,
                }
            })
            .await?;

        let payload: Value = response
            .json()
            .await
            .map_err(|error| LanguageModelError::InvalidResponse(error.to_string()))?;

        completion_text(&payload)
    }
}

fn completion_text(payload: &Value) -> Result<String, LanguageModelError> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            LanguageModelError::InvalidResponse("response has no choices[0].message.content".to_string())
        })
}
