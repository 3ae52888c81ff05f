//! Bounded retries for the HTTP collaborators (embeddings, chat completions, Qdrant).

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RequestFailure {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
}

impl RequestFailure {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http(error) => error.status(),
            Self::Status { status, .. } => Some(*status),
        }
    }
}

/// Timeout and retry budget applied to every outbound request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn http_client(&self) -> Result<Client, reqwest::Error> {
        Client::builder().timeout(self.timeout).build()
    }

    pub fn backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        self.base_delay * (1u32 << capped)
    }

    /// Sends the request built by `build`, rebuilding it for each attempt.
    ///
    /// Connect errors, timeouts, 429 and 5xx responses are retried up to
    /// `max_attempts`; every other failure is returned immediately.
    pub async fn send<F>(&self, mut build: F) -> Result<Response, RequestFailure>
    where
        F: FnMut() -> RequestBuilder,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let url = response.url().to_string();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());

                    if is_transient_status(status) && attempt < attempts {
                        let delay = self.backoff(attempt);
                        warn!(%url, %status, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Err(RequestFailure::Status { url, status, body });
                }
                Err(error) => {
                    if is_transient_error(&error) && attempt < attempts {
                        let delay = self.backoff(attempt);
                        warn!(%error, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Err(RequestFailure::Http(error));
                }
            }
        }
    }
}

pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_transient_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}
