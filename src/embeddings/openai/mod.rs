#[cfg(test)]
mod tests;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use url::Url;

use crate::config::OpenAiConfig;
use crate::embeddings::Embedder;
use crate::{RepoQueryError, Result};

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Embedding service client speaking the Azure OpenAI embeddings API.
///
/// Requests are batched and retried with bounded exponential backoff on
/// rate-limit, server, and transport errors before the failure is escalated.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    endpoint: Url,
    api_key: String,
    api_version: String,
    deployment: String,
    batch_size: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    #[inline]
    pub fn new(config: &OpenAiConfig, api_key: String) -> Result<Self> {
        let endpoint = config
            .endpoint_url()
            .map_err(|e| RepoQueryError::Config(e.to_string()))?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            endpoint,
            api_key,
            api_version: config.api_version.clone(),
            deployment: config.embedding_deployment.clone(),
            batch_size: config.batch_size,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Generate embeddings for the given texts, one vector per text in input
    /// order, batching requests to respect service limits.
    #[inline]
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            vectors.extend(self.embed_single_batch(batch)?);
        }

        debug!("Generated {} embeddings total", vectors.len());
        Ok(vectors)
    }

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.embeddings_url()?;
        let request_json = serde_json::to_string(&EmbedRequest { input: texts })
            .map_err(|e| RepoQueryError::Network(format!("failed to serialize request: {e}")))?;

        let response_text = self.request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| RepoQueryError::Network(format!("malformed embedding response: {e}")))?;

        reorder_embeddings(response, texts.len())
    }

    fn embeddings_url(&self) -> Result<Url> {
        let mut url = self
            .endpoint
            .join(&format!(
                "openai/deployments/{}/embeddings",
                self.deployment
            ))
            .map_err(|e| RepoQueryError::Config(format!("invalid embeddings URL: {e}")))?;
        url.set_query(Some(&format!("api-version={}", self.api_version)));
        Ok(url)
    }

    fn request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> std::result::Result<String, ureq::Error>,
    {
        let mut last_error: Option<RepoQueryError> = None;

        for attempt in 1..=self.retry_attempts {
            debug!("Embedding request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let retryable = match &error {
                        ureq::Error::StatusCode(429) => {
                            warn!(
                                "Rate limited by embedding service, attempt {}/{}",
                                attempt, self.retry_attempts
                            );
                            last_error = Some(RepoQueryError::RateLimited(
                                "embedding service returned HTTP 429".to_string(),
                            ));
                            true
                        }
                        ureq::Error::StatusCode(status) if *status >= 500 => {
                            warn!(
                                "Embedding service error (status {}), attempt {}/{}",
                                status, attempt, self.retry_attempts
                            );
                            last_error = Some(RepoQueryError::Network(format!(
                                "embedding service returned HTTP {status}"
                            )));
                            true
                        }
                        ureq::Error::StatusCode(status) => {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(RepoQueryError::Network(format!(
                                "embedding request rejected with HTTP {status}"
                            )));
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            last_error =
                                Some(RepoQueryError::Network(format!("transport error: {error}")));
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !retryable {
                        return Err(RepoQueryError::Network(format!(
                            "embedding request failed: {error}"
                        )));
                    }

                    if attempt < self.retry_attempts {
                        let delay =
                            Duration::from_secs(EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1));
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!(
            "All {} embedding request attempts failed for {}",
            self.retry_attempts, self.endpoint
        );
        Err(last_error.unwrap_or_else(|| {
            RepoQueryError::Network("embedding request failed after retries".to_string())
        }))
    }
}

/// Restore request order from the response's `index` fields and verify the
/// service returned exactly one vector per input.
fn reorder_embeddings(response: EmbedResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    if response.data.len() != expected {
        return Err(RepoQueryError::Network(format!(
            "embedding count mismatch: requested {}, received {}",
            expected,
            response.data.len()
        )));
    }

    let mut vectors: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in response.data {
        let slot = vectors.get_mut(item.index).ok_or_else(|| {
            RepoQueryError::Network(format!(
                "embedding response references out-of-range index {}",
                item.index
            ))
        })?;
        if slot.is_some() {
            return Err(RepoQueryError::Network(format!(
                "embedding response repeats index {}",
                item.index
            )));
        }
        *slot = Some(item.embedding);
    }

    // Every slot is filled: lengths matched and indexes were unique.
    Ok(vectors.into_iter().flatten().collect())
}

impl Embedder for EmbeddingClient {
    #[inline]
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(texts)
    }
}
