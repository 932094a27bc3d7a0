
use std::time::Duration;

use eventsource_stream::Eventsource;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{debug, warn};
use url::Url;

use crate::config::OpenAiConfig;
use crate::llm::{ChatMessage, ChatModel, TokenStream};
use crate::{RepoQueryError, Result};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_SECS: u64 = 1;

/// Chat-completions client speaking the Azure OpenAI API, with SSE token
/// streaming for answer generation.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    api_version: String,
    deployment: String,
    max_retries: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl ChatClient {
    #[inline]
    pub fn new(config: &OpenAiConfig, api_key: String) -> Result<Self> {
        let endpoint = config
            .endpoint_url()
            .map_err(|e| RepoQueryError::Config(e.to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            api_version: config.api_version.clone(),
            deployment: config.chat_deployment.clone(),
            max_retries: MAX_RETRIES,
        })
    }

    #[inline]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn chat_url(&self) -> Result<Url> {
        let mut url = self
            .endpoint
            .join(&format!(
                "openai/deployments/{}/chat/completions",
                self.deployment
            ))
            .map_err(|e| RepoQueryError::Config(format!("invalid chat URL: {e}")))?;
        url.set_query(Some(&format!("api-version={}", self.api_version)));
        Ok(url)
    }

    /// Send a chat request, retrying rate-limited attempts with exponential
    /// backoff (honoring `Retry-After` when present).
    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let url = self.chat_url()?;
        let body = ChatRequest { messages, stream };

        for attempt in 0..=self.max_retries {
            let response = self
                .client
                .post(url.clone())
                .header("api-key", &self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| RepoQueryError::Network(format!("chat request failed: {e}")))?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if attempt == self.max_retries {
                    return Err(RepoQueryError::RateLimited(
                        "generation service kept returning HTTP 429".to_string(),
                    ));
                }
                let delay = retry_delay(&response, attempt);
                warn!(
                    "Generation service rate limited, retrying in {}s ({}/{})",
                    delay.as_secs(),
                    attempt + 1,
                    self.max_retries
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                debug!("Generation service error {}: {}", status, text);
                return Err(RepoQueryError::Generation(format!(
                    "generation request failed with HTTP {status}"
                )));
            }

            return Ok(response);
        }

        Err(RepoQueryError::RateLimited(
            "generation service kept returning HTTP 429".to_string(),
        ))
    }
}

impl ChatModel for ChatClient {
    #[inline]
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let response = self.send(messages, false).await?;
        let text = response
            .text()
            .await
            .map_err(|e| RepoQueryError::Network(format!("failed to read response: {e}")))?;

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| RepoQueryError::Generation(format!("malformed chat response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| {
                RepoQueryError::Generation("generation service returned no content".to_string())
            })
    }

    #[inline]
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let response = self.send(messages, true).await?;
        Ok(sse_to_stream(response))
    }
}

/// Parse the `Retry-After` header as seconds, falling back to exponential
/// backoff.
fn retry_delay(response: &reqwest::Response, attempt: u32) -> Duration {
    if let Some(value) = response.headers().get("retry-after")
        && let Ok(text) = value.to_str()
        && let Ok(secs) = text.parse::<u64>()
    {
        return Duration::from_secs(secs);
    }
    Duration::from_secs(BASE_BACKOFF_SECS << attempt)
}

/// Convert a streaming chat response into a [`TokenStream`].
fn sse_to_stream(response: reqwest::Response) -> TokenStream {
    let events = response.bytes_stream().eventsource();
    let mapped = events.filter_map(|event| match event {
        Ok(event) => parse_sse_event(&event.data),
        Err(e) => Some(Err(RepoQueryError::Generation(format!(
            "SSE stream error: {e}"
        )))),
    });
    Box::pin(mapped)
}

fn parse_sse_event(data: &str) -> Option<Result<String>> {
    if data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.as_deref())
                .unwrap_or_default();

            if content.is_empty() {
                None
            } else {
                Some(Ok(content.to_owned()))
            }
        }
        Err(e) => Some(Err(RepoQueryError::Generation(format!(
            "failed to parse SSE data: {e}"
        )))),
    }
}
