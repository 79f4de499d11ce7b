//! OpenAI-backed token source
//!
//! Streams chat completions from an OpenAI-compatible API and narrows the
//! upstream SSE chunks down to plain text deltas.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::json;
use tracing::{debug, error, instrument, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::sse::{SseLineBuffer, DONE_SENTINEL};

use super::{ChatMessage, SourceError, TokenSource, TokenStream};

/// Token source speaking the OpenAI streaming chat completions API
pub struct OpenAiSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiSource {
    /// Create a new OpenAI source from configuration
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.openai_api_url.clone(),
            api_key: config.openai_api_key.clone(),
            model: config.openai_model.clone(),
        }
    }

    /// Check if the source is configured with an API key
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn build_headers(&self, api_key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", api_key)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    /// Extract the text delta from one upstream SSE line, if any
    fn delta_from_line(line: &str) -> Option<Result<String, ()>> {
        let payload = line.strip_prefix("data:")?.trim();
        if payload == DONE_SENTINEL {
            return Some(Err(()));
        }
        let value: serde_json::Value = serde_json::from_str(payload).ok()?;
        let content = value["choices"][0]["delta"]["content"].as_str()?;
        if content.is_empty() {
            return None;
        }
        Some(Ok(content.to_string()))
    }
}

#[async_trait]
impl TokenSource for OpenAiSource {
    fn name(&self) -> &'static str {
        "openai"
    }

    #[instrument(skip(self, messages), fields(model = %self.model, messages = messages.len()))]
    async fn stream_completion(&self, messages: Vec<ChatMessage>) -> AppResult<TokenStream> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            AppError::ServiceUnavailable("OPENAI_API_KEY is not configured".to_string())
        })?;

        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });

        let response = self
            .client
            .post(&url)
            .headers(self.build_headers(api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(url = %url, error = %e, "Failed to reach upstream provider");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %text, "Upstream provider rejected the request");
            return Err(AppError::UpstreamError(format!(
                "upstream returned {}: {}",
                status, text
            )));
        }

        debug!(url = %url, "Upstream stream opened");

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut buffer = SseLineBuffer::new();
            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(SourceError::ConnectionLost(e.to_string()));
                        break;
                    }
                };
                for line in buffer.feed(&chunk) {
                    match Self::delta_from_line(&line) {
                        Some(Ok(text)) => yield Ok(text),
                        // Upstream [DONE]: clean completion
                        Some(Err(())) => break 'outer,
                        // Malformed or non-content line: skip, never abort
                        None => continue,
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
