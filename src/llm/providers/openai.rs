//! OpenAI review provider using streamed chat completions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::error::LlmError;
use crate::llm::prompt::{build_review_prompt, REVIEW_SYSTEM_PROMPT};
use crate::llm::{is_transient_error, sse, ReviewProvider};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model used when none is configured.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";

/// Maximum number of retry attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Marker OpenAI sends as the final SSE data line of a stream.
const STREAM_DONE_MARKER: &str = "[DONE]";

/// Reviewer backed by the OpenAI chat completions API.
///
/// Requests are sent with `stream: true`; the streamed delta tokens for
/// one file are accumulated into a single response string.
pub struct OpenAiReviewer {
    /// HTTP client for making API requests.
    client: Client,
    /// API key for OpenAI authentication.
    api_key: String,
    /// Base URL for the OpenAI API.
    base_url: String,
    /// Model used for reviews.
    model: String,
}

impl OpenAiReviewer {
    /// Create a new OpenAI reviewer with the given API key.
    ///
    /// Uses the default model (`gpt-3.5-turbo`) and base URL.
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenAI API key for authentication
    pub fn new(api_key: String) -> Self {
        Self::with_custom_url(
            api_key,
            OPENAI_BASE_URL.to_string(),
            DEFAULT_OPENAI_MODEL.to_string(),
        )
    }

    /// Create a new OpenAI reviewer with a specific model.
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenAI API key for authentication
    /// * `model` - Model identifier (e.g., "gpt-4o-mini")
    pub fn with_model(api_key: String, model: String) -> Self {
        Self::with_custom_url(api_key, OPENAI_BASE_URL.to_string(), model)
    }

    /// Create a new OpenAI reviewer with a custom base URL.
    ///
    /// Useful for testing or OpenAI-compatible proxies.
    ///
    /// # Arguments
    ///
    /// * `api_key` - API key for authentication
    /// * `base_url` - Custom base URL for the API
    /// * `model` - Model identifier
    pub fn with_custom_url(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            api_key,
            base_url,
            model,
        }
    }

    /// Get the API key (for debugging, returns masked value).
    pub fn api_key_masked(&self) -> String {
        if self.api_key.len() <= 8 {
            "*".repeat(self.api_key.len())
        } else {
            format!(
                "{}...{}",
                &self.api_key[..4],
                &self.api_key[self.api_key.len() - 4..]
            )
        }
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the configured model.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Execute a request with exponential backoff retry logic.
    async fn execute_with_retry(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let mut last_error = None;
        let url = format!("{}/chat/completions", self.base_url);

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let delay_ms = BASE_RETRY_DELAY_MS * (1 << (attempt - 1));
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = delay_ms,
                    "Retrying OpenAI request after transient failure"
                );
            }

            match self.stream_completion(&url, request).await {
                Ok(output) => return Ok(output),
                Err(err) => {
                    // Only retry on transient errors
                    if is_transient_error(&err) {
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_retries = MAX_RETRIES,
                            error = %err,
                            "Transient error, will retry"
                        );
                        last_error = Some(err);
                    } else {
                        // Non-transient errors should fail immediately
                        return Err(err);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LlmError::RequestFailed("Max retries exceeded with no error captured".to_string())
        }))
    }

    /// Execute a single streaming request and accumulate the deltas.
    async fn stream_completion(&self, url: &str, request: &ChatRequest) -> Result<String, LlmError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            // Try to parse structured error response
            if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                if status_code == 429 {
                    return Err(LlmError::RateLimited(error_response.error.message));
                }
                return Err(LlmError::ApiError {
                    code: status_code,
                    message: error_response.error.message,
                });
            }

            return Err(LlmError::ApiError {
                code: status_code,
                message: error_text,
            });
        }

        let mut output = String::new();
        let lines = sse::data_lines(response);
        tokio::pin!(lines);

        while let Some(line) = lines.next().await {
            let line = line?;
            if line == STREAM_DONE_MARKER {
                break;
            }

            let chunk: ChatChunk = serde_json::from_str(&line)
                .map_err(|e| LlmError::ParseError(format!("Malformed stream chunk: {e}")))?;

            if let Some(token) = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
            {
                output.push_str(&token);
            }
        }

        Ok(output)
    }
}

#[async_trait]
impl ReviewProvider for OpenAiReviewer {
    fn name(&self) -> &str {
        "openai"
    }

    async fn review(&self, file_path: &str, content: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: REVIEW_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_review_prompt(file_path, content),
                },
            ],
            stream: true,
        };

        self.execute_with_retry(&request).await
    }
}

/// Internal request structure for the chat completions API.
#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

/// Internal message structure for the chat completions API.
#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Internal chunk structure from the streamed response.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

/// Internal choice structure from a stream chunk.
#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    delta: ChatDelta,
}

/// Internal delta structure from a stream chunk.
#[derive(Debug, Default, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

/// Error detail from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
