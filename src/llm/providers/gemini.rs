//! Gemini review provider using streamed content generation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::error::LlmError;
use crate::llm::prompt::{build_review_prompt, REVIEW_SYSTEM_PROMPT};
use crate::llm::{is_transient_error, sse, ReviewProvider};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model used when none is configured.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Maximum number of retry attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Reviewer backed by the Gemini generative language API.
///
/// The API has no separate system role slot in this request shape, so
/// the review instructions and the file prompt are sent as one user
/// turn. Streaming uses `streamGenerateContent` with `?alt=sse`; the
/// stream has no terminal marker and simply ends after the last chunk.
pub struct GeminiReviewer {
    /// HTTP client for making API requests.
    client: Client,
    /// API key for Gemini authentication.
    api_key: String,
    /// Base URL for the Gemini API.
    base_url: String,
    /// Model used for reviews.
    model: String,
}

impl GeminiReviewer {
    /// Create a new Gemini reviewer with the given API key.
    ///
    /// Uses the default model (`gemini-2.5-flash`) and base URL.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Gemini API key for authentication
    pub fn new(api_key: String) -> Self {
        Self::with_custom_url(
            api_key,
            GEMINI_BASE_URL.to_string(),
            DEFAULT_GEMINI_MODEL.to_string(),
        )
    }

    /// Create a new Gemini reviewer with a specific model.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Gemini API key for authentication
    /// * `model` - Model identifier (e.g., "gemini-2.5-pro")
    pub fn with_model(api_key: String, model: String) -> Self {
        Self::with_custom_url(api_key, GEMINI_BASE_URL.to_string(), model)
    }

    /// Create a new Gemini reviewer with a custom base URL.
    ///
    /// Useful for testing or API-compatible proxies.
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

    /// Build the streaming endpoint URL for the configured model.
    ///
    /// `?alt=sse` selects the SSE framing of the streamed response.
    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    /// Execute a request with exponential backoff retry logic.
    async fn execute_with_retry(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let mut last_error = None;
        let url = self.stream_url();

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let delay_ms = BASE_RETRY_DELAY_MS * (1 << (attempt - 1));
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = delay_ms,
                    "Retrying Gemini request after transient failure"
                );
            }

            match self.stream_generation(&url, request).await {
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

    /// Execute a single streaming request and accumulate the chunks.
    async fn stream_generation(
        &self,
        url: &str,
        request: &GenerateRequest,
    ) -> Result<String, LlmError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
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

            let chunk: GenerateChunk = serde_json::from_str(&line)
                .map_err(|e| LlmError::ParseError(format!("Malformed stream chunk: {e}")))?;

            if let Some(candidate) = chunk.candidates.into_iter().next() {
                for part in candidate.content.parts {
                    if let Some(text) = part.text {
                        output.push_str(&text);
                    }
                }
            }
        }

        Ok(output)
    }
}

#[async_trait]
impl ReviewProvider for GeminiReviewer {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn review(&self, file_path: &str, content: &str) -> Result<String, LlmError> {
        let request = GenerateRequest {
            contents: vec![RequestContent {
                role: "user".to_string(),
                parts: vec![RequestPart {
                    text: combined_prompt(file_path, content),
                }],
            }],
        };

        self.execute_with_retry(&request).await
    }
}

/// Joins the review instructions and the per-file prompt into the
/// single user turn the request shape allows.
fn combined_prompt(file_path: &str, content: &str) -> String {
    format!(
        "{}\n{}",
        REVIEW_SYSTEM_PROMPT,
        build_review_prompt(file_path, content)
    )
}

/// Internal request structure for the generate content API.
#[derive(Debug, Clone, Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
}

/// Internal content structure for the request.
#[derive(Debug, Clone, Serialize)]
struct RequestContent {
    role: String,
    parts: Vec<RequestPart>,
}

/// Internal part structure for the request.
#[derive(Debug, Clone, Serialize)]
struct RequestPart {
    text: String,
}

/// Internal chunk structure from the streamed response.
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

/// Internal candidate structure from a stream chunk.
#[derive(Debug, Deserialize)]
struct GenerateCandidate {
    #[serde(default)]
    content: CandidateContent,
}

/// Internal content structure from a stream chunk.
#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

/// Internal part structure from a stream chunk.
#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
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
