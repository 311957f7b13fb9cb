//! LLM provider integration for streaming code review.
//!
//! This module provides the provider abstraction used by the review
//! pipeline plus adapters for the supported backends:
//!
//! - **OpenAiReviewer**: chat completions streamed over SSE
//! - **GeminiReviewer**: `streamGenerateContent` streamed over SSE
//!
//! Both adapters accumulate the streamed tokens for one file into a
//! single response string; the pipeline turns that into a structured
//! review.
//!
//! ```ignore
//! use reviewd::llm::{OpenAiReviewer, ProviderKind, ReviewerSet};
//! use std::sync::Arc;
//!
//! let reviewers = ReviewerSet::new()
//!     .with_openai(Arc::new(OpenAiReviewer::new(api_key)));
//!
//! let reviewer = reviewers.get(ProviderKind::OpenAi).unwrap();
//! let raw = reviewer.review("src/app.py", "import os\n").await?;
//! ```

pub mod prompt;
pub mod providers;
mod sse;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::LlmError;

// Re-export the adapters and their default models for convenience
pub use providers::{GeminiReviewer, OpenAiReviewer, DEFAULT_GEMINI_MODEL, DEFAULT_OPENAI_MODEL};

/// LLM backend requested by a job.
///
/// Matches the `provider` field of the queue wire format, so the
/// serialized form is always lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Gemini => write!(f, "gemini"),
        }
    }
}

/// Error returned when parsing an unrecognized provider name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown provider '{0}', expected 'openai' or 'gemini'")]
pub struct UnknownProvider(String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ProviderKind::OpenAi),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// A backend that reviews a single file.
///
/// Implementations stream the model response internally and return the
/// fully accumulated output text.
#[async_trait]
pub trait ReviewProvider: Send + Sync {
    /// Provider tag used in logs.
    fn name(&self) -> &str;

    /// Reviews one file and returns the accumulated model output.
    async fn review(&self, file_path: &str, content: &str) -> Result<String, LlmError>;
}

/// The set of configured reviewers, one slot per provider kind.
///
/// Slots stay empty when the corresponding API key is not configured;
/// jobs naming an empty slot fail without touching the network.
#[derive(Clone, Default)]
pub struct ReviewerSet {
    openai: Option<Arc<dyn ReviewProvider>>,
    gemini: Option<Arc<dyn ReviewProvider>>,
}

impl ReviewerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_openai(mut self, reviewer: Arc<dyn ReviewProvider>) -> Self {
        self.openai = Some(reviewer);
        self
    }

    pub fn with_gemini(mut self, reviewer: Arc<dyn ReviewProvider>) -> Self {
        self.gemini = Some(reviewer);
        self
    }

    /// Returns the reviewer configured for `kind`, if any.
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ReviewProvider>> {
        match kind {
            ProviderKind::OpenAi => self.openai.clone(),
            ProviderKind::Gemini => self.gemini.clone(),
        }
    }

    /// True when no provider is configured at all.
    pub fn is_empty(&self) -> bool {
        self.openai.is_none() && self.gemini.is_none()
    }
}

/// Check if an error is transient and should be retried.
pub(crate) fn is_transient_error(error: &LlmError) -> bool {
    match error {
        LlmError::RequestFailed(msg) => {
            // Network errors, timeouts, connection issues
            msg.contains("timeout")
                || msg.contains("connection")
                || msg.contains("temporarily")
                || msg.contains("Connection refused")
        }
        LlmError::StreamFailed(_) => true,
        LlmError::RateLimited(_) => true,
        LlmError::ApiError { code, .. } => {
            // Server errors (5xx) and rate limits are transient
            *code >= 500 || *code == 429
        }
        _ => false,
    }
}
