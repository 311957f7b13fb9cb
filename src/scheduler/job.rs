//! Review job definitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::ProviderKind;

/// Reasons a well-formed job payload is still unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidJob {
    #[error("job has an empty project path")]
    EmptyPrompt,

    #[error("job has an empty connection id")]
    EmptyConnectionId,
}

/// One unit of review work pulled from the queue.
///
/// The serialized form is the queue wire contract; producers push
/// `{"provider": ..., "prompt": ..., "id": ...}` and this struct reads
/// it unchanged. `prompt` names the project root to review and `id`
/// the connection the results stream back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Which LLM backend reviews the files.
    pub provider: ProviderKind,
    /// Project root path whose files are reviewed.
    pub prompt: String,
    /// Connection id the results are delivered to.
    pub id: String,
}

impl Job {
    pub fn new(provider: ProviderKind, prompt: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            provider,
            prompt: prompt.into(),
            id: id.into(),
        }
    }

    /// Rejects payloads that parsed but carry empty fields.
    pub fn validate(&self) -> Result<(), InvalidJob> {
        if self.prompt.trim().is_empty() {
            return Err(InvalidJob::EmptyPrompt);
        }
        if self.id.trim().is_empty() {
            return Err(InvalidJob::EmptyConnectionId);
        }
        Ok(())
    }
}
