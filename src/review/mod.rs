//! Review results and the per-job review pipeline.
//!
//! A review job walks a project tree, asks the configured provider to
//! review each file, and streams one result per file to the client,
//! followed by a terminal sentinel. The types here are the wire format
//! of those per-file results.

pub mod parse;
pub mod pipeline;

use serde::{Deserialize, Serialize};

// Re-export main types for convenience
pub use parse::parse_review;
pub use pipeline::{abort_job, JobOutcome, ReviewPipeline};

/// The structured review a model produces for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPayload {
    /// Short summary of code quality and reasoning.
    pub message: String,
    /// Full rewritten file content, present only when the model changed
    /// something.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ReviewPayload {
    /// A payload carrying only a summary message.
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// A payload carrying a summary and a full rewrite.
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

/// One per-file result as streamed to the client.
///
/// Serializes with camelCase keys: `{"filePath": ..., "review": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    /// Path of the reviewed file, rooted at the job's project path.
    pub file_path: String,
    /// The review itself.
    pub review: ReviewPayload,
}

impl ReviewResult {
    pub fn new(file_path: impl Into<String>, review: ReviewPayload) -> Self {
        Self {
            file_path: file_path.into(),
            review,
        }
    }

    /// A result describing a failure in place of a review, so the
    /// client still receives one frame for the file.
    pub fn failure(file_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            review: ReviewPayload::message_only(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_serializes_with_camel_case_path() {
        let result = ReviewResult::new("src/a.py", ReviewPayload::message_only("Clean"));

        let json = serde_json::to_string(&result).unwrap();

        assert_eq!(json, r#"{"filePath":"src/a.py","review":{"message":"Clean"}}"#);
    }

    #[test]
    fn absent_code_is_omitted_from_wire_format() {
        let without = ReviewPayload::message_only("Already modern");
        let with = ReviewPayload::with_code("Rewrote loops", "for x in xs:\n    pass\n");

        let without_json = serde_json::to_value(&without).unwrap();
        let with_json = serde_json::to_value(&with).unwrap();

        assert!(without_json.get("code").is_none());
        assert_eq!(with_json["code"], "for x in xs:\n    pass\n");
    }

    #[test]
    fn result_roundtrips_through_wire_format() {
        let result = ReviewResult::new(
            "lib/util.js",
            ReviewPayload::with_code("Replaced var with const", "const x = 1;\n"),
        );

        let json = serde_json::to_string(&result).unwrap();
        let back: ReviewResult = serde_json::from_str(&json).unwrap();

        assert_eq!(back, result);
    }

    #[test]
    fn payload_parses_without_code_field() {
        let payload: ReviewPayload =
            serde_json::from_str(r#"{"message":"Looks clean and modern"}"#).unwrap();

        assert_eq!(payload.message, "Looks clean and modern");
        assert!(payload.code.is_none());
    }
}
