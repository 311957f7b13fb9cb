//! Review provider adapters.
//!
//! Each adapter owns its HTTP client and implements the `ReviewProvider`
//! trait by streaming one model response per file.

pub mod gemini;
pub mod openai;

pub use gemini::{GeminiReviewer, DEFAULT_GEMINI_MODEL};
pub use openai::{OpenAiReviewer, DEFAULT_OPENAI_MODEL};
