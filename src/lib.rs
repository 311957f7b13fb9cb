//! reviewd: Queue-driven LLM code review daemon.
//!
//! Jobs arrive on a Redis list, each naming a project directory, an LLM
//! provider, and the WebSocket connection waiting for results. The
//! worker walks the project, asks the provider to review every file,
//! and streams one result per file back over the connection, ending
//! with a terminator frame.

// Core modules
pub mod cli;
pub mod corpus;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod review;
pub mod scheduler;

// Re-export commonly used error types
pub use error::LlmError;
