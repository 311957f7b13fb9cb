//! Job scheduling over a Redis queue.
//!
//! This module connects the queue to the review pipeline:
//!
//! - **Job**: The wire format producers push onto the queue
//! - **JobQueue**: Redis list with a processing sidelist for reliable dequeue
//! - **Worker**: Single consumer that routes jobs to WebSocket connections
//!
//! # Architecture
//!
//! ```text
//!    ┌──────────────┐
//!    │   Producer   │
//!    │ (CLI/client) │
//!    └──────┬───────┘
//!           │ LPUSH
//!    ┌──────▼───────┐
//!    │    Redis     │
//!    │    Queue     │
//!    └──────┬───────┘
//!           │ BRPOPLPUSH
//!    ┌──────▼───────┐      ┌─────────────┐
//!    │    Worker    ├─────▶│  WebSocket  │
//!    │              │      │ connection  │
//!    └──────────────┘      └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use reviewd::scheduler::{Job, JobQueue, Worker, WorkerConfig, WorkerStats};
//! use reviewd::llm::ProviderKind;
//! use std::sync::Arc;
//!
//! let queue = Arc::new(JobQueue::connect("redis://localhost:6379", "llm-queue").await?);
//!
//! // Enqueue a review job for an open connection
//! let job = Job::new(ProviderKind::OpenAi, "/srv/project", "connection-id");
//! queue.enqueue(&job).await?;
//!
//! // Run the worker until shutdown
//! let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! let worker = Worker::new(
//!     queue,
//!     registry,
//!     reviewers,
//!     WorkerConfig::default(),
//!     shutdown_rx,
//!     Arc::new(WorkerStats::default()),
//! );
//! worker.run().await;
//! ```
//!
//! # Reliability Features
//!
//! - **Atomic dequeue**: BRPOPLPUSH parks each in-flight job on a processing list
//! - **Crash recovery**: leftover processing entries are requeued on worker restart
//! - **Malformed payload handling**: unparseable payloads are dropped, not retried forever
//! - **Graceful shutdown**: the worker finishes its current job before stopping

pub mod job;
pub mod queue;
pub mod worker;

// Re-export main types for convenience
pub use job::{InvalidJob, Job};
pub use queue::{JobQueue, QueueError, QueuedJob};
pub use worker::{
    dispatch_job, DispatchOutcome, Worker, WorkerConfig, WorkerStats, WorkerStatsSnapshot,
};
