//! Per-job review pipeline.
//!
//! Runs one job end to end: load the project corpus, review each file
//! with the job's provider, deliver one result frame per file in corpus
//! order, then close the stream with the terminal sentinel. The
//! sentinel is sent exactly once per job, on every path out of the
//! pipeline.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::corpus::load_corpus;
use crate::gateway::{ConnectionHandle, OutboundFrame};
use crate::llm::ReviewProvider;
use crate::review::{parse_review, ReviewPayload, ReviewResult};

/// Counters describing how one job went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOutcome {
    /// Files the provider reviewed successfully.
    pub files_reviewed: usize,
    /// Files whose provider call failed; a placeholder result was sent.
    pub files_failed: usize,
    /// Frames that could not be delivered, usually after a disconnect.
    pub deliveries_dropped: usize,
    /// True when the job never reached per-file reviews.
    pub aborted: bool,
}

/// Reviews every file of one project for one connection.
pub struct ReviewPipeline {
    reviewer: Arc<dyn ReviewProvider>,
}

impl ReviewPipeline {
    pub fn new(reviewer: Arc<dyn ReviewProvider>) -> Self {
        Self { reviewer }
    }

    /// Runs the pipeline for `root` and streams results to `conn`.
    ///
    /// A failing provider call degrades that one file to a placeholder
    /// result; the remaining files are still reviewed. A client that
    /// disconnects mid-job does not stop the reviews, only delivery.
    pub async fn run(&self, root: &str, conn: &ConnectionHandle) -> JobOutcome {
        let files = match load_corpus(root).await {
            Ok(files) => files,
            Err(e) => {
                warn!(root = %root, error = %e, "Failed to load project files, aborting job");
                return abort_job(conn, root, format!("Could not load project files: {e}")).await;
            }
        };

        info!(
            root = %root,
            files = files.len(),
            provider = self.reviewer.name(),
            "Reviewing project"
        );

        let mut outcome = JobOutcome::default();

        for file in &files {
            let result = match self.reviewer.review(&file.path, &file.content).await {
                Ok(raw) => {
                    outcome.files_reviewed += 1;
                    let raw = raw.trim();
                    let payload = parse_review(raw).unwrap_or_else(|| {
                        warn!(
                            file = %file.path,
                            "Review output was not valid JSON, passing raw text through"
                        );
                        ReviewPayload::message_only(raw)
                    });
                    ReviewResult::new(&file.path, payload)
                }
                Err(e) => {
                    outcome.files_failed += 1;
                    warn!(file = %file.path, error = %e, "Provider call failed, sending placeholder");
                    ReviewResult::failure(&file.path, format!("Review failed: {e}"))
                }
            };

            match conn.send(OutboundFrame::Review(result)).await {
                Ok(()) => debug!(connection_id = %conn.id, file = %file.path, "Result delivered"),
                Err(e) => {
                    outcome.deliveries_dropped += 1;
                    debug!(connection_id = %conn.id, error = %e, "Dropped result delivery");
                }
            }
        }

        if let Err(e) = conn.send(OutboundFrame::Done).await {
            outcome.deliveries_dropped += 1;
            debug!(connection_id = %conn.id, error = %e, "Dropped stream terminator");
        }

        outcome
    }
}

/// Ends a job that cannot produce per-file reviews.
///
/// The client still receives a well-formed stream: one failure result
/// addressed at the project root, then the terminator.
pub async fn abort_job(
    conn: &ConnectionHandle,
    root: &str,
    message: impl Into<String>,
) -> JobOutcome {
    let mut outcome = JobOutcome {
        aborted: true,
        ..JobOutcome::default()
    };

    let result = ReviewResult::failure(root, message);
    if let Err(e) = conn.send(OutboundFrame::Review(result)).await {
        outcome.deliveries_dropped += 1;
        debug!(connection_id = %conn.id, error = %e, "Dropped failure result");
    }
    if let Err(e) = conn.send(OutboundFrame::Done).await {
        outcome.deliveries_dropped += 1;
        debug!(connection_id = %conn.id, error = %e, "Dropped stream terminator");
    }

    outcome
}
