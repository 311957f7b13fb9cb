//! Worker loop that drains the job queue and runs reviews.
//!
//! The worker owns the consuming side of the queue. It pulls one job at
//! a time, resolves the WebSocket connection the job names, and hands
//! the work to the review pipeline. Results never come back through the
//! queue; they stream straight to the client connection.
//!
//! # Features
//!
//! - Reliable dequeue with acknowledgment after handling
//! - Startup recovery of jobs left behind by a crashed run
//! - Graceful shutdown with broadcast channel
//! - Job statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::gateway::ConnectionRegistry;
use crate::llm::ReviewerSet;
use crate::review::{abort_job, JobOutcome, ReviewPipeline};

use super::job::Job;
use super::queue::{JobQueue, QueueError};

/// Configuration for the worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long each dequeue blocks waiting for a job.
    pub poll_interval: Duration,
    /// Whether to requeue jobs stuck in processing before the first poll.
    pub recover_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            recover_on_start: true,
        }
    }
}

impl WorkerConfig {
    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets whether startup recovery runs.
    pub fn with_recover_on_start(mut self, recover: bool) -> Self {
        self.recover_on_start = recover;
        self
    }
}

/// Shared counters updated as the worker handles jobs.
#[derive(Debug, Default)]
pub struct WorkerStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_discarded: AtomicU64,
    files_reviewed: AtomicU64,
    deliveries_dropped: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    /// Jobs that ran to the end of their file list.
    pub jobs_completed: u64,
    /// Jobs aborted before any file was reviewed.
    pub jobs_failed: u64,
    /// Payloads dropped without running: malformed JSON, invalid
    /// fields, or a connection that was already gone.
    pub jobs_discarded: u64,
    /// Files whose review result was produced, across all jobs.
    pub files_reviewed: u64,
    /// Frames that could not be delivered to a closed connection.
    pub deliveries_dropped: u64,
}

impl WorkerStats {
    fn record_outcome(&self, outcome: &JobOutcome) {
        if outcome.aborted {
            self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.jobs_completed.fetch_add(1, Ordering::SeqCst);
        }
        self.files_reviewed
            .fetch_add(outcome.files_reviewed as u64, Ordering::SeqCst);
        self.deliveries_dropped
            .fetch_add(outcome.deliveries_dropped as u64, Ordering::SeqCst);
    }

    fn record_discard(&self) {
        self.jobs_discarded.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns a copy of the current counter values.
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            jobs_completed: self.jobs_completed.load(Ordering::SeqCst),
            jobs_failed: self.jobs_failed.load(Ordering::SeqCst),
            jobs_discarded: self.jobs_discarded.load(Ordering::SeqCst),
            files_reviewed: self.files_reviewed.load(Ordering::SeqCst),
            deliveries_dropped: self.deliveries_dropped.load(Ordering::SeqCst),
        }
    }
}

/// How a dispatched job ended.
#[derive(Debug, PartialEq)]
pub enum DispatchOutcome {
    /// The connection the job named is not registered; nothing ran.
    Undeliverable,
    /// The job ran (possibly aborting early) and the stream was terminated.
    Completed(JobOutcome),
}

/// Routes one job to its connection and runs the review.
///
/// Jobs whose connection has already gone away are dropped without
/// reviewing anything, since there is nowhere to send results. Jobs
/// naming a provider with no configured credentials still get an error
/// result and a terminator so the waiting client is not left hanging.
pub async fn dispatch_job(
    job: &Job,
    registry: &ConnectionRegistry,
    reviewers: &ReviewerSet,
) -> DispatchOutcome {
    let Some(handle) = registry.get(&job.id).await else {
        warn!(
            connection_id = %job.id,
            root = %job.prompt,
            "Dropping job for unknown connection"
        );
        return DispatchOutcome::Undeliverable;
    };

    let Some(reviewer) = reviewers.get(job.provider) else {
        warn!(
            provider = %job.provider,
            connection_id = %job.id,
            "Job requested a provider with no configured API key"
        );
        let outcome = abort_job(
            &handle,
            &job.prompt,
            format!("Provider '{}' is not configured", job.provider),
        )
        .await;
        return DispatchOutcome::Completed(outcome);
    };

    let pipeline = ReviewPipeline::new(reviewer);
    DispatchOutcome::Completed(pipeline.run(&job.prompt, &handle).await)
}

/// Single consumer of the job queue.
pub struct Worker {
    queue: Arc<JobQueue>,
    registry: Arc<ConnectionRegistry>,
    reviewers: Arc<ReviewerSet>,
    config: WorkerConfig,
    shutdown_rx: broadcast::Receiver<()>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Creates a new worker.
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<ConnectionRegistry>,
        reviewers: Arc<ReviewerSet>,
        config: WorkerConfig,
        shutdown_rx: broadcast::Receiver<()>,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            queue,
            registry,
            reviewers,
            config,
            shutdown_rx,
            stats,
        }
    }

    /// Main worker loop.
    ///
    /// Continuously polls for jobs and processes them until a shutdown
    /// signal is received. Jobs are acknowledged after handling, so a
    /// crash mid-job leaves the payload on the processing list for the
    /// next run to recover.
    pub async fn run(mut self) {
        info!(queue = %self.queue.queue_name(), "Worker started");

        if self.config.recover_on_start {
            match self.queue.recover_pending().await {
                Ok(recovered) => {
                    if recovered > 0 {
                        info!(recovered, "Recovered jobs from processing list");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to recover processing list");
                }
            }
        }

        loop {
            // Check for shutdown signal (non-blocking)
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!("Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    // We missed some signals, but since it's shutdown, just check again
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    // No shutdown signal, continue processing
                }
            }

            match self.queue.dequeue(self.config.poll_interval).await {
                Ok(Some(queued)) => {
                    self.process_job(&queued.job).await;

                    if let Err(e) = self.queue.ack(&queued).await {
                        error!(
                            connection_id = %queued.job.id,
                            error = %e,
                            "Failed to acknowledge job"
                        );
                    }
                }
                Ok(None) => {
                    // No job available, the dequeue already waited poll_interval
                    debug!("No jobs available");
                }
                Err(QueueError::MalformedPayload(e)) => {
                    warn!(error = %e, "Discarding malformed job payload");
                    self.stats.record_discard();
                }
                Err(e) => {
                    error!(error = %e, "Failed to dequeue job");
                    // Wait before retrying on error
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        info!("Worker stopped");
    }

    /// Processes a single job.
    async fn process_job(&self, job: &Job) {
        if let Err(e) = job.validate() {
            warn!(
                connection_id = %job.id,
                error = %e,
                "Discarding invalid job"
            );
            self.stats.record_discard();
            return;
        }

        info!(
            connection_id = %job.id,
            provider = %job.provider,
            root = %job.prompt,
            "Processing job"
        );

        match dispatch_job(job, &self.registry, &self.reviewers).await {
            DispatchOutcome::Undeliverable => {
                self.stats.record_discard();
            }
            DispatchOutcome::Completed(outcome) => {
                self.stats.record_outcome(&outcome);
                info!(
                    connection_id = %job.id,
                    files_reviewed = outcome.files_reviewed,
                    files_failed = outcome.files_failed,
                    aborted = outcome.aborted,
                    "Job finished"
                );
            }
        }
    }
}
