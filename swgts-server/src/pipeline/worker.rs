//! Filter workers.
//!
//! Each worker loops: claim a job id from the global queue, take the job record,
//! run the filter over every group on the blocking pool, then record kept
//! records and release the job's reservation in one atomic batch. Workers share
//! nothing in process besides the store handle and counters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use swgts_core::{GroupFilter, PairGroup};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::metrics::PoolStats;
use super::queue::JobQueue;
use crate::context::{ContextRegistry, JobAccounting};
use crate::error::ServerError;
use crate::metrics;
use crate::throughput::ThroughputEstimator;

/// Pause after a store failure before polling again
const STORE_FAILURE_BACKOFF: Duration = Duration::from_secs(1);

/// What happened to one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job: Uuid,
    pub context: Uuid,
    /// Groups the filter looked at
    pub examined: usize,
    pub kept: usize,
    pub byte_size: u64,
    pub accounting: JobAccounting,
}

pub struct WorkerPool {
    queue: JobQueue,
    registry: ContextRegistry,
    filter: Arc<dyn GroupFilter>,
    stats: Arc<PoolStats>,
    dequeue_timeout: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: JobQueue,
        registry: ContextRegistry,
        filter: Arc<dyn GroupFilter>,
        dequeue_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            registry,
            filter,
            stats: Arc::new(PoolStats::new()),
            dequeue_timeout,
        }
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        self.stats.clone()
    }

    /// Start `workers` tasks that run until `cancel` fires
    pub fn spawn(self: &Arc<Self>, workers: usize, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..workers)
            .map(|worker| {
                let pool = Arc::clone(self);
                let cancel = cancel.clone();
                tokio::spawn(async move { pool.run(worker, cancel).await })
            })
            .collect()
    }

    /// Worker loop
    pub async fn run(&self, worker: usize, cancel: CancellationToken) {
        info!(worker, "Worker started");

        loop {
            // Cancelling drops a pending BRPOP. An id Redis pops at that instant is lost
            // and its record stays behind, like any other orphaned job.
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.queue.dequeue(self.dequeue_timeout) => next,
            };

            match next {
                Ok(None) => debug!(worker, "Queue idle"),
                Ok(Some(job)) => self.handle(worker, job).await,
                Err(err @ ServerError::CorruptJob { .. }) => {
                    warn!(worker, error = %err, "Discarding unreadable queue entry");
                    self.stats.record_abandoned();
                    metrics::record_abandoned_job();
                }
                Err(err) => {
                    error!(worker, error = %err, "Dequeue failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(STORE_FAILURE_BACKOFF) => {}
                    }
                }
            }
        }

        info!(worker, "Worker stopped");
    }

    async fn handle(&self, worker: usize, job: Uuid) {
        match self.process_job(job).await {
            Ok(outcome) => match outcome.accounting {
                JobAccounting::Recorded { pending_bytes, .. } => info!(
                    worker,
                    job = %job,
                    context = %outcome.context,
                    kept = outcome.kept,
                    examined = outcome.examined,
                    pending_bytes,
                    "Job done"
                ),
                JobAccounting::Orphaned => warn!(
                    worker,
                    job = %job,
                    context = %outcome.context,
                    "Context vanished before results were recorded"
                ),
            },
            Err(err @ ServerError::CorruptJob { .. }) => {
                warn!(worker, job = %job, error = %err, "Abandoning job");
            }
            Err(err) => error!(worker, job = %job, error = %err, "Job failed"),
        }
    }

    /// Filter one claimed job and record the results
    pub async fn process_job(&self, job: Uuid) -> Result<JobOutcome, ServerError> {
        let record = match self.queue.decode(job).await {
            Ok(record) => record,
            Err(err) => {
                self.stats.record_abandoned();
                metrics::record_abandoned_job();
                return Err(err);
            }
        };

        self.stats.record_started();
        metrics::ACTIVE_WORKERS.inc();
        let started = Instant::now();

        let context = record.context;
        let byte_size = record.byte_size;
        let submitted_at = record.submitted_at;
        let groups = record.into_groups();
        let examined = groups.len();

        let result = async {
            let kept = self.filter_groups(groups).await?;
            let elapsed_ms = (Utc::now().timestamp_millis() - submitted_at).max(0) as u64;
            let sample = ThroughputEstimator::sample(Duration::from_millis(elapsed_ms), byte_size);
            let accounting = self
                .registry
                .record_job(context, &kept, examined, byte_size, sample)
                .await?;
            Ok::<_, ServerError>((kept.len(), accounting))
        }
        .await;

        metrics::ACTIVE_WORKERS.dec();
        let (kept, accounting) = match result {
            Ok(done) => done,
            Err(err) => {
                self.stats.record_failed();
                match self.registry.release_job(context, examined, byte_size).await {
                    Ok(accounting) => warn!(
                        job = %job,
                        context = %context,
                        byte_size,
                        ?accounting,
                        "Released reservation of failed job"
                    ),
                    Err(release_err) => error!(
                        job = %job,
                        context = %context,
                        byte_size,
                        error = %release_err,
                        "Could not release reservation of failed job"
                    ),
                }
                return Err(err);
            }
        };

        let processing_time = started.elapsed();
        match accounting {
            JobAccounting::Recorded { .. } => {
                self.stats
                    .record_completed(kept, examined - kept, processing_time);
                metrics::record_job(kept, examined - kept, processing_time.as_secs_f64());
            }
            JobAccounting::Orphaned => self.stats.record_orphaned(),
        }

        Ok(JobOutcome {
            job,
            context,
            examined,
            kept,
            byte_size,
            accounting,
        })
    }

    async fn filter_groups(&self, groups: Vec<PairGroup>) -> Result<Vec<PairGroup>, ServerError> {
        let filter = Arc::clone(&self.filter);
        tokio::task::spawn_blocking(move || {
            groups
                .into_iter()
                .filter(|group| filter.decide(group))
                .collect()
        })
        .await
        .map_err(|e| ServerError::Internal(format!("filter task failed: {}", e)))
    }
}
