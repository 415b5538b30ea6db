//! Global job queue over the shared store.
//!
//! `work:queue` is a FIFO of job ids (pushed at the head, popped from the tail)
//! and each id points at one `work:{id}` record. A record is written in the same
//! atomic batch as its queue entry and consumed with an atomic take, so a job is
//! only ever seen whole, and by exactly one worker.

use std::time::Duration;
use swgts_core::{JobRecord, PairGroup};
use tracing::debug;
use uuid::Uuid;

use crate::error::ServerError;
use crate::keys::{self, WORK_QUEUE};
use crate::store::{SharedStore, StoreOp};

#[derive(Clone)]
pub struct JobQueue {
    store: SharedStore,
}

impl JobQueue {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Queue accepted groups as one job
    pub async fn enqueue(
        &self,
        context: Uuid,
        groups: &[PairGroup],
        pair_count: usize,
        byte_size: u64,
        submitted_at_ms: i64,
    ) -> Result<Uuid, ServerError> {
        let job_id = Uuid::new_v4();
        let record = JobRecord::new(context, groups, pair_count, byte_size, submitted_at_ms);

        self.store
            .atomic(vec![
                StoreOp::set(keys::job(&job_id), record.encode()?, None),
                StoreOp::LPush {
                    key: WORK_QUEUE.to_string(),
                    values: vec![job_id.to_string()],
                },
            ])
            .await?;

        debug!(job = %job_id, context = %context, groups = groups.len(), byte_size, "Enqueued job");
        Ok(job_id)
    }

    /// Wait up to `timeout` for the next job id; `None` when the queue stayed empty
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<Uuid>, ServerError> {
        match self.store.blocking_pop(WORK_QUEUE, timeout).await? {
            None => Ok(None),
            Some(raw) => Uuid::parse_str(&raw)
                .map(Some)
                .map_err(|e| ServerError::corrupt_job(raw, e)),
        }
    }

    /// Take a job's record out of the store and verify it
    pub async fn decode(&self, job_id: Uuid) -> Result<JobRecord, ServerError> {
        let raw = self
            .store
            .take(&keys::job(&job_id))
            .await?
            .ok_or_else(|| ServerError::corrupt_job(job_id, "record missing"))?;
        JobRecord::decode(&raw).map_err(|e| ServerError::corrupt_job(job_id, e))
    }
}
