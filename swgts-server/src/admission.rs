//! Admission control for submitted read batches.
//!
//! A batch is validated against the context's pair arity, oversize reads are
//! dropped (taking their whole pair group with them), and the surviving bytes
//! are checked against the per-context reservation limit:
//!
//! 1. survivors alone exceed the limit: the batch is rejected, it must be split
//! 2. survivors plus what is already pending exceed the limit: the batch is
//!    deferred with a wait hint, nothing is touched
//! 3. otherwise the bytes are reserved and the survivors are queued
//!
//! The pending-bytes read and the later increment are separate store calls.
//! Two concurrent submissions to the same context can both pass the check;
//! a context is assumed to be driven by a single client.

use chrono::Utc;
use swgts_core::{validate_arity, PairGroup};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::context::ContextRegistry;
use crate::error::ServerError;
use crate::metrics;
use crate::pipeline::JobQueue;

/// Outcome of a submission that passed validation
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Bytes reserved and groups queued
    Accepted {
        processed_reads: i64,
        pending_bytes: i64,
    },
    /// Would overflow the reservation; retry the same batch after `retry_after` seconds
    BufferExceeded {
        retry_after: f64,
        pending_bytes: i64,
        processed_reads: i64,
    },
    /// Larger than the reservation limit on its own; must be split
    BatchTooLarge {
        retry_after: f64,
        processed_reads: i64,
    },
}

impl Admission {
    pub fn label(&self) -> &'static str {
        match self {
            Admission::Accepted { .. } => "accepted",
            Admission::BufferExceeded { .. } => "deferred",
            Admission::BatchTooLarge { .. } => "rejected",
        }
    }
}

/// A batch after oversize reads were removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedBatch {
    /// Complete groups whose reads all fit
    pub groups: Vec<PairGroup>,
    /// Sum of sequence lengths over `groups`
    pub effective_size: u64,
    /// Groups discarded because one of their reads was too long
    pub dropped_groups: usize,
    /// Reads that were too long themselves
    pub dropped_reads: usize,
}

/// Drop every group holding a read longer than `max_bytes` and size the rest
pub fn size_batch(batch: Vec<PairGroup>, max_bytes: u64) -> SizedBatch {
    let mut sized = SizedBatch {
        groups: Vec::with_capacity(batch.len()),
        effective_size: 0,
        dropped_groups: 0,
        dropped_reads: 0,
    };

    for group in batch {
        let oversize = group
            .iter()
            .filter(|read| read.bases() as u64 > max_bytes)
            .count();
        if oversize > 0 {
            sized.dropped_reads += oversize;
            sized.dropped_groups += 1;
            continue;
        }
        sized.effective_size += group.iter().map(|read| read.bases() as u64).sum::<u64>();
        sized.groups.push(group);
    }

    sized
}

#[derive(Clone)]
pub struct AdmissionController {
    registry: ContextRegistry,
    queue: JobQueue,
    max_pending_bytes: u64,
}

impl AdmissionController {
    pub fn new(registry: ContextRegistry, queue: JobQueue, max_pending_bytes: u64) -> Self {
        Self {
            registry,
            queue,
            max_pending_bytes,
        }
    }

    pub fn max_pending_bytes(&self) -> u64 {
        self.max_pending_bytes
    }

    /// Validate, size and either accept, defer or reject a batch
    #[instrument(skip(self, batch), fields(context = %id, groups = batch.len()))]
    pub async fn submit(&self, id: Uuid, batch: Vec<PairGroup>) -> Result<Admission, ServerError> {
        let received_at = Utc::now().timestamp_millis();

        let pair_count = self.registry.pair_count(id).await?;
        validate_arity(&batch, pair_count)?;

        let sized = size_batch(batch, self.max_pending_bytes);
        metrics::record_dropped_reads(sized.dropped_reads);

        let max = self.max_pending_bytes as i64;
        let effective = sized.effective_size as i64;

        if effective > max {
            let rate = self.registry.throughput().rate(id).await?;
            let admission = Admission::BatchTooLarge {
                retry_after: (effective - max) as f64 * rate,
                processed_reads: self.registry.processed_reads(id).await?,
            };
            metrics::record_batch(admission.label());
            return Ok(admission);
        }

        let current = self.registry.pending_bytes(id).await?;
        let excess = current + effective - max;
        if excess > 0 {
            let rate = self.registry.throughput().rate(id).await?;
            let admission = Admission::BufferExceeded {
                retry_after: excess as f64 * rate,
                pending_bytes: current,
                processed_reads: self.registry.processed_reads(id).await?,
            };
            debug!(excess, rate, "Deferring batch");
            metrics::record_batch(admission.label());
            return Ok(admission);
        }

        let (pending_bytes, processed_reads) = self
            .registry
            .adjust(id, effective, sized.dropped_groups as i64)
            .await?;

        if !sized.groups.is_empty() {
            self.queue
                .enqueue(id, &sized.groups, pair_count, sized.effective_size, received_at)
                .await?;
        }

        let admission = Admission::Accepted {
            processed_reads,
            pending_bytes,
        };
        metrics::record_batch(admission.label());
        Ok(admission)
    }
}
