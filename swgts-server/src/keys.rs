//! Shared store key layout.
//!
//! ```text
//! context:{id}:pending_bytes        integer, TTL
//! context:{id}:pair_count           integer, TTL
//! context:{id}:processed_reads      integer, TTL
//! context:{id}:pair:{i}:filename    string, TTL
//! context:{id}:pair:{i}:reads       set of raw records, TTL
//! context:{id}:speed                list of throughput samples, TTL
//! work:queue                        list of job ids
//! work:{job}                        job record
//! stats:bases                       integer
//! ```

use uuid::Uuid;

pub const WORK_QUEUE: &str = "work:queue";
pub const STATS_BASES: &str = "stats:bases";

pub fn job(job_id: &Uuid) -> String {
    format!("work:{}", job_id)
}

/// Keys belonging to one context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextKeys {
    id: Uuid,
}

impl ContextKeys {
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }

    pub fn pending_bytes(&self) -> String {
        format!("context:{}:pending_bytes", self.id)
    }

    pub fn pair_count(&self) -> String {
        format!("context:{}:pair_count", self.id)
    }

    pub fn processed_reads(&self) -> String {
        format!("context:{}:processed_reads", self.id)
    }

    pub fn filename(&self, pair: usize) -> String {
        format!("context:{}:pair:{}:filename", self.id, pair)
    }

    pub fn reads(&self, pair: usize) -> String {
        format!("context:{}:pair:{}:reads", self.id, pair)
    }

    pub fn speed(&self) -> String {
        format!("context:{}:speed", self.id)
    }

    /// Keys that exist for the whole life of a context
    pub fn counters(&self) -> [String; 3] {
        [self.pending_bytes(), self.pair_count(), self.processed_reads()]
    }

    /// Every key a context may own
    pub fn all(&self, pair_count: usize) -> Vec<String> {
        let mut keys = self.counters().to_vec();
        for pair in 0..pair_count {
            keys.push(self.filename(pair));
            keys.push(self.reads(pair));
        }
        keys.push(self.speed());
        keys
    }
}
