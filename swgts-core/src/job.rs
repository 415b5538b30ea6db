//! Queued filter job record.
//!
//! An accepted batch is stored as one JSON document so that it is written and
//! consumed as a single unit. The read payload is flattened into
//! `group_count * pair_count * 4` tokens in (group, pair, line) order, and the
//! header fields let a consumer verify the payload before rebuilding the groups.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;
use crate::read::{PairGroup, Read};

/// Version written by this crate; records with any other version are refused
pub const JOB_RECORD_VERSION: u32 = 1;

const LINES_PER_READ: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub version: u32,
    /// Owning context
    pub context: Uuid,
    /// Sum of sequence lengths reserved for this job at admission
    pub byte_size: u64,
    pub group_count: usize,
    pub pair_count: usize,
    /// Enqueue time, milliseconds since the Unix epoch
    pub submitted_at: i64,
    pub tokens: Vec<String>,
}

impl JobRecord {
    /// Flatten accepted groups into a record.
    ///
    /// The caller guarantees every group holds `pair_count` reads; admission
    /// validates arity before anything is queued.
    pub fn new(
        context: Uuid,
        groups: &[PairGroup],
        pair_count: usize,
        byte_size: u64,
        submitted_at: i64,
    ) -> Self {
        let mut tokens = Vec::with_capacity(groups.len() * pair_count * LINES_PER_READ);
        for group in groups {
            for read in group {
                tokens.extend(read.lines().iter().map(|line| line.to_string()));
            }
        }

        Self {
            version: JOB_RECORD_VERSION,
            context,
            byte_size,
            group_count: groups.len(),
            pair_count,
            submitted_at,
            tokens,
        }
    }

    pub fn encode(&self) -> Result<String, JobError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and verify a stored record
    pub fn decode(raw: &str) -> Result<Self, JobError> {
        let record: JobRecord = serde_json::from_str(raw)?;

        if record.version != JOB_RECORD_VERSION {
            return Err(JobError::UnsupportedVersion {
                found: record.version,
                expected: JOB_RECORD_VERSION,
            });
        }
        if record.pair_count == 0 {
            return Err(JobError::corrupt("pair count is zero"));
        }

        let expected = record
            .group_count
            .checked_mul(record.pair_count)
            .and_then(|n| n.checked_mul(LINES_PER_READ))
            .ok_or_else(|| JobError::corrupt("token count overflows"))?;
        if record.tokens.len() != expected {
            return Err(JobError::corrupt(format!(
                "expected {} tokens, found {}",
                expected,
                record.tokens.len()
            )));
        }

        Ok(record)
    }

    /// Rebuild the nested group structure from the flat payload
    pub fn into_groups(self) -> Vec<PairGroup> {
        let pair_count = self.pair_count;
        let mut groups = Vec::with_capacity(self.group_count);
        let mut group = Vec::with_capacity(pair_count);
        let mut tokens = self.tokens.into_iter();

        while let (Some(id), Some(sequence), Some(separator), Some(quality)) =
            (tokens.next(), tokens.next(), tokens.next(), tokens.next())
        {
            group.push(Read { id, sequence, separator, quality });
            if group.len() == pair_count {
                groups.push(std::mem::replace(&mut group, Vec::with_capacity(pair_count)));
            }
        }

        groups
    }
}
