//! Keep/discard decision for pair groups.
//!
//! A filter sees one complete pair group and answers whether it is kept. The
//! query handed to the aligner is the concatenation of the sequences of every
//! read in the group, and only the top hit is inspected.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::align::Aligner;
use crate::read::Read;

/// Decision capability applied by the workers
pub trait GroupFilter: Send + Sync {
    /// `true` keeps the group, `false` discards it
    fn decide(&self, group: &[Read]) -> bool;
}

/// Filter modes selectable at startup
#[derive(Clone)]
pub enum FilterMode {
    /// Keep everything after a fixed artificial delay, for load testing
    Dummy { latency: Duration },
    /// Keep a group only if its top hit is the positive contig
    Combined {
        aligner: Arc<dyn Aligner>,
        positive_contig: String,
    },
    /// Keep a group if it has no hit, or its top hit has a quality below the threshold
    Negative {
        aligner: Arc<dyn Aligner>,
        quality_threshold: u8,
    },
}

impl FilterMode {
    pub fn name(&self) -> &'static str {
        match self {
            FilterMode::Dummy { .. } => "dummy",
            FilterMode::Combined { .. } => "combined",
            FilterMode::Negative { .. } => "negative",
        }
    }
}

fn query(group: &[Read]) -> String {
    group.iter().map(|read| read.sequence.as_str()).collect()
}

impl GroupFilter for FilterMode {
    fn decide(&self, group: &[Read]) -> bool {
        match self {
            FilterMode::Dummy { latency } => {
                if !latency.is_zero() {
                    std::thread::sleep(*latency);
                }
                true
            }
            FilterMode::Combined {
                aligner,
                positive_contig,
            } => aligner
                .top_hit(&query(group))
                .is_some_and(|hit| &hit.contig == positive_contig),
            FilterMode::Negative {
                aligner,
                quality_threshold,
            } => aligner
                .top_hit(&query(group))
                .map_or(true, |hit| hit.mapq < *quality_threshold),
        }
    }
}

impl fmt::Debug for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterMode::Dummy { latency } => {
                f.debug_struct("Dummy").field("latency", latency).finish()
            }
            FilterMode::Combined {
                positive_contig, ..
            } => f
                .debug_struct("Combined")
                .field("positive_contig", positive_contig)
                .finish_non_exhaustive(),
            FilterMode::Negative {
                quality_threshold, ..
            } => f
                .debug_struct("Negative")
                .field("quality_threshold", quality_threshold)
                .finish_non_exhaustive(),
        }
    }
}
