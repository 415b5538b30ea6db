//! Error types for the SWGTS core library
//!
//! Each concern of the core crate gets its own error enum so callers can match
//! on exactly the failures they can recover from.
//!
//! # Error Hierarchy
//!
//! ```text
//! ShapeError  - a submitted batch does not have the declared pair/read arity
//! JobError    - a queued job record cannot be turned back into read groups
//! AlignError  - the reference for the built-in aligner cannot be loaded
//! ```

use thiserror::Error;

/// A batch of read groups does not have the structure declared for its context
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// A pair group holds a different number of reads than the context declares
    #[error(
        "expected {expected}-paired reads, but pair group {group} holds {actual} reads"
    )]
    PairArity {
        group: usize,
        expected: usize,
        actual: usize,
    },

    /// A read is not made of exactly four lines
    #[error("a read must have exactly 4 lines, got {0}")]
    ReadArity(usize),
}

/// Errors that can occur while decoding a queued job record
#[derive(Error, Debug)]
pub enum JobError {
    /// The record is missing, truncated or internally inconsistent
    #[error("corrupt job record: {0}")]
    Corrupt(String),

    /// The record was written by an incompatible producer
    #[error("unsupported job record version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// The record is not valid JSON
    #[error("malformed job record: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl JobError {
    /// Create a corrupt record error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}

/// Errors raised while building an aligner index
#[derive(Error, Debug)]
pub enum AlignError {
    #[error("failed to read reference {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse reference {path}: {message}")]
    Parse { path: String, message: String },

    #[error("reference {0} contains no indexable k-mers")]
    EmptyIndex(String),

    #[error("k-mer size must be between 1 and 32, got {0}")]
    InvalidKmerSize(usize),
}
