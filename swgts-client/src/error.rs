//! Error types for the submission client.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid FASTQ in {path}: {message}")]
    Fastq { path: PathBuf, message: String },

    #[error("Server answered {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Context {0} does not exist on the server")]
    NotFound(Uuid),

    #[error("Gave up after {0} deferred submissions")]
    TooManyRetries(usize),

    #[error("Server deferred a request without a Retry-After hint")]
    MissingRetryAfter,

    #[error("Malformed server response: {0}")]
    MalformedResponse(String),

    #[error("A single pair group of {bases} bases is larger than the server accepts")]
    UnsplittableChunk { bases: u64 },

    #[error("{path} ended after {records} records while its mates continue")]
    MismatchedPairs { path: PathBuf, records: usize },
}

impl ClientError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
