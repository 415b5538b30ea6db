//! Submission client for the SWGTS read filtering service.
//!
//! Streams one FASTQ file per pair slot, cuts the pair groups into chunks
//! sized against the server buffer, transmits them while honoring the
//! server's backpressure hints, closes the context and optionally rebuilds
//! filtered FASTQ files from the ids the server kept.
//!
//! ```no_run
//! use swgts_client::{SwgtsClient, UploadOptions};
//!
//! # async fn run() -> swgts_client::Result<()> {
//! let client = SwgtsClient::new("http://127.0.0.1:8000")?;
//! let report = client
//!     .upload(&["reads_1.fastq.gz", "reads_2.fastq.gz"], &UploadOptions::default())
//!     .await?;
//! println!("kept {} of {}", report.summary.saved.len(), report.summary.total);
//! # Ok(())
//! # }
//! ```

pub mod chunker;
pub mod client;
pub mod error;
pub mod fastq;
pub mod reconstruct;

pub use chunker::Chunker;
pub use client::{
    CloseSummary, ServerStatus, SubmitReply, SwgtsClient, TransmitStats, UploadOptions,
    UploadReport,
};
pub use error::{ClientError, Result};
pub use fastq::{FastqStream, PairedReads};
pub use reconstruct::{filtered_name, reconstruct};
