// SWGTS Core Library
//
// Read model, job record codec and the read filtering capability shared by the
// API server, the filter workers and the submission client.

pub mod align;
pub mod error;
pub mod filter;
pub mod job;
pub mod read;

pub use align::{Aligner, AlignmentHit, KmerAligner};
pub use error::{AlignError, JobError, ShapeError};
pub use filter::{FilterMode, GroupFilter};
pub use job::{JobRecord, JOB_RECORD_VERSION};
pub use read::{batch_bases, validate_arity, PairGroup, Read};
