//! Job pipeline between the API and the filter workers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │          POST /context/{id}/reads (admission)            │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │ SET work:{job} + LPUSH work:queue
//!                    ┌────────▼────────┐
//!                    │    JobQueue     │ ← shared store, FIFO
//!                    └────────┬────────┘
//!                             │ BRPOP + GETDEL
//!                    ┌────────▼────────┐
//!                    │   WorkerPool    │ ← N workers, any process
//!                    │  decide(group)  │
//!                    └────────┬────────┘
//!                             │ one atomic batch
//!                    ┌────────▼────────┐
//!                    │ context:{id}:*  │ ← kept reads, counters
//!                    └─────────────────┘
//! ```
//!
//! Jobs are never requeued. A job whose record cannot be read is logged and
//! abandoned.

mod metrics;
mod queue;
mod worker;

pub use metrics::{PoolSnapshot, PoolStats};
pub use queue::JobQueue;
pub use worker::{JobOutcome, WorkerPool};
