//! Metrics module for the SWGTS server
//!
//! Provides Prometheus metrics for monitoring and observability.

pub mod prometheus;

// Re-export commonly used items
pub use prometheus::{
    encode_metrics, record_abandoned_job, record_batch, record_dropped_reads, record_job,
    register_metrics, ACTIVE_WORKERS, CONTEXTS_CLOSED_TOTAL, CONTEXTS_CREATED_TOTAL,
};
