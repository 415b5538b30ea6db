//! HTTP route handlers for the SWGTS API.
//!
//! - `context`: upload context lifecycle
//! - `health`: health, liveness and Prometheus endpoints
//! - `status`: server status

pub mod context;
pub mod health;
pub mod status;

pub use context::{close_context, context_status, create_context, submit_reads};
pub use health::{health, live, metrics};
pub use status::server_status;
