//! Application state for the SWGTS API.

use std::sync::Arc;
use std::time::Instant;

use crate::admission::AdmissionController;
use crate::config::ServerConfig;
use crate::context::ContextRegistry;
use crate::pipeline::{JobQueue, PoolStats};
use crate::store::SharedStore;

/// Application state shared across all handlers
pub struct AppState {
    pub store: SharedStore,

    pub registry: ContextRegistry,

    pub admission: AdmissionController,

    /// Configuration
    pub config: ServerConfig,

    /// Set when workers run in this process, reported by `/server-status`
    pub workers: Option<Arc<PoolStats>>,

    pub started_at: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(config: ServerConfig, store: SharedStore) -> Self {
        let registry = ContextRegistry::new(
            store.clone(),
            config.context_timeout(),
            config.upload_dir.clone(),
        );
        let admission = AdmissionController::new(
            registry.clone(),
            JobQueue::new(store.clone()),
            config.max_pending_bytes,
        );

        Self {
            store,
            registry,
            admission,
            config,
            workers: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_workers(mut self, stats: Arc<PoolStats>) -> Self {
        self.workers = Some(stats);
        self
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}
