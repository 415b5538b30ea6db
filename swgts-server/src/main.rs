//! SWGTS server - read filtering API with byte-bounded backpressure.
//!
//! Serves the upload API and, unless `SWGTS_WORKER_THREADS=0`, runs filter
//! workers in the same process. Extra workers can run anywhere against the
//! same Redis instance (`swgts filter`).
//!
//! ## Quick Start
//!
//! ```bash
//! # Start with defaults (port 8000, Redis at 127.0.0.1:6379)
//! swgts-server
//!
//! # Configuration file plus overrides
//! SWGTS_CONFIG=swgts.toml SWGTS_PORT=9000 swgts-server
//!
//! # No Redis, dummy filter
//! SWGTS_STORE=memory SWGTS_FILTER_MODE=dummy swgts-server
//! ```

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use swgts_server::{
    build_workers, cancel_on_ctrl_c, connect_store, init_metrics, run_server, run_workers,
    AppState, ServerConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("swgts_server=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load configuration
    let config_path = std::env::var_os("SWGTS_CONFIG").map(PathBuf::from);
    let config = ServerConfig::load(config_path.as_deref()).context("loading configuration")?;

    info!("Starting SWGTS server v{}", env!("CARGO_PKG_VERSION"));
    config.log();
    init_metrics();

    let store = connect_store(&config).await?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut state = AppState::new(config.clone(), store.clone());
    let workers = if config.worker_threads > 0 {
        let pool = build_workers(&config, store)?;
        state = state.with_workers(pool.stats());
        Some(tokio::spawn(run_workers(
            pool,
            config.worker_threads,
            cancel.clone(),
        )))
    } else {
        info!("No local workers, expecting external filter processes");
        None
    };

    let served = run_server(Arc::new(state), cancel.clone()).await;
    cancel.cancel();
    if let Some(workers) = workers {
        workers.await.context("joining workers")?;
    }

    served
}
