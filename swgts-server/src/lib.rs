//! SWGTS server library
//!
//! Read filtering API with byte-bounded backpressure. Uploads are split into
//! jobs on a shared queue and filtered by a pool of workers that may live in
//! this process or any other process pointed at the same store.
//!
//! This library backs both the `swgts-server` binary and the `swgts` CLI.

use anyhow::Context as _;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub mod admission;
pub mod config;
pub mod context;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod store;
pub mod throughput;

pub use config::{FilterConfig, ServerConfig, StoreKind};
pub use pipeline::{JobQueue, WorkerPool};
pub use state::AppState;
pub use store::{MemoryStore, RedisStore, SharedStore, StateStore};

/// Initialize Prometheus metrics registry.
/// Should be called once before starting the server.
pub fn init_metrics() {
    if let Err(e) = metrics::register_metrics() {
        warn!("Failed to register Prometheus metrics: {}", e);
    }
}

/// Open the configured shared store
pub async fn connect_store(config: &ServerConfig) -> anyhow::Result<SharedStore> {
    let store: SharedStore = match config.store {
        StoreKind::Redis => {
            let store = RedisStore::connect(&config.redis_url)
                .await
                .with_context(|| format!("connecting to {}", config.redis_url))?;
            info!(url = %config.redis_url, "Connected to Redis");
            Arc::new(store)
        }
        StoreKind::Memory => {
            info!("Using in-process store");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

/// Build the API router over `state`
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_body_bytes;

    Router::new()
        // Health endpoints
        .route("/health", get(routes::health))
        .route("/live", get(routes::live))
        .route("/metrics", get(routes::metrics))
        .route("/server-status", get(routes::server_status))
        // Upload contexts
        .route("/context/create", post(routes::create_context))
        .route("/context/:id", get(routes::context_status))
        .route("/context/:id/reads", post(routes::submit_reads))
        .route("/context/:id/close", post(routes::close_context))
        // Middleware
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build a worker pool using the configured filter
pub fn build_workers(config: &ServerConfig, store: SharedStore) -> anyhow::Result<Arc<WorkerPool>> {
    let filter = config.filter.build().context("building filter")?;
    info!(filter = filter.name(), "Filter ready");

    let registry = context::ContextRegistry::new(
        store.clone(),
        config.context_timeout(),
        config.upload_dir.clone(),
    );
    Ok(Arc::new(WorkerPool::new(
        JobQueue::new(store),
        registry,
        Arc::new(filter),
        config.dequeue_timeout(),
    )))
}

/// Serve the API until `cancel` fires.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use swgts_server::{connect_store, run_server, AppState, ServerConfig};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ServerConfig::default();
///     let store = connect_store(&config).await?;
///     let state = Arc::new(AppState::new(config, store));
///     run_server(state, CancellationToken::new()).await
/// }
/// ```
pub async fn run_server(state: Arc<AppState>, cancel: CancellationToken) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!(
        "SWGTS API v{} listening on http://{}",
        env!("CARGO_PKG_VERSION"),
        addr
    );
    info!("Status: http://{}/server-status", addr);
    info!("Health: http://{}/health", addr);

    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("API stopped");
    Ok(())
}

/// Run `workers` filter workers until `cancel` fires
pub async fn run_workers(pool: Arc<WorkerPool>, workers: usize, cancel: CancellationToken) {
    info!(workers, "Starting filter workers");
    let handles = pool.spawn(workers, cancel);
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            warn!("Worker task ended abnormally: {}", e);
        }
    }
    let snapshot = pool.stats().snapshot();
    info!(
        completed = snapshot.jobs_completed,
        abandoned = snapshot.jobs_abandoned,
        "Workers stopped"
    );
}

/// Cancel `cancel` on Ctrl-C
pub fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), cancel));
}

/// Cancel `cancel` once `signal` fires. A handler that cannot be installed
/// leaves the process running without signal-driven shutdown.
async fn cancel_on_signal<F>(signal: F, cancel: CancellationToken)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Shutdown requested");
            cancel.cancel();
        }
        Err(e) => warn!("Could not listen for Ctrl-C, shutdown needs a kill: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use std::time::Duration;
    use swgts_core::{GroupFilter, Read};
    use tower::ServiceExt;

    struct Fixture {
        router: Router,
        state: Arc<AppState>,
        queue: JobQueue,
        pool: WorkerPool,
        _dir: tempfile::TempDir,
    }

    struct KeepAll;

    impl GroupFilter for KeepAll {
        fn decide(&self, _group: &[Read]) -> bool {
            true
        }
    }

    struct DiscardAll;

    impl GroupFilter for DiscardAll {
        fn decide(&self, _group: &[Read]) -> bool {
            false
        }
    }

    fn fixture(max_pending_bytes: u64) -> Fixture {
        fixture_with(max_pending_bytes, Arc::new(KeepAll))
    }

    fn fixture_with(max_pending_bytes: u64, filter: Arc<dyn GroupFilter>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            store: StoreKind::Memory,
            max_pending_bytes,
            upload_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let store: SharedStore = Arc::new(MemoryStore::new());
        let state = Arc::new(AppState::new(config, store.clone()));
        let pool = WorkerPool::new(
            JobQueue::new(store.clone()),
            state.registry.clone(),
            filter,
            Duration::from_millis(10),
        );
        Fixture {
            router: build_router(state.clone()),
            state,
            queue: JobQueue::new(store),
            pool,
            _dir: dir,
        }
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        router.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create(router: &Router, filenames: &[&str]) -> String {
        let response = send(
            router,
            "POST",
            "/context/create",
            Some(json!({ "filenames": filenames })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await["context"]
            .as_str()
            .unwrap()
            .to_string()
    }

    /// A batch holding one single-read group
    fn group(id: &str, seq_len: usize) -> Value {
        json!([[[id, "A".repeat(seq_len), "+", "I".repeat(seq_len)]]])
    }

    async fn drain(f: &Fixture) {
        while let Some(job) = f.queue.dequeue(Duration::from_millis(10)).await.unwrap() {
            f.pool.process_job(job).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_live() {
        let f = fixture(100);
        let response = send(&f.router, "GET", "/live", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_with_memory_store() {
        let f = fixture(100);
        let response = send(&f.router, "GET", "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_server_status() {
        let f = fixture(1234);
        let response = send(&f.router, "GET", "/server-status", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["maximum pending bytes"], 1234);
        assert_eq!(body["processed bases"], 0);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["uptime"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_create_rejects_malformed_body() {
        let f = fixture(100);
        let response = send(&f.router, "POST", "/context/create", Some(json!({"files": []}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&f.router, "POST", "/context/create", Some(json!({"filenames": []}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_filter_close() {
        let f = fixture(100);
        let id = create(&f.router, &["sample.fastq"]).await;

        let response = send(
            &f.router,
            "POST",
            &format!("/context/{}/reads", id),
            Some(group("@r1", 40)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["pending bytes"], 40);
        assert_eq!(body["processed reads"], 0);

        let response = send(&f.router, "POST", &format!("/context/{}/close", id), None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(json_body(response).await.get("Retry-After").is_some());

        drain(&f).await;

        let response = send(&f.router, "GET", &format!("/context/{}", id), None).await;
        let body = json_body(response).await;
        assert_eq!(body["pending bytes"], 0);
        assert_eq!(body["processed reads"], 1);
        assert_eq!(body["saved reads"], 1);

        let response = send(&f.router, "POST", &format!("/context/{}/close", id), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"saved": ["@r1"], "total": 1}));

        let written = f.state.config.upload_dir.join(&id).join("sample.fastq");
        let content = std::fs::read_to_string(written).unwrap();
        assert!(content.starts_with("@r1\n"));

        let response = send(&f.router, "POST", &format!("/context/{}/close", id), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_discarded_read_closes_with_nothing_saved() {
        let f = fixture_with(100, Arc::new(DiscardAll));
        let id = create(&f.router, &["sample.fastq"]).await;
        let uri = format!("/context/{}/reads", id);

        let response = send(&f.router, "POST", &uri, Some(group("@r1", 40))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["pending bytes"], 40);

        drain(&f).await;

        let response = send(&f.router, "GET", &format!("/context/{}", id), None).await;
        let body = json_body(response).await;
        assert_eq!(body["pending bytes"], 0);
        assert_eq!(body["processed reads"], 1);
        assert_eq!(body["saved reads"], 0);

        let response = send(&f.router, "POST", &format!("/context/{}/close", id), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"saved": [], "total": 1}));
    }

    #[tokio::test]
    async fn test_oversize_read_is_dropped_and_counted() {
        let f = fixture(100);
        let id = create(&f.router, &["sample.fastq"]).await;
        let uri = format!("/context/{}/reads", id);

        let response = send(&f.router, "POST", &uri, Some(group("@r1", 40))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&f.router, "POST", &uri, Some(group("@long", 150))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["pending bytes"], 40);
        assert_eq!(body["processed reads"], 1);
    }

    #[tokio::test]
    async fn test_buffer_exceeded_sets_retry_after() {
        let f = fixture(100);
        let id = create(&f.router, &["a.fq"]).await;
        let uri = format!("/context/{}/reads", id);

        let response = send(&f.router, "POST", &uri, Some(group("@a", 60))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&f.router, "POST", &uri, Some(group("@b", 60))).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        let body = json_body(response).await;
        assert_eq!(body["pending bytes"], 60);
    }

    #[tokio::test]
    async fn test_batch_too_large() {
        let f = fixture(100);
        let id = create(&f.router, &["a.fq"]).await;
        let batch = json!([
            [["@a", "A".repeat(60), "+", "I".repeat(60)]],
            [["@b", "A".repeat(60), "+", "I".repeat(60)]]
        ]);

        let response = send(&f.router, "POST", &format!("/context/{}/reads", id), Some(batch)).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn test_wrong_shape_is_bad_request() {
        let f = fixture(100);
        let id = create(&f.router, &["a_1.fq", "a_2.fq"]).await;
        let uri = format!("/context/{}/reads", id);

        let response = send(&f.router, "POST", &uri, Some(group("@a", 10))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let three_lines = json!([[["@a", "ACGT", "+"], ["@a", "ACGT", "+", "IIII"]]]);
        let response = send(&f.router, "POST", &uri, Some(three_lines)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_context_is_not_found() {
        let f = fixture(100);
        for uri in [
            format!("/context/{}/close", uuid::Uuid::new_v4()),
            "/context/not-a-uuid/close".to_string(),
        ] {
            let response = send(&f.router, "POST", &uri, None).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        let response = send(
            &f.router,
            "POST",
            &format!("/context/{}/reads", uuid::Uuid::new_v4()),
            Some(group("@a", 4)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(
            &f.router,
            "POST",
            &format!("/context/{}/reads", uuid::Uuid::new_v4()),
            Some(json!({"not": "a batch"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_signal_cancels_token() {
        let cancel = CancellationToken::new();
        cancel_on_signal(async { Ok(()) }, cancel.clone()).await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_failed_signal_handler_keeps_running() {
        let cancel = CancellationToken::new();
        let failed = async { Err(std::io::Error::other("no signal support")) };
        cancel_on_signal(failed, cancel.clone()).await;
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let f = fixture(100);
        let response = send(&f.router, "GET", "/metrics", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
