//! Prometheus metrics for the SWGTS server
//!
//! Exposes metrics in Prometheus format for monitoring and observability.

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for SWGTS metrics
    pub static ref REGISTRY: Registry = Registry::new();

    // ============== Context Metrics ==============

    pub static ref CONTEXTS_CREATED_TOTAL: Counter = Counter::with_opts(
        Opts::new("contexts_created_total", "Total upload contexts created")
            .namespace("swgts")
    ).expect("metric can be created");

    pub static ref CONTEXTS_CLOSED_TOTAL: Counter = Counter::with_opts(
        Opts::new("contexts_closed_total", "Total upload contexts finalized")
            .namespace("swgts")
    ).expect("metric can be created");

    // ============== Admission Metrics ==============

    /// Submitted batches by admission outcome (accepted, deferred, rejected)
    pub static ref BATCHES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("batches_total", "Submitted read batches by admission outcome")
            .namespace("swgts"),
        &["outcome"]
    ).expect("metric can be created");

    /// Reads dropped before sizing because they exceed the buffer
    pub static ref READS_DROPPED_TOTAL: Counter = Counter::with_opts(
        Opts::new("reads_dropped_total", "Reads longer than the pending byte limit")
            .namespace("swgts")
    ).expect("metric can be created");

    // ============== Worker Metrics ==============

    pub static ref JOBS_PROCESSED_TOTAL: Counter = Counter::with_opts(
        Opts::new("jobs_processed_total", "Total filter jobs completed")
            .namespace("swgts")
    ).expect("metric can be created");

    pub static ref JOBS_ABANDONED_TOTAL: Counter = Counter::with_opts(
        Opts::new("jobs_abandoned_total", "Jobs abandoned because their record was missing or corrupt")
            .namespace("swgts")
    ).expect("metric can be created");

    /// Filtered groups by decision (kept, discarded)
    pub static ref GROUPS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("groups_total", "Filtered pair groups by decision")
            .namespace("swgts"),
        &["decision"]
    ).expect("metric can be created");

    pub static ref JOB_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "job_duration_seconds",
            "Time spent filtering one job"
        )
        .namespace("swgts")
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    ).expect("metric can be created");

    /// Workers currently holding a job
    pub static ref ACTIVE_WORKERS: Gauge = Gauge::with_opts(
        Opts::new("active_workers", "Number of workers currently filtering a job")
            .namespace("swgts")
    ).expect("metric can be created");
}

/// Register all metrics with the global registry.
/// Should be called once at startup.
pub fn register_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(CONTEXTS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONTEXTS_CLOSED_TOTAL.clone()))?;

    REGISTRY.register(Box::new(BATCHES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READS_DROPPED_TOTAL.clone()))?;

    REGISTRY.register(Box::new(JOBS_PROCESSED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(JOBS_ABANDONED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GROUPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_WORKERS.clone()))?;

    Ok(())
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
}

/// Record a batch admission outcome.
pub fn record_batch(outcome: &str) {
    BATCHES_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record reads dropped as oversize.
pub fn record_dropped_reads(count: usize) {
    if count > 0 {
        READS_DROPPED_TOTAL.inc_by(count as f64);
    }
}

/// Record a completed job.
pub fn record_job(kept: usize, discarded: usize, duration_secs: f64) {
    JOBS_PROCESSED_TOTAL.inc();
    GROUPS_TOTAL.with_label_values(&["kept"]).inc_by(kept as f64);
    GROUPS_TOTAL
        .with_label_values(&["discarded"])
        .inc_by(discarded as f64);
    JOB_DURATION_SECONDS.observe(duration_secs);
}

/// Record an abandoned job.
pub fn record_abandoned_job() {
    JOBS_ABANDONED_TOTAL.inc();
}
