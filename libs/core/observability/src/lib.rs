//! Metrics for the namespace-partitioned vector store.
//!
//! Libraries record through the `metrics` facade via [`VectorStoreMetrics`];
//! binaries install the Prometheus recorder once with [`init_metrics`]. Without
//! a recorder every call is a no-op, which is what unit tests rely on.
//!
//! ```rust,ignore
//! use observability::{init_metrics, render_metrics, VectorStoreMetrics};
//!
//! init_metrics();
//! VectorStoreMetrics::record_upsert("project-a", 3, 3, 3, 12);
//! println!("{}", render_metrics());
//! ```

pub mod vector_store;

pub use vector_store::{NotificationOutcome, TableKind, VectorStoreMetrics};

pub use metrics::{counter, gauge, histogram};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Returns `None` if another recorder was installed first (for example by a
/// test harness); recording still goes to that recorder.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Some(handle);
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            register_metric_descriptions();
            info!("Prometheus metrics recorder initialized");
            Some(METRICS_HANDLE.get_or_init(|| handle))
        }
        Err(e) => {
            warn!(error = %e, "Metrics recorder not installed");
            None
        }
    }
}

pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Prometheus text exposition of everything recorded so far
pub fn render_metrics() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

fn register_metric_descriptions() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(
        "vector_chunks_written_total",
        "Chunks written, by table kind (shared, namespace, general_copy)"
    );
    describe_histogram!(
        "vector_upsert_duration_seconds",
        "Upsert duration including schema checks"
    );
    describe_counter!(
        "vector_write_failures_total",
        "Upserts aborted, by failing stage"
    );
    describe_counter!(
        "vector_chunks_deleted_total",
        "Chunks deleted, by table kind"
    );
    describe_counter!("vector_queries_total", "Similarity queries executed");
    describe_histogram!(
        "vector_query_duration_seconds",
        "Similarity query duration"
    );
    describe_counter!(
        "vector_namespace_tables_created_total",
        "Namespace tables created on first write"
    );
    describe_counter!(
        "vector_notifications_total",
        "Completion callbacks, by outcome"
    );
}
