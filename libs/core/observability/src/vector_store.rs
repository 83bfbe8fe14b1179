//! Vector store metrics.

use metrics::{counter, histogram};

/// Where a write or delete landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Shared,
    Namespace,
    GeneralCopy,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Shared => "shared",
            TableKind::Namespace => "namespace",
            TableKind::GeneralCopy => "general_copy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    Delivered,
    Rejected,
    TimedOut,
    Failed,
    Skipped,
}

impl NotificationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationOutcome::Delivered => "delivered",
            NotificationOutcome::Rejected => "rejected",
            NotificationOutcome::TimedOut => "timed_out",
            NotificationOutcome::Failed => "failed",
            NotificationOutcome::Skipped => "skipped",
        }
    }
}

/// Vector store metrics recorder.
///
/// Labels are bounded enums only; tenant names go to logs, never to labels.
pub struct VectorStoreMetrics;

impl VectorStoreMetrics {
    pub fn record_upsert(
        shared: usize,
        namespace_rows: usize,
        general_copies: usize,
        duration_ms: u64,
    ) {
        Self::record_written(TableKind::Shared, shared);
        Self::record_written(TableKind::Namespace, namespace_rows);
        Self::record_written(TableKind::GeneralCopy, general_copies);
        histogram!("vector_upsert_duration_seconds").record(duration_ms as f64 / 1000.0);

        tracing::debug!(
            shared,
            namespace_rows,
            general_copies,
            duration_ms,
            "Recorded upsert"
        );
    }

    fn record_written(kind: TableKind, count: usize) {
        if count == 0 {
            return;
        }
        counter!("vector_chunks_written_total", "table" => kind.as_str()).increment(count as u64);
    }

    pub fn record_write_failure(stage: &'static str) {
        counter!("vector_write_failures_total", "stage" => stage).increment(1);
    }

    pub fn record_delete(shared: u64, namespace_rows: u64) {
        counter!("vector_chunks_deleted_total", "table" => TableKind::Shared.as_str())
            .increment(shared);
        counter!("vector_chunks_deleted_total", "table" => TableKind::Namespace.as_str())
            .increment(namespace_rows);
    }

    pub fn record_query(results: usize, duration_ms: u64) {
        counter!("vector_queries_total").increment(1);
        histogram!("vector_query_duration_seconds").record(duration_ms as f64 / 1000.0);

        tracing::debug!(results, duration_ms, "Recorded query");
    }

    pub fn record_table_created() {
        counter!("vector_namespace_tables_created_total").increment(1);
    }

    pub fn record_notification(outcome: NotificationOutcome) {
        counter!("vector_notifications_total", "outcome" => outcome.as_str()).increment(1);
    }
}
