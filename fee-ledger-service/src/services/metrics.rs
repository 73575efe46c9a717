//! Prometheus metrics for fee-ledger-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// gRPC request counter by method and status.
pub static GRPC_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_ledger_grpc_requests_total",
        "Total number of gRPC requests",
        &["method", "status"]
    )
    .expect("Failed to register grpc_requests_total")
});

/// gRPC request duration histogram by method.
pub static GRPC_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fee_ledger_grpc_request_duration_seconds",
        "gRPC request duration in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register grpc_request_duration")
});

/// HTTP request counter for the side port, by route template.
pub static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_ledger_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("Failed to register http_requests_total")
});

/// HTTP request duration histogram by route template.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fee_ledger_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register http_request_duration")
});

/// Payments written, by resulting payment status.
pub static PAYMENTS_RECORDED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_ledger_payments_recorded_total",
        "Total number of payment records created or updated",
        &["operation", "status"]
    )
    .expect("Failed to register payments_recorded")
});

/// Rejected payment attempts, by error kind.
pub static PAYMENTS_REJECTED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_ledger_payments_rejected_total",
        "Total number of rejected payment attempts",
        &["reason"]  // overpayment, duplicate_transaction_id, ...
    )
    .expect("Failed to register payments_rejected")
});

/// Reconciliation record outcomes.
pub static RECONCILIATION_RECORDS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_ledger_reconciliation_records_total",
        "Payment records visited by reconciliation",
        &["mode", "outcome"]  // dry_run|live, reviewed|updated|skipped
    )
    .expect("Failed to register reconciliation_records")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fee_ledger_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&GRPC_REQUESTS_TOTAL);
    Lazy::force(&GRPC_REQUEST_DURATION);
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&PAYMENTS_RECORDED);
    Lazy::force(&PAYMENTS_REJECTED);
    Lazy::force(&RECONCILIATION_RECORDS);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

/// Record a gRPC request outcome.
pub fn record_grpc_request(method: &str, status: &str) {
    GRPC_REQUESTS_TOTAL
        .with_label_values(&[method, status])
        .inc();
}

/// Record a rejected payment.
pub fn record_rejection(reason: &str) {
    PAYMENTS_REJECTED.with_label_values(&[reason]).inc();
}

/// Record reconciliation counts for one batch.
pub fn record_reconciliation(mode: &str, reviewed: u64, updated: u64, skipped: u64) {
    for (outcome, count) in [
        ("reviewed", reviewed),
        ("updated", updated),
        ("skipped", skipped),
    ] {
        RECONCILIATION_RECORDS
            .with_label_values(&[mode, outcome])
            .inc_by(count as f64);
    }
}
