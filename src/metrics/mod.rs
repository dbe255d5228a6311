//! Metrics module
//!
//! Prometheus counters and histograms for transfers. Everything registers in
//! the default registry; [`render`] dumps it in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // Transfer metrics
    pub static ref TRANSFERS_TOTAL: CounterVec = register_counter_vec!(
        "cloud_archiver_transfers_total",
        "Total number of transfers",
        &["direction", "method", "status"]
    ).unwrap();

    pub static ref TRANSFER_BYTES_TOTAL: CounterVec = register_counter_vec!(
        "cloud_archiver_transfer_bytes_total",
        "Total bytes transferred",
        &["direction"]
    ).unwrap();

    pub static ref TRANSFER_DURATION: HistogramVec = register_histogram_vec!(
        "cloud_archiver_transfer_duration_seconds",
        "Transfer duration in seconds",
        &["direction", "method"],
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0]
    ).unwrap();

    // Multipart metrics
    pub static ref PART_UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "cloud_archiver_part_uploads_total",
        "Part uploads by outcome",
        &["status"]
    ).unwrap();

    pub static ref MULTIPART_PARTS: Histogram = register_histogram!(
        "cloud_archiver_multipart_parts",
        "Number of parts per multipart upload",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 10000.0]
    ).unwrap();

    pub static ref RESUMED_UPLOADS_TOTAL: Counter = register_counter!(
        "cloud_archiver_resumed_uploads_total",
        "Multipart uploads continued from a previous attempt"
    ).unwrap();

    pub static ref CANCELLED_UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "cloud_archiver_cancelled_uploads_total",
        "Unfinished multipart uploads cancelled",
        &["reason"]  // "expired" or "changed"
    ).unwrap();

    // Retry metrics
    pub static ref RETRIES_TOTAL: CounterVec = register_counter_vec!(
        "cloud_archiver_retries_total",
        "Retried backend requests",
        &["operation"]
    ).unwrap();

    pub static ref SESSION_REFRESHES_TOTAL: Counter = register_counter!(
        "cloud_archiver_session_refreshes_total",
        "Re-authentications after an expired token"
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "cloud_archiver_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a successful upload
pub fn record_upload_success(method: &str, bytes: u64, duration_secs: f64) {
    TRANSFERS_TOTAL
        .with_label_values(&["upload", method, "success"])
        .inc();
    TRANSFER_BYTES_TOTAL
        .with_label_values(&["upload"])
        .inc_by(bytes as f64);
    TRANSFER_DURATION
        .with_label_values(&["upload", method])
        .observe(duration_secs);
}

/// Record a failed upload
pub fn record_upload_failure(method: &str) {
    TRANSFERS_TOTAL
        .with_label_values(&["upload", method, "failure"])
        .inc();
}

/// Record a completed download
pub fn record_download_success(bytes: u64, duration_secs: f64) {
    TRANSFERS_TOTAL
        .with_label_values(&["download", "ranged", "success"])
        .inc();
    TRANSFER_BYTES_TOTAL
        .with_label_values(&["download"])
        .inc_by(bytes as f64);
    TRANSFER_DURATION
        .with_label_values(&["download", "ranged"])
        .observe(duration_secs);
}

/// Record a failed download
pub fn record_download_failure() {
    TRANSFERS_TOTAL
        .with_label_values(&["download", "ranged", "failure"])
        .inc();
}

/// Record the outcome of one part (after its retries)
pub fn record_part_upload(success: bool) {
    let status = if success { "success" } else { "failure" };
    PART_UPLOADS_TOTAL.with_label_values(&[status]).inc();
}

/// Record the number of parts of a finished multipart upload
pub fn record_multipart_parts(parts_count: usize) {
    MULTIPART_PARTS.observe(parts_count as f64);
}

pub fn record_resumed_upload() {
    RESUMED_UPLOADS_TOTAL.inc();
}

/// Record a cancelled unfinished upload
pub fn record_cancelled_upload(reason: &str) {
    CANCELLED_UPLOADS_TOTAL.with_label_values(&[reason]).inc();
}

/// Record a retried request
pub fn record_retry(operation: &str) {
    RETRIES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_session_refresh() {
    SESSION_REFRESHES_TOTAL.inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
