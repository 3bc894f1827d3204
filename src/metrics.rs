/// Prometheus metrics for the bingo lookup service
///
/// Names and label sets for the two required histograms match the original
/// service exactly (`plc_directory_request_duration_seconds{status_code}`,
/// `plc_directory_validation_duration_seconds{is_valid}`, spec.md §9) so
/// existing dashboards keep working. The counters around them are ambient
/// additions (SPEC_FULL §10.5) in the same style.
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// Time spent on each request to the PLC directory, by response status code.
    pub static ref PLC_DIRECTORY_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "plc_directory_request_duration_seconds",
        "Histogram of the time (in seconds) each request to the PLC directory takes",
        &["status_code"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    /// Time spent validating a single handle, by the outcome of the probe.
    pub static ref PLC_DIRECTORY_VALIDATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "plc_directory_validation_duration_seconds",
        "Histogram of the time (in seconds) each handle validation takes",
        &["is_valid"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap();

    /// Directory records ingested, by whether they carried a usable handle.
    pub static ref DIRECTORY_RECORDS_INGESTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "directory_records_ingested_total",
        "Total directory records processed by the ingester",
        &["outcome"]
    )
    .unwrap();

    /// Binding Store `Update` calls that failed after a durable write succeeded.
    pub static ref STORE_UPDATE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "store_update_failures_total",
        "Total failed calls to update a binding"
    )
    .unwrap();

    /// Handle validation outcomes, by result.
    pub static ref HANDLE_VALIDATION_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "handle_validation_outcomes_total",
        "Total handle validation outcomes",
        &["is_valid"]
    )
    .unwrap();

    /// Lookup RPC calls, by which side of the dual index served it.
    pub static ref LOOKUP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lookup_requests_total",
        "Total Lookup/BulkLookup calls by outcome",
        &["outcome"]
    )
    .unwrap();
}

/// Record a completed request to the PLC directory. Skipped entirely on
/// transport failure (spec.md §9) since there is no response status to label
/// the observation with.
pub fn record_plc_directory_request(status_code: u16, duration_secs: f64) {
    PLC_DIRECTORY_REQUEST_DURATION_SECONDS
        .with_label_values(&[&status_code.to_string()])
        .observe(duration_secs);
}

pub fn record_handle_validation(is_valid: bool, duration_secs: f64) {
    let label = is_valid.to_string();
    PLC_DIRECTORY_VALIDATION_DURATION_SECONDS
        .with_label_values(&[&label])
        .observe(duration_secs);
    HANDLE_VALIDATION_OUTCOMES_TOTAL.with_label_values(&[&label]).inc();
}

pub fn record_directory_record_ingested(had_handle: bool) {
    let outcome = if had_handle { "updated" } else { "skipped_no_handle" };
    DIRECTORY_RECORDS_INGESTED_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_store_update_failure() {
    STORE_UPDATE_FAILURES_TOTAL.inc();
}

pub fn record_lookup(outcome: &str) {
    LOOKUP_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Render all registered metrics in the Prometheus text exposition format.
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap_or_default()
}
