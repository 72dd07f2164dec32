//! Prometheus metrics for the node.
//!
//! Collectors are installed once at startup; recording helpers are
//! no-ops until then so library code never panics over observability.

use once_cell::sync::OnceCell;
use prometheus::{
    histogram_opts, opts, register_gauge, register_histogram, register_histogram_vec,
    register_int_counter, register_int_counter_vec, register_int_gauge, Gauge, Histogram,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use tracing::info;

static EPOCHS_COMMITTED: OnceCell<IntCounter> = OnceCell::new();
static EPOCH_EVENTS: OnceCell<Histogram> = OnceCell::new();
static EPOCH_RETRIES: OnceCell<IntCounter> = OnceCell::new();
static DAY_NUMBER: OnceCell<IntGauge> = OnceCell::new();
static VDF_DIFFICULTY: OnceCell<Gauge> = OnceCell::new();
static VDF_COMPUTATION_SECONDS: OnceCell<Histogram> = OnceCell::new();
static PEER_MESSAGES: OnceCell<IntCounterVec> = OnceCell::new();
static PEER_REJECTS: OnceCell<IntCounterVec> = OnceCell::new();
static BLACKLIST_SIZE: OnceCell<IntGauge> = OnceCell::new();
static EVIDENCE_RECORDS: OnceCell<IntCounterVec> = OnceCell::new();
static ADAPTER_REQUESTS: OnceCell<IntCounterVec> = OnceCell::new();
static ADAPTER_LATENCY: OnceCell<HistogramVec> = OnceCell::new();

/// Register all collectors with the default registry. Call once from
/// the binary before serving.
pub fn install() -> prometheus::Result<()> {
    EPOCHS_COMMITTED
        .set(register_int_counter!(opts!(
            "conductor_epochs_committed_total",
            "Epochs committed by this node"
        ))?)
        .ok();
    EPOCH_EVENTS
        .set(register_histogram!(histogram_opts!(
            "conductor_epoch_events",
            "Event fingerprints per committed block",
            vec![0.0, 1.0, 8.0, 64.0, 512.0, 4096.0]
        ))?)
        .ok();
    EPOCH_RETRIES
        .set(register_int_counter!(opts!(
            "conductor_epoch_retries_total",
            "Epoch timeouts that triggered a retry"
        ))?)
        .ok();
    DAY_NUMBER
        .set(register_int_gauge!(opts!(
            "conductor_day_number_current",
            "Current finalized day number"
        ))?)
        .ok();
    VDF_DIFFICULTY
        .set(register_gauge!(opts!(
            "conductor_vdf_difficulty",
            "Current VDF difficulty (iterations)"
        ))?)
        .ok();
    VDF_COMPUTATION_SECONDS
        .set(register_histogram!(histogram_opts!(
            "conductor_vdf_computation_duration_seconds",
            "VDF computation duration",
            vec![3600.0, 21600.0, 43200.0, 64800.0, 86400.0, 108000.0]
        ))?)
        .ok();
    PEER_MESSAGES
        .set(register_int_counter_vec!(
            opts!(
                "conductor_peer_messages_total",
                "Validated peer messages by kind"
            ),
            &["kind"]
        )?)
        .ok();
    PEER_REJECTS
        .set(register_int_counter_vec!(
            opts!(
                "conductor_peer_rejects_total",
                "Rejected peer messages by cause"
            ),
            &["cause"]
        )?)
        .ok();
    BLACKLIST_SIZE
        .set(register_int_gauge!(opts!(
            "conductor_blacklist_size",
            "Number of blacklisted validators"
        ))?)
        .ok();
    EVIDENCE_RECORDS
        .set(register_int_counter_vec!(
            opts!(
                "conductor_evidence_records_total",
                "Evidence records collected by reason"
            ),
            &["reason"]
        )?)
        .ok();
    ADAPTER_REQUESTS
        .set(register_int_counter_vec!(
            opts!(
                "conductor_adapter_requests_total",
                "Upward adapter requests by method and status"
            ),
            &["method", "status"]
        )?)
        .ok();
    ADAPTER_LATENCY
        .set(register_histogram_vec!(
            histogram_opts!(
                "conductor_adapter_latency_seconds",
                "Upward adapter request latency",
                vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
            ),
            &["method"]
        )?)
        .ok();

    info!("metrics collectors installed");
    Ok(())
}

/// Record a committed epoch.
pub fn record_commit(event_count: usize) {
    if let Some(counter) = EPOCHS_COMMITTED.get() {
        counter.inc();
    }
    if let Some(histogram) = EPOCH_EVENTS.get() {
        histogram.observe(event_count as f64);
    }
}

/// Record an epoch retry.
pub fn record_epoch_retry() {
    if let Some(counter) = EPOCH_RETRIES.get() {
        counter.inc();
    }
}

/// Update the finalized day gauge.
pub fn set_day_number(day: u64) {
    if let Some(gauge) = DAY_NUMBER.get() {
        gauge.set(day as i64);
    }
}

/// Record a finished VDF computation.
pub fn record_vdf_computation(difficulty: u64, seconds: f64) {
    if let Some(gauge) = VDF_DIFFICULTY.get() {
        gauge.set(difficulty as f64);
    }
    if let Some(histogram) = VDF_COMPUTATION_SECONDS.get() {
        histogram.observe(seconds);
    }
}

/// Count a validated peer message.
pub fn record_peer_message(kind: &str) {
    if let Some(counter) = PEER_MESSAGES.get() {
        counter.with_label_values(&[kind]).inc();
    }
}

/// Count a rejected peer message.
pub fn record_peer_reject(cause: &str) {
    if let Some(counter) = PEER_REJECTS.get() {
        counter.with_label_values(&[cause]).inc();
    }
}

/// Update the blacklist gauge.
pub fn set_blacklist_size(size: usize) {
    if let Some(gauge) = BLACKLIST_SIZE.get() {
        gauge.set(size as i64);
    }
}

/// Count an evidence record.
pub fn record_evidence(reason: &str) {
    if let Some(counter) = EVIDENCE_RECORDS.get() {
        counter.with_label_values(&[reason]).inc();
    }
}

/// Count an adapter request and its latency.
pub fn record_adapter_request(method: &str, status: &str, seconds: f64) {
    if let Some(counter) = ADAPTER_REQUESTS.get() {
        counter.with_label_values(&[method, status]).inc();
    }
    if let Some(histogram) = ADAPTER_LATENCY.get() {
        histogram.with_label_values(&[method]).observe(seconds);
    }
}
