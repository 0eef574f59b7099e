//! Prometheus metrics for the broadcast engine.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "guildcast";

lazy_static! {
    /// Number of currently registered sessions
    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_sessions_active", METRIC_PREFIX),
        "Number of currently registered sessions"
    ).unwrap();

    /// Number of guilds with at least one subscriber
    pub static ref GUILDS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_guilds_active", METRIC_PREFIX),
        "Number of guilds with at least one subscriber"
    ).unwrap();

    /// Total WebSocket connections opened
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// Total WebSocket connections closed
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// Connection lifetime in seconds
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 14400.0]
    ).unwrap();

    /// Snapshots pushed, by envelope kind
    pub static ref SNAPSHOTS_PUSHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_snapshots_pushed_total", METRIC_PREFIX),
        "Snapshots pushed to sessions",
        &["kind"]
    ).unwrap();

    /// Pushes that failed because the session was gone
    pub static ref PUSH_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_push_failures_total", METRIC_PREFIX),
        "Snapshot pushes that failed"
    ).unwrap();

    /// Scheduled broadcast rounds
    pub static ref BROADCAST_ROUNDS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broadcast_rounds_total", METRIC_PREFIX),
        "Scheduled broadcast rounds"
    ).unwrap();

    /// Duration of one broadcast round across all guilds
    pub static ref BROADCAST_ROUND_DURATION: Histogram = register_histogram!(
        format!("{}_broadcast_round_duration_seconds", METRIC_PREFIX),
        "Broadcast round duration in seconds",
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0]
    ).unwrap();

    /// Snapshot builds that failed at the data layer
    pub static ref AGGREGATOR_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_aggregator_errors_total", METRIC_PREFIX),
        "Snapshot builds that failed at the data layer"
    ).unwrap();

    /// Sessions dropped for missing their heartbeat window
    pub static ref HEARTBEAT_TIMEOUTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_timeouts_total", METRIC_PREFIX),
        "Sessions dropped for missing their heartbeat window"
    ).unwrap();

    /// Inbound envelopes that failed to decode
    pub static ref PROTOCOL_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_protocol_errors_total", METRIC_PREFIX),
        "Inbound envelopes that failed to decode"
    ).unwrap();
}

/// Encode all registered metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&prometheus::gather())
}
