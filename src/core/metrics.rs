// src/core/metrics.rs

//! Defines and registers Prometheus metrics for gateway monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, TextEncoder, register_counter, register_gauge};

lazy_static! {
    // --- Gauges ---
    /// The number of live sessions currently held by the pool.
    pub static ref ACTIVE_SESSIONS: Gauge =
        register_gauge!("tidemail_active_sessions", "Number of live IMAP sessions in the pool.").unwrap();

    // --- Counters ---
    /// The total number of successful logins since startup.
    pub static ref LOGINS_TOTAL: Counter =
        register_counter!("tidemail_logins_total", "Total number of successful logins.").unwrap();
    /// The total number of logins rejected by the mail server.
    pub static ref AUTH_FAILURES_TOTAL: Counter =
        register_counter!("tidemail_auth_failures_total", "Total number of logins rejected by the mail server.").unwrap();
    /// The total number of idle sessions evicted by the reaper.
    pub static ref SESSIONS_REAPED_TOTAL: Counter =
        register_counter!("tidemail_sessions_reaped_total", "Total number of idle sessions evicted by the reaper.").unwrap();
    /// The total number of sessions whose connection was transparently re-established.
    pub static ref SESSIONS_REPAIRED_TOTAL: Counter =
        register_counter!("tidemail_sessions_repaired_total", "Total number of dead connections transparently re-established.").unwrap();
    /// The total number of sessions dropped because repair failed.
    pub static ref SESSIONS_BROKEN_TOTAL: Counter =
        register_counter!("tidemail_sessions_broken_total", "Total number of sessions dropped after a failed repair.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
