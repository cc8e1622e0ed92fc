//! Prometheus metrics for the scan and execution loop.
//!
//! This module provides metrics for:
//! - Scan latency and outcomes
//! - Execution attempts, split by delegate and bridge path
//! - Ticks skipped while an execution is in flight
//! - Price monitor fetch failures and threshold crossings

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

use crate::network::Network;

// === Metric Name Constants ===

/// Opportunity scan latency metric name.
pub const METRIC_SCAN_LATENCY: &str = "scan_latency_ms";
/// Execution latency metric name.
pub const METRIC_EXECUTION_LATENCY: &str = "execution_latency_ms";
/// Scans completed counter metric name.
pub const METRIC_SCANS: &str = "scans_total";
/// Scans failed counter metric name.
pub const METRIC_SCANS_FAILED: &str = "scans_failed_total";
/// Opportunities detected counter metric name.
pub const METRIC_OPPORTUNITIES_DETECTED: &str = "opportunities_detected_total";
/// Executions started counter metric name.
pub const METRIC_EXECUTIONS_STARTED: &str = "executions_started_total";
/// Executions completed by the delegate counter metric name.
pub const METRIC_EXECUTIONS_DELEGATED: &str = "executions_delegated_total";
/// Executions completed by the bridge fallback counter metric name.
pub const METRIC_EXECUTIONS_BRIDGED: &str = "executions_bridged_total";
/// Executions failed counter metric name.
pub const METRIC_EXECUTIONS_FAILED: &str = "executions_failed_total";
/// Ticks skipped while busy counter metric name.
pub const METRIC_TICKS_SKIPPED: &str = "ticks_skipped_total";
/// Price fetch failures counter metric name.
pub const METRIC_PRICE_FETCH_FAILURES: &str = "price_fetch_failures_total";
/// Price changes past threshold counter metric name.
pub const METRIC_PRICE_CHANGES: &str = "price_changes_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(METRIC_SCAN_LATENCY, "Opportunity scan latency in milliseconds");
    describe_histogram!(
        METRIC_EXECUTION_LATENCY,
        "Execution latency from guard acquisition to release in milliseconds"
    );

    describe_counter!(METRIC_SCANS, "Total number of completed scans");
    describe_counter!(METRIC_SCANS_FAILED, "Total number of scans that failed");
    describe_counter!(
        METRIC_OPPORTUNITIES_DETECTED,
        "Total number of arbitrage opportunities detected"
    );
    describe_counter!(METRIC_EXECUTIONS_STARTED, "Total number of executions started");
    describe_counter!(
        METRIC_EXECUTIONS_DELEGATED,
        "Total number of executions completed by the delegate"
    );
    describe_counter!(
        METRIC_EXECUTIONS_BRIDGED,
        "Total number of executions completed by the bridge fallback"
    );
    describe_counter!(METRIC_EXECUTIONS_FAILED, "Total number of executions that failed");
    describe_counter!(
        METRIC_TICKS_SKIPPED,
        "Total number of scheduler ticks skipped while an execution was in flight"
    );
    describe_counter!(
        METRIC_PRICE_FETCH_FAILURES,
        "Total number of price fetch failures by network"
    );
    describe_counter!(
        METRIC_PRICE_CHANGES,
        "Total number of price moves past the change threshold"
    );

    debug!("Metrics initialized");
}

/// Record scan latency.
pub fn record_scan_latency(start: Instant) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_SCAN_LATENCY).record(latency_ms);
}

/// Increment scans counter.
pub fn inc_scans() {
    counter!(METRIC_SCANS).increment(1);
}

/// Increment failed scans counter.
pub fn inc_scans_failed() {
    counter!(METRIC_SCANS_FAILED).increment(1);
}

/// Add to the opportunities detected counter.
pub fn add_opportunities_detected(count: usize) {
    counter!(METRIC_OPPORTUNITIES_DETECTED).increment(count as u64);
}

/// Increment executions started counter.
pub fn inc_executions_started() {
    counter!(METRIC_EXECUTIONS_STARTED).increment(1);
}

/// Increment delegated executions counter.
pub fn inc_executions_delegated() {
    counter!(METRIC_EXECUTIONS_DELEGATED).increment(1);
}

/// Increment bridged executions counter.
pub fn inc_executions_bridged() {
    counter!(METRIC_EXECUTIONS_BRIDGED).increment(1);
}

/// Increment failed executions counter.
pub fn inc_executions_failed() {
    counter!(METRIC_EXECUTIONS_FAILED).increment(1);
}

/// Increment skipped ticks counter.
pub fn inc_ticks_skipped() {
    counter!(METRIC_TICKS_SKIPPED).increment(1);
}

/// Increment price fetch failures for a network.
pub fn inc_price_fetch_failures(network: Network) {
    counter!(METRIC_PRICE_FETCH_FAILURES, "network" => network.to_string()).increment(1);
}

/// Increment price changes counter.
pub fn inc_price_changes() {
    counter!(METRIC_PRICE_CHANGES).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.elapsed_ms());
    }
}

/// Create a latency timer for one execution.
pub fn timer_execution() -> LatencyTimer {
    LatencyTimer::new(METRIC_EXECUTION_LATENCY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn latency_timer_measures_time() {
        let timer = LatencyTimer::new("test_metric");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 9.0);
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        inc_price_fetch_failures(Network::Base);
        add_opportunities_detected(3);
        record_scan_latency(Instant::now());
    }
}
