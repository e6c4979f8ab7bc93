//! Observability infrastructure for the monitor
//!
//! Provides:
//! - Prometheus metrics (tick latency, monitored targets, window and alert counters)
//! - Structured logging of lifecycle, window and alert events

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::aggregate::WindowSummary;
use crate::models::{Target, TargetKind};
use crate::threshold::AlertDecision;

/// Histogram buckets for tick latency (in seconds)
const TICK_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    tick_latency_seconds: Histogram,
    targets_monitored: IntGauge,
    sample_errors: IntCounterVec,
    windows_closed: IntCounter,
    alerts_sent: IntCounterVec,
    alert_failures: IntCounter,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "resource_monitor_tick_latency_seconds",
                "Time spent sampling every target in one tick",
                TICK_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            targets_monitored: register_int_gauge!(
                "resource_monitor_targets_monitored",
                "Number of targets with an open aggregation window"
            )
            .expect("Failed to register targets_monitored"),

            sample_errors: register_int_counter_vec!(
                "resource_monitor_sample_errors_total",
                "Total number of failed target samples",
                &["kind"]
            )
            .expect("Failed to register sample_errors"),

            windows_closed: register_int_counter!(
                "resource_monitor_windows_closed_total",
                "Total number of aggregation windows closed"
            )
            .expect("Failed to register windows_closed"),

            alerts_sent: register_int_counter_vec!(
                "resource_monitor_alerts_sent_total",
                "Total number of alerts delivered",
                &["decision"]
            )
            .expect("Failed to register alerts_sent"),

            alert_failures: register_int_counter!(
                "resource_monitor_alert_failures_total",
                "Total number of alerts the sink failed to deliver"
            )
            .expect("Failed to register alert_failures"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    /// Create a metrics handle, registering the global metrics on first use
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    pub fn set_targets_monitored(&self, count: i64) {
        self.inner().targets_monitored.set(count);
    }

    pub fn inc_sample_errors(&self, kind: &str) {
        self.inner().sample_errors.with_label_values(&[kind]).inc();
    }

    pub fn inc_windows_closed(&self) {
        self.inner().windows_closed.inc();
    }

    pub fn inc_alerts_sent(&self, decision: &str) {
        self.inner().alerts_sent.with_label_values(&[decision]).inc();
    }

    pub fn inc_alert_failures(&self) {
        self.inner().alert_failures.inc();
    }
}

/// Structured logger for monitor events
#[derive(Clone)]
pub struct StructuredLogger {
    server_name: String,
}

impl StructuredLogger {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, sources: &[TargetKind]) {
        info!(
            event = "monitor_started",
            server = %self.server_name,
            monitor_version = %version,
            sources = ?sources,
            "Resource monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            server = %self.server_name,
            reason = %reason,
            "Resource monitor shutting down"
        );
    }

    pub fn log_window_closed(
        &self,
        target: &Target,
        summary: &WindowSummary,
        decision: &AlertDecision,
    ) {
        info!(
            event = "window_closed",
            server = %self.server_name,
            target_name = %target.name,
            target_kind = %target.kind,
            mean_cpu = summary.mean_cpu,
            mean_mem = summary.mean_mem,
            sample_count = summary.sample_count,
            decision = decision.label(),
            "Aggregation window closed"
        );
    }

    pub fn log_alert(&self, target: &Target, decision: &AlertDecision, delivered: bool) {
        let severity = decision
            .severity()
            .map(|s| s.to_string())
            .unwrap_or_default();

        if delivered {
            info!(
                event = "alert_dispatched",
                server = %self.server_name,
                target_name = %target.name,
                target_kind = %target.kind,
                decision = decision.label(),
                severity = %severity,
                "Threshold alert dispatched"
            );
        } else {
            warn!(
                event = "alert_failed",
                server = %self.server_name,
                target_name = %target.name,
                target_kind = %target.kind,
                decision = decision.label(),
                severity = %severity,
                "Threshold alert could not be delivered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::evaluate;

    #[test]
    fn test_monitor_metrics_creation() {
        let metrics = MonitorMetrics::new();

        metrics.observe_tick_latency(0.002);
        metrics.set_targets_monitored(3);
        metrics.inc_sample_errors("container");
        metrics.inc_windows_closed();
        metrics.inc_alerts_sent("cpu");
        metrics.inc_alert_failures();

        // A second handle shares the registered metrics
        MonitorMetrics::new().inc_windows_closed();
    }

    #[test]
    fn test_structured_logger_events() {
        let logger = StructuredLogger::new("test-server");
        assert_eq!(logger.server_name, "test-server");
        logger.log_startup("0.1.0", &[TargetKind::Container, TargetKind::Host]);

        let target = Target::container("web");
        let decision = evaluate(80.0, 10.0, 50.0, 50.0);
        logger.log_window_closed(
            &target,
            &WindowSummary {
                mean_cpu: 80.0,
                mean_mem: 10.0,
                sample_count: 2,
            },
            &decision,
        );
        logger.log_alert(&target, &decision, true);
        logger.log_alert(&target, &decision, false);
        logger.log_shutdown("test finished");
    }
}
