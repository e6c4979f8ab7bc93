//! The monitoring engine
//!
//! Owns one [`RollingAggregate`] per target, feeds it from the registered
//! sample sources on every tick, and turns each closed window into at most
//! one alert.
//!
//! All aggregates live behind a single mutex. It is held only for in-memory
//! work (append, close+reset, snapshot copy), never across a source or sink
//! call, so a snapshot never sees a half-reset window and a slow alert never
//! stalls sampling.

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::aggregate::{RollingAggregate, WindowSummary};
use crate::alert::AlertSink;
use crate::error::ConfigError;
use crate::models::{Sample, Target, TargetKind, UsageSnapshot};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::source::SampleSource;
use crate::threshold::{evaluate, AlertDecision};

/// Validated, immutable engine settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub sample_interval: Duration,
    pub analysis_window: Duration,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
}

impl EngineConfig {
    /// Validate raw settings.
    ///
    /// Intervals must be non-zero; thresholds must be finite and not
    /// negative.
    pub fn new(
        sample_interval: Duration,
        analysis_window: Duration,
        cpu_threshold: f64,
        memory_threshold: f64,
    ) -> Result<Self, ConfigError> {
        if sample_interval.is_zero() {
            return Err(ConfigError::invalid(
                "sample_interval",
                "must be greater than zero",
            ));
        }
        if analysis_window.is_zero() {
            return Err(ConfigError::invalid(
                "analysis_window",
                "must be greater than zero",
            ));
        }
        check_threshold("cpu_alarm_threshold", cpu_threshold)?;
        check_threshold("memory_alarm_threshold", memory_threshold)?;

        Ok(Self {
            sample_interval,
            analysis_window,
            cpu_threshold,
            memory_threshold,
        })
    }

    /// Build from the units operators configure: seconds and minutes
    pub fn from_units(
        interval_secs: f64,
        analysis_period_min: f64,
        cpu_threshold: f64,
        memory_threshold: f64,
    ) -> Result<Self, ConfigError> {
        let sample_interval = positive_duration("interval_secs", interval_secs)?;
        let analysis_window =
            positive_duration("analysis_period_min", analysis_period_min * 60.0)?;
        Self::new(
            sample_interval,
            analysis_window,
            cpu_threshold,
            memory_threshold,
        )
    }
}

fn check_threshold(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::invalid(
            field,
            format!("must be a non-negative percentage, got {}", value),
        ));
    }
    Ok(())
}

fn positive_duration(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::invalid(
            field,
            format!("must be greater than zero, got {}", secs),
        ));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::invalid(field, e.to_string()))
}

/// Source of "now" for the scheduler
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Per-source outcome of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    /// Whether the target listing succeeded
    pub listed: bool,
    pub sampled: usize,
    pub failed: usize,
}

/// Outcome of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub sources: BTreeMap<TargetKind, SourceReport>,
    pub windows_closed: usize,
    pub alerts_sent: usize,
    pub alerts_failed: usize,
}

impl TickReport {
    pub fn targets_sampled(&self) -> usize {
        self.sources.values().map(|s| s.sampled).sum()
    }

    pub fn sample_failures(&self) -> usize {
        self.sources.values().map(|s| s.failed).sum()
    }
}

/// A window closed during a tick, captured under the lock
#[derive(Debug)]
struct ClosedWindow {
    target: Target,
    summary: WindowSummary,
}

/// An alert waiting to be dispatched once the lock is released
#[derive(Debug)]
struct PendingAlert {
    target: Target,
    decision: AlertDecision,
}

/// Per-target rolling windows fed by sample sources
pub struct MonitorEngine {
    config: EngineConfig,
    sources: Vec<Arc<dyn SampleSource>>,
    sink: Arc<dyn AlertSink>,
    windows: Mutex<HashMap<Target, RollingAggregate>>,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl MonitorEngine {
    /// Create an engine with no sources
    pub fn new(config: EngineConfig, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            config,
            sources: Vec::new(),
            sink,
            windows: Mutex::new(HashMap::new()),
            metrics: MonitorMetrics::new(),
            logger: StructuredLogger::new("monitor"),
        }
    }

    /// Register a sample source; sources are polled in registration order
    pub fn with_source(mut self, source: Arc<dyn SampleSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Kinds of the registered sources, in polling order
    pub fn source_kinds(&self) -> Vec<TargetKind> {
        self.sources.iter().map(|s| s.kind()).collect()
    }

    fn lock_windows(&self) -> MutexGuard<'_, HashMap<Target, RollingAggregate>> {
        // A panic while holding the lock leaves every aggregate consistent:
        // each mutation is a single append or close.
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one sampling cycle at `now`.
    ///
    /// Failures of one source or target are logged and counted; they never
    /// abort the cycle. Alerts are dispatched after every target was
    /// sampled, once each, without retry.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();
        let mut closed = Vec::new();

        for source in &self.sources {
            let kind = source.kind();
            let source_report = report.sources.entry(kind).or_default();

            let targets = match source.list_targets().await {
                Ok(targets) => targets,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Failed to list targets, skipping source");
                    continue;
                }
            };
            source_report.listed = true;

            for name in targets {
                let target = Target { kind, name };
                match source.sample(&target.name).await {
                    Ok(reading) => {
                        source_report.sampled += 1;
                        if let Some(window) = self.record(target, reading.at(now), now) {
                            closed.push(window);
                        }
                    }
                    Err(e) => {
                        source_report.failed += 1;
                        self.metrics.inc_sample_errors(&kind.to_string());
                        warn!(
                            target_name = %target.name,
                            kind = %kind,
                            error = %e,
                            "Failed to sample target"
                        );
                    }
                }
            }
        }

        let pending = self.evaluate_closed(closed, &mut report);
        self.dispatch(pending, now, &mut report).await;

        let monitored = self.lock_windows().len();
        self.metrics.set_targets_monitored(monitored as i64);
        self.metrics.observe_tick_latency(started.elapsed().as_secs_f64());

        debug!(
            sampled = report.targets_sampled(),
            failed = report.sample_failures(),
            windows_closed = report.windows_closed,
            alerts_sent = report.alerts_sent,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tick complete"
        );

        report
    }

    /// Append a sample and, if the window expired, close it in the same
    /// critical section.
    fn record(
        &self,
        target: Target,
        sample: Sample,
        now: DateTime<Utc>,
    ) -> Option<ClosedWindow> {
        let mut windows = self.lock_windows();
        let aggregate = windows
            .entry(target.clone())
            .or_insert_with(|| RollingAggregate::new(now));

        if !aggregate.append(sample) {
            warn!(
                target_name = %target.name,
                window_start = %aggregate.window_start(),
                now = %now,
                "Clock moved backwards, dropping sample and keeping window open"
            );
            return None;
        }

        if !aggregate.should_close(now, self.config.analysis_window) {
            return None;
        }

        let summary = aggregate.close(now);
        Some(ClosedWindow { target, summary })
    }

    fn evaluate_closed(
        &self,
        closed: Vec<ClosedWindow>,
        report: &mut TickReport,
    ) -> Vec<PendingAlert> {
        let mut pending = Vec::new();

        for ClosedWindow { target, summary } in closed {
            report.windows_closed += 1;
            self.metrics.inc_windows_closed();

            if summary.is_empty() {
                continue;
            }

            let decision = evaluate(
                summary.mean_cpu,
                summary.mean_mem,
                self.config.cpu_threshold,
                self.config.memory_threshold,
            );
            self.logger.log_window_closed(&target, &summary, &decision);

            if decision.is_alert() {
                pending.push(PendingAlert { target, decision });
            }
        }

        pending
    }

    async fn dispatch(
        &self,
        pending: Vec<PendingAlert>,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        for PendingAlert { target, decision } in pending {
            let delivered = self.sink.send(&target, &decision, now).await;
            self.logger.log_alert(&target, &decision, delivered);

            if delivered {
                report.alerts_sent += 1;
                self.metrics.inc_alerts_sent(decision.label());
            } else {
                report.alerts_failed += 1;
                self.metrics.inc_alert_failures();
            }
        }
    }

    /// Means of the open window of every known target.
    ///
    /// Read-only; holds the lock only to copy the means out.
    pub fn snapshot(&self) -> BTreeMap<Target, UsageSnapshot> {
        let windows = self.lock_windows();
        windows
            .iter()
            .map(|(target, aggregate)| {
                let mean = aggregate.mean();
                (
                    target.clone(),
                    UsageSnapshot {
                        cpu_percent: mean.mean_cpu,
                        memory_percent: mean.mean_mem,
                        sample_count: mean.sample_count,
                        window_started_at: aggregate.window_start(),
                    },
                )
            })
            .collect()
    }
}
