//! Tick scheduler
//!
//! Drives [`MonitorEngine::tick`] at a fixed cadence until shutdown. Ticks
//! never overlap: a tick that overruns the interval delays the next one
//! instead of dropping it. Shutdown is observed only between ticks, so an
//! in-flight tick always completes and shutdown latency is bounded by one
//! cycle.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::{Clock, MonitorEngine, SystemClock, TickReport};
use crate::health::{components, HealthRegistry};
use crate::models::TargetKind;

/// Runs the engine on a fixed interval
pub struct Scheduler {
    engine: Arc<MonitorEngine>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    health: Option<HealthRegistry>,
}

impl Scheduler {
    /// Create a scheduler ticking at the engine's configured sample interval
    pub fn new(engine: Arc<MonitorEngine>) -> Self {
        let interval = engine.config().sample_interval;
        Self {
            engine,
            clock: Arc::new(SystemClock),
            interval,
            health: None,
        }
    }

    /// Run until `shutdown` fires or its sender is dropped
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            analysis_window_secs = self.engine.config().analysis_window.as_secs_f64(),
            "Starting monitor scheduler"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick_count = 0u64;

        loop {
            tokio::select! {
                // Prefer shutdown when both are ready so no new tick starts
                biased;

                _ = shutdown.recv() => {
                    info!(ticks = tick_count, "Shutting down monitor scheduler");
                    break;
                }
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let report = self.engine.tick(self.clock.now()).await;
                    let elapsed = start.elapsed();
                    tick_count += 1;

                    if elapsed > self.interval {
                        warn!(
                            elapsed_ms = elapsed.as_millis() as u64,
                            interval_ms = self.interval.as_millis() as u64,
                            "Tick overran the sample interval, next tick delayed"
                        );
                    }

                    debug!(
                        tick = tick_count,
                        sampled = report.targets_sampled(),
                        failed = report.sample_failures(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Tick finished"
                    );

                    if let Some(health) = &self.health {
                        update_health(health, &report).await;
                        if tick_count == 1 {
                            health.set_ready(true).await;
                        }
                    }
                }
            }
        }
    }
}

/// Reflect one tick's outcome in the health registry
async fn update_health(health: &HealthRegistry, report: &TickReport) {
    for (kind, source) in &report.sources {
        let component = match kind {
            TargetKind::Container => components::CONTAINER_SOURCE,
            TargetKind::Host => components::HOST_SOURCE,
        };

        if !source.listed {
            health
                .set_unhealthy(component, "failed to list targets")
                .await;
        } else if source.failed > 0 {
            health
                .set_degraded(
                    component,
                    format!(
                        "{} of {} targets failed to sample",
                        source.failed,
                        source.failed + source.sampled
                    ),
                )
                .await;
        } else {
            health.set_healthy(component).await;
        }
    }

    if report.sample_failures() > 0 && report.targets_sampled() == 0 {
        health
            .set_degraded(components::SAMPLER, "no target could be sampled")
            .await;
    } else {
        health.set_healthy(components::SAMPLER).await;
    }

    if report.alerts_failed > 0 {
        health
            .set_degraded(
                components::ALERT_SINK,
                format!("{} alerts failed to deliver", report.alerts_failed),
            )
            .await;
    } else if report.alerts_sent > 0 {
        health.set_healthy(components::ALERT_SINK).await;
    }
}

/// Builder for creating the scheduler
pub struct SchedulerBuilder {
    engine: Option<Arc<MonitorEngine>>,
    clock: Option<Arc<dyn Clock>>,
    interval: Option<Duration>,
    health: Option<HealthRegistry>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            engine: None,
            clock: None,
            interval: None,
            health: None,
        }
    }

    pub fn engine(mut self, engine: Arc<MonitorEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Override the clock used to stamp ticks
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override the engine's sample interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Report tick outcomes to a health registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<Scheduler> {
        let engine = self
            .engine
            .ok_or_else(|| anyhow::anyhow!("Engine is required"))?;

        let mut scheduler = Scheduler::new(engine);
        if let Some(clock) = self.clock {
            scheduler.clock = clock;
        }
        if let Some(interval) = self.interval {
            anyhow::ensure!(!interval.is_zero(), "Interval must be greater than zero");
            scheduler.interval = interval;
        }
        scheduler.health = self.health;

        Ok(scheduler)
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
