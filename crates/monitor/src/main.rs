//! Resource Monitor - threshold alerts for container and host utilization
//!
//! Samples CPU and memory of every Docker container and of the host on a
//! fixed interval, averages them over a rolling window, and sends at most one
//! Telegram alert per target and window when a threshold is exceeded.

use anyhow::{Context, Result};
use monitor_lib::{
    health::{components, HealthRegistry},
    observability::{MonitorMetrics, StructuredLogger},
    source::{create_container_source, HostSource},
    AlertSink, MonitorEngine, NoopSink, SchedulerBuilder, TelegramSink,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting resource-monitor");

    // Invalid configuration stops the process before any tick runs
    let config = config::MonitorConfig::load()?;
    let engine_config = config.validate().context("Invalid monitor configuration")?;
    info!(
        server_name = %config.server_name,
        interval_secs = config.interval_secs,
        analysis_period_min = config.analysis_period_min,
        cpu_alarm_threshold = config.cpu_alarm_threshold,
        memory_alarm_threshold = config.memory_alarm_threshold,
        "Monitor configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SAMPLER).await;
    health_registry.register(components::ALERT_SINK).await;

    // Register metrics before the first scrape
    MonitorMetrics::new();
    let logger = StructuredLogger::new(&config.server_name);
    let formatter = config.message_formatter()?;

    let telegram = match config.telegram_credentials() {
        Some((token, chat_id)) => Some(Arc::new(
            TelegramSink::new(&config.telegram_api_url, token, chat_id, formatter.clone())
                .context("Failed to create Telegram sink")?,
        )),
        None => {
            warn!("Telegram credentials not configured, alerts will not be delivered");
            health_registry
                .set_degraded(components::ALERT_SINK, "alert sink not configured")
                .await;
            None
        }
    };
    let sink: Arc<dyn AlertSink> = match &telegram {
        Some(sink) => sink.clone() as Arc<dyn AlertSink>,
        None => Arc::new(NoopSink),
    };

    let mut engine = MonitorEngine::new(engine_config, sink).with_logger(logger.clone());
    if config.monitor_containers {
        health_registry.register(components::CONTAINER_SOURCE).await;
        let containers = create_container_source(
            &config.cgroup_root,
            &config.proc_path,
            &config.docker_root,
        )
        .await;
        engine = engine.with_source(containers);
    }
    if config.monitor_host {
        health_registry.register(components::HOST_SOURCE).await;
        engine = engine.with_source(Arc::new(HostSource::with_proc_path(
            &config.server_name,
            &config.proc_path,
        )));
    }
    let engine = Arc::new(engine);
    logger.log_startup(MONITOR_VERSION, &engine.source_kinds());

    // Start stats, webhook, health and metrics server
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        engine.clone(),
        telegram,
        formatter,
    ));
    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Start the tick loop
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = SchedulerBuilder::new()
        .engine(engine)
        .health(health_registry)
        .build()?;
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    // Wait for a shutdown signal, or for the API server to fail
    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            "SIGINT received"
        }
        result = &mut api_handle => {
            match result {
                Ok(Ok(())) => "API server stopped",
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    "API server failed"
                }
                Err(e) => {
                    error!(error = %e, "API server task panicked");
                    "API server task panicked"
                }
            }
        }
    };
    logger.log_shutdown(reason);

    // Stop accepting ticks; an in-flight tick runs to completion
    let _ = shutdown_tx.send(());
    scheduler_handle.await.context("Scheduler task panicked")?;
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
