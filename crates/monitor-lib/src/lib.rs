//! Library for threshold-based resource monitoring
//!
//! This crate provides the core functionality for:
//! - Sampling CPU and memory of Docker containers and the host
//! - Rolling-window aggregation per target
//! - Static threshold evaluation and alert delivery
//! - Tick scheduling with graceful shutdown
//! - Health checks and observability

pub mod aggregate;
pub mod alert;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod scheduler;
pub mod source;
pub mod threshold;

pub use aggregate::{RollingAggregate, WindowSummary};
pub use alert::{AlertSink, MessageFormatter, NoopSink, TelegramSink};
pub use engine::{Clock, EngineConfig, MonitorEngine, SystemClock, TickReport};
pub use error::{ConfigError, SampleError, SinkError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use scheduler::{Scheduler, SchedulerBuilder};
pub use threshold::{evaluate, AlertDecision, Severity};
