//! Sample sources for monitored targets
//!
//! This module provides the providers the engine pulls utilization from:
//! Docker containers (read from the cgroup filesystem the Docker daemon
//! populates, supporting both cgroup v2 and v1) and the host itself (read
//! from procfs). Every failure is scoped to one target.

mod container;
mod host;


pub use container::{detect_cgroup_layout, CgroupLayout, ContainerSource, DEFAULT_DOCKER_ROOT};
pub use host::HostSource;

use crate::error::SampleError;
use crate::models::{Sample, TargetKind};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub use async_trait::async_trait;

/// Delay between the two counter reads taken the first time a target is seen
pub const DEFAULT_PRIME_INTERVAL: Duration = Duration::from_millis(250);

/// A CPU/memory reading, not yet stamped with the tick time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl Reading {
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            cpu_percent,
            memory_percent,
        }
    }

    /// Stamp the reading with the time of the tick that observed it
    pub fn at(self, observed_at: DateTime<Utc>) -> Sample {
        Sample::new(self.cpu_percent, self.memory_percent, observed_at)
    }
}

/// Trait for sample source implementations
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Kind of target this source produces
    fn kind(&self) -> TargetKind;

    /// List the targets currently available; may change between calls
    async fn list_targets(&self) -> Result<Vec<String>>;

    /// Take one reading for a target
    async fn sample(&self, target: &str) -> std::result::Result<Reading, SampleError>;
}

/// Create the container source for the detected cgroup layout
pub async fn create_container_source(
    cgroup_root: impl Into<std::path::PathBuf>,
    proc_path: impl Into<std::path::PathBuf>,
    docker_root: impl Into<std::path::PathBuf>,
) -> Arc<dyn SampleSource> {
    let cgroup_root = cgroup_root.into();
    let layout = detect_cgroup_layout(&cgroup_root).await;

    match layout {
        CgroupLayout::V2 => {
            tracing::info!("Detected cgroup v2, reading container stats from unified hierarchy");
        }
        CgroupLayout::V1 => {
            tracing::info!("Detected cgroup v1, reading container stats from legacy controllers");
        }
        CgroupLayout::Unknown => {
            tracing::warn!(
                cgroup_root = %cgroup_root.display(),
                "Could not detect cgroup layout, defaulting to v2"
            );
        }
    }

    Arc::new(ContainerSource::new(cgroup_root, proc_path, layout).with_docker_root(docker_root))
}

/// CPU utilization from a cumulative usage counter.
///
/// `usage_delta_usec` is CPU time consumed over `elapsed` wall time; the
/// result is 100 per fully used core, so multi-core workloads can exceed 100.
pub fn cpu_percent_from_delta(usage_delta_usec: u64, elapsed: Duration) -> f64 {
    let elapsed_usec = elapsed.as_micros() as f64;
    if elapsed_usec <= 0.0 {
        return 0.0;
    }
    usage_delta_usec as f64 / elapsed_usec * 100.0
}
