//! Core data models for the resource monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of monitored entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Container,
    Host,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Container => write!(f, "container"),
            TargetKind::Host => write!(f, "host"),
        }
    }
}

/// A monitored container or host, identified by a stable name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    pub kind: TargetKind,
    pub name: String,
}

impl Target {
    pub fn container(name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Container,
            name: name.into(),
        }
    }

    pub fn host(name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Host,
            name: name.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// One CPU/memory reading for a target at an instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub observed_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(cpu_percent: f64, memory_percent: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            cpu_percent,
            memory_percent,
            observed_at,
        }
    }
}

/// Mean utilization over the currently open window of a target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Number of samples accumulated in the open window
    pub sample_count: usize,
    pub window_started_at: DateTime<Utc>,
}

impl UsageSnapshot {
    /// True when the open window holds no samples yet (e.g. right after a close)
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}
