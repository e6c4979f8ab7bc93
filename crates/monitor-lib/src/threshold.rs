//! Static threshold evaluation
//!
//! Maps a closed window's mean utilization to an [`AlertDecision`]. A
//! threshold is crossed only when the mean strictly exceeds it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of comparing a window's means against the configured thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertDecision {
    NoAlert,
    CpuOnly {
        value: f64,
        threshold: f64,
    },
    MemoryOnly {
        value: f64,
        threshold: f64,
    },
    Both {
        cpu_value: f64,
        cpu_threshold: f64,
        mem_value: f64,
        mem_threshold: f64,
    },
}

impl AlertDecision {
    pub fn is_alert(&self) -> bool {
        !matches!(self, AlertDecision::NoAlert)
    }

    /// Presentation severity of the decision.
    ///
    /// Single violations are graded by how far the value exceeds its
    /// threshold; a dual violation is always critical.
    pub fn severity(&self) -> Option<Severity> {
        match *self {
            AlertDecision::NoAlert => None,
            AlertDecision::CpuOnly { value, threshold }
            | AlertDecision::MemoryOnly { value, threshold } => {
                Some(Severity::classify(value, threshold))
            }
            AlertDecision::Both { .. } => Some(Severity::Critical),
        }
    }

    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            AlertDecision::NoAlert => "none",
            AlertDecision::CpuOnly { .. } => "cpu",
            AlertDecision::MemoryOnly { .. } => "memory",
            AlertDecision::Both { .. } => "cpu_memory",
        }
    }
}

/// Evaluate window means against thresholds.
///
/// The combined case is checked first so a dual violation is reported once
/// as [`AlertDecision::Both`], never as two single alerts.
pub fn evaluate(mean_cpu: f64, mean_mem: f64, cpu_threshold: f64, mem_threshold: f64) -> AlertDecision {
    let cpu_exceeded = mean_cpu > cpu_threshold;
    let mem_exceeded = mean_mem > mem_threshold;

    match (cpu_exceeded, mem_exceeded) {
        (true, true) => AlertDecision::Both {
            cpu_value: mean_cpu,
            cpu_threshold,
            mem_value: mean_mem,
            mem_threshold,
        },
        (true, false) => AlertDecision::CpuOnly {
            value: mean_cpu,
            threshold: cpu_threshold,
        },
        (false, true) => AlertDecision::MemoryOnly {
            value: mean_mem,
            threshold: mem_threshold,
        },
        (false, false) => AlertDecision::NoAlert,
    }
}

/// Severity levels used for message emphasis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    High,
    Critical,
}

impl Severity {
    /// Grade a violation by `value / threshold`: `>= 1.5` critical,
    /// `>= 1.2` high, otherwise warning.
    pub fn classify(value: f64, threshold: f64) -> Self {
        let ratio = value / threshold;
        if ratio >= 1.5 {
            Severity::Critical
        } else if ratio >= 1.2 {
            Severity::High
        } else {
            Severity::Warning
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}
