//! Error taxonomy for the monitor
//!
//! Per-target and per-dispatch errors are contained by the engine; only
//! [`ConfigError`] is meant to stop the process.

use thiserror::Error;

/// A target could not be sampled this tick
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("target {target} unavailable: {reason}")]
    Unavailable { target: String, reason: String },

    #[error("failed to read stats for {target}: {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed stats for {target}: {detail}")]
    Parse { target: String, detail: String },
}

impl SampleError {
    pub fn unavailable(target: impl Into<String>, reason: impl Into<String>) -> Self {
        SampleError::Unavailable {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(target: impl Into<String>, detail: impl Into<String>) -> Self {
        SampleError::Parse {
            target: target.into(),
            detail: detail.into(),
        }
    }
}

/// Alert delivery failed
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("alert transport unreachable: {0}")]
    Unavailable(#[from] reqwest::Error),

    #[error("alert rejected by transport: {0}")]
    Rejected(String),

    #[error("alert sink not configured")]
    NotConfigured,
}

/// Startup configuration is unusable
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SampleError::unavailable("web", "container stopped");
        assert_eq!(err.to_string(), "target web unavailable: container stopped");

        let err = ConfigError::invalid("interval_secs", "must be greater than zero");
        assert!(err.to_string().contains("interval_secs"));

        assert_eq!(SinkError::NotConfigured.to_string(), "alert sink not configured");
    }
}
