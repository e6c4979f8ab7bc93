//! Monitor configuration

use anyhow::{Context, Result};
use config::{builder::DefaultState, ConfigBuilder};
use monitor_lib::{
    alert::DEFAULT_TELEGRAM_API_URL, source::DEFAULT_DOCKER_ROOT, ConfigError, EngineConfig,
    MessageFormatter,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming an optional config file
const CONFIG_FILE_ENV: &str = "MONITOR_CONFIG_FILE";

/// Monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between ticks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Length of one aggregation window, in minutes
    #[serde(default = "default_analysis_period_min")]
    pub analysis_period_min: f64,

    /// Mean CPU percentage above which an alert fires
    #[serde(default = "default_alarm_threshold")]
    pub cpu_alarm_threshold: f64,

    /// Mean memory percentage above which an alert fires
    #[serde(default = "default_alarm_threshold")]
    pub memory_alarm_threshold: f64,

    /// Name of the host target
    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default = "default_proc_path")]
    pub proc_path: PathBuf,

    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,

    /// Docker data root, used to resolve container names
    #[serde(default = "default_docker_root")]
    pub docker_root: PathBuf,

    #[serde(default = "default_true")]
    pub monitor_containers: bool,

    #[serde(default = "default_true")]
    pub monitor_host: bool,

    /// API server port for stats, webhook, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub telegram_bot_token: Option<String>,

    #[serde(default)]
    pub telegram_chat_id: Option<String>,

    #[serde(default = "default_telegram_api_url")]
    pub telegram_api_url: String,

    /// IANA time zone for timestamps in alert messages
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_analysis_period_min() -> f64 {
    1.0
}

fn default_alarm_threshold() -> f64 {
    0.001
}

fn default_server_name() -> String {
    "Server".to_string()
}

fn default_proc_path() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn default_docker_root() -> PathBuf {
    PathBuf::from(DEFAULT_DOCKER_ROOT)
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    8080
}

fn default_telegram_api_url() -> String {
    DEFAULT_TELEGRAM_API_URL.to_string()
}

impl MonitorConfig {
    /// Load configuration from an optional file and `MONITOR_*` variables.
    ///
    /// Environment variables override the file.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::from(Path::new(&path)).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MONITOR")
                .try_parsing(true)
                .ignore_empty(true),
        );

        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Check every setting and derive the engine configuration.
    ///
    /// Any error here is fatal: the monitor must not start ticking.
    pub fn validate(&self) -> Result<EngineConfig, ConfigError> {
        if self.server_name.trim().is_empty() {
            return Err(ConfigError::invalid("server_name", "must not be empty"));
        }
        if !self.monitor_containers && !self.monitor_host {
            return Err(ConfigError::invalid(
                "monitor_containers",
                "containers and host monitoring are both disabled",
            ));
        }
        self.message_formatter()?;
        if self.telegram_bot_token.is_some() != self.telegram_chat_id.is_some() {
            return Err(ConfigError::invalid(
                "telegram_chat_id",
                "bot token and chat id must be set together",
            ));
        }

        EngineConfig::from_units(
            self.interval_secs as f64,
            self.analysis_period_min,
            self.cpu_alarm_threshold,
            self.memory_alarm_threshold,
        )
    }

    /// Formatter rendering timestamps in the configured time zone
    pub fn message_formatter(&self) -> Result<MessageFormatter, ConfigError> {
        MessageFormatter::with_time_zone(&self.time_zone)
    }

    /// Bot token and chat id, when alert delivery is configured
    pub fn telegram_credentials(&self) -> Option<(&str, &str)> {
        match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(token), Some(chat_id)) => Some((token.as_str(), chat_id.as_str())),
            _ => None,
        }
    }
}
