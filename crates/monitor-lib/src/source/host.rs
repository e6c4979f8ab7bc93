//! Host utilization from procfs
//!
//! Reads the machine-wide figures:
//! - <proc>/stat for aggregate CPU jiffies
//! - <proc>/meminfo for total and available memory
//!
//! The proc root is configurable so a containerised monitor can read a
//! bind-mounted host `/proc`.

use super::{async_trait, Reading, SampleSource, DEFAULT_PRIME_INTERVAL};
use crate::error::SampleError;
use crate::models::TargetKind;
use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// Aggregate CPU counters from the first line of /proc/stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Busy share of the interval between `prev` and `self`, in percent
    fn percent_since(&self, prev: &CpuTimes) -> f64 {
        let total = self.total.saturating_sub(prev.total);
        if total == 0 {
            return 0.0;
        }
        let busy = self.busy.saturating_sub(prev.busy);
        busy as f64 / total as f64 * 100.0
    }
}

/// Sample source for the host machine
pub struct HostSource {
    server_name: String,
    proc_path: PathBuf,
    prime_interval: Duration,
    last_cpu: Mutex<Option<CpuTimes>>,
}

impl HostSource {
    /// Create a host source reading from `/proc`
    pub fn new(server_name: impl Into<String>) -> Self {
        Self::with_proc_path(server_name, "/proc")
    }

    /// Create a host source with a custom proc root
    pub fn with_proc_path(server_name: impl Into<String>, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            server_name: server_name.into(),
            proc_path: proc_path.into(),
            prime_interval: DEFAULT_PRIME_INTERVAL,
            last_cpu: Mutex::new(None),
        }
    }

    /// Set the delay between the two reads taken on the first sample
    pub fn with_prime_interval(mut self, interval: Duration) -> Self {
        self.prime_interval = interval;
        self
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Parse the aggregate `cpu` line of /proc/stat
    pub(crate) fn parse_proc_stat(content: &str) -> Option<CpuTimes> {
        let line = content.lines().find(|l| l.starts_with("cpu "))?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .map(|v| v.parse().unwrap_or(0))
            .collect();

        if fields.len() < 4 {
            return None;
        }

        // user nice system idle iowait irq softirq steal; guest time is
        // already included in user
        let total: u64 = fields.iter().take(8).sum();
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);

        Some(CpuTimes {
            busy: total.saturating_sub(idle),
            total,
        })
    }

    /// Parse /proc/meminfo into a map of field name to kilobytes
    pub fn parse_meminfo(content: &str) -> HashMap<String, u64> {
        let mut stats = HashMap::new();

        for line in content.lines() {
            let Some((key, rest)) = line.split_once(':') else {
                continue;
            };
            if let Some(Ok(value)) = rest.split_whitespace().next().map(str::parse::<u64>) {
                stats.insert(key.trim().to_string(), value);
            }
        }

        stats
    }

    /// Used memory as a percentage of total, matching `free`'s notion of
    /// available memory
    pub fn memory_percent(meminfo: &HashMap<String, u64>) -> Option<f64> {
        let total = *meminfo.get("MemTotal")?;
        if total == 0 {
            return None;
        }

        let available = meminfo.get("MemAvailable").copied().unwrap_or_else(|| {
            ["MemFree", "Buffers", "Cached"]
                .iter()
                .filter_map(|k| meminfo.get(*k))
                .sum()
        });

        Some(total.saturating_sub(available) as f64 / total as f64 * 100.0)
    }

    async fn read_proc_file(&self, name: &str) -> std::result::Result<String, SampleError> {
        let path = self.proc_path.join(name);
        fs::read_to_string(&path)
            .await
            .map_err(|source| SampleError::Io {
                target: self.server_name.clone(),
                source,
            })
    }

    async fn read_cpu_times(&self) -> std::result::Result<CpuTimes, SampleError> {
        let content = self.read_proc_file("stat").await?;
        Self::parse_proc_stat(&content)
            .ok_or_else(|| SampleError::parse(&self.server_name, "no aggregate cpu line in stat"))
    }

    async fn read_cpu_percent(&self) -> std::result::Result<f64, SampleError> {
        let mut current = self.read_cpu_times().await?;

        let previous = *self.last_cpu.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = match previous {
            Some(prev) => prev,
            None => {
                debug!(host = %self.server_name, "Priming host CPU counters");
                let first = current;
                tokio::time::sleep(self.prime_interval).await;
                current = self.read_cpu_times().await?;
                first
            }
        };

        *self.last_cpu.lock().unwrap_or_else(PoisonError::into_inner) = Some(current);
        Ok(current.percent_since(&previous))
    }

    /// Memory total in bytes, used as the limit for unconstrained containers
    pub(crate) async fn read_mem_total_bytes(proc_path: &Path) -> Option<u64> {
        let content = fs::read_to_string(proc_path.join("meminfo")).await.ok()?;
        Self::parse_meminfo(&content)
            .get("MemTotal")
            .map(|kb| kb * 1024)
    }
}

#[async_trait]
impl SampleSource for HostSource {
    fn kind(&self) -> TargetKind {
        TargetKind::Host
    }

    async fn list_targets(&self) -> Result<Vec<String>> {
        Ok(vec![self.server_name.clone()])
    }

    async fn sample(&self, target: &str) -> std::result::Result<Reading, SampleError> {
        if target != self.server_name {
            return Err(SampleError::unavailable(target, "not the monitored host"));
        }

        let cpu_percent = self.read_cpu_percent().await?;

        let meminfo = self.read_proc_file("meminfo").await?;
        let memory_percent = Self::memory_percent(&Self::parse_meminfo(&meminfo))
            .ok_or_else(|| SampleError::parse(target, "meminfo lacks MemTotal"))?;

        Ok(Reading::new(cpu_percent, memory_percent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_stat() {
        let content = "cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 50 0 50 350 50 0 0 0 0 0\nintr 1\n";

        let times = HostSource::parse_proc_stat(content).unwrap();
        assert_eq!(times.total, 1000);
        assert_eq!(times.busy, 200);
    }

    #[test]
    fn test_parse_proc_stat_missing_cpu_line() {
        assert!(HostSource::parse_proc_stat("intr 1\nctxt 2\n").is_none());
    }

    #[test]
    fn test_cpu_percent_since() {
        let prev = CpuTimes { busy: 200, total: 1000 };
        let curr = CpuTimes { busy: 500, total: 2000 };
        assert!((curr.percent_since(&prev) - 30.0).abs() < 1e-9);

        // No time passed
        assert_eq!(prev.percent_since(&prev), 0.0);
    }

    #[test]
    fn test_memory_percent() {
        let content = "MemTotal:       1000 kB\nMemFree:         100 kB\nMemAvailable:    250 kB\n";
        let meminfo = HostSource::parse_meminfo(content);

        assert_eq!(meminfo.get("MemTotal"), Some(&1000));
        assert!((HostSource::memory_percent(&meminfo).unwrap() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_memory_percent_without_mem_available() {
        let content = "MemTotal: 1000 kB\nMemFree: 200 kB\nBuffers: 100 kB\nCached: 200 kB\n";
        let meminfo = HostSource::parse_meminfo(content);

        assert!((HostSource::memory_percent(&meminfo).unwrap() - 50.0).abs() < 1e-9);
    }
}
