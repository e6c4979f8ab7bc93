//! Docker container utilization from the cgroup filesystem
//!
//! Reads the same counters `docker stats` is computed from:
//! - cgroup v2: `cpu.stat` (usage_usec), `memory.current`, `memory.max`
//! - cgroup v1: `cpuacct.usage` (ns), `memory.usage_in_bytes`,
//!   `memory.limit_in_bytes`
//!
//! Both the systemd (`system.slice/docker-<id>.scope`) and cgroupfs
//! (`docker/<id>`) cgroup drivers are recognised.
//!
//! Targets are named after the container's Docker name, read from
//! `<docker_root>/containers/<id>/config.v2.json`. When that file can't be
//! read the 12-character short id is used instead.

use super::host::HostSource;
use super::{async_trait, cpu_percent_from_delta, Reading, SampleSource, DEFAULT_PRIME_INTERVAL};
use crate::error::SampleError;
use crate::models::TargetKind;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::debug;

/// Length of the short container id used when no name is known
const SHORT_ID_LEN: usize = 12;

/// Default Docker data root
pub const DEFAULT_DOCKER_ROOT: &str = "/var/lib/docker";

/// The part of Docker's per-container `config.v2.json` we read
#[derive(Debug, Deserialize)]
struct DockerContainerConfig {
    #[serde(rename = "Name")]
    name: String,
}

/// Cgroup hierarchy layout detected on the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupLayout {
    V1,
    V2,
    Unknown,
}

/// Detect the cgroup layout under `cgroup_root`
pub async fn detect_cgroup_layout(cgroup_root: &Path) -> CgroupLayout {
    // Unified hierarchy exposes cgroup.controllers at its root
    if fs::metadata(cgroup_root.join("cgroup.controllers")).await.is_ok() {
        return CgroupLayout::V2;
    }

    let v1_memory = cgroup_root.join("memory");
    let v1_cpuacct = cgroup_root.join("cpuacct");
    if fs::metadata(&v1_memory).await.is_ok() && fs::metadata(&v1_cpuacct).await.is_ok() {
        return CgroupLayout::V1;
    }

    CgroupLayout::Unknown
}

/// Cgroup directories holding one container's counters
#[derive(Debug, Clone)]
struct ContainerPaths {
    cpu: PathBuf,
    memory: PathBuf,
}

/// Last CPU counter reading for a container
#[derive(Debug, Clone, Copy)]
struct CpuCounter {
    usage_usec: u64,
    read_at: Instant,
}

/// Sample source for Docker containers
pub struct ContainerSource {
    cgroup_root: PathBuf,
    proc_path: PathBuf,
    layout: CgroupLayout,
    docker_root: PathBuf,
    prime_interval: Duration,
    /// Target name -> cgroup paths, refreshed on every listing
    running: Mutex<HashMap<String, ContainerPaths>>,
    last_cpu: Mutex<HashMap<String, CpuCounter>>,
}

impl ContainerSource {
    /// Create a container source for a known layout
    pub fn new(
        cgroup_root: impl Into<PathBuf>,
        proc_path: impl Into<PathBuf>,
        layout: CgroupLayout,
    ) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            proc_path: proc_path.into(),
            layout,
            docker_root: PathBuf::from(DEFAULT_DOCKER_ROOT),
            prime_interval: DEFAULT_PRIME_INTERVAL,
            running: Mutex::new(HashMap::new()),
            last_cpu: Mutex::new(HashMap::new()),
        }
    }

    /// Set the Docker data root used to resolve container names
    pub fn with_docker_root(mut self, docker_root: impl Into<PathBuf>) -> Self {
        self.docker_root = docker_root.into();
        self
    }

    /// Set the delay between the two reads taken on a container's first sample
    pub fn with_prime_interval(mut self, interval: Duration) -> Self {
        self.prime_interval = interval;
        self
    }

    pub fn layout(&self) -> CgroupLayout {
        self.layout
    }

    /// Parse cpu.stat contents (v2), returning `usage_usec`
    pub fn parse_cpu_stat(content: &str) -> Option<u64> {
        content.lines().find_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("usage_usec"), Some(value)) => value.parse().ok(),
                _ => None,
            }
        })
    }

    /// Parse a memory limit file; `max` and absurdly large values mean
    /// unlimited
    pub fn parse_memory_limit(content: &str) -> Option<u64> {
        let value = content.trim();
        if value == "max" {
            return None;
        }
        // v1 reports "unlimited" as a page-aligned i64::MAX
        value.parse::<u64>().ok().filter(|v| *v < (1u64 << 60))
    }

    /// Extract the full container id from a Docker cgroup directory name.
    ///
    /// Accepts `docker-<id>.scope` (systemd driver) and a bare `<id>`
    /// (cgroupfs driver).
    pub fn extract_container_id(dir_name: &str) -> Option<String> {
        let id = dir_name
            .strip_prefix("docker-")
            .and_then(|s| s.strip_suffix(".scope"))
            .unwrap_or(dir_name);

        if id.len() == 64 && id.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(id.to_string())
        } else {
            None
        }
    }

    fn short_id(id: &str) -> String {
        id.chars().take(SHORT_ID_LEN).collect()
    }

    /// Docker's name for a container, without the leading `/`; the short id
    /// when the container config is missing or unreadable
    pub async fn resolve_name(&self, id: &str) -> String {
        let path = self
            .docker_root
            .join("containers")
            .join(id)
            .join("config.v2.json");

        let name = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<DockerContainerConfig>(&content) {
                Ok(config) => Some(config.name.trim_start_matches('/').to_string()),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Malformed container config");
                    None
                }
            },
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Container config not readable");
                None
            }
        };

        name.filter(|name| !name.is_empty())
            .unwrap_or_else(|| Self::short_id(id))
    }

    /// Directories that may contain Docker container cgroups
    fn scan_roots(&self) -> Vec<PathBuf> {
        match self.layout {
            CgroupLayout::V2 | CgroupLayout::Unknown => vec![
                self.cgroup_root.join("system.slice"),
                self.cgroup_root.join("docker"),
            ],
            CgroupLayout::V1 => {
                let memory_root = self.cgroup_root.join("memory");
                vec![memory_root.join("system.slice"), memory_root.join("docker")]
            }
        }
    }

    /// Build the counter paths for a discovered container directory
    fn container_paths(&self, memory_dir: &Path) -> Option<ContainerPaths> {
        match self.layout {
            CgroupLayout::V2 | CgroupLayout::Unknown => {
                if memory_dir.join("cpu.stat").exists() {
                    Some(ContainerPaths {
                        cpu: memory_dir.to_path_buf(),
                        memory: memory_dir.to_path_buf(),
                    })
                } else {
                    None
                }
            }
            CgroupLayout::V1 => {
                let relative = memory_dir
                    .strip_prefix(self.cgroup_root.join("memory"))
                    .ok()?;
                let cpu = self.cgroup_root.join("cpuacct").join(relative);
                if memory_dir.join("memory.usage_in_bytes").exists() {
                    Some(ContainerPaths {
                        cpu,
                        memory: memory_dir.to_path_buf(),
                    })
                } else {
                    None
                }
            }
        }
    }

    async fn scan_dir(&self, dir: &Path) -> Result<Vec<(String, ContainerPaths)>> {
        let mut found = Vec::new();
        let mut entries = fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read {}", dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = Self::extract_container_id(&name) {
                if let Some(paths) = self.container_paths(&path) {
                    found.push((id, paths));
                }
            }
        }

        Ok(found)
    }

    async fn read_value(path: &Path) -> std::io::Result<String> {
        fs::read_to_string(path).await
    }

    fn io_error(target: &str, source: std::io::Error) -> SampleError {
        SampleError::Io {
            target: target.to_string(),
            source,
        }
    }

    /// Cumulative CPU time in microseconds
    async fn read_cpu_usage_usec(
        &self,
        target: &str,
        paths: &ContainerPaths,
    ) -> std::result::Result<u64, SampleError> {
        match self.layout {
            CgroupLayout::V2 | CgroupLayout::Unknown => {
                let content = Self::read_value(&paths.cpu.join("cpu.stat"))
                    .await
                    .map_err(|e| Self::io_error(target, e))?;
                Self::parse_cpu_stat(&content)
                    .ok_or_else(|| SampleError::parse(target, "cpu.stat lacks usage_usec"))
            }
            CgroupLayout::V1 => {
                let content = Self::read_value(&paths.cpu.join("cpuacct.usage"))
                    .await
                    .map_err(|e| Self::io_error(target, e))?;
                content
                    .trim()
                    .parse::<u64>()
                    .map(|ns| ns / 1_000)
                    .map_err(|e| SampleError::parse(target, format!("cpuacct.usage: {}", e)))
            }
        }
    }

    async fn read_cpu_percent(
        &self,
        target: &str,
        paths: &ContainerPaths,
    ) -> std::result::Result<f64, SampleError> {
        let mut current = CpuCounter {
            usage_usec: self.read_cpu_usage_usec(target, paths).await?,
            read_at: Instant::now(),
        };

        let previous = self
            .last_cpu
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .copied();

        let previous = match previous {
            Some(prev) => prev,
            None => {
                debug!(container = %target, "Priming container CPU counter");
                let first = current;
                tokio::time::sleep(self.prime_interval).await;
                current = CpuCounter {
                    usage_usec: self.read_cpu_usage_usec(target, paths).await?,
                    read_at: Instant::now(),
                };
                first
            }
        };

        self.last_cpu
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.to_string(), current);

        Ok(cpu_percent_from_delta(
            current.usage_usec.saturating_sub(previous.usage_usec),
            current.read_at.duration_since(previous.read_at),
        ))
    }

    async fn read_memory_percent(
        &self,
        target: &str,
        paths: &ContainerPaths,
    ) -> std::result::Result<f64, SampleError> {
        let (usage_file, limit_file) = match self.layout {
            CgroupLayout::V2 | CgroupLayout::Unknown => ("memory.current", "memory.max"),
            CgroupLayout::V1 => ("memory.usage_in_bytes", "memory.limit_in_bytes"),
        };

        let usage: u64 = Self::read_value(&paths.memory.join(usage_file))
            .await
            .map_err(|e| Self::io_error(target, e))?
            .trim()
            .parse()
            .map_err(|e| SampleError::parse(target, format!("{}: {}", usage_file, e)))?;

        let limit = Self::read_value(&paths.memory.join(limit_file))
            .await
            .ok()
            .and_then(|content| Self::parse_memory_limit(&content));

        // Like the Docker API, cap the limit at the host's memory
        let host_total = HostSource::read_mem_total_bytes(&self.proc_path).await;
        let limit = match (limit, host_total) {
            (Some(limit), Some(total)) => limit.min(total),
            (Some(limit), None) => limit,
            (None, Some(total)) => total,
            (None, None) => {
                return Err(SampleError::unavailable(target, "no memory limit available"));
            }
        };

        if limit == 0 {
            return Err(SampleError::parse(target, "memory limit is zero"));
        }

        Ok(usage as f64 / limit as f64 * 100.0)
    }
}

#[async_trait]
impl SampleSource for ContainerSource {
    fn kind(&self) -> TargetKind {
        TargetKind::Container
    }

    async fn list_targets(&self) -> Result<Vec<String>> {
        let mut found = Vec::new();

        for root in self.scan_roots() {
            if root.exists() {
                for (id, paths) in self.scan_dir(&root).await? {
                    found.push((self.resolve_name(&id).await, paths));
                }
            }
        }

        let mut names: Vec<String> = found.iter().map(|(name, _)| name.clone()).collect();
        names.sort();
        names.dedup();

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        *running = found.into_iter().collect();

        // Forget counters of containers that are gone so a restart re-primes
        self.last_cpu
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|name, _| running.contains_key(name));

        Ok(names)
    }

    async fn sample(&self, target: &str) -> std::result::Result<Reading, SampleError> {
        let paths = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
            .ok_or_else(|| SampleError::unavailable(target, "container is not running"))?;

        let cpu_percent = self.read_cpu_percent(target, &paths).await?;
        let memory_percent = self.read_memory_percent(target, &paths).await?;

        Ok(Reading::new(cpu_percent, memory_percent))
    }
}
