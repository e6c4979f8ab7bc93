//! API client for the resource monitor's HTTP surface

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for a running monitor
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    async fn send(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.base_url.join(path).context("Invalid path")?;

        self.client
            .get(url)
            .send()
            .await
            .context("Failed to send request")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(path).await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a GET request to a probe endpoint, which reports failure as 503
    /// with a regular body
    pub async fn get_probe<T: DeserializeOwned>(&self, path: &str) -> Result<(bool, T)> {
        let response = self.send(path).await?;
        let status = response.status();

        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        let body = response.json().await.context("Failed to parse response")?;
        Ok((status.is_success(), body))
    }

    /// Open-window usage of every target, optionally filtered by kind
    pub async fn stats(&self, kind: Option<&str>) -> Result<Vec<StatsEntry>> {
        let path = match kind {
            Some(kind) => format!("api/stats?kind={}", kind),
            None => "api/stats".to_string(),
        };
        self.get(&path).await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsEntry {
    pub target: String,
    pub kind: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub sample_count: usize,
    pub window_started_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
