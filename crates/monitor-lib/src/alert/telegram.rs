//! Telegram Bot API transport

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::{AlertSink, MessageFormatter};
use crate::error::SinkError;
use crate::models::Target;
use crate::threshold::AlertDecision;

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends alerts to one Telegram chat
pub struct TelegramSink {
    client: Client,
    send_url: Url,
    chat_id: String,
    formatter: MessageFormatter,
}

impl TelegramSink {
    /// Create a sink posting to `<api_base>/bot<token>/sendMessage`
    pub fn new(
        api_base: &str,
        bot_token: &str,
        chat_id: impl Into<String>,
        formatter: MessageFormatter,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        // Tokens contain ':', so the path is set directly rather than joined
        let mut send_url = Url::parse(api_base).context("Invalid Telegram API URL")?;
        let path = format!(
            "{}/bot{}/sendMessage",
            send_url.path().trim_end_matches('/'),
            bot_token
        );
        send_url.set_path(&path);

        Ok(Self {
            client,
            send_url,
            chat_id: chat_id.into(),
            formatter,
        })
    }

    /// True when `chat_id` is the configured alert chat
    pub fn is_authorized(&self, chat_id: &str) -> bool {
        self.chat_id == chat_id
    }

    /// Post a message to a chat.
    ///
    /// Succeeds only when the HTTP call succeeds and the API answers `ok`.
    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<(), SinkError> {
        let body = SendMessageRequest {
            chat_id,
            text,
            parse_mode,
        };

        let response = self
            .client
            .post(self.send_url.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected(format!("HTTP {}: {}", status, detail)));
        }

        let api: ApiResponse = response.json().await?;
        if !api.ok {
            return Err(SinkError::Rejected(
                api.description.unwrap_or_else(|| "ok=false".to_string()),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    async fn send(&self, target: &Target, decision: &AlertDecision, at: DateTime<Utc>) -> bool {
        let Some(text) = self.formatter.render_alert(target, decision, at) else {
            debug!(target_name = %target.name, "No alert to send");
            return false;
        };

        match self
            .send_message(&self.chat_id, &text, Some("MarkdownV2"))
            .await
        {
            Ok(()) => {
                info!(
                    target_name = %target.name,
                    decision = decision.label(),
                    "Alert delivered to Telegram"
                );
                true
            }
            Err(e) => {
                warn!(
                    target_name = %target.name,
                    decision = decision.label(),
                    error = %e,
                    "Failed to deliver alert to Telegram"
                );
                false
            }
        }
    }
}
