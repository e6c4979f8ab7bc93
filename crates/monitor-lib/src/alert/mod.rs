//! Alert delivery
//!
//! Provides:
//! - The [`AlertSink`] seam the engine dispatches through
//! - A Telegram Bot API sink with MarkdownV2 formatting
//! - A no-op sink used when no transport is configured

mod message;
mod telegram;

pub use message::{escape_markdown_v2, MessageFormatter};
pub use telegram::{TelegramSink, DEFAULT_TELEGRAM_API_URL};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::models::Target;
use crate::threshold::AlertDecision;

/// Outbound alert transport.
///
/// `send` is called at most once per closed window and never retried; the
/// return value only reports whether delivery succeeded.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, target: &Target, decision: &AlertDecision, at: DateTime<Utc>) -> bool;
}

/// Sink that drops every alert
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl AlertSink for NoopSink {
    async fn send(&self, target: &Target, decision: &AlertDecision, _at: DateTime<Utc>) -> bool {
        warn!(
            target_name = %target.name,
            decision = decision.label(),
            "Alert sink not configured, alert dropped"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::evaluate;

    #[tokio::test]
    async fn test_noop_sink_reports_failure() {
        let sink = NoopSink;
        let decision = evaluate(90.0, 10.0, 50.0, 50.0);

        assert!(!sink.send(&Target::container("web"), &decision, Utc::now()).await);
    }
}
