//! HTTP API for stats queries, the Telegram webhook, health checks and
//! Prometheus metrics

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use monitor_lib::{
    health::HealthRegistry, MessageFormatter, MonitorEngine, TargetKind, TelegramSink,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const UNAUTHORIZED_REPLY: &str = "Sorry, you are not authorized!";
const USAGE_REPLY: &str = "Use /stats command to get stats.";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub engine: Arc<MonitorEngine>,
    /// Present when Telegram delivery is configured; authorizes webhook chats
    pub telegram: Option<Arc<TelegramSink>>,
    pub formatter: MessageFormatter,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        engine: Arc<MonitorEngine>,
        telegram: Option<Arc<TelegramSink>>,
        formatter: MessageFormatter,
    ) -> Self {
        Self {
            health_registry,
            engine,
            telegram,
            formatter,
        }
    }
}

/// One target's open-window usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsEntry {
    pub target: String,
    pub kind: TargetKind,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub sample_count: usize,
    pub window_started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub kind: Option<TargetKind>,
}

/// Current open-window means of every target, optionally filtered by kind
async fn stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Json<Vec<StatsEntry>> {
    let entries = state
        .engine
        .snapshot()
        .into_iter()
        .filter(|(target, _)| query.kind.map_or(true, |kind| target.kind == kind))
        .map(|(target, usage)| StatsEntry {
            target: target.name,
            kind: target.kind,
            cpu_percent: usage.cpu_percent,
            memory_percent: usage.memory_percent,
            sample_count: usage.sample_count,
            window_started_at: usage.window_started_at,
        })
        .collect();

    Json(entries)
}

#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

/// Reply returned inline to a Telegram webhook call
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookReply {
    pub method: String,
    pub chat_id: i64,
    pub text: String,
}

impl WebhookReply {
    fn send_message(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            method: "sendMessage".to_string(),
            chat_id,
            text: text.into(),
        }
    }
}

/// Telegram webhook: answers `/stats` from the configured chat
async fn monitor_webhook(
    State(state): State<Arc<AppState>>,
    Json(update): Json<TelegramUpdate>,
) -> Response {
    let Some(message) = update.message else {
        return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
    };
    let chat_id = message.chat.id;

    let authorized = state
        .telegram
        .as_ref()
        .is_some_and(|sink| sink.is_authorized(&chat_id.to_string()));
    if !authorized {
        warn!(chat_id, "Rejected webhook message from unauthorized chat");
        return Json(WebhookReply::send_message(chat_id, UNAUTHORIZED_REPLY)).into_response();
    }

    let text = match message.text.as_deref().map(str::trim) {
        Some("/stats") => {
            info!(chat_id, "Serving stats request");
            state.formatter.render_stats(&state.engine.snapshot())
        }
        _ => USAGE_REPLY.to_string(),
    };

    Json(WebhookReply::send_message(chat_id, text)).into_response()
}

/// Health check response - 200 if operational, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = if health.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

/// Readiness check response - 200 once the first tick completed
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/stats", get(stats))
        .route("/api/monitor", post(monitor_webhook))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
