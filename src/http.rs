use crate::collectors::system::collect_system_info;
use crate::hub::MonitorEvent;
use crate::metrics::Metrics;
use crate::monitor::Monitor;
use crate::sample::Sample;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error};

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub monitor: Monitor,
    pub started_at: Instant,
}

/// Envelope shared by every `/api` response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now(),
        }
    }
}

fn failure(status: StatusCode, message: &str) -> Response {
    let body: ApiResponse<()> = ApiResponse {
        success: false,
        data: None,
        message: Some(message.to_string()),
        timestamp: Utc::now(),
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    timestamp: DateTime<Utc>,
    version: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct HistoryPayload {
    metrics: Vec<Arc<Sample>>,
    max_entries: usize,
}

pub fn build_router(metrics: Arc<Metrics>, monitor: Monitor) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/metrics", get(current_handler))
        .route("/api/history", get(history_handler))
        .route("/api/stream", get(stream_handler))
        .route("/api/system-info", get(system_info_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(not_found)
        .with_state(HttpAppState {
            metrics,
            monitor,
            started_at: Instant::now(),
        })
}

async fn health(State(state): State<HttpAppState>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

async fn current_handler(State(state): State<HttpAppState>) -> Response {
    match state.monitor.latest().await {
        Some(sample) => Json(ApiResponse::ok(sample)).into_response(),
        None => failure(StatusCode::SERVICE_UNAVAILABLE, "metrics not available yet"),
    }
}

async fn history_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(HistoryPayload {
        metrics: state.monitor.history().await,
        max_entries: state.monitor.history_capacity().await,
    }))
}

/// Live `sample` and `alert` events, preceded by the cached latest sample.
/// The subscription ends with the connection; the hub prunes it on the
/// next publish.
async fn stream_handler(
    State(state): State<HttpAppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (subscription, latest) = state.monitor.subscribe_with_latest().await;
    debug!(subscriber = subscription.id(), "SSE-клиент подключён");
    let latest = latest.map(MonitorEvent::Sample);

    let events = tokio_stream::iter(latest)
        .chain(subscription.into_stream())
        .filter(|event| matches!(event, MonitorEvent::Sample(_) | MonitorEvent::Alert(_)))
        .map(|event| Event::default().json_data(&event));

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn system_info_handler() -> Response {
    match tokio::task::spawn_blocking(collect_system_info).await {
        Ok(info) => Json(ApiResponse::ok(info)).into_response(),
        Err(err) => {
            error!(error = %err, "не удалось получить информацию о системе");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "system info unavailable")
        }
    }
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    state
        .metrics
        .set_subscribers(state.monitor.subscriber_count().await);
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn not_found() -> Response {
    failure(StatusCode::NOT_FOUND, "endpoint not found")
}
