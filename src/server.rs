//! HTTP listener.
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /sonarr` | Sonarr webhook; validates and enqueues the event |
//! | `GET /health` | Liveness; 503 once the pipeline stops accepting events |
//! | `GET /metrics` | Pipeline counters as JSON |
//!
//! The listener holds no pipeline state of its own beyond the [`Ingestor`];
//! it stops accepting connections when its stop token is cancelled.

use crate::event::TraceContext;
use crate::ingest::{IngestError, Ingestor};
use crate::stats::{format_uptime, PipelineStats};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Header carrying a caller-supplied correlation id
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Ingestor,
    pub stats: Arc<PipelineStats>,
}

/// Response returned when an event is accepted.
#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub status: String,
    /// Number of enrichment tasks enqueued
    pub enqueued: usize,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
}

/// Build the router with all routes attached.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route("/sonarr", post(receive_sonarr))
        .with_state(Arc::new(state))
}

/// Bind the listening socket.
pub async fn bind(host: &str, port: u16) -> io::Result<TcpListener> {
    let listener = TcpListener::bind((host, port)).await?;
    if let Ok(addr) = listener.local_addr() {
        info!("tvherald listening on {}", addr);
    }
    Ok(listener)
}

/// Serve `app` until `stop` is cancelled.
pub async fn serve(listener: TcpListener, app: Router, stop: CancellationToken) -> io::Result<()> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();

    axum::serve(listener, app)
        .with_graceful_shutdown(stop.cancelled_owned())
        .await?;

    info!(addr = ?addr, "HTTP listener stopped");
    Ok(())
}

fn error_body(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "error": message.into() }))
}

async fn receive_sonarr(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<AcceptedResponse>), (StatusCode, Json<Value>)> {
    let trace = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(TraceContext::new)
        .unwrap_or_else(TraceContext::generate);

    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        state.stats.record_event_rejected();
        warn!(correlation_id = %trace.correlation_id, error = %e, "Malformed JSON body");
        (
            StatusCode::BAD_REQUEST,
            error_body(format!("invalid JSON: {}", e)),
        )
    })?;

    debug!(correlation_id = %trace.correlation_id, "Received webhook: {}", payload);

    let correlation_id = trace.correlation_id.clone();
    match state.ingestor.ingest_traced(&payload, trace) {
        Ok(enqueued) => Ok((
            StatusCode::ACCEPTED,
            Json(AcceptedResponse {
                status: "accepted".to_string(),
                enqueued,
                correlation_id,
            }),
        )),
        Err(IngestError::Validation(e)) => {
            Err((StatusCode::BAD_REQUEST, error_body(e.to_string())))
        }
        Err(e @ IngestError::QueueClosed) => {
            Err((StatusCode::SERVICE_UNAVAILABLE, error_body(e.to_string())))
        }
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    if state.ingestor.is_accepting() {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "stopping" })),
        )
    }
}

/// Get metrics endpoint - returns pipeline counters as JSON
async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime = state.stats.uptime_seconds();
    let snapshot = state.stats.snapshot();

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime,
        "uptime": format_uptime(uptime),
        "events": {
            "received": snapshot.events_received,
            "rejected": snapshot.events_rejected,
        },
        "tasks": {
            "enqueued": snapshot.tasks_enqueued,
            "enriched": snapshot.messages_enriched,
            "dropped": snapshot.tasks_dropped,
        },
        "deliveries": {
            "succeeded": snapshot.deliveries_succeeded,
            "failed": snapshot.deliveries_failed,
            "abandoned": snapshot.deliveries_abandoned,
        },
        "status": if state.ingestor.is_accepting() { "running" } else { "stopping" }
    }))
}
