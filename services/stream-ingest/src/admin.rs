//! Health and metrics listener
//!
//! Optional; runs only when `[admin].listen_addr` is set.
//!
//! Endpoints:
//! - GET /health   JSON status, session readiness and pipeline counters
//! - GET /metrics  Prometheus text exposition

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use falcon_stream::StreamSession;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::pipeline::PipelineStats;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    session: Arc<StreamSession>,
    stats: Arc<PipelineStats>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

impl AdminState {
    pub fn new(
        session: Arc<StreamSession>,
        stats: Arc<PipelineStats>,
        prometheus: PrometheusHandle,
    ) -> Self {
        Self {
            session,
            stats,
            prometheus,
            started_at: Instant::now(),
        }
    }
}

/// Build the admin router behind a concurrency limit.
pub fn build_admin_router(state: AdminState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Serve the admin router until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "admin listener started");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

/// GET /health: 200 once the stream session is ready, 503 before.
async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let ready = state.session.is_ready();
    let phase = state.session.phase().await;
    let stats = state.stats.snapshot();

    let (status_code, status) = if ready {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    };
    let body = serde_json::json!({
        "status": status,
        "session": phase.label(),
        "app_id": state.session.config().app_id,
        "checkpoint": stats.checkpoint,
        "events_received": stats.received,
        "events_handled": stats.handled,
        "handler_failures": stats.failed,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /metrics: Prometheus text exposition format.
async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
