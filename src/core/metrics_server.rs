//! HTTP server exposing Prometheus metrics and a liveness check.
//!
//! Runs on its own port (METRICS_PORT, default 9090). `/health` also reports
//! how many tenant bots the supervisor currently holds in each state.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::supervisor::Supervisor;

#[derive(Clone)]
struct AppState {
    start_time: Instant,
    supervisor: Supervisor,
}

/// Start the metrics HTTP server and serve until `shutdown` fires.
pub async fn start_metrics_server(
    port: u16,
    supervisor: Supervisor,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let state = AppState {
        start_time: Instant::now(),
        supervisor,
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(Arc::new(state));

    log::info!("Starting metrics server on http://{}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("Content-Type", encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            log::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode metrics: {}", e)).into_response()
        }
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed();
    let snapshot = state.supervisor.snapshot().await;
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for (_, status) in &snapshot {
        *counts.entry(status.as_ref().to_string()).or_default() += 1;
    }

    let health_status = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": uptime.as_secs(),
        "uptime_human": format_duration(uptime),
        "service": "storehub",
        "version": env!("CARGO_PKG_VERSION"),
        "tenants": counts,
    });

    (StatusCode::OK, axum::Json(health_status))
}

/// Format duration as human-readable string
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
