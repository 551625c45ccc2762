//! Health and metrics HTTP surface
//!
//! - `GET /health`: per-instance status as JSON; 200 when at least one
//!   instance is connected, 503 otherwise
//! - `GET /ready`: same readiness rule, small body for probes
//! - `GET /metrics`: internal counters in Prometheus text format

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::metrics::stats;

/// Anything that can report per-instance connection status
pub trait StatusSource: Send + Sync {
    fn status(&self) -> HashMap<String, ConnectionStatus>;
}

impl StatusSource for ConnectionManager {
    fn status(&self) -> HashMap<String, ConnectionStatus> {
        ConnectionManager::status(self)
    }
}

#[derive(Clone)]
pub struct HealthState {
    source: Arc<dyn StatusSource>,
    started_at: DateTime<Utc>,
}

impl HealthState {
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self {
            source,
            started_at: Utc::now(),
        }
    }
}

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub connected: usize,
    pub total: usize,
    pub uptime_secs: i64,
    pub instances: HashMap<String, ConnectionStatus>,
}

#[derive(Debug, Serialize)]
struct Readiness {
    ready: bool,
    connected: usize,
    total: usize,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

fn readiness_code(connected: usize) -> StatusCode {
    if connected > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let instances = state.source.status();
    let connected = instances.values().filter(|s| s.connected).count();
    let report = HealthReport {
        status: if connected > 0 { "healthy" } else { "unhealthy" },
        connected,
        total: instances.len(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        instances,
    };
    (readiness_code(connected), Json(report))
}

async fn ready(State(state): State<HealthState>) -> impl IntoResponse {
    let instances = state.source.status();
    let connected = instances.values().filter(|s| s.connected).count();
    let body = Readiness {
        ready: connected > 0,
        connected,
        total: instances.len(),
    };
    (readiness_code(connected), Json(body))
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        stats().render_prometheus(),
    )
}

/// Serve `router` on `listener` until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    state: HealthState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Health endpoint listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
