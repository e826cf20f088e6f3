use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Value, json};
use smartorder_core::MessageQueue;
use tokio::sync::watch;
use tracing::{error, info};

use crate::metrics::QueueMetrics;

const SERVICE_NAME: &str = "smartorder-worker";
const PING_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Clone)]
pub struct HealthState {
    pub queue: Arc<dyn MessageQueue>,
    pub metrics: Arc<QueueMetrics>,
    pub shutdown: watch::Receiver<bool>,
    pub workers: usize,
}

impl HealthState {
    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serves the health endpoints until shutdown is signalled.
pub async fn serve(addr: &str, state: HealthState) -> Result<()> {
    let addr: SocketAddr = addr.parse().with_context(|| format!("invalid HEALTH_ADDR '{addr}'"))?;
    let mut shutdown = state.shutdown.clone();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("health server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    Ok(())
}

async fn liveness(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": SERVICE_NAME,
            "shutdown": state.shutting_down(),
            "timestamp": Utc::now(),
        })),
    )
}

async fn readiness(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    let redis = match tokio::time::timeout(PING_TIMEOUT, state.queue.ping()).await {
        Ok(Ok(())) => "ok",
        Ok(Err(err)) => {
            error!(error = %err, "queue health check failed");
            "error"
        }
        Err(_) => {
            error!("queue health check timed out");
            "error"
        }
    };
    let shutdown = state.shutting_down();

    if redis != "ok" || shutdown {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "service": SERVICE_NAME,
                "redis": redis,
                "shutdown": shutdown,
            })),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "ready",
            "service": SERVICE_NAME,
            "redis": redis,
            "workers": state.workers,
            "metrics": state.metrics.snapshot().await,
            "timestamp": Utc::now(),
        })),
    )
}

async fn metrics(State(state): State<HealthState>) -> Json<Value> {
    Json(json!(state.metrics.snapshot().await))
}
