//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, session reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks the sensor catalog)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::websocket::ReplayServer;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy" or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Replay session status.
    pub sessions: SessionStatus,
    /// Sensor catalog status.
    pub catalog: CatalogStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Sensors available for replay.
    Healthy,
    /// Nothing to replay.
    Unhealthy,
}

/// Replay session status.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Connected consumers.
    pub active: usize,
}

/// Sensor catalog status.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogStatus {
    /// Sensors replayed.
    pub sensors: usize,
    /// Sensor count per metric.
    pub metrics: Vec<MetricCount>,
}

/// Number of sensors measuring one metric.
#[derive(Debug, Clone, Serialize)]
pub struct MetricCount {
    /// Metric name.
    pub metric: String,
    /// Sensor count.
    pub sensors: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    replay_server: Arc<ReplayServer>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, replay_server: Arc<ReplayServer>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            replay_server,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Router with the health and metrics routes.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    // Ready once there is something to replay
    if state.replay_server.catalog().is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let catalog = state.replay_server.catalog();

    HealthResponse {
        status: determine_health_status(catalog.len()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        sessions: SessionStatus {
            active: state.replay_server.active_sessions(),
        },
        catalog: CatalogStatus {
            sensors: catalog.len(),
            metrics: catalog
                .metric_counts()
                .into_iter()
                .map(|(metric, sensors)| MetricCount { metric, sensors })
                .collect(),
        },
    }
}

const fn determine_health_status(sensors: usize) -> HealthStatus {
    if sensors > 0 {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::sensor::{SensorCatalog, SensorId, SensorRef};
    use crate::infrastructure::config::ReplaySettings;
    use crate::infrastructure::history::InMemoryHistory;

    fn state(catalog: SensorCatalog) -> Arc<HealthServerState> {
        let server = Arc::new(ReplayServer::new(
            Arc::new(catalog),
            Arc::new(InMemoryHistory::new()),
            ReplaySettings::default(),
            "http://api/scalar_data/",
            CancellationToken::new(),
        ));
        Arc::new(HealthServerState::new("0.1.0".to_string(), server))
    }

    fn one_sensor() -> SensorCatalog {
        [SensorRef::new(SensorId::new("http://api/sensors/1"), "temperature")]
            .into_iter()
            .collect()
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_follows_catalog_size() {
        assert_eq!(determine_health_status(0), HealthStatus::Unhealthy);
        assert_eq!(determine_health_status(3), HealthStatus::Healthy);
    }

    #[test]
    fn health_response_reports_catalog() {
        let response = build_health_response(&state(one_sensor()));
        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.sessions.active, 0);
        assert_eq!(response.catalog.sensors, 1);
        assert_eq!(response.catalog.metrics[0].metric, "temperature");
    }

    #[tokio::test]
    async fn readiness_requires_sensors() {
        let empty = router(state(SensorCatalog::new()))
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(empty.status(), StatusCode::SERVICE_UNAVAILABLE);

        let ready = router(state(one_sensor()))
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        let response = router(state(SensorCatalog::new()))
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
