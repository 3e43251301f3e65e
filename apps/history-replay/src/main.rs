//! History Replay Binary
//!
//! Discovers the sensors of a Chain site and serves their recorded readings
//! to websocket consumers.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin history-replay
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//! - `CHAIN_API_URL`: Chain API base URL (default: <http://chain-api.media.mit.edu>)
//! - `CHAIN_SITE_URL`: Site whose sensors are replayed (default: `{CHAIN_API_URL}/sites/7`)
//! - `HISTORY_REPLAY_PORT`: Websocket port (default: 8765)
//! - `HISTORY_REPLAY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `REPLAY_DEFAULT_START`: Default start as a Unix epoch (default: 1401926400)
//! - `REPLAY_SCALE`: Default playback speed (default: 1)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use history_replay::infrastructure::telemetry;
use history_replay::{
    ChainClient, ChainHistory, HealthServer, HealthServerState, ReplayServer, ServiceConfig,
    discover_catalog, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting History Replay");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics()?;

    let config = ServiceConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Discover the sensors to replay
    let client = ChainClient::new(config.chain.request_timeout)?;
    let catalog = discover_catalog(&client, &config.chain.site_url, config.chain.max_pages).await?;
    tracing::info!(
        site = %config.chain.site_url,
        sensors = catalog.len(),
        "Sensor catalog discovered"
    );
    if catalog.is_empty() {
        tracing::warn!("Site has no sensors, consumers will receive nothing");
    }

    let history = Arc::new(ChainHistory::new(
        client,
        config.chain.api_url.clone(),
        config.chain.max_pages,
    ));

    // Initialize replay server
    let replay_server = Arc::new(ReplayServer::new(
        Arc::new(catalog),
        history,
        config.replay.clone(),
        config.chain.scalar_data_url(),
        shutdown_token.clone(),
    ));

    // Initialize health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&replay_server),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    // Spawn health server
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn replay server
    let ws_port = config.server.ws_port;
    let replay_task = tokio::spawn(async move {
        if let Err(e) = replay_server.run(ws_port).await {
            tracing::error!(error = %e, "Replay server error");
        }
    });

    tracing::info!("History replay ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, replay_task).await.is_err() {
        tracing::warn!("Replay server did not stop within the shutdown timeout");
    }

    tracing::info!("History replay stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        api_url = %config.chain.api_url,
        site_url = %config.chain.site_url,
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        default_start = %config.replay.default_start,
        scale = config.replay.scale,
        look_ahead_secs = config.replay.look_ahead.num_seconds(),
        chunk_length_secs = config.replay.chunk_length.num_seconds(),
        "Replay defaults"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
