//! Websocket Replay Server
//!
//! Every connection to `GET /` gets its own replay session. Delivered events
//! are written as JSON text frames; inbound text frames are seek commands.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::DateTime;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::ServerError;
use super::sink::WebSocketSink;
use crate::application::ports::{EventSink, HistoryPort};
use crate::application::services::{
    ReplaySession, SeekCommand, SeekError, SessionConfig, SessionHandle,
};
use crate::domain::sensor::SensorCatalog;
use crate::infrastructure::config::ReplaySettings;
use crate::infrastructure::metrics::{self, SeekOutcome};

// =============================================================================
// Server
// =============================================================================

/// Serves replay sessions over websockets.
pub struct ReplayServer {
    catalog: Arc<SensorCatalog>,
    history: Arc<dyn HistoryPort>,
    settings: ReplaySettings,
    scalar_data_url: String,
    shutdown: CancellationToken,
    active_sessions: AtomicUsize,
}

impl ReplayServer {
    /// Create a server. Cancelling `shutdown` ends every session.
    #[must_use]
    pub fn new(
        catalog: Arc<SensorCatalog>,
        history: Arc<dyn HistoryPort>,
        settings: ReplaySettings,
        scalar_data_url: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            history,
            settings,
            scalar_data_url: scalar_data_url.into(),
            shutdown,
            active_sessions: AtomicUsize::new(0),
        }
    }

    /// Number of connected consumers.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Sensors replayed to every consumer.
    #[must_use]
    pub fn catalog(&self) -> &SensorCatalog {
        &self.catalog
    }

    /// Axum router with the replay route.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/", get(replay_handler))
            .with_state(self)
    }

    /// Bind `port` on all interfaces and serve until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if binding fails or the server stops with an
    /// error.
    pub async fn run(self: Arc<Self>, port: u16) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(port, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ServerFailed`] if the server stops with an
    /// error.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr().ok();
        tracing::info!(addr = ?local_addr, "Replay server listening");

        let shutdown = self.shutdown.clone();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Replay server stopped");
        Ok(())
    }

    fn session_config(&self, query: &ReplayQuery) -> Result<SessionConfig, String> {
        let start = query
            .start
            .map(|epoch| {
                DateTime::from_timestamp(epoch, 0)
                    .ok_or_else(|| format!("start {epoch} is out of range"))
            })
            .transpose()?;

        let config = self.settings.session_config(start, query.scale);
        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }

    async fn serve_connection(self: Arc<Self>, socket: WebSocket, config: SessionConfig) {
        let (writer, mut reader) = socket.split();
        let sink = Arc::new(WebSocketSink::new(writer, self.scalar_data_url.clone()));

        let session = match ReplaySession::spawn(
            config,
            Arc::clone(&self.catalog),
            Arc::clone(&self.history),
            Arc::clone(&sink) as Arc<dyn EventSink>,
            self.shutdown.child_token(),
        ) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Replay session rejected");
                sink.close().await;
                return;
            }
        };

        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        tracing::info!(session_id = %session.id(), "Consumer connected");

        loop {
            tokio::select! {
                () = session.closed() => break,
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => handle_seek_frame(&session, text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Websocket read failed");
                        break;
                    }
                },
            }
        }

        let session_id = session.id();
        session.shutdown().await;
        sink.close().await;
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
        tracing::info!(%session_id, "Consumer disconnected");
    }
}

async fn handle_seek_frame(session: &SessionHandle, text: &str) {
    let command = match SeekCommand::parse(text, session.default_scale()) {
        Ok(command) => command,
        Err(e) => {
            let outcome = match &e {
                SeekError::Malformed(_) => SeekOutcome::Malformed,
                _ => SeekOutcome::Rejected,
            };
            metrics::record_seek(outcome);
            tracing::warn!(error = %e, "Ignoring seek request");
            return;
        }
    };

    if let Err(e) = session.seek(command).await {
        tracing::warn!(error = %e, "Seek not delivered");
    }
}

// =============================================================================
// HTTP Handler
// =============================================================================

/// Optional per-connection parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ReplayQuery {
    /// Replay start as a Unix epoch.
    pub start: Option<i64>,
    /// Playback speed.
    pub scale: Option<f64>,
}

async fn replay_handler(
    State(server): State<Arc<ReplayServer>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<ReplayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let config = match server.session_config(&query) {
        Ok(config) => config,
        Err(reason) => {
            tracing::warn!(%peer, %reason, "Rejecting replay request");
            return (StatusCode::BAD_REQUEST, reason).into_response();
        }
    };

    let span = tracing::info_span!("replay_connection", %peer);
    ws.on_upgrade(move |socket| server.serve_connection(socket, config).instrument(span))
}
