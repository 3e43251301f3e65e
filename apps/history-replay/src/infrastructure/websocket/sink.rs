//! `EventSink` that writes straight to a websocket.
//!
//! Events go to the socket without an intermediate buffer, so a delivery
//! is complete once the frame is written and a seek never races a backlog
//! of already-popped events.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use tokio::sync::Mutex;

use super::messages::ReplayMessage;
use crate::application::ports::{EventSink, SinkError};
use crate::domain::replay::ReplayEvent;

/// Write half of a consumer connection.
pub struct WebSocketSink {
    writer: Mutex<SplitSink<WebSocket, Message>>,
    scalar_data_url: String,
}

impl WebSocketSink {
    /// Wrap the write half of a socket.
    #[must_use]
    pub fn new(writer: SplitSink<WebSocket, Message>, scalar_data_url: impl Into<String>) -> Self {
        Self {
            writer: Mutex::new(writer),
            scalar_data_url: scalar_data_url.into(),
        }
    }

    /// Send a close frame. Errors are ignored; the peer may already be gone.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "Close frame not sent");
        }
    }
}

#[async_trait]
impl EventSink for WebSocketSink {
    async fn deliver(&self, event: ReplayEvent) -> Result<(), SinkError> {
        let message = ReplayMessage::from_event(&event, &self.scalar_data_url);
        let json =
            serde_json::to_string(&message).map_err(|e| SinkError::Rejected(e.to_string()))?;

        self.writer
            .lock()
            .await
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| SinkError::Closed)
    }
}
