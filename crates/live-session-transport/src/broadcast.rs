//! Fan-out of one message to every client of a session.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use live_session_core::{ConnectionError, EventSink, QuestionEvent, SinkError};

use crate::{ConnectionRegistry, ServerMessage};

/// Default per-connection delivery deadline.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections that accepted the message.
    pub delivered: usize,
    /// Connections that failed and were unregistered.
    pub pruned: usize,
}

/// Best-effort fan-out over a `ConnectionRegistry`.
///
/// Every connection gets its own attempt. A failed or timed-out delivery is
/// logged and the connection is unregistered before `broadcast` returns.
/// Nothing is retried and nothing is reported as an error.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl Broadcaster {
    /// Create a broadcaster over a shared registry.
    #[must_use]
    pub const fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Override the per-connection delivery deadline.
    #[must_use]
    pub const fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Registry this broadcaster delivers to.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send a message to every client of `session_id`.
    pub async fn broadcast(&self, session_id: &str, message: &ServerMessage) -> BroadcastReport {
        match serde_json::to_string(message) {
            Ok(text) => self.broadcast_text(session_id, &text).await,
            Err(e) => {
                tracing::error!(session_id, "Failed to serialize message: {e}");
                BroadcastReport::default()
            }
        }
    }

    /// Send pre-serialized text to every client of `session_id`.
    pub async fn broadcast_text(&self, session_id: &str, text: &str) -> BroadcastReport {
        let connections = self.registry.snapshot(session_id).await;
        if connections.is_empty() {
            tracing::debug!(session_id, "No clients to broadcast to");
            return BroadcastReport::default();
        }

        let attempts = connections.iter().map(|connection| async move {
            let result = match tokio::time::timeout(self.send_timeout, connection.send(text)).await {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::Timeout(self.send_timeout)),
            };
            (connection.id(), result)
        });

        let mut report = BroadcastReport::default();
        for (connection_id, result) in join_all(attempts).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(session_id, %connection_id, "Failed to send to a client: {e}");
                    self.registry.unregister(session_id, connection_id).await;
                    report.pruned += 1;
                }
            }
        }
        report
    }
}

#[async_trait]
impl EventSink for Broadcaster {
    async fn dispatch(&self, event: &QuestionEvent) -> Result<(), SinkError> {
        let text = serde_json::to_string(&ServerMessage::from(event))?;
        let report = self.broadcast_text(&event.session_id, &text).await;
        tracing::debug!(
            session_id = %event.session_id,
            sequence = event.sequence,
            delivered = report.delivered,
            pruned = report.pruned,
            "Broadcast complete"
        );
        Ok(())
    }
}
