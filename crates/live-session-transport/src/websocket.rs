//! WebSocket transport for live session clients.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use live_session_core::{Connection, ConnectionError, ConnectionId};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{ConnectionRegistry, ServerMessage};

/// Outbound frames buffered per client before sends start to wait.
const OUTBOUND_CAPACITY: usize = 64;

/// Registry handle for a live WebSocket client.
///
/// Sends go through a bounded queue drained by the socket writer task.
/// Once the writer stops, every send fails with `Closed`.
pub struct WsConnection {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
}

impl WsConnection {
    /// Create a connection handle and the receiving end for its writer.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let connection = Self {
            id: Uuid::new_v4(),
            tx,
        };
        (connection, rx)
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, text: &str) -> Result<(), ConnectionError> {
        self.tx
            .send(text.to_string())
            .await
            .map_err(|_| ConnectionError::Closed)
    }
}

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    /// Shared connection registry.
    pub registry: Arc<ConnectionRegistry>,
}

impl WsState {
    /// Create new WebSocket state.
    #[must_use]
    pub const fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

/// WebSocket upgrade handler for `/ws/{session_id}`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state.registry))
}

async fn handle_socket(socket: WebSocket, session_id: String, registry: Arc<ConnectionRegistry>) {
    let (mut sender, mut receiver) = socket.split();
    let (connection, mut rx) = WsConnection::channel();
    let connection = Arc::new(connection);
    let connection_id = connection.id();

    // Spawn task to forward queued frames to the socket
    let send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    registry
        .register(&session_id, Arc::clone(&connection) as Arc<dyn Connection>)
        .await;

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(%session_id, %connection_id, "WebSocket error: {e}");
                break;
            }
        };

        tracing::info!(%session_id, %connection_id, "Received from client: {text}");
        let reply = ServerMessage::reply_to(&text);
        let json = match serde_json::to_string(&reply) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize message: {e}");
                continue;
            }
        };
        if connection.send(&json).await.is_err() {
            break;
        }
    }

    registry.unregister(&session_id, connection_id).await;
    send_task.abort();
}

/// Create WebSocket router serving `/ws/{session_id}`.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(registry));
/// ```
#[must_use]
pub fn create_ws_router(registry: Arc<ConnectionRegistry>) -> axum::Router {
    axum::Router::new()
        .route("/ws/{session_id}", axum::routing::get(ws_handler))
        .with_state(WsState::new(registry))
}
