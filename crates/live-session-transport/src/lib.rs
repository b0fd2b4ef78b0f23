//! Transport layer for live session clients.
//!
//! Provides:
//! - Wire protocol (JSON)
//! - Connection registry keyed by session id
//! - Fan-out broadcaster (an `EventSink`)
//! - WebSocket transport (feature: websocket)

pub mod broadcast;
pub mod protocol;
pub mod registry;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use protocol::{ClientAnswer, ServerMessage};
pub use registry::ConnectionRegistry;
