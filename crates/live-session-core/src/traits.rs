//! Core traits for locking, dispatch and delivery.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::QuestionEvent;

/// Session identifier. Opaque, externally assigned.
pub type SessionId = String;

/// Identity of one live client connection.
pub type ConnectionId = Uuid;

/// Lock error.
///
/// Only used inside lock backends; the `SessionLock` contract turns these
/// into log entries and a `false` result.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock held by another holder")]
    Contended,
    #[error("Lock file was replaced while acquiring")]
    Replaced,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exclusive, per-session mutual exclusion.
///
/// Implementations must release the hold automatically when the holder
/// goes away (process exit, or dropping the lock object) so that a later
/// `try_acquire` by anyone succeeds without manual cleanup.
#[async_trait]
pub trait SessionLock: Send + Sync {
    /// Session this lock guards.
    fn session_id(&self) -> &str;

    /// Try to take exclusive ownership without waiting.
    ///
    /// Returns `false` on contention and on any backend failure.
    async fn try_acquire(&self) -> bool;

    /// Give up ownership. A no-op when not held.
    async fn release(&self);

    /// Whether this instance currently holds the lock.
    fn is_held(&self) -> bool;
}

/// Creates one lock per session id.
pub trait LockProvider: Send + Sync {
    /// Lock for the given session.
    fn lock_for(&self, session_id: &str) -> Arc<dyn SessionLock>;
}

/// Dispatch sink error.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Sink error: {0}")]
    Internal(String),
}

/// Receives every event a session master dispatches.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Hand one event over for delivery.
    async fn dispatch(&self, event: &QuestionEvent) -> Result<(), SinkError>;
}

/// Connection delivery error.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,
    #[error("Send timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// A live client endpoint.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Unique id; registry membership is keyed on it.
    fn id(&self) -> ConnectionId;

    /// Deliver one serialized message.
    async fn send(&self, text: &str) -> Result<(), ConnectionError>;
}
