//! Core abstractions for single-leader live session coordination.
//!
//! This crate provides the shared vocabulary:
//! - `QuestionEvent` - The payload a session master dispatches each tick
//! - `MasterState` - Candidate / Master / ShuttingDown
//! - `MasterConfig` - Dispatch, retry and poll intervals
//! - Lock, sink and connection traits

pub mod config;
pub mod event;
pub mod traits;

pub use config::{ConfigError, MasterConfig};
pub use event::{MasterState, QuestionEvent};
pub use traits::{
    Connection, ConnectionError, ConnectionId, EventSink, LockError, LockProvider, SessionId,
    SessionLock, SinkError,
};
