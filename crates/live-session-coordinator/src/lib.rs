//! Session mastership for live sessions.
//!
//! Provides:
//! - `SessionMaster` - Candidate / Master state machine for one session
//! - `DispatchLoop` - Periodic event production while master
//! - `SessionManager` - Independent masters for many sessions
//! - Lock backends (file, memory)

pub mod dispatch;
pub mod lock;
pub mod manager;
pub mod master;

pub use dispatch::DispatchLoop;
pub use manager::{ManagerError, SessionManager};
pub use master::SessionMaster;
