//! Session manager running one independent master per session.

use std::{collections::HashMap, sync::Arc};

use live_session_core::{EventSink, LockProvider, MasterConfig, MasterState, SessionId};
use tokio::{sync::RwLock, task::JoinHandle};

use crate::SessionMaster;

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),
}

/// Active session state.
struct ActiveSession {
    master: Arc<SessionMaster>,
    task: JoinHandle<()>,
}

/// Runs a `SessionMaster` per session id, each with its own lock.
///
/// All masters share one event sink; events carry their session id.
pub struct SessionManager {
    locks: Arc<dyn LockProvider>,
    sink: Arc<dyn EventSink>,
    config: MasterConfig,
    active_sessions: RwLock<HashMap<SessionId, ActiveSession>>,
}

impl SessionManager {
    /// Create a new session manager.
    #[must_use]
    pub fn new(locks: Arc<dyn LockProvider>, sink: Arc<dyn EventSink>, config: MasterConfig) -> Self {
        Self {
            locks,
            sink,
            config,
            active_sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start competing for a session. Returns the existing master if the
    /// session is already running.
    pub async fn start(&self, session_id: &str) -> Arc<SessionMaster> {
        let mut sessions = self.active_sessions.write().await;
        if let Some(active) = sessions.get(session_id) {
            if !active.task.is_finished() {
                return Arc::clone(&active.master);
            }
        }

        let master = Arc::new(SessionMaster::new(
            self.locks.lock_for(session_id),
            Arc::clone(&self.sink),
            self.config.clone(),
        ));
        let runner = Arc::clone(&master);
        let task = tokio::spawn(async move { runner.run().await });

        sessions.insert(
            session_id.to_string(),
            ActiveSession {
                master: Arc::clone(&master),
                task,
            },
        );
        tracing::info!(session_id, "Session started");
        master
    }

    /// Shut one session's master down and wait for it to stop.
    ///
    /// # Errors
    /// Returns error if the session is not running.
    pub async fn stop(&self, session_id: &str) -> Result<(), ManagerError> {
        let active = self
            .active_sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| ManagerError::NotFound(session_id.to_string()))?;

        Self::shut_down(session_id, active).await;
        Ok(())
    }

    /// Shut every master down.
    pub async fn shutdown_all(&self) {
        let drained: Vec<_> = self.active_sessions.write().await.drain().collect();
        for (session_id, active) in drained {
            Self::shut_down(&session_id, active).await;
        }
    }

    /// Master for a session, if running.
    pub async fn master(&self, session_id: &str) -> Option<Arc<SessionMaster>> {
        self.active_sessions
            .read()
            .await
            .get(session_id)
            .map(|s| Arc::clone(&s.master))
    }

    /// State of a session's master, if running.
    pub async fn state(&self, session_id: &str) -> Option<MasterState> {
        self.master(session_id).await.map(|m| m.state())
    }

    /// Whether this process currently masters the session.
    pub async fn is_master(&self, session_id: &str) -> bool {
        self.state(session_id).await == Some(MasterState::Master)
    }

    /// Ids of all managed sessions, sorted.
    pub async fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.active_sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn shut_down(session_id: &str, active: ActiveSession) {
        active.master.shutdown().await;
        if let Err(e) = active.task.await {
            tracing::error!(session_id, "Session master task failed: {e}");
        }
        tracing::info!(session_id, "Session stopped");
    }
}
