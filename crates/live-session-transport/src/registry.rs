//! Live connections per session.

use std::{collections::HashMap, sync::Arc};

use live_session_core::{Connection, ConnectionId, SessionId};
use tokio::sync::Mutex;

type ConnectionSet = HashMap<ConnectionId, Arc<dyn Connection>>;

/// Maps session ids to their currently connected clients.
///
/// One mutex covers every session. It is only held for map bookkeeping,
/// never across I/O. A session has an entry exactly while it has at least
/// one connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: Mutex<HashMap<SessionId, ConnectionSet>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a session. Returns the session's client count.
    pub async fn register(&self, session_id: &str, connection: Arc<dyn Connection>) -> usize {
        let mut sessions = self.sessions.lock().await;
        let connections = sessions.entry(session_id.to_string()).or_default();
        connections.insert(connection.id(), connection);
        let total = connections.len();
        drop(sessions);

        tracing::info!(session_id, total, "Client connected");
        total
    }

    /// Remove a connection. Drops the session entry once it is empty.
    ///
    /// Returns whether the connection was registered.
    pub async fn unregister(&self, session_id: &str, connection_id: ConnectionId) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(connections) = sessions.get_mut(session_id) else {
            return false;
        };
        let removed = connections.remove(&connection_id).is_some();
        let total = connections.len();
        if connections.is_empty() {
            sessions.remove(session_id);
        }
        drop(sessions);

        if removed {
            tracing::info!(session_id, %connection_id, total, "Client disconnected");
        }
        removed
    }

    /// Copy of a session's connections, safe to use after the lock is gone.
    pub async fn snapshot(&self, session_id: &str) -> Vec<Arc<dyn Connection>> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Connection ids of a session, or `None` if it has no entry.
    pub async fn lookup(&self, session_id: &str) -> Option<Vec<ConnectionId>> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|c| c.keys().copied().collect())
    }

    /// Number of connected clients for a session.
    pub async fn client_count(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map_or(0, HashMap::len)
    }

    /// Sessions with at least one client, sorted.
    pub async fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use live_session_core::ConnectionError;
    use uuid::Uuid;

    use super::*;

    /// In-memory connection recording what it was sent.
    pub(crate) struct MockConnection {
        id: ConnectionId,
        fail: bool,
        received: StdMutex<Vec<String>>,
    }

    impl MockConnection {
        pub(crate) fn healthy() -> Arc<Self> {
            Self::build(false)
        }

        pub(crate) fn broken() -> Arc<Self> {
            Self::build(true)
        }

        fn build(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                id: Uuid::new_v4(),
                fail,
                received: StdMutex::new(Vec::new()),
            })
        }

        pub(crate) fn received(&self) -> Vec<String> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connection for MockConnection {
        fn id(&self) -> ConnectionId {
            self.id
        }

        async fn send(&self, text: &str) -> Result<(), ConnectionError> {
            if self.fail {
                return Err(ConnectionError::Transport("socket reset".to_string()));
            }
            self.received.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_is_unique() {
        let registry = ConnectionRegistry::new();
        let conn = MockConnection::healthy();

        assert_eq!(registry.register("s1", conn.clone()).await, 1);
        assert_eq!(registry.register("s1", conn.clone()).await, 1);
        assert_eq!(registry.register("s1", MockConnection::healthy()).await, 2);
        assert_eq!(registry.client_count("s1").await, 2);
    }

    #[tokio::test]
    async fn test_last_unregister_removes_entry() {
        let registry = ConnectionRegistry::new();
        let a = MockConnection::healthy();
        let b = MockConnection::healthy();
        registry.register("s1", a.clone()).await;
        registry.register("s1", b.clone()).await;

        assert!(registry.unregister("s1", a.id()).await);
        assert_eq!(registry.lookup("s1").await, Some(vec![b.id()]));

        assert!(registry.unregister("s1", b.id()).await);
        assert_eq!(registry.lookup("s1").await, None);
        assert!(registry.session_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_unknown() {
        let registry = ConnectionRegistry::new();
        let a = MockConnection::healthy();
        registry.register("s1", a.clone()).await;

        assert!(!registry.unregister("s2", a.id()).await);
        assert!(!registry.unregister("s1", Uuid::new_v4()).await);
        assert_eq!(registry.client_count("s1").await, 1);
        assert_eq!(registry.lookup("s2").await, None);
    }

    #[tokio::test]
    async fn test_sessions_are_separate() {
        let registry = ConnectionRegistry::new();
        registry.register("s1", MockConnection::healthy()).await;
        registry.register("s2", MockConnection::healthy()).await;
        registry.register("s2", MockConnection::healthy()).await;

        assert_eq!(registry.snapshot("s1").await.len(), 1);
        assert_eq!(registry.snapshot("s2").await.len(), 2);
        assert!(registry.snapshot("s3").await.is_empty());
        assert_eq!(registry.session_ids().await, vec!["s1", "s2"]);
    }
}
