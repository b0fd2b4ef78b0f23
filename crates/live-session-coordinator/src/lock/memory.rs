//! In-memory session locks.
//!
//! Useful for tests and single-process deployments that run several
//! candidates side by side. Dropping a lock releases it, the same way
//! process exit releases a file lock.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use live_session_core::{LockProvider, SessionId, SessionLock};
use uuid::Uuid;

/// Shared table of current holders, one per session id.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockTable {
    holders: Arc<Mutex<HashMap<SessionId, Uuid>>>,
}

impl MemoryLockTable {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new lock instance for `session_id` on this table.
    #[must_use]
    pub fn lock(&self, session_id: impl Into<SessionId>) -> MemorySessionLock {
        MemorySessionLock {
            session_id: session_id.into(),
            token: Uuid::new_v4(),
            table: self.clone(),
            held: AtomicBool::new(false),
        }
    }

    /// Whether anyone holds the lock for `session_id`.
    #[must_use]
    pub fn is_locked(&self, session_id: &str) -> bool {
        self.holders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
    }
}

impl LockProvider for MemoryLockTable {
    fn lock_for(&self, session_id: &str) -> Arc<dyn SessionLock> {
        Arc::new(self.lock(session_id))
    }
}

/// One holder's view of a session entry in a `MemoryLockTable`.
#[derive(Debug)]
pub struct MemorySessionLock {
    session_id: SessionId,
    token: Uuid,
    table: MemoryLockTable,
    held: AtomicBool,
}

impl MemorySessionLock {
    fn release_entry(&self) -> bool {
        if !self.held.swap(false, Ordering::AcqRel) {
            return false;
        }
        let mut holders = self
            .table
            .holders
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if holders.get(&self.session_id) == Some(&self.token) {
            holders.remove(&self.session_id);
        }
        true
    }
}

#[async_trait]
impl SessionLock for MemorySessionLock {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn try_acquire(&self) -> bool {
        let mut holders = self
            .table
            .holders
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let holder = *holders
            .entry(self.session_id.clone())
            .or_insert(self.token);
        drop(holders);

        let acquired = holder == self.token;
        if acquired {
            self.held.store(true, Ordering::Release);
            tracing::info!(session_id = %self.session_id, "Acquired session lock");
        } else {
            tracing::debug!(session_id = %self.session_id, "Session lock held by another instance");
        }
        acquired
    }

    async fn release(&self) {
        if self.release_entry() {
            tracing::info!(session_id = %self.session_id, "Released session lock");
        }
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl Drop for MemorySessionLock {
    fn drop(&mut self) {
        self.release_entry();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handover() {
        let table = MemoryLockTable::new();
        let a = table.lock("s1");
        let b = table.lock("s1");

        assert!(a.try_acquire().await);
        assert!(!b.try_acquire().await);
        a.release().await;
        assert!(b.try_acquire().await);
        assert!(table.is_locked("s1"));
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let table = MemoryLockTable::new();
        let a = table.lock("s1");
        assert!(a.try_acquire().await);
        drop(a);

        assert!(!table.is_locked("s1"));
        assert!(table.lock("s1").try_acquire().await);
    }

    #[tokio::test]
    async fn test_release_without_hold_keeps_other_holder() {
        let table = MemoryLockTable::new();
        let a = table.lock("s1");
        let b = table.lock("s1");

        assert!(a.try_acquire().await);
        b.release().await;
        drop(b);
        assert!(table.is_locked("s1"));
        assert!(a.is_held());
    }
}
