//! Session master state machine.
//!
//! ```text
//!   Candidate --try_acquire ok--> Master --loop exits--> release --> Candidate
//!       ^  |                                                          (retry now)
//!       |  +--try_acquire fails--> wait retry_interval --+
//!       +--------------------------------------------------+
//!
//!   any state --shutdown--> ShuttingDown (terminal)
//! ```

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::FutureExt;
use live_session_core::{EventSink, MasterConfig, MasterState, SessionId, SessionLock, SinkError};
use tokio::sync::watch;

use crate::dispatch::{DispatchLoop, wait_while_running};

/// How one acquisition attempt ended.
enum Tenure {
    /// Lock held elsewhere (or unavailable).
    NotAcquired,
    /// Held the lock; the dispatch loop exited cleanly.
    Completed,
}

/// Drives one session: competes for its lock and dispatches while holding it.
pub struct SessionMaster {
    session_id: SessionId,
    config: MasterConfig,
    lock: Arc<dyn SessionLock>,
    dispatch: DispatchLoop,
    running: Arc<AtomicBool>,
    state: watch::Sender<MasterState>,
}

impl SessionMaster {
    /// Create a master for the lock's session.
    #[must_use]
    pub fn new(lock: Arc<dyn SessionLock>, sink: Arc<dyn EventSink>, config: MasterConfig) -> Self {
        let session_id = lock.session_id().to_string();
        let running = Arc::new(AtomicBool::new(true));
        let dispatch = DispatchLoop::new(
            session_id.clone(),
            config.clone(),
            sink,
            Arc::clone(&running),
        );
        let (state, _) = watch::channel(MasterState::Candidate);

        Self {
            session_id,
            config,
            lock,
            dispatch,
            running,
            state,
        }
    }

    /// Session this master competes for.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> MasterState {
        *self.state.borrow()
    }

    /// Whether this instance is currently dispatching.
    #[must_use]
    pub fn is_master(&self) -> bool {
        self.state() == MasterState::Master
    }

    /// Subscribe to state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MasterState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` is called.
    ///
    /// Never fails: lock errors, sink errors and panics inside the dispatch
    /// path are logged and followed by the retry wait.
    pub async fn run(&self) {
        tracing::info!(session_id = %self.session_id, "Session master starting");

        while self.is_running() {
            let attempt = AssertUnwindSafe(self.attempt_mastership())
                .catch_unwind()
                .await;

            let retry_now = match attempt {
                Ok(Ok(Tenure::Completed)) => true,
                Ok(Ok(Tenure::NotAcquired)) => {
                    tracing::debug!(
                        session_id = %self.session_id,
                        "Not master, retrying in {:?}",
                        self.config.retry_interval
                    );
                    false
                }
                Ok(Err(e)) => {
                    tracing::error!(session_id = %self.session_id, "Dispatch loop failed: {e}");
                    false
                }
                Err(panic) => {
                    tracing::error!(
                        session_id = %self.session_id,
                        "Unexpected failure in session master: {}",
                        panic_message(panic.as_ref())
                    );
                    self.step_down().await;
                    false
                }
            };

            if !retry_now
                && !wait_while_running(
                    &self.running,
                    self.config.retry_interval,
                    self.config.poll_interval,
                )
                .await
            {
                break;
            }
        }

        self.set_state(MasterState::ShuttingDown);
        tracing::info!(session_id = %self.session_id, "Session master stopped");
    }

    /// Stop competing for the session. Releases the lock if held.
    ///
    /// Idempotent. An in-flight dispatch is allowed to finish; the dispatch
    /// loop observes the request within one poll interval.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!(session_id = %self.session_id, "Shutdown requested");

        self.state.send_replace(MasterState::ShuttingDown);
        self.lock.release().await;

        tracing::info!(session_id = %self.session_id, "Shutdown complete");
    }

    async fn attempt_mastership(&self) -> Result<Tenure, SinkError> {
        if !self.lock.try_acquire().await {
            self.set_state(MasterState::Candidate);
            return Ok(Tenure::NotAcquired);
        }

        // Shutdown may have landed between the loop check and the acquire.
        if !self.is_running() {
            self.lock.release().await;
            return Ok(Tenure::Completed);
        }

        self.set_state(MasterState::Master);
        tracing::info!(session_id = %self.session_id, "Became master, starting dispatch loop");

        let outcome = self.dispatch.run().await;
        self.step_down().await;

        let dispatched = outcome?;
        tracing::info!(
            session_id = %self.session_id,
            dispatched,
            "Released lock after dispatch loop exit"
        );
        Ok(Tenure::Completed)
    }

    async fn step_down(&self) {
        self.lock.release().await;
        self.set_state(MasterState::Candidate);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// `ShuttingDown` is absorbing: later transitions are ignored.
    fn set_state(&self, next: MasterState) {
        self.state.send_if_modified(|current| {
            if *current == MasterState::ShuttingDown || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use live_session_core::QuestionEvent;

    use super::*;
    use crate::{dispatch::tests::RecordingSink, lock::MemoryLockTable};

    fn config() -> MasterConfig {
        MasterConfig::new(Duration::from_secs(1))
    }

    fn spawn(master: &Arc<SessionMaster>) -> tokio::task::JoinHandle<()> {
        let master = Arc::clone(master);
        tokio::spawn(async move { master.run().await })
    }

    #[tokio::test(start_paused = true)]
    async fn test_becomes_master_and_dispatches() {
        let table = MemoryLockTable::new();
        let sink = Arc::new(RecordingSink::default());
        let master = Arc::new(SessionMaster::new(
            Arc::new(table.lock("s1")),
            sink.clone(),
            config(),
        ));
        let task = spawn(&master);

        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert!(master.is_master());
        assert!(table.is_locked("s1"));
        assert_eq!(sink.sequences(), vec![1, 2]);

        master.shutdown().await;
        assert_eq!(master.state(), MasterState::ShuttingDown);
        assert!(!table.is_locked("s1"));

        task.await.unwrap();
        assert_eq!(master.state(), MasterState::ShuttingDown);
        assert_eq!(sink.sequences(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_candidate_takes_over_after_release() {
        let table = MemoryLockTable::new();
        let incumbent = table.lock("s1");
        assert!(incumbent.try_acquire().await);

        let sink = Arc::new(RecordingSink::default());
        let master = Arc::new(SessionMaster::new(
            Arc::new(table.lock("s1")),
            sink.clone(),
            config(),
        ));
        let mut states = master.subscribe();
        let task = spawn(&master);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(master.state(), MasterState::Candidate);
        assert!(sink.sequences().is_empty());

        incumbent.release().await;
        states
            .wait_for(|s| *s == MasterState::Master)
            .await
            .unwrap();

        master.shutdown().await;
        task.await.unwrap();
    }

    #[cfg(feature = "file")]
    #[tokio::test(start_paused = true)]
    async fn test_file_lock_handover() {
        use live_session_core::LockProvider;
        use tempfile::TempDir;

        use crate::lock::FileLockProvider;

        let dir = TempDir::new().unwrap();
        let provider = FileLockProvider::new(dir.path());
        let sink = Arc::new(RecordingSink::default());

        let first = Arc::new(SessionMaster::new(provider.lock_for("s1"), sink.clone(), config()));
        let first_task = spawn(&first);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(first.is_master());

        let second = Arc::new(SessionMaster::new(provider.lock_for("s1"), sink.clone(), config()));
        let mut states = second.subscribe();
        let second_task = spawn(&second);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(second.state(), MasterState::Candidate);
        assert_eq!(sink.sequences(), vec![1]);

        first.shutdown().await;
        first_task.await.unwrap();
        states
            .wait_for(|s| *s == MasterState::Master)
            .await
            .unwrap();
        assert!(!first.is_master());

        second.shutdown().await;
        second_task.await.unwrap();
        assert_eq!(second.state(), MasterState::ShuttingDown);
        assert!(!dir.path().join("s1.lock").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_interval_holds_mastership() {
        let table = MemoryLockTable::new();
        let sink = Arc::new(RecordingSink::default());
        let master = Arc::new(SessionMaster::new(
            Arc::new(table.lock("s1")),
            sink.clone(),
            MasterConfig::new(Duration::MAX),
        ));
        let task = spawn(&master);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(master.is_master());
        assert!(sink.sequences().is_empty());

        master.shutdown().await;
        task.await.unwrap();
        assert_eq!(master.state(), MasterState::ShuttingDown);
        assert!(!table.is_locked("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let table = MemoryLockTable::new();
        let master = Arc::new(SessionMaster::new(
            Arc::new(table.lock("s1")),
            Arc::new(RecordingSink::default()),
            config(),
        ));
        let task = spawn(&master);
        tokio::time::sleep(Duration::from_millis(100)).await;

        master.shutdown().await;
        master.shutdown().await;
        task.await.unwrap();

        assert_eq!(master.state(), MasterState::ShuttingDown);
        assert!(!table.is_locked("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_run_never_acquires() {
        let table = MemoryLockTable::new();
        let master = SessionMaster::new(
            Arc::new(table.lock("s1")),
            Arc::new(RecordingSink::default()),
            config(),
        );

        master.shutdown().await;
        master.run().await;

        assert_eq!(master.state(), MasterState::ShuttingDown);
        assert!(!table.is_locked("s1"));
    }

    /// Fails the first dispatch, records the rest.
    #[derive(Default)]
    struct FlakySink {
        calls: AtomicUsize,
        inner: RecordingSink,
    }

    #[async_trait]
    impl EventSink for FlakySink {
        async fn dispatch(&self, event: &QuestionEvent) -> Result<(), SinkError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(SinkError::Internal("transport down".to_string()));
            }
            self.inner.dispatch(event).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_failure_releases_and_retries() {
        let table = MemoryLockTable::new();
        let sink = Arc::new(FlakySink::default());
        let master = Arc::new(SessionMaster::new(
            Arc::new(table.lock("s1")),
            sink.clone(),
            config(),
        ));
        let task = spawn(&master);

        // Fails at 1s, waits the 3s retry interval, reacquires at 4s.
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(master.state(), MasterState::Candidate);
        assert!(!table.is_locked("s1"));

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert!(master.is_master());
        // Numbering restarts with the new mastership period.
        assert_eq!(sink.inner.sequences(), vec![1, 2]);

        master.shutdown().await;
        task.await.unwrap();
    }

    struct PanickingSink;

    #[async_trait]
    impl EventSink for PanickingSink {
        async fn dispatch(&self, _event: &QuestionEvent) -> Result<(), SinkError> {
            panic!("sink exploded");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_contained() {
        let table = MemoryLockTable::new();
        let master = Arc::new(SessionMaster::new(
            Arc::new(table.lock("s1")),
            Arc::new(PanickingSink),
            config(),
        ));
        let task = spawn(&master);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(master.state(), MasterState::Candidate);
        assert!(!table.is_locked("s1"));

        master.shutdown().await;
        task.await.unwrap();
        assert_eq!(master.state(), MasterState::ShuttingDown);
    }

    /// Lock whose backend is permanently broken.
    #[derive(Default)]
    struct BrokenLock {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl SessionLock for BrokenLock {
        fn session_id(&self) -> &str {
            "s1"
        }

        async fn try_acquire(&self) -> bool {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            false
        }

        async fn release(&self) {}

        fn is_held(&self) -> bool {
            false
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_at_fixed_interval() {
        let lock = Arc::new(BrokenLock::default());
        let master = Arc::new(SessionMaster::new(
            lock.clone(),
            Arc::new(RecordingSink::default()),
            config(),
        ));
        let task = spawn(&master);

        // Attempts at 0s, 3s and 6s.
        tokio::time::sleep(Duration::from_millis(7000)).await;
        assert_eq!(lock.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(master.state(), MasterState::Candidate);

        master.shutdown().await;
        task.await.unwrap();
        assert_eq!(lock.attempts.load(Ordering::SeqCst), 3);
    }
}
