//! Periodic event dispatch while holding mastership.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use live_session_core::{EventSink, MasterConfig, QuestionEvent, SessionId, SinkError};
use tokio::time::Instant;

/// Produces one event per dispatch interval and hands it to a sink.
///
/// Sequence numbers restart at 1 on every `run`. The loop polls the shared
/// running flag every `poll_interval`, so clearing the flag stops it within
/// one poll interval and without a final tick.
pub struct DispatchLoop {
    session_id: SessionId,
    config: MasterConfig,
    sink: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
}

impl DispatchLoop {
    /// Create a dispatch loop sharing `running` with its owner.
    #[must_use]
    pub fn new(
        session_id: impl Into<SessionId>,
        config: MasterConfig,
        sink: Arc<dyn EventSink>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            config,
            sink,
            running,
        }
    }

    /// Dispatch until the running flag clears.
    ///
    /// Each tick waits one interval, then dispatches.
    ///
    /// # Errors
    /// Returns the sink's error; the loop stops at the first failure.
    pub async fn run(&self) -> Result<u64, SinkError> {
        let mut sequence = 0;

        while wait_while_running(
            &self.running,
            self.config.dispatch_interval,
            self.config.poll_interval,
        )
        .await
        {
            sequence += 1;
            let event = QuestionEvent::new(
                self.session_id.clone(),
                sequence,
                format!("{} #{sequence}", self.config.label_prefix),
                self.config.dispatch_interval,
            );
            tracing::info!(
                session_id = %self.session_id,
                sequence,
                "Dispatching question {}",
                event.question_id()
            );
            self.sink.dispatch(&event).await?;
        }

        tracing::debug!(session_id = %self.session_id, dispatched = sequence, "Dispatch loop stopped");
        Ok(sequence)
    }
}

/// Wait for `total`, checking `running` every `poll`.
///
/// Returns `false` as soon as the flag is observed cleared. A `total` too
/// large to represent as a deadline waits until the flag clears.
pub(crate) async fn wait_while_running(
    running: &AtomicBool,
    total: Duration,
    poll: Duration,
) -> bool {
    let deadline = Instant::now().checked_add(total);
    loop {
        if !running.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        let step = match deadline {
            Some(deadline) if now >= deadline => return true,
            Some(deadline) => (deadline - now).min(poll),
            None => poll,
        };
        tokio::time::sleep(step).await;
    }
}
