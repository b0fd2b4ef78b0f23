//! Dispatched events and master state.

use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::traits::SessionId;

/// One dispatch tick's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionEvent {
    /// Session this event belongs to.
    pub session_id: SessionId,
    /// Position within the current mastership period, starting at 1.
    pub sequence: u64,
    /// Display text.
    pub text: String,
    /// Creation time (Unix epoch seconds, fractional).
    pub timestamp: f64,
    /// How long the event stays open (seconds).
    pub duration_seconds: f64,
}

impl QuestionEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn new(
        session_id: impl Into<SessionId>,
        sequence: u64,
        text: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            sequence,
            text: text.into(),
            timestamp: now_secs(),
            duration_seconds: duration.as_secs_f64(),
        }
    }

    /// Wire identifier of this event (`q<sequence>`).
    #[must_use]
    pub fn question_id(&self) -> String {
        format!("q{}", self.sequence)
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Session master state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterState {
    /// Not holding the lock, periodically retrying.
    Candidate,
    /// Holding the lock and dispatching.
    Master,
    /// Terminal; no further acquisition attempts.
    ShuttingDown,
}

impl fmt::Display for MasterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Candidate => "candidate",
            Self::Master => "master",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}
