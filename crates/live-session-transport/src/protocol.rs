//! Wire protocol for client-server communication.

use live_session_core::QuestionEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message from client to server.
///
/// Clients acknowledge questions with `{"answer_id": ...}`. The content is
/// not validated; any JSON object is accepted and anything else is an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientAnswer {
    /// Client-chosen answer identifier.
    #[serde(default)]
    pub answer_id: Option<Value>,
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A dispatched question.
    Question {
        session_id: String,
        question_id: String,
        text: String,
        /// Unix epoch seconds, fractional.
        timestamp: f64,
        duration_seconds: f64,
    },
    /// Acknowledgement of a client answer.
    Ack { answer_id: Option<Value> },
    /// Error message.
    Error { message: String },
}

impl From<&QuestionEvent> for ServerMessage {
    fn from(event: &QuestionEvent) -> Self {
        Self::Question {
            session_id: event.session_id.clone(),
            question_id: event.question_id(),
            text: event.text.clone(),
            timestamp: event.timestamp,
            duration_seconds: event.duration_seconds,
        }
    }
}

impl ServerMessage {
    /// Reply to one raw text frame from a client.
    #[must_use]
    pub fn reply_to(text: &str) -> Self {
        let answer = match serde_json::from_str::<Value>(text) {
            Ok(value @ Value::Object(_)) => serde_json::from_value::<ClientAnswer>(value),
            Ok(_) => {
                return Self::Error {
                    message: "Invalid message: expected a JSON object".to_string(),
                };
            }
            Err(e) => Err(e),
        };

        match answer {
            Ok(answer) => Self::Ack {
                answer_id: answer.answer_id,
            },
            Err(e) => Self::Error {
                message: format!("Invalid message: {e}"),
            },
        }
    }
}
