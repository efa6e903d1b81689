//! Agent event types

use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Events surfaced to the caller, in the order the engine observes them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Streamed text fragment
    Text { delta: String },

    /// A tool or delegation is about to run
    ToolCall { name: String },

    /// A tool or delegation produced its result
    ToolResult { name: String },

    /// A specialist finished with an answer
    AgentResponse {
        agent: String,
        message: String,
        input_tokens: u64,
        output_tokens: u64,
    },

    /// Something went wrong; the caller may display it
    Error { message: String },

    /// The router produced its final answer
    End {
        message: String,
        trails: Vec<serde_json::Value>,
        order_by: String,
        input_tokens: u64,
        output_tokens: u64,
        cost: f64,
        duration: f64,
    },
}

impl AgentEvent {
    pub fn error(message: impl Into<String>) -> Self {
        AgentEvent::Error {
            message: message.into(),
        }
    }

    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::End { .. } | AgentEvent::AgentResponse { .. } | AgentEvent::Error { .. }
        )
    }
}

/// Sending half used by engines to publish events
pub type EventSender = mpsc::UnboundedSender<AgentEvent>;

/// A stream of agent events
pub type AgentEventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

/// Publish an event. A caller that stopped listening does not stop the work.
pub(crate) fn emit(events: &EventSender, event: AgentEvent) {
    let _ = events.send(event);
}
