//! Event envelope and session payloads.
//!
//! Events are the traffic on both the per-session channels and the
//! [`EventBus`](crate::bus::EventBus): a topic-addressed envelope around a
//! typed payload. One session's outbound topic is `session/<session-id>`.
//!
//! Lifecycle contract per session: exactly one [`EventPayload::ResponseStart`]
//! and exactly one [`EventPayload::ResponseEnd`], with any number of
//! `AgentMessage` / `ExternalAction` events in between.

use crate::message::{Message, ToolCallPart, ToolCallResultPart};
use crate::provider::FinishReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Topic for one session's outbound events.
pub fn session_topic(session_id: &str) -> String {
    format!("session/{session_id}")
}

/// A request for something only an external actor can do: answer a prompt or
/// run a tool. Exactly one side is ever populated on the wire
/// (`{message?, tool_call?}`).
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalAction {
    /// A prompt string for the user (e.g. a plan confirmation).
    Prompt(String),
    /// A tool call for a tool runtime.
    ToolCall(ToolCallPart),
}

#[derive(Serialize, Deserialize)]
struct ExternalActionWire {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    tool_call: Option<ToolCallPart>,
}

impl Serialize for ExternalAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            ExternalAction::Prompt(message) => ExternalActionWire {
                message: Some(message.clone()),
                tool_call: None,
            },
            ExternalAction::ToolCall(call) => ExternalActionWire {
                message: None,
                tool_call: Some(call.clone()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ExternalAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;
        let wire = ExternalActionWire::deserialize(deserializer)?;
        match (wire.message, wire.tool_call) {
            (Some(message), None) => Ok(ExternalAction::Prompt(message)),
            (None, Some(call)) => Ok(ExternalAction::ToolCall(call)),
            _ => Err(D::Error::custom(
                "external action must carry exactly one of message, tool_call",
            )),
        }
    }
}

/// Typed payload of an [`Event`].
///
/// The first four variants flow outbound (run loop to handler); the rest flow
/// inbound (handler to run loop).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// A session turn began.
    ResponseStart { session_id: String },

    /// A message produced during the turn: a streamed delta or a complete
    /// message, depending on the provider path.
    AgentMessage { message: Message },

    /// The session needs an external actor to act.
    ExternalAction { action: ExternalAction },

    /// The session turn finished. Exactly one per session.
    ResponseEnd {
        finish_reason: FinishReason,
        abort: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
    },

    /// Caller posts the user's request to start the turn.
    UserRequest { message: Message },

    /// Caller feeds back the result of a requested tool call.
    ToolCallResult { result: ToolCallResultPart },

    /// Caller declares a requested tool call failed without a result.
    ToolCallFailed {
        id: String,
        name: String,
        error: String,
    },

    /// Caller answers a prompt-style external action.
    ExternalActionResult { content: String },
}

/// Topic-addressed event envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap a payload for a topic, assigning a fresh id and timestamp.
    pub fn new(topic: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}
