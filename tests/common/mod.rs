//! Shared fixtures for the integration tests: a scriptable chat provider
//! driven entirely through the public API.
#![allow(dead_code)]

use agent_core::message::{Message, ToolCallPart};
use agent_core::model::ModelInfo;
use agent_core::provider::{
    Chat, ChatOptions, ChatProvider, ChatResponse, ChatStream, FinishReason, Usage,
};
use agent_core::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One scripted provider turn.
pub enum Turn {
    /// Stream these responses, in order.
    Respond(Vec<ChatResponse>),
    /// Fail the send with this error.
    Fail(Error),
}

/// Provider that replays a script, one [`Turn`] per send.
pub struct ScriptedProvider {
    turns: Arc<Mutex<VecDeque<Turn>>>,
    sends: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Turn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Arc::new(Mutex::new(turns.into())),
            sends: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// How many sends the provider has served.
    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn new_chat(&self, _system_prompt: &str, _model: &ModelInfo) -> Result<Box<dyn Chat>> {
        Ok(Box::new(ScriptedChat {
            turns: Arc::clone(&self.turns),
            sends: Arc::clone(&self.sends),
        }))
    }
}

struct ScriptedChat {
    turns: Arc<Mutex<VecDeque<Turn>>>,
    sends: Arc<AtomicUsize>,
}

#[async_trait]
impl Chat for ScriptedChat {
    async fn send(
        &mut self,
        _cancel: &CancellationToken,
        _messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<ChatStream> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let turn = self
            .turns
            .lock()
            .expect("script poisoned")
            .pop_front()
            .ok_or_else(|| Error::permanent(Error::internal("script exhausted")))?;
        match turn {
            Turn::Respond(responses) => Ok(Box::pin(futures::stream::iter(
                responses.into_iter().map(Ok::<_, Error>),
            )) as ChatStream),
            Turn::Fail(error) => Err(error),
        }
    }
}

/// A terminal response carrying the full text.
pub fn final_text(text: &str) -> ChatResponse {
    ChatResponse::terminal(
        Message::assistant(Uuid::new_v4().to_string(), "test-model", text, Vec::new()),
        FinishReason::NormalEnd,
        Some(Usage::new(10, 5)),
    )
}

/// A terminal response requesting the given tool calls.
pub fn tool_call_turn(calls: Vec<ToolCallPart>) -> ChatResponse {
    ChatResponse::terminal(
        Message::assistant(Uuid::new_v4().to_string(), "test-model", "", calls),
        FinishReason::ToolUse,
        Some(Usage::new(10, 5)),
    )
}

/// The scripted model descriptor.
pub fn test_model() -> ModelInfo {
    ModelInfo::new("scripted", "test-model")
}

/// Build a tool-call part from JSON arguments.
pub fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCallPart {
    match arguments {
        serde_json::Value::Object(map) => ToolCallPart::new(id, name, map),
        _ => panic!("arguments must be an object"),
    }
}
