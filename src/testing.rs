//! Shared unit-test fixtures: a scripted chat provider.

use crate::message::Message;
use crate::model::ModelInfo;
use crate::provider::{
    Chat, ChatOptions, ChatProvider, ChatResponse, ChatStream, FinishReason, Usage, once_stream,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Provider whose chats pop one canned response per send, in script order.
pub struct ScriptedProvider {
    script: Arc<Mutex<Vec<ChatResponse>>>,
}

impl ScriptedProvider {
    pub fn new(mut responses: Vec<ChatResponse>) -> Arc<Self> {
        responses.reverse();
        Arc::new(Self {
            script: Arc::new(Mutex::new(responses)),
        })
    }
}

impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn new_chat(&self, _system_prompt: &str, _model: &ModelInfo) -> Result<Box<dyn Chat>> {
        Ok(Box::new(ScriptedChat {
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedChat {
    script: Arc<Mutex<Vec<ChatResponse>>>,
}

#[async_trait]
impl Chat for ScriptedChat {
    async fn send(
        &mut self,
        _cancel: &CancellationToken,
        _messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<ChatStream> {
        let response = self
            .script
            .lock()
            .expect("script poisoned")
            .pop()
            .ok_or_else(|| Error::permanent(Error::internal("script exhausted")))?;
        Ok(once_stream(response))
    }
}

/// A terminal text response in the scripted model's voice.
pub fn final_text(text: &str) -> ChatResponse {
    ChatResponse::terminal(
        Message::assistant(Uuid::new_v4().to_string(), "test-model", text, Vec::new()),
        FinishReason::NormalEnd,
        Some(Usage::new(10, 5)),
    )
}
