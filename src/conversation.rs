//! Single-turn conversation facade over the run loop.
//!
//! [`Conversation::ask`] opens one session, posts the user request, and
//! pumps the outbound channel until the turn ends: messages go to the
//! handler, tool calls are auto-dispatched through the agent's tool
//! collection (unless the handler overrides), and prompt-style external
//! actions are answered with whatever the handler returns. The final answer
//! is the concatenated message text; an error attached to the end event
//! comes back as the call's error.

use crate::Error;
use crate::Result;
use crate::events::{EventPayload, ExternalAction};
use crate::message::{Message, ToolCallPart, ToolCallResultPart};
use crate::provider::FinishReason;
use crate::session::Agent;
use crate::tool::ToolCollection;
use tokio_util::sync::CancellationToken;

/// Sink for one conversation's events, with overridable defaults.
pub trait ConversationHandler: Send {
    /// Called for every agent message, deltas included.
    fn on_message(&mut self, _message: &Message) {}

    /// Handle a tool call yourself by returning a result; `None` dispatches
    /// through the conversation's tool collection.
    fn on_tool_call(&mut self, _call: &ToolCallPart) -> Option<ToolCallResultPart> {
        None
    }

    /// Answer a prompt-style external action. The default approves.
    fn on_prompt(&mut self, _prompt: &str) -> String {
        "ok".to_string()
    }
}

/// Handler with all defaults: auto-dispatch tools, approve prompts.
#[derive(Default)]
pub struct AutoHandler;

impl ConversationHandler for AutoHandler {}

/// Thin request/response wrapper over a single agent session.
pub struct Conversation {
    agent: Agent,
}

impl Conversation {
    pub fn new(agent: Agent) -> Self {
        Self { agent }
    }

    /// Ask with the default auto-approving handler.
    pub async fn ask_default(self, cancel: &CancellationToken, text: &str) -> Result<String> {
        self.ask(cancel, text, &mut AutoHandler).await
    }

    /// Run one turn and return the concatenated answer text.
    pub async fn ask<H: ConversationHandler>(
        self,
        cancel: &CancellationToken,
        text: &str,
        handler: &mut H,
    ) -> Result<String> {
        let tools: ToolCollection = self.agent.tools().clone();
        let mut session = self.agent.run(cancel.clone())?;
        session
            .post(EventPayload::UserRequest {
                message: Message::user(text),
            })
            .await?;

        let mut answer = String::new();
        let mut end: Option<(FinishReason, Option<String>)> = None;

        while let Some(event) = session.next_event().await {
            match event.payload {
                EventPayload::AgentMessage { message } => {
                    handler.on_message(&message);
                    answer.push_str(&message.text());
                }
                EventPayload::ExternalAction { action } => match action {
                    ExternalAction::ToolCall(call) => {
                        let result = match handler.on_tool_call(&call) {
                            Some(result) => Ok(result),
                            None => tools.call(cancel, &call).await,
                        };
                        match result {
                            Ok(result) => {
                                session.post(EventPayload::ToolCallResult { result }).await?;
                            }
                            Err(e) => {
                                session
                                    .post(EventPayload::ToolCallFailed {
                                        id: call.id.clone(),
                                        name: call.name.clone(),
                                        error: e.to_string(),
                                    })
                                    .await?;
                            }
                        }
                    }
                    ExternalAction::Prompt(prompt) => {
                        let content = handler.on_prompt(&prompt);
                        session
                            .post(EventPayload::ExternalActionResult { content })
                            .await?;
                    }
                },
                EventPayload::ResponseEnd {
                    finish_reason,
                    error,
                    ..
                } => {
                    end = Some((finish_reason, error));
                }
                EventPayload::ResponseStart { .. } => {}
                other => {
                    log::warn!("conversation: unexpected outbound payload {other:?}");
                }
            }
        }
        session.join().await;

        match end {
            Some((_, Some(error))) => Err(Error::failed(error)),
            Some((FinishReason::Canceled, None)) => Err(Error::cancelled("session canceled")),
            Some((_, None)) => Ok(answer),
            None => Err(Error::internal("session ended without a finish event")),
        }
    }
}
