//! The agent run loop: one cooperative task per session.
//!
//! [`Agent::run`] wires a behavior pattern, a provider-bound chat handle, a
//! memory, and an optional tool surface into a spawned task, and hands the
//! caller a [`Session`]: an inbound channel for requests and results, and an
//! outbound channel of progress events.
//!
//! The task is the single writer of outbound and the single reader of
//! inbound. Per session it emits exactly one
//! [`EventPayload::ResponseStart`] and exactly one
//! [`EventPayload::ResponseEnd`]; between them flow `AgentMessage` deltas
//! and `ExternalAction` requests. Each provider turn re-materializes the
//! conversation from memory, sends it through the chat handle under the
//! retry engine (with the provider's retryability predicate deciding what
//! is permanent), streams every response out as it arrives, and routes the
//! terminal response through the pattern. External actions block the loop on
//! inbound until the matching result arrives; tool results are matched by
//! call id; unrelated events are logged and dropped.
//!
//! Cancellation of the session token ends the loop with
//! `ResponseEnd { finish_reason: canceled }`; a provider error that survives
//! the retry engine ends it with `finish_reason: error, abort: true`. After
//! the end event the outbound channel closes and inbound is drained for a
//! short grace period.

use crate::bus::EventBus;
use crate::events::{Event, EventPayload, ExternalAction, session_topic};
use crate::memory::{InMemoryMemory, Memory, MemoryItem, Retrieval, as_messages};
use crate::message::{Message, ToolCallPart, ToolCallResultPart};
use crate::model::ModelInfo;
use crate::patterns::{BehaviorPattern, Interpretation};
use crate::provider::{Chat, ChatOptions, ChatProvider, FinishReason, Usage};
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::tool::ToolCollection;
use crate::{Error, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How long a finished session keeps draining inbound before exiting.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// A configured agent, ready to open a session.
///
/// Built with [`Agent::builder`]; consumed by [`Agent::run`], since the
/// session takes exclusive ownership of the pattern and memory.
pub struct Agent {
    provider: Arc<dyn ChatProvider>,
    model: ModelInfo,
    system_prompt: String,
    pattern: Box<dyn BehaviorPattern>,
    memory: Arc<dyn Memory>,
    tools: ToolCollection,
    bus: Option<Arc<EventBus>>,
    retry: RetryConfig,
    chat_options: ChatOptions,
    channel_capacity: usize,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    /// The memory handle this agent will hand to its session.
    pub fn memory(&self) -> Arc<dyn Memory> {
        Arc::clone(&self.memory)
    }

    /// The tool collection attached to this agent.
    pub fn tools(&self) -> &ToolCollection {
        &self.tools
    }

    /// Open a session: spawn the run-loop task and return its channels.
    pub fn run(self, cancel: CancellationToken) -> Result<Session> {
        let session_id = Uuid::new_v4().to_string();
        let topic = session_topic(&session_id);

        let chat = self.provider.new_chat(&self.system_prompt, &self.model)?;

        let mut options = self.chat_options.clone();
        if options.tools.is_empty() {
            options.tools = self.tools.descriptors();
        }

        let (inbound_tx, inbound_rx) = mpsc::channel::<Event>(self.channel_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel::<Event>(self.channel_capacity);

        let worker = SessionWorker {
            session_id: session_id.clone(),
            topic,
            provider: self.provider,
            chat: Arc::new(Mutex::new(chat)),
            model: self.model,
            pattern: self.pattern,
            memory: self.memory,
            options,
            retry: self.retry,
            bus: self.bus,
            outbound: outbound_tx,
            inbound: inbound_rx,
            cancel,
        };
        let handle = tokio::spawn(worker.run());

        Ok(Session {
            session_id,
            inbound: inbound_tx,
            outbound: outbound_rx,
            handle,
        })
    }
}

/// Builder for [`Agent`] with validation.
#[derive(Default)]
pub struct AgentBuilder {
    provider: Option<Arc<dyn ChatProvider>>,
    model: Option<ModelInfo>,
    system_prompt: Option<String>,
    pattern: Option<Box<dyn BehaviorPattern>>,
    memory: Option<Arc<dyn Memory>>,
    tools: ToolCollection,
    bus: Option<Arc<EventBus>>,
    retry: Option<RetryConfig>,
    chat_options: Option<ChatOptions>,
    channel_capacity: Option<usize>,
}

impl AgentBuilder {
    /// Set the chat provider (required).
    pub fn provider(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Bind a model descriptor (required, unless [`model_id`](Self::model_id)
    /// is used).
    pub fn model(mut self, model: ModelInfo) -> Self {
        self.model = Some(model);
        self
    }

    /// Bind a model by id, resolved against the process-wide registry.
    /// Unknown ids resolve to the synthetic default descriptor.
    pub fn model_id(mut self, id: &str) -> Self {
        let (model, _) = crate::model::get_model(id);
        self.model = Some(model);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the behavior pattern (required).
    pub fn pattern(mut self, pattern: impl BehaviorPattern + 'static) -> Self {
        self.pattern = Some(Box::new(pattern));
        self
    }

    /// Set the memory store. Defaults to a fresh [`InMemoryMemory`].
    pub fn memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attach the tool surface offered to the model.
    pub fn tools(mut self, tools: ToolCollection) -> Self {
        self.tools = tools;
        self
    }

    /// Mirror session events onto an event bus under `session/<id>`.
    pub fn bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn chat_options(mut self, options: ChatOptions) -> Self {
        self.chat_options = Some(options);
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| Error::config("provider is required"))?;
        let model = self.model.ok_or_else(|| Error::config("model is required"))?;
        let pattern = self
            .pattern
            .ok_or_else(|| Error::config("behavior pattern is required"))?;
        let capacity = self.channel_capacity.unwrap_or(64);
        if capacity == 0 {
            return Err(Error::invalid_input("channel capacity must be > 0"));
        }

        Ok(Agent {
            provider,
            model,
            system_prompt: self.system_prompt.unwrap_or_default(),
            pattern,
            memory: self
                .memory
                .unwrap_or_else(|| Arc::new(InMemoryMemory::new())),
            tools: self.tools,
            bus: self.bus,
            retry: self.retry.unwrap_or_default(),
            chat_options: self.chat_options.unwrap_or_default(),
            channel_capacity: capacity,
        })
    }
}

/// A running session: channels plus the task handle.
pub struct Session {
    pub session_id: String,
    inbound: mpsc::Sender<Event>,
    outbound: mpsc::Receiver<Event>,
    handle: JoinHandle<()>,
}

impl Session {
    /// Post an inbound payload (user request, tool result, confirmation
    /// answer) to the run loop.
    pub async fn post(&self, payload: EventPayload) -> Result<()> {
        let event = Event::new(session_topic(&self.session_id), payload);
        self.inbound
            .send(event)
            .await
            .map_err(|_| Error::cancelled("session closed"))
    }

    /// A clone of the inbound sender, for handlers that outlive the session
    /// struct.
    pub fn inbound(&self) -> mpsc::Sender<Event> {
        self.inbound.clone()
    }

    /// Next outbound event; `None` once the session closed its channel.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.outbound.recv().await
    }

    /// Wait for the run-loop task to exit.
    pub async fn join(self) {
        drop(self.inbound);
        drop(self.outbound);
        let _ = self.handle.await;
    }
}

/// What one provider turn produced, after stream consumption.
struct TurnOutcome {
    message: Message,
    finish: Option<FinishReason>,
    #[allow(dead_code)]
    usage: Option<Usage>,
}

struct SessionWorker {
    session_id: String,
    topic: String,
    provider: Arc<dyn ChatProvider>,
    chat: Arc<Mutex<Box<dyn Chat>>>,
    model: ModelInfo,
    pattern: Box<dyn BehaviorPattern>,
    memory: Arc<dyn Memory>,
    options: ChatOptions,
    retry: RetryConfig,
    bus: Option<Arc<EventBus>>,
    outbound: mpsc::Sender<Event>,
    inbound: mpsc::Receiver<Event>,
    cancel: CancellationToken,
}

/// Publish to the session topic: outbound first-class, bus best-effort.
/// Returns false when the outbound receiver is gone.
async fn publish_event(
    outbound: &mpsc::Sender<Event>,
    bus: &Option<Arc<EventBus>>,
    topic: &str,
    payload: EventPayload,
) -> bool {
    let event = Event::new(topic, payload);
    if let Some(bus) = bus {
        if let Err(e) = bus.publish(event.clone()) {
            log::debug!("bus publish on '{topic}' failed: {e}");
        }
    }
    outbound.send(event).await.is_ok()
}

impl SessionWorker {
    async fn publish(&self, payload: EventPayload) -> bool {
        publish_event(&self.outbound, &self.bus, &self.topic, payload).await
    }

    async fn run(mut self) {
        self.publish(EventPayload::ResponseStart {
            session_id: self.session_id.clone(),
        })
        .await;

        let (finish_reason, abort, error) = self.drive().await;
        log::debug!(
            "session {} ended: {:?} (abort={})",
            self.session_id,
            finish_reason,
            abort
        );
        self.publish(EventPayload::ResponseEnd {
            finish_reason,
            abort,
            error,
        })
        .await;

        // Close outbound, then give late inbound senders a moment to notice.
        drop(self.outbound);
        let deadline = tokio::time::sleep(DRAIN_GRACE);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = self.inbound.recv() => {
                    if event.is_none() {
                        break;
                    }
                }
            }
        }
    }

    async fn drive(&mut self) -> (FinishReason, bool, Option<String>) {
        let request = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return (FinishReason::Canceled, false, None),
                event = self.inbound.recv() => match event {
                    Some(event) => match event.payload {
                        EventPayload::UserRequest { message } => break message,
                        other => {
                            log::warn!(
                                "session {}: ignoring {:?} before the user request",
                                self.session_id,
                                other
                            );
                        }
                    },
                    None => return (FinishReason::Canceled, false, None),
                }
            }
        };

        if let Err(e) = self.memory.add(MemoryItem::chat_message(request.clone())).await {
            return (FinishReason::Error, true, Some(e.to_string()));
        }

        let setup = match self.pattern.start(&request) {
            Ok(setup) => setup,
            Err(e) => return (FinishReason::Error, true, Some(e.to_string())),
        };
        let instructions = setup.instructions;
        let mut pending_prompt = setup.prompt;

        loop {
            if self.cancel.is_cancelled() {
                return (FinishReason::Canceled, false, None);
            }

            if let Some(prompt) = pending_prompt.take() {
                if let Err(e) = self.memory.add(MemoryItem::chat_message(prompt)).await {
                    return (FinishReason::Error, true, Some(e.to_string()));
                }
            }

            let mut conversation = Vec::new();
            if let Some(instructions) = &instructions {
                conversation.push(Message::system(instructions.clone()));
            }
            match self.memory.retrieve(Retrieval::all()).await {
                Ok(items) => conversation.extend(as_messages(&items)),
                Err(e) => return (FinishReason::Error, true, Some(e.to_string())),
            }

            let outcome = match self.provider_turn(Arc::new(conversation)).await {
                Ok(outcome) => outcome,
                Err(Error::Cancelled(_)) => return (FinishReason::Canceled, false, None),
                Err(e) => return (FinishReason::Error, true, Some(e.to_string())),
            };

            if let Err(e) = self
                .memory
                .add(MemoryItem::chat_message(outcome.message.clone()))
                .await
            {
                return (FinishReason::Error, true, Some(e.to_string()));
            }

            // Denial and token exhaustion end the turn regardless of the
            // pattern, as long as no tool calls need answering.
            if outcome.message.tool_calls().is_empty() {
                match outcome.finish {
                    Some(reason @ (FinishReason::Denied | FinishReason::MaxTokens)) => {
                        return (reason, false, None);
                    }
                    _ => {}
                }
            }

            let mut interpretation = match self.pattern.on_provider_response(&outcome.message) {
                Ok(interpretation) => interpretation,
                Err(e) => return (FinishReason::Error, true, Some(e.to_string())),
            };

            loop {
                match interpretation {
                    Interpretation::EmitAndContinue { emit, next_prompt } => {
                        if let Some(message) = emit {
                            if !self.publish(EventPayload::AgentMessage { message }).await {
                                return (FinishReason::Canceled, false, None);
                            }
                        }
                        pending_prompt = next_prompt;
                        break;
                    }
                    Interpretation::RequestToolCall(call) => {
                        let published = self
                            .publish(EventPayload::ExternalAction {
                                action: ExternalAction::ToolCall(call.clone()),
                            })
                            .await;
                        if !published {
                            return (FinishReason::Canceled, false, None);
                        }

                        let payload = match self.await_tool_result(&call).await {
                            Some(payload) => payload,
                            None => return (FinishReason::Canceled, false, None),
                        };

                        let result = match &payload {
                            EventPayload::ToolCallResult { result } => result.clone(),
                            EventPayload::ToolCallFailed { id, name, error } => {
                                ToolCallResultPart::failure(id.clone(), name.clone(), error.clone())
                            }
                            _ => unreachable!("await_tool_result filters payloads"),
                        };
                        if let Err(e) = self.memory.add(MemoryItem::tool_call_result(result)).await
                        {
                            return (FinishReason::Error, true, Some(e.to_string()));
                        }

                        interpretation = match self.pattern.on_external_result(&payload) {
                            Ok(interpretation) => interpretation,
                            Err(e) => return (FinishReason::Error, true, Some(e.to_string())),
                        };
                    }
                    Interpretation::RequestConfirmation(prompt) => {
                        let published = self
                            .publish(EventPayload::ExternalAction {
                                action: ExternalAction::Prompt(prompt),
                            })
                            .await;
                        if !published {
                            return (FinishReason::Canceled, false, None);
                        }

                        let payload = match self.await_confirmation().await {
                            Some(payload) => payload,
                            None => return (FinishReason::Canceled, false, None),
                        };
                        interpretation = match self.pattern.on_external_result(&payload) {
                            Ok(interpretation) => interpretation,
                            Err(e) => return (FinishReason::Error, true, Some(e.to_string())),
                        };
                    }
                    Interpretation::Finish(reason) => {
                        return (reason, false, None);
                    }
                }
            }

            if self.pattern.finished() {
                return (FinishReason::NormalEnd, false, None);
            }
        }
    }

    /// One provider turn under the retry engine: send the conversation,
    /// publish every streamed response, and fold the stream into the
    /// accumulated assistant message.
    async fn provider_turn(&self, conversation: Arc<Vec<Message>>) -> Result<TurnOutcome> {
        let provider = Arc::clone(&self.provider);
        let chat = Arc::clone(&self.chat);
        let options = self.options.clone();
        let cancel = self.cancel.clone();
        let outbound = self.outbound.clone();
        let bus = self.bus.clone();
        let topic = self.topic.clone();
        let model_id = self.model.id.clone();

        retry_with_backoff(&self.cancel, self.retry.clone(), move || {
            let provider = Arc::clone(&provider);
            let chat = Arc::clone(&chat);
            let conversation = Arc::clone(&conversation);
            let options = options.clone();
            let cancel = cancel.clone();
            let outbound = outbound.clone();
            let bus = bus.clone();
            let topic = topic.clone();
            let model_id = model_id.clone();

            async move {
                let classify = |err: Error| -> Error {
                    if matches!(err, Error::Permanent(_) | Error::RetryAfter { .. }) {
                        return err;
                    }
                    if provider.is_retryable_error(&err) {
                        err
                    } else {
                        Error::permanent(err)
                    }
                };

                let mut stream = {
                    let mut chat = chat.lock().await;
                    chat.send(&cancel, &conversation, &options)
                        .await
                        .map_err(&classify)?
                };

                let mut text = String::new();
                let mut calls: Vec<ToolCallPart> = Vec::new();
                let mut finish = None;
                let mut usage = None;

                loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => None,
                        item = stream.next() => item,
                    };
                    let Some(item) = item else { break };

                    let response = item.map_err(&classify)?;
                    text.push_str(&response.message.text());
                    calls.extend(response.message.tool_calls().into_iter().cloned());
                    if response.is_final() {
                        finish = response.finish_reason;
                        usage = response.usage;
                    }

                    let delivered = publish_event(
                        &outbound,
                        &bus,
                        &topic,
                        EventPayload::AgentMessage {
                            message: response.message,
                        },
                    )
                    .await;
                    if !delivered {
                        return Err(Error::permanent(Error::cancelled("handler went away")));
                    }
                }

                if cancel.is_cancelled() {
                    return Err(Error::permanent(Error::cancelled("session cancelled")));
                }

                Ok(TurnOutcome {
                    message: Message::assistant(
                        Uuid::new_v4().to_string(),
                        model_id,
                        text,
                        calls,
                    ),
                    finish,
                    usage,
                })
            }
        })
        .await
    }

    /// Block on inbound for the result matching `call`. Unrelated events are
    /// logged and dropped. `None` means cancellation or a closed channel.
    async fn await_tool_result(&mut self, call: &ToolCallPart) -> Option<EventPayload> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                event = self.inbound.recv() => {
                    let event = event?;
                    match event.payload {
                        EventPayload::ToolCallResult { result } if result.id == call.id => {
                            return Some(EventPayload::ToolCallResult { result });
                        }
                        EventPayload::ToolCallFailed { id, name, error } if id == call.id => {
                            return Some(EventPayload::ToolCallFailed { id, name, error });
                        }
                        other => {
                            log::warn!(
                                "session {}: ignoring {:?} while awaiting result for call {}",
                                self.session_id,
                                other,
                                call.id
                            );
                        }
                    }
                }
            }
        }
    }

    /// Block on inbound for a confirmation answer.
    async fn await_confirmation(&mut self) -> Option<EventPayload> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                event = self.inbound.recv() => {
                    let event = event?;
                    match event.payload {
                        payload @ EventPayload::ExternalActionResult { .. } => {
                            return Some(payload);
                        }
                        other => {
                            log::warn!(
                                "session {}: ignoring {:?} while awaiting confirmation",
                                self.session_id,
                                other
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::patterns::ChainOfThought;
    use crate::provider::{ChatResponse, ChatStream};
    use crate::testing::{ScriptedProvider, final_text};
    use async_trait::async_trait;

    fn agent_with(provider: Arc<ScriptedProvider>) -> Agent {
        Agent::builder()
            .provider(provider)
            .model(ModelInfo::new("scripted", "test-model"))
            .system_prompt("You are helpful.")
            .pattern(ChainOfThought::new())
            .build()
            .unwrap()
    }

    async fn collect_payloads(session: &mut Session) -> Vec<EventPayload> {
        let mut payloads = Vec::new();
        while let Some(event) = session.next_event().await {
            payloads.push(event.payload);
        }
        payloads
    }

    #[tokio::test]
    async fn test_happy_path_lifecycle() {
        let provider = ScriptedProvider::new(vec![final_text("15 × 23 = 345")]);
        let agent = agent_with(provider);
        let memory = agent.memory();

        let mut session = agent.run(CancellationToken::new()).unwrap();
        session
            .post(EventPayload::UserRequest {
                message: Message::user("what is 15 x 23?"),
            })
            .await
            .unwrap();

        let payloads = collect_payloads(&mut session).await;
        assert_eq!(payloads.len(), 3);
        assert!(matches!(payloads[0], EventPayload::ResponseStart { .. }));
        match &payloads[1] {
            EventPayload::AgentMessage { message } => {
                assert_eq!(message.text(), "15 × 23 = 345")
            }
            other => panic!("expected agent message, got {other:?}"),
        }
        assert!(matches!(
            payloads[2],
            EventPayload::ResponseEnd {
                finish_reason: FinishReason::NormalEnd,
                abort: false,
                error: None,
            }
        ));

        // Memory holds the user request and the assistant reply.
        let items = memory.retrieve(Retrieval::all()).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_message().unwrap().creator.role, Role::User);
        assert_eq!(items[1].as_message().unwrap().creator.role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let mut args = serde_json::Map::new();
        args.insert("timezone".into(), serde_json::json!("UTC"));
        let tool_turn = ChatResponse::terminal(
            Message::assistant(
                "m1",
                "test-model",
                "",
                vec![ToolCallPart::new("call_1", "current_time", args)],
            ),
            FinishReason::ToolUse,
            None,
        );
        let provider = ScriptedProvider::new(vec![tool_turn, final_text("It is midnight UTC.")]);
        let agent = agent_with(provider);

        let mut session = agent.run(CancellationToken::new()).unwrap();
        session
            .post(EventPayload::UserRequest {
                message: Message::user("what time is it?"),
            })
            .await
            .unwrap();

        let mut saw_tool_request = false;
        let mut payloads = Vec::new();
        while let Some(event) = session.next_event().await {
            if let EventPayload::ExternalAction {
                action: ExternalAction::ToolCall(call),
            } = &event.payload
            {
                saw_tool_request = true;
                assert_eq!(call.name, "current_time");
                let mut result = serde_json::Map::new();
                result.insert("current_time".into(), serde_json::json!("00:00"));
                session
                    .post(EventPayload::ToolCallResult {
                        result: ToolCallResultPart::new(call.id.clone(), call.name.clone(), result),
                    })
                    .await
                    .unwrap();
            }
            payloads.push(event.payload);
        }

        assert!(saw_tool_request);
        assert!(matches!(
            payloads.last(),
            Some(EventPayload::ResponseEnd {
                finish_reason: FinishReason::NormalEnd,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_cancellation_before_request() {
        let provider = ScriptedProvider::new(vec![]);
        let agent = agent_with(provider);

        let cancel = CancellationToken::new();
        let mut session = agent.run(cancel.clone()).unwrap();
        cancel.cancel();

        let payloads = collect_payloads(&mut session).await;
        assert!(matches!(
            payloads.last(),
            Some(EventPayload::ResponseEnd {
                finish_reason: FinishReason::Canceled,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_provider_error_aborts() {
        struct FailingProvider;
        impl ChatProvider for FailingProvider {
            fn name(&self) -> &str {
                "failing"
            }
            fn new_chat(&self, _s: &str, _m: &ModelInfo) -> Result<Box<dyn Chat>> {
                Ok(Box::new(FailingChat))
            }
        }
        struct FailingChat;
        #[async_trait]
        impl Chat for FailingChat {
            async fn send(
                &mut self,
                _cancel: &CancellationToken,
                _messages: &[Message],
                _options: &ChatOptions,
            ) -> Result<ChatStream> {
                Err(Error::unauthorized("bad key"))
            }
        }

        let agent = Agent::builder()
            .provider(Arc::new(FailingProvider))
            .model(ModelInfo::new("failing", "test-model"))
            .pattern(ChainOfThought::new())
            .build()
            .unwrap();

        let mut session = agent.run(CancellationToken::new()).unwrap();
        session
            .post(EventPayload::UserRequest {
                message: Message::user("hi"),
            })
            .await
            .unwrap();

        let payloads = collect_payloads(&mut session).await;
        match payloads.last() {
            Some(EventPayload::ResponseEnd {
                finish_reason: FinishReason::Error,
                abort: true,
                error: Some(error),
            }) => assert!(error.contains("bad key")),
            other => panic!("expected aborted end, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_builder_requires_provider_model_pattern() {
        assert!(Agent::builder().build().is_err());
        assert!(
            Agent::builder()
                .provider(ScriptedProvider::new(vec![]))
                .build()
                .is_err()
        );
    }
}
