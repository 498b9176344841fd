//! Anthropic messages-API adapter.
//!
//! Outbound, the normalized conversation maps onto the messages API:
//! system-role messages and the chat's system prompt collapse into the
//! `system` field, tool-role messages fold into user messages carrying
//! `tool_result` blocks, and binary parts become `image` or `document`
//! blocks (base64 for inline bytes, URL sources for references). Reasoning
//! models get a thinking budget sized from the requested effort.
//!
//! Inbound, the adapter mirrors the content-block stream protocol:
//! `content_block_start` opens a text/thinking/tool-use block,
//! `content_block_delta` extends it (`text_delta`, `thinking_delta`,
//! `input_json_delta`), `message_delta` carries the stop reason and output
//! tokens, and `message_stop` closes the stream. Text and thinking deltas
//! are emitted as they arrive; tool-use blocks surface on the terminal
//! response.

use crate::config::{KnownProvider, ProviderConfig};
use crate::message::{Message, Part, Role, ToolCallPart};
use crate::model::{Capability, ModelInfo, Registry};
use crate::provider::{
    Chat, ChatOptions, ChatProvider, ChatResponse, ChatStream, FinishReason, ReasoningEffort,
    Usage, once_stream,
};
use crate::providers::{classify_response, http_client, log_wire, parse_retry_after};
use crate::tool::ToolDescriptor;
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub(crate) const PROVIDER_NAME: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "type")]
    thinking_type: String,
    budget_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Vec<WireBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    Image {
        source: WireSource,
    },
    Document {
        source: WireSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    RedactedThinking {
        #[allow(dead_code)]
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// One SSE event of the content-block stream protocol.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: u32,
        content_block: ResponseBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: Value,
    },
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    SignatureDelta {
        #[allow(dead_code)]
        signature: String,
    },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

// ============================================================================
// OUTBOUND MAPPING
// ============================================================================

fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        // A stop sequence is still a natural completion.
        "end_turn" | "stop_sequence" => FinishReason::NormalEnd,
        "max_tokens" => FinishReason::MaxTokens,
        "tool_use" => FinishReason::ToolUse,
        "refusal" => FinishReason::Denied,
        _ => FinishReason::Unknown,
    }
}

fn thinking_budget(effort: ReasoningEffort) -> u32 {
    match effort {
        ReasoningEffort::Low => 2_048,
        ReasoningEffort::Medium => 8_192,
        ReasoningEffort::High => 16_384,
    }
}

fn wire_blocks(message: &Message) -> Vec<WireBlock> {
    let mut blocks = Vec::new();
    for part in &message.parts {
        match part {
            Part::Text(text) => blocks.push(WireBlock::Text {
                text: text.text.clone(),
            }),
            Part::Data(data) => blocks.push(WireBlock::Text { text: data.render() }),
            Part::Binary(binary) => {
                let source = if binary.is_inline() {
                    WireSource::Base64 {
                        media_type: binary.mime_type.clone(),
                        data: BASE64.encode(&binary.content),
                    }
                } else {
                    WireSource::Url {
                        url: binary.url.clone().unwrap_or_default(),
                    }
                };
                if binary.mime_type.starts_with("image/") {
                    blocks.push(WireBlock::Image { source });
                } else if binary.mime_type == "application/pdf"
                    || binary.mime_type.starts_with("text/")
                {
                    blocks.push(WireBlock::Document { source });
                } else {
                    blocks.push(WireBlock::Text {
                        text: format!(
                            "[attachment: {} ({}) {}]",
                            binary.name.as_deref().unwrap_or("unnamed"),
                            binary.mime_type,
                            binary.url.as_deref().unwrap_or("inline")
                        ),
                    });
                }
            }
            Part::ToolCall(call) => blocks.push(WireBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: Value::Object(call.arguments.clone()),
            }),
            Part::ToolCallResult(result) => blocks.push(WireBlock::ToolResult {
                tool_use_id: result.id.clone(),
                content: Value::Object(result.result.clone()).to_string(),
            }),
        }
    }
    blocks
}

/// Collapse system content and map the rest; the tool role folds into user
/// messages because this wire has no tool role.
fn build_request_parts(
    system_prompt: &str,
    messages: &[Message],
) -> (Option<String>, Vec<WireMessage>) {
    let mut system_texts: Vec<String> = Vec::new();
    if !system_prompt.is_empty() {
        system_texts.push(system_prompt.to_string());
    }

    let mut wire = Vec::new();
    for message in messages {
        match message.creator.role {
            Role::System => {
                let text = message.text();
                if !text.is_empty() {
                    system_texts.push(text);
                }
            }
            Role::User | Role::Tool => wire.push(WireMessage {
                role: "user".to_string(),
                content: wire_blocks(message),
            }),
            Role::Assistant => wire.push(WireMessage {
                role: "assistant".to_string(),
                content: wire_blocks(message),
            }),
        }
    }

    let system = if system_texts.is_empty() {
        None
    } else {
        Some(system_texts.join("\n"))
    };
    (system, wire)
}

fn wire_tools(descriptors: &[ToolDescriptor]) -> Result<Option<Vec<WireTool>>> {
    if descriptors.is_empty() {
        return Ok(None);
    }
    let mut tools = Vec::new();
    for descriptor in descriptors {
        tools.push(WireTool {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            input_schema: serde_json::to_value(&descriptor.parameters)?,
        });
    }
    Ok(Some(tools))
}

// ============================================================================
// INBOUND ACCUMULATION
// ============================================================================

#[derive(Debug)]
enum OpenBlock {
    Text,
    ToolUse {
        id: String,
        name: String,
        partial_json: String,
    },
}

/// Accumulator for the content-block stream protocol.
struct BlockAccumulator {
    model: String,
    open: HashMap<u32, OpenBlock>,
    tool_calls: Vec<ToolCallPart>,
    finish: Option<FinishReason>,
    input_tokens: Option<u32>,
    output_tokens: u32,
}

impl BlockAccumulator {
    fn new(model: String) -> Self {
        Self {
            model,
            open: HashMap::new(),
            tool_calls: Vec::new(),
            finish: None,
            input_tokens: None,
            output_tokens: 0,
        }
    }

    fn process(&mut self, event: StreamEvent) -> Result<Vec<ChatResponse>> {
        let mut out = Vec::new();
        match event {
            StreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.input_tokens = Some(usage.input_tokens);
                }
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ResponseBlock::Text { text } => {
                    if !text.is_empty() {
                        out.push(ChatResponse::text_delta(self.model.clone(), text));
                    }
                    self.open.insert(index, OpenBlock::Text);
                }
                ResponseBlock::Thinking { thinking } => {
                    if !thinking.is_empty() {
                        out.push(ChatResponse::text_delta(self.model.clone(), thinking));
                    }
                    self.open.insert(index, OpenBlock::Text);
                }
                ResponseBlock::RedactedThinking { .. } => {
                    self.open.insert(index, OpenBlock::Text);
                }
                ResponseBlock::ToolUse { id, name, .. } => {
                    self.open.insert(
                        index,
                        OpenBlock::ToolUse {
                            id,
                            name,
                            partial_json: String::new(),
                        },
                    );
                }
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => {
                    out.push(ChatResponse::text_delta(self.model.clone(), text));
                }
                BlockDelta::ThinkingDelta { thinking } => {
                    out.push(ChatResponse::text_delta(self.model.clone(), thinking));
                }
                BlockDelta::SignatureDelta { .. } => {}
                BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(OpenBlock::ToolUse {
                        partial_json: buffer,
                        ..
                    }) = self.open.get_mut(&index)
                    {
                        buffer.push_str(&partial_json);
                    }
                }
            },
            StreamEvent::ContentBlockStop { .. } => {}
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.finish = Some(map_stop_reason(&reason));
                }
                if let Some(usage) = usage {
                    // Output tokens arrive cumulative; keep the latest.
                    self.output_tokens = usage.output_tokens;
                }
            }
            StreamEvent::MessageStop | StreamEvent::Ping => {}
            StreamEvent::Error { error } => {
                return Err(Error::stream(error.to_string()));
            }
        }
        Ok(out)
    }

    fn close_tool_blocks(&mut self) -> Result<()> {
        let mut indexed: Vec<(u32, OpenBlock)> = self.open.drain().collect();
        indexed.sort_by_key(|(index, _)| *index);
        for (_, block) in indexed {
            if let OpenBlock::ToolUse {
                id,
                name,
                partial_json,
            } = block
            {
                let arguments = if partial_json.is_empty() {
                    serde_json::Map::new()
                } else {
                    match serde_json::from_str::<Value>(&partial_json) {
                        Ok(Value::Object(map)) => map,
                        Ok(_) => return Err(Error::stream("tool input is not an object")),
                        Err(e) => {
                            return Err(Error::stream(format!("failed to parse tool input: {e}")));
                        }
                    }
                };
                self.tool_calls.push(ToolCallPart::new(id, name, arguments));
            }
        }
        Ok(())
    }

    fn terminal(&mut self) -> Result<ChatResponse> {
        self.close_tool_blocks()?;
        let calls = std::mem::take(&mut self.tool_calls);
        let finish = if calls.is_empty() {
            self.finish.unwrap_or(FinishReason::Unknown)
        } else {
            FinishReason::ToolUse
        };
        let usage = self
            .input_tokens
            .map(|input| Usage::new(input, self.output_tokens));
        Ok(ChatResponse::terminal(
            Message::assistant(Uuid::new_v4().to_string(), self.model.clone(), "", calls),
            finish,
            usage,
        ))
    }
}

// ============================================================================
// PROVIDER
// ============================================================================

struct Backend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    debug: bool,
}

impl Backend {
    async fn post(&self, body: &MessagesRequest) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        if self.debug {
            log_wire(true, "request", &serde_json::to_string(body)?);
        }
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers());
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(classify_response(status, retry_after, body));
        }
        Ok(response)
    }
}

/// Anthropic chat provider.
pub struct AnthropicProvider {
    backend: Arc<Backend>,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = config
            .resolve_api_key(KnownProvider::Anthropic)
            .ok_or_else(|| Error::config("anthropic API key is not set"))?;
        Ok(Self {
            backend: Arc::new(Backend {
                client: http_client(config)?,
                base_url: config.resolve_base_url(KnownProvider::Anthropic),
                api_key,
                debug: config.debug,
            }),
        })
    }
}

impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn new_chat(&self, system_prompt: &str, model: &ModelInfo) -> Result<Box<dyn Chat>> {
        if !model.supports(Capability::Completion) {
            return Err(Error::feature_not_matched(format!(
                "model {} does not support completion",
                model.id
            )));
        }
        Ok(Box::new(AnthropicChat {
            backend: Arc::clone(&self.backend),
            system_prompt: system_prompt.to_string(),
            model: model.clone(),
        }))
    }
}

struct AnthropicChat {
    backend: Arc<Backend>,
    system_prompt: String,
    model: ModelInfo,
}

impl AnthropicChat {
    fn request(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        stream: bool,
    ) -> Result<MessagesRequest> {
        let (system, wire_messages) = build_request_parts(&self.system_prompt, messages);
        Ok(MessagesRequest {
            model: self.model.wire_name.clone(),
            max_tokens: options
                .max_completion_tokens
                .unwrap_or(self.model.default_max_tokens),
            messages: wire_messages,
            system,
            temperature: options.temperature,
            top_p: options.top_p,
            stream: stream.then_some(true),
            tools: wire_tools(&options.tools)?,
            thinking: options
                .reasoning_effort
                .filter(|_| self.model.supports(Capability::Reasoning))
                .map(|effort| ThinkingConfig {
                    thinking_type: "enabled".to_string(),
                    budget_tokens: thinking_budget(effort),
                }),
        })
    }

    async fn send_streaming(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatStream> {
        let request = self.request(messages, options, true)?;
        let response = self.backend.post(&request).await?;

        let mut accumulator = BlockAccumulator::new(self.model.wire_name.clone());
        let mut done = false;
        let stream = response
            .bytes_stream()
            .eventsource()
            .scan((), move |_, item| {
                let out: Vec<Result<ChatResponse>> = if done {
                    Vec::new()
                } else {
                    match item {
                        Ok(event) => match serde_json::from_str::<StreamEvent>(&event.data) {
                            Ok(StreamEvent::MessageStop) => {
                                done = true;
                                vec![accumulator.terminal()]
                            }
                            Ok(parsed) => match accumulator.process(parsed) {
                                Ok(responses) => responses.into_iter().map(Ok).collect(),
                                Err(e) => {
                                    done = true;
                                    vec![Err(e)]
                                }
                            },
                            Err(e) => {
                                done = true;
                                vec![Err(Error::stream(format!("failed to parse event: {e}")))]
                            }
                        },
                        Err(e) => {
                            done = true;
                            vec![Err(Error::stream(e.to_string()))]
                        }
                    }
                };
                futures::future::ready(Some(futures::stream::iter(out)))
            })
            .flatten()
            .take_until(cancel.clone().cancelled_owned());

        Ok(Box::pin(stream))
    }

    async fn send_oneshot(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatStream> {
        let request = self.request(messages, options, false)?;
        let response = self.backend.post(&request).await?;
        let body: MessagesResponse = response.json().await?;

        let mut text = String::new();
        let mut calls = Vec::new();
        for block in body.content {
            match block {
                ResponseBlock::Text { text: t } => text.push_str(&t),
                ResponseBlock::Thinking { thinking } => text.push_str(&thinking),
                ResponseBlock::RedactedThinking { .. } => {}
                ResponseBlock::ToolUse { id, name, input } => {
                    let arguments = match input {
                        Value::Object(map) => map,
                        Value::Null => serde_json::Map::new(),
                        _ => return Err(Error::stream("tool input is not an object")),
                    };
                    calls.push(ToolCallPart::new(id, name, arguments));
                }
            }
        }

        let finish = if calls.is_empty() {
            body.stop_reason
                .as_deref()
                .map(map_stop_reason)
                .unwrap_or(FinishReason::Unknown)
        } else {
            FinishReason::ToolUse
        };

        Ok(once_stream(ChatResponse::terminal(
            Message::assistant(
                Uuid::new_v4().to_string(),
                self.model.wire_name.clone(),
                text,
                calls,
            ),
            finish,
            body.usage
                .map(|u| Usage::new(u.input_tokens, u.output_tokens)),
        )))
    }
}

#[async_trait]
impl Chat for AnthropicChat {
    async fn send(
        &mut self,
        cancel: &CancellationToken,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatStream> {
        if options.streaming {
            self.send_streaming(cancel, messages, options).await
        } else {
            self.send_oneshot(messages, options).await
        }
    }
}

fn stock_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo::new(PROVIDER_NAME, "claude-sonnet-4-5")
            .with_name("Claude Sonnet 4.5")
            .with_context_window(200_000)
            .with_default_max_tokens(8_192)
            .with_capabilities(vec![
                Capability::Completion,
                Capability::Reasoning,
                Capability::Attachment,
            ])
            .with_costs(3.0, 15.0),
        ModelInfo::new(PROVIDER_NAME, "claude-haiku-4-5")
            .with_name("Claude Haiku 4.5")
            .with_context_window(200_000)
            .with_default_max_tokens(8_192)
            .with_capabilities(vec![Capability::Completion, Capability::Attachment])
            .with_costs(1.0, 5.0),
    ]
}

/// Register this adapter's provider and stock models.
pub fn register(registry: &Registry) -> Result<()> {
    registry.register_chat_provider(PROVIDER_NAME, |config| {
        Ok(Arc::new(AnthropicProvider::new(config)?) as Arc<dyn ChatProvider>)
    })?;
    for model in stock_models() {
        registry.register_model(model)?;
    }
    Ok(())
}
