//! OpenAI chat-completions adapter.
//!
//! Covers api.openai.com and every server speaking the same wire format
//! (LM Studio, Ollama, llama.cpp, vLLM). Handles both directions of the
//! mapping:
//!
//! - **Outbound**: system-role messages plus the chat's system prompt
//!   collapse into one leading system message; binary image parts become
//!   `image_url` content parts (data URIs for inline bytes); other
//!   attachments degrade to a short textual stub; tool descriptors are
//!   sanitized for the function-calling schema dialect (object schemas must
//!   carry a properties map, `integer` coerces to `number`).
//! - **Inbound**: streamed chunks arrive as SSE; text deltas are emitted as
//!   they come, and tool calls are assembled index-by-index from interleaved
//!   deltas, only surfacing on the terminal response together with the
//!   finish reason and usage.
//!
//! Tool call arguments stream as JSON fragments that may split at arbitrary
//! byte positions, so they are accumulated as raw strings and parsed only at
//! stream end.

use crate::config::{KnownProvider, ProviderConfig};
use crate::message::{Message, Part, Role, ToolCallPart};
use crate::model::{Capability, ModelInfo, Registry};
use crate::provider::{
    Chat, ChatOptions, ChatProvider, ChatResponse, ChatStream, EmbedderProvider, Embeddings,
    FinishReason, Usage, once_stream,
};
use crate::providers::{classify_response, http_client, log_wire, parse_retry_after};
use crate::tool::{ParameterProperty, ParametersSchema, ToolDescriptor};
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

pub(crate) const PROVIDER_NAME: &str = "openai";

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    content: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    tool_call_id: Option<String>,
}

/// Text-only content serializes as a bare string for backward compatibility;
/// multi-modal content uses the parts array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// Arguments as a JSON-encoded string, per the wire format.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireToolFunction,
}

#[derive(Debug, Serialize)]
struct WireToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

// ============================================================================
// OUTBOUND MAPPING
// ============================================================================

fn map_finish(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::NormalEnd,
        "length" => FinishReason::MaxTokens,
        "tool_calls" | "function_call" => FinishReason::ToolUse,
        "content_filter" => FinishReason::Denied,
        _ => FinishReason::Unknown,
    }
}

fn wire_tool_calls(calls: &[&ToolCallPart]) -> Vec<WireToolCall> {
    calls
        .iter()
        .map(|call| WireToolCall {
            id: call.id.clone(),
            call_type: "function".to_string(),
            function: WireFunction {
                name: call.name.clone(),
                arguments: Value::Object(call.arguments.clone()).to_string(),
            },
        })
        .collect()
}

/// Flatten one normalized message's parts into wire content. Image binaries
/// become `image_url` parts; everything else binary becomes a textual stub.
fn wire_content(message: &Message) -> Option<WireContent> {
    let mut parts: Vec<WirePart> = Vec::new();
    let mut plain = true;

    for part in &message.parts {
        match part {
            Part::Text(text) => parts.push(WirePart::Text {
                text: text.text.clone(),
            }),
            Part::Data(data) => parts.push(WirePart::Text { text: data.render() }),
            Part::Binary(binary) => {
                if binary.mime_type.starts_with("image/") {
                    let url = if binary.is_inline() {
                        format!(
                            "data:{};base64,{}",
                            binary.mime_type,
                            BASE64.encode(&binary.content)
                        )
                    } else {
                        binary.url.clone().unwrap_or_default()
                    };
                    parts.push(WirePart::ImageUrl {
                        image_url: ImageUrl { url },
                    });
                    plain = false;
                } else {
                    // No document blocks on this wire; degrade to a stub.
                    parts.push(WirePart::Text {
                        text: format!(
                            "[attachment: {} ({}) {}]",
                            binary.name.as_deref().unwrap_or("unnamed"),
                            binary.mime_type,
                            binary.url.as_deref().unwrap_or("inline")
                        ),
                    });
                }
            }
            Part::ToolCall(_) | Part::ToolCallResult(_) => {}
        }
    }

    if parts.is_empty() {
        return None;
    }
    if plain {
        let text: String = parts
            .iter()
            .map(|p| match p {
                WirePart::Text { text } => text.as_str(),
                WirePart::ImageUrl { .. } => "",
            })
            .collect::<Vec<_>>()
            .join("\n");
        return Some(WireContent::Text(text));
    }
    Some(WireContent::Parts(parts))
}

/// Build the wire message list: one leading system message collapsing the
/// chat's system prompt and every system-role message, then the rest in
/// order.
fn build_wire_messages(system_prompt: &str, messages: &[Message]) -> Vec<WireMessage> {
    let mut wire = Vec::new();

    let mut system_texts: Vec<String> = Vec::new();
    if !system_prompt.is_empty() {
        system_texts.push(system_prompt.to_string());
    }
    for message in messages {
        if message.creator.role == Role::System {
            let text = message.text();
            if !text.is_empty() {
                system_texts.push(text);
            }
        }
    }
    if !system_texts.is_empty() {
        wire.push(WireMessage {
            role: "system".to_string(),
            content: Some(WireContent::Text(system_texts.join("\n"))),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for message in messages {
        match message.creator.role {
            Role::System => {}
            Role::User => wire.push(WireMessage {
                role: "user".to_string(),
                content: wire_content(message),
                tool_calls: None,
                tool_call_id: None,
            }),
            Role::Assistant => {
                let calls = message.tool_calls();
                wire.push(WireMessage {
                    role: "assistant".to_string(),
                    content: wire_content(message),
                    tool_calls: if calls.is_empty() {
                        None
                    } else {
                        Some(wire_tool_calls(&calls))
                    },
                    tool_call_id: None,
                });
            }
            // One wire message per tool-call result, correlated by id.
            Role::Tool => {
                for result in message.tool_call_results() {
                    wire.push(WireMessage {
                        role: "tool".to_string(),
                        content: Some(WireContent::Text(
                            Value::Object(result.result.clone()).to_string(),
                        )),
                        tool_calls: None,
                        tool_call_id: Some(result.id.clone()),
                    });
                }
            }
        }
    }

    wire
}

/// Sanitize one schema node for this wire's function-calling dialect:
/// `integer` coerces to `number`, and object schemas always carry a
/// (possibly empty) properties map.
fn sanitize_property(property: &ParameterProperty) -> Value {
    let mut node = serde_json::Map::new();
    let kind = if property.property_type == "integer" {
        "number"
    } else {
        property.property_type.as_str()
    };
    node.insert("type".to_string(), Value::String(kind.to_string()));
    if let Some(description) = &property.description {
        node.insert(
            "description".to_string(),
            Value::String(description.clone()),
        );
    }
    if let Some(items) = &property.items {
        node.insert("items".to_string(), sanitize_property(items));
    }
    if kind == "object" || property.properties.is_some() {
        let mut properties = serde_json::Map::new();
        if let Some(fields) = &property.properties {
            for (name, field) in fields {
                properties.insert(name.clone(), sanitize_property(field));
            }
        }
        node.insert("properties".to_string(), Value::Object(properties));
        if let Some(required) = &property.required {
            node.insert(
                "required".to_string(),
                Value::Array(required.iter().cloned().map(Value::String).collect()),
            );
        }
    }
    Value::Object(node)
}

fn sanitize_parameters(schema: &ParametersSchema) -> Value {
    let mut node = serde_json::Map::new();
    node.insert("type".to_string(), Value::String("object".to_string()));
    let mut properties = serde_json::Map::new();
    for (name, property) in &schema.properties {
        properties.insert(name.clone(), sanitize_property(property));
    }
    node.insert("properties".to_string(), Value::Object(properties));
    node.insert(
        "required".to_string(),
        Value::Array(schema.required.iter().cloned().map(Value::String).collect()),
    );
    Value::Object(node)
}

fn wire_tools(descriptors: &[ToolDescriptor]) -> Option<Vec<WireTool>> {
    if descriptors.is_empty() {
        return None;
    }
    Some(
        descriptors
            .iter()
            .map(|descriptor| WireTool {
                tool_type: "function".to_string(),
                function: WireToolFunction {
                    name: descriptor.name.clone(),
                    description: descriptor.description.clone(),
                    parameters: sanitize_parameters(&descriptor.parameters),
                },
            })
            .collect(),
    )
}

// ============================================================================
// INBOUND ACCUMULATION
// ============================================================================

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Stateful accumulator mirroring the chunked stream protocol: text deltas
/// are emitted as they arrive, tool calls are assembled per index and only
/// surface on the terminal response.
struct ChunkAccumulator {
    model: String,
    tool_calls: HashMap<u32, PartialToolCall>,
    finish: Option<FinishReason>,
    prompt_tokens: Option<u32>,
    completion_tokens: u32,
}

impl ChunkAccumulator {
    fn new(model: String) -> Self {
        Self {
            model,
            tool_calls: HashMap::new(),
            finish: None,
            prompt_tokens: None,
            completion_tokens: 0,
        }
    }

    fn process_chunk(&mut self, chunk: StreamChunk) -> Vec<ChatResponse> {
        let mut out = Vec::new();

        if let Some(usage) = chunk.usage {
            // Prompt tokens from the first chunk that carries them; completion
            // tokens summed across chunks.
            if self.prompt_tokens.is_none() {
                self.prompt_tokens = Some(usage.prompt_tokens);
            }
            self.completion_tokens += usage.completion_tokens;
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    out.push(ChatResponse::text_delta(self.model.clone(), content));
                }
            }

            if let Some(deltas) = choice.delta.tool_calls {
                for delta in deltas {
                    let entry = self.tool_calls.entry(delta.index).or_default();
                    if let Some(id) = delta.id {
                        entry.id = Some(id);
                    }
                    if let Some(function) = delta.function {
                        if let Some(name) = function.name {
                            entry.name = Some(name);
                        }
                        if let Some(arguments) = function.arguments {
                            entry.arguments.push_str(&arguments);
                        }
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.finish = Some(map_finish(&reason));
            }
        }

        out
    }

    fn terminal(&mut self) -> Result<ChatResponse> {
        let mut indexed: Vec<(u32, PartialToolCall)> = self.tool_calls.drain().collect();
        indexed.sort_by_key(|(index, _)| *index);

        let mut calls = Vec::new();
        for (_, partial) in indexed {
            let (Some(id), Some(name)) = (partial.id, partial.name) else {
                // Incomplete deltas; nothing usable to dispatch.
                continue;
            };
            let arguments = if partial.arguments.is_empty() {
                serde_json::Map::new()
            } else {
                match serde_json::from_str::<Value>(&partial.arguments) {
                    Ok(Value::Object(map)) => map,
                    Ok(_) => {
                        return Err(Error::stream("tool arguments are not an object"));
                    }
                    Err(e) => {
                        return Err(Error::stream(format!("failed to parse tool arguments: {e}")));
                    }
                }
            };
            calls.push(ToolCallPart::new(id, name, arguments));
        }

        let finish = if calls.is_empty() {
            self.finish.unwrap_or(FinishReason::Unknown)
        } else {
            FinishReason::ToolUse
        };
        let usage = self
            .prompt_tokens
            .map(|prompt| Usage::new(prompt, self.completion_tokens));

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

/// Shared adapter state (HTTP client, endpoint, credentials).
struct Backend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    debug: bool,
}

impl Backend {
    async fn post(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        if self.debug {
            log_wire(true, "request", &serde_json::to_string(body)?);
        }
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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

/// OpenAI-wire chat and embedder provider.
pub struct OpenAiProvider {
    backend: Arc<Backend>,
    name: String,
}

impl OpenAiProvider {
    /// Construct from a [`ProviderConfig`], resolving the endpoint and key
    /// against the OpenAI environment variables. Local servers commonly run
    /// keyless, so a missing key degrades to a placeholder.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            backend: Arc::new(Backend {
                client: http_client(config)?,
                base_url: config.resolve_base_url(KnownProvider::OpenAi),
                api_key: config
                    .resolve_api_key(KnownProvider::OpenAi)
                    .unwrap_or_else(|| "not-needed".to_string()),
                debug: config.debug,
            }),
            name: PROVIDER_NAME.to_string(),
        })
    }

    fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Same adapter pointed at a compatible endpoint, under a different
    /// registry name. Used by the compat shim.
    pub(crate) fn compatible(config: &ProviderConfig, name: &str) -> Result<Self> {
        Ok(Self::new(config)?.with_name(name))
    }
}

impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn new_chat(&self, system_prompt: &str, model: &ModelInfo) -> Result<Box<dyn Chat>> {
        if !model.supports(Capability::Completion) {
            return Err(Error::feature_not_matched(format!(
                "model {} does not support completion",
                model.id
            )));
        }
        Ok(Box::new(OpenAiChat {
            backend: Arc::clone(&self.backend),
            system_prompt: system_prompt.to_string(),
            model: model.clone(),
        }))
    }
}

struct OpenAiChat {
    backend: Arc<Backend>,
    system_prompt: String,
    model: ModelInfo,
}

impl OpenAiChat {
    fn request(&self, messages: &[Message], options: &ChatOptions, stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.model.wire_name.clone(),
            messages: build_wire_messages(&self.system_prompt, messages),
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
            max_tokens: Some(
                options
                    .max_completion_tokens
                    .unwrap_or(self.model.default_max_tokens),
            ),
            temperature: options.temperature,
            top_p: options.top_p,
            frequency_penalty: options.frequency_penalty,
            presence_penalty: options.presence_penalty,
            reasoning_effort: options
                .reasoning_effort
                .filter(|_| self.model.supports(Capability::Reasoning))
                .map(|effort| effort.as_str().to_string()),
            tools: wire_tools(&options.tools),
        }
    }

    async fn send_streaming(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatStream> {
        let request = self.request(messages, options, true);
        let response = self.backend.post("/chat/completions", &request).await?;

        let mut accumulator = ChunkAccumulator::new(self.model.wire_name.clone());
        let mut done = false;
        let stream = response
            .bytes_stream()
            .eventsource()
            .scan((), move |_, item| {
                let out: Vec<Result<ChatResponse>> = if done {
                    Vec::new()
                } else {
                    match item {
                        Ok(event) if event.data.trim() == "[DONE]" => {
                            done = true;
                            vec![accumulator.terminal()]
                        }
                        Ok(event) => match serde_json::from_str::<StreamChunk>(&event.data) {
                            Ok(chunk) => accumulator
                                .process_chunk(chunk)
                                .into_iter()
                                .map(Ok)
                                .collect(),
                            Err(e) => {
                                done = true;
                                vec![Err(Error::stream(format!("failed to parse chunk: {e}")))]
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
        let request = self.request(messages, options, false);
        let response = self.backend.post("/chat/completions", &request).await?;
        let completion: Completion = response.json().await?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::ChatSession("response carried no choices".to_string()))?;

        let mut calls = Vec::new();
        for call in choice.message.tool_calls.unwrap_or_default() {
            let arguments = if call.function.arguments.is_empty() {
                serde_json::Map::new()
            } else {
                match serde_json::from_str::<Value>(&call.function.arguments)? {
                    Value::Object(map) => map,
                    _ => return Err(Error::stream("tool arguments are not an object")),
                }
            };
            calls.push(ToolCallPart::new(call.id, call.function.name, arguments));
        }

        let finish = if calls.is_empty() {
            choice
                .finish_reason
                .as_deref()
                .map(map_finish)
                .unwrap_or(FinishReason::Unknown)
        } else {
            FinishReason::ToolUse
        };

        Ok(once_stream(ChatResponse::terminal(
            Message::assistant(
                Uuid::new_v4().to_string(),
                self.model.wire_name.clone(),
                choice.message.content.unwrap_or_default(),
                calls,
            ),
            finish,
            completion
                .usage
                .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens)),
        )))
    }
}

#[async_trait]
impl Chat for OpenAiChat {
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

#[async_trait]
impl EmbedderProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embeddings(
        &self,
        cancel: &CancellationToken,
        texts: &[String],
    ) -> Result<Embeddings> {
        if texts.is_empty() {
            return Err(Error::invalid_input("no texts to embed"));
        }
        let model = "text-embedding-3-small";
        let request = EmbeddingsRequest {
            model,
            input: texts,
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::cancelled("embeddings aborted")),
            response = self.backend.post("/embeddings", &request) => response?,
        };
        let body: EmbeddingsResponse = response.json().await?;

        if body.data.len() != texts.len() {
            return Err(Error::EmbeddingSession(format!(
                "expected {} vectors, got {}",
                texts.len(),
                body.data.len()
            )));
        }

        Ok(Embeddings {
            model: model.to_string(),
            vectors: body.data.into_iter().map(|row| row.embedding).collect(),
            usage: body
                .usage
                .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens)),
        })
    }
}

/// Stock models served through this adapter.
fn stock_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo::new(PROVIDER_NAME, "gpt-4o")
            .with_name("GPT-4o")
            .with_context_window(128_000)
            .with_default_max_tokens(16_384)
            .with_capabilities(vec![Capability::Completion, Capability::Attachment])
            .with_costs(2.5, 10.0),
        ModelInfo::new(PROVIDER_NAME, "gpt-4o-mini")
            .with_name("GPT-4o mini")
            .with_context_window(128_000)
            .with_default_max_tokens(16_384)
            .with_capabilities(vec![Capability::Completion, Capability::Attachment])
            .with_costs(0.15, 0.6),
        ModelInfo::new(PROVIDER_NAME, "o3-mini")
            .with_name("o3-mini")
            .with_context_window(200_000)
            .with_default_max_tokens(100_000)
            .with_capabilities(vec![Capability::Completion, Capability::Reasoning])
            .with_costs(1.1, 4.4),
        ModelInfo::new(PROVIDER_NAME, "text-embedding-3-small")
            .with_name("Text Embedding 3 Small")
            .with_context_window(8_192)
            .with_capabilities(vec![Capability::Embedding])
            .with_costs(0.02, 0.0),
    ]
}

/// Register this adapter's providers and stock models.
pub fn register(registry: &Registry) -> Result<()> {
    registry.register_chat_provider(PROVIDER_NAME, |config| {
        Ok(Arc::new(OpenAiProvider::new(config)?) as Arc<dyn ChatProvider>)
    })?;
    registry.register_embedder_provider(PROVIDER_NAME, |config| {
        Ok(Arc::new(OpenAiProvider::new(config)?) as Arc<dyn EmbedderProvider>)
    })?;
    for model in stock_models() {
        registry.register_model(model)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{BinaryPart, Creator};
    use crate::tool::{Tool, tool};
    use serde_json::json;

    fn chunk(value: Value) -> StreamChunk {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_system_messages_collapse_in_order() {
        let messages = vec![
            Message::system("first rule"),
            Message::user("hi"),
            Message::system("second rule"),
        ];
        let wire = build_wire_messages("base prompt", &messages);

        assert_eq!(wire[0].role, "system");
        match &wire[0].content {
            Some(WireContent::Text(text)) => {
                assert_eq!(text, "base prompt\nfirst rule\nsecond rule")
            }
            _ => panic!("expected text content"),
        }
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[1].role, "user");
    }

    #[test]
    fn test_tool_result_becomes_tool_message() {
        let result = crate::message::ToolCallResultPart::new(
            "call_1",
            "clock",
            serde_json::from_value(json!({"time": "12:00"})).unwrap(),
        );
        let messages = vec![Message::tool_result(result, chrono::Utc::now())];
        let wire = build_wire_messages("", &messages);

        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "tool");
        assert_eq!(wire[0].tool_call_id.as_deref(), Some("call_1"));
        match &wire[0].content {
            Some(WireContent::Text(text)) => assert!(text.contains("12:00")),
            _ => panic!("expected text content"),
        }
    }

    #[test]
    fn test_inline_image_becomes_data_uri_part() {
        let message = Message::new(
            Creator::new(Role::User),
            vec![
                Part::text("look at this"),
                Part::Binary(BinaryPart::inline(None, "image/png", vec![1, 2, 3])),
            ],
        );
        let wire = build_wire_messages("", &[message]);

        match &wire[0].content {
            Some(WireContent::Parts(parts)) => {
                assert_eq!(parts.len(), 2);
                match &parts[1] {
                    WirePart::ImageUrl { image_url } => {
                        assert!(image_url.url.starts_with("data:image/png;base64,"));
                    }
                    _ => panic!("expected image part"),
                }
            }
            _ => panic!("expected parts content"),
        }
    }

    #[test]
    fn test_unknown_mime_becomes_stub() {
        let message = Message::new(
            Creator::new(Role::User),
            vec![Part::Binary(BinaryPart::reference(
                Some("report.xlsx".into()),
                "application/vnd.ms-excel",
                "https://example.com/report.xlsx",
            ))],
        );
        let wire = build_wire_messages("", &[message]);
        match &wire[0].content {
            Some(WireContent::Text(text)) => {
                assert!(text.contains("report.xlsx"));
                assert!(text.contains("https://example.com/report.xlsx"));
            }
            _ => panic!("expected stub text"),
        }
    }

    #[test]
    fn test_schema_sanitation_integer_and_properties() {
        let descriptor = tool("t", "d")
            .param("count", "integer")
            .typed_param(
                "config",
                ParameterProperty::object(Default::default(), Vec::new()),
            )
            .build(|_| async { Ok(json!({})) })
            .descriptor();

        let tools = wire_tools(&[descriptor]).unwrap();
        let parameters = &tools[0].function.parameters;

        assert_eq!(parameters["properties"]["count"]["type"], "number");
        // Object schemas must carry a properties map, even when empty.
        assert_eq!(
            parameters["properties"]["config"]["properties"],
            json!({})
        );
        assert_eq!(parameters["type"], "object");
    }

    #[test]
    fn test_accumulator_emits_text_deltas_immediately() {
        let mut acc = ChunkAccumulator::new("m".into());
        let out = acc.process_chunk(chunk(json!({
            "choices": [{"delta": {"content": "Hello "}, "finish_reason": null}]
        })));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message.text(), "Hello ");
        assert!(!out[0].is_final());
    }

    #[test]
    fn test_accumulator_assembles_interleaved_tool_calls() {
        let mut acc = ChunkAccumulator::new("m".into());
        acc.process_chunk(chunk(json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_a", "function": {"name": "search", "arguments": "{\"q\""}},
                {"index": 1, "id": "call_b", "function": {"name": "calc", "arguments": "{\"expr\""}}
            ]}, "finish_reason": null}]
        })));
        acc.process_chunk(chunk(json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 1, "function": {"arguments": "\":\"2+2\"}"}},
                {"index": 0, "function": {"arguments": "\":\"rust\"}"}}
            ]}, "finish_reason": "tool_calls"}]
        })));

        let terminal = acc.terminal().unwrap();
        assert_eq!(terminal.finish_reason, Some(FinishReason::ToolUse));
        let calls = terminal.message.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments["q"], "rust");
        assert_eq!(calls[1].arguments["expr"], "2+2");
    }

    #[test]
    fn test_accumulator_usage_and_finish_mapping() {
        let mut acc = ChunkAccumulator::new("m".into());
        acc.process_chunk(chunk(json!({
            "choices": [{"delta": {"content": "x"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        })));
        acc.process_chunk(chunk(json!({
            "choices": [],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4}
        })));

        let terminal = acc.terminal().unwrap();
        assert_eq!(terminal.finish_reason, Some(FinishReason::NormalEnd));
        assert_eq!(terminal.usage, Some(Usage::new(12, 7)));
    }

    #[test]
    fn test_accumulator_rejects_malformed_arguments() {
        let mut acc = ChunkAccumulator::new("m".into());
        acc.process_chunk(chunk(json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_a", "function": {"name": "search", "arguments": "{not json"}}
            ]}, "finish_reason": "tool_calls"}]
        })));
        assert!(matches!(acc.terminal(), Err(Error::Stream(_))));
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(map_finish("stop"), FinishReason::NormalEnd);
        assert_eq!(map_finish("length"), FinishReason::MaxTokens);
        assert_eq!(map_finish("tool_calls"), FinishReason::ToolUse);
        assert_eq!(map_finish("content_filter"), FinishReason::Denied);
        assert_eq!(map_finish("whatever"), FinishReason::Unknown);
    }

    #[test]
    fn test_new_chat_requires_completion_capability() {
        let provider = OpenAiProvider::new(&ProviderConfig::new()).unwrap();
        let embedding_only = ModelInfo::new(PROVIDER_NAME, "text-embedding-3-small")
            .with_capabilities(vec![Capability::Embedding]);
        assert!(matches!(
            provider.new_chat("", &embedding_only),
            Err(Error::FeatureNotMatched(_))
        ));
    }
}
