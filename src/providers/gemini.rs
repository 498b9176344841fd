//! Google Gemini generateContent adapter.
//!
//! Outbound, system content moves to `systemInstruction`, assistant turns
//! take the `model` role, and the tool role folds into user turns carrying
//! `functionResponse` parts (this wire pairs results by function name, not
//! id). Inline binaries become `inlineData` parts; references become
//! `fileData`.
//!
//! Inbound, streaming uses `streamGenerateContent` with `alt=sse`: each SSE
//! event is a complete response chunk whose candidate parts carry text
//! deltas or function calls. Function calls arrive without ids, so the
//! adapter synthesizes them to keep the call/result pairing invariant
//! intact. Finish reasons map `STOP` to a normal end and `SAFETY`/
//! `RECITATION` to denial; usage sums candidate tokens across chunks on top
//! of the first reported prompt count.

use crate::config::{KnownProvider, ProviderConfig};
use crate::message::{Message, Part, Role, ToolCallPart};
use crate::model::{Capability, ModelInfo, Registry};
use crate::provider::{
    Chat, ChatOptions, ChatProvider, ChatResponse, ChatStream, EmbedderProvider, Embeddings,
    FinishReason, Usage, once_stream,
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
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub(crate) const PROVIDER_NAME: &str = "gemini";
const EMBEDDING_MODEL: &str = "text-embedding-004";

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTools>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum WirePart {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "inlineData")]
    InlineData(InlineData),
    #[serde(rename = "fileData")]
    FileData(FileData),
    #[serde(rename = "functionCall")]
    FunctionCall(FunctionCall),
    #[serde(rename = "functionResponse")]
    FunctionResponse(FunctionResponse),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTools {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: WireContent,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

// ============================================================================
// OUTBOUND MAPPING
// ============================================================================

fn map_finish(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::NormalEnd,
        "MAX_TOKENS" => FinishReason::MaxTokens,
        "SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" | "BLOCKLIST" => FinishReason::Denied,
        _ => FinishReason::Unknown,
    }
}

fn wire_parts(message: &Message) -> Vec<WirePart> {
    let mut parts = Vec::new();
    for part in &message.parts {
        match part {
            Part::Text(text) => parts.push(WirePart::Text(text.text.clone())),
            Part::Data(data) => parts.push(WirePart::Text(data.render())),
            Part::Binary(binary) => {
                if binary.is_inline() {
                    parts.push(WirePart::InlineData(InlineData {
                        mime_type: binary.mime_type.clone(),
                        data: BASE64.encode(&binary.content),
                    }));
                } else if let Some(url) = &binary.url {
                    parts.push(WirePart::FileData(FileData {
                        mime_type: binary.mime_type.clone(),
                        file_uri: url.clone(),
                    }));
                }
            }
            Part::ToolCall(call) => parts.push(WirePart::FunctionCall(FunctionCall {
                name: call.name.clone(),
                args: Value::Object(call.arguments.clone()),
            })),
            Part::ToolCallResult(result) => {
                parts.push(WirePart::FunctionResponse(FunctionResponse {
                    name: result.name.clone(),
                    response: Value::Object(result.result.clone()),
                }));
            }
        }
    }
    parts
}

fn build_request_parts(
    system_prompt: &str,
    messages: &[Message],
) -> (Option<WireContent>, Vec<WireContent>) {
    let mut system_texts: Vec<String> = Vec::new();
    if !system_prompt.is_empty() {
        system_texts.push(system_prompt.to_string());
    }

    let mut contents = Vec::new();
    for message in messages {
        match message.creator.role {
            Role::System => {
                let text = message.text();
                if !text.is_empty() {
                    system_texts.push(text);
                }
            }
            Role::User | Role::Tool => contents.push(WireContent {
                role: Some("user".to_string()),
                parts: wire_parts(message),
            }),
            Role::Assistant => contents.push(WireContent {
                role: Some("model".to_string()),
                parts: wire_parts(message),
            }),
        }
    }

    let system_instruction = if system_texts.is_empty() {
        None
    } else {
        Some(WireContent {
            role: None,
            parts: vec![WirePart::Text(system_texts.join("\n"))],
        })
    };
    (system_instruction, contents)
}

fn wire_tools(descriptors: &[ToolDescriptor]) -> Result<Option<Vec<WireTools>>> {
    if descriptors.is_empty() {
        return Ok(None);
    }
    let mut declarations = Vec::new();
    for descriptor in descriptors {
        declarations.push(FunctionDeclaration {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            parameters: serde_json::to_value(&descriptor.parameters)?,
        });
    }
    Ok(Some(vec![WireTools {
        function_declarations: declarations,
    }]))
}

// ============================================================================
// INBOUND ACCUMULATION
// ============================================================================

/// Accumulator over streamed response chunks.
struct ChunkAccumulator {
    model: String,
    tool_calls: Vec<ToolCallPart>,
    finish: Option<FinishReason>,
    prompt_tokens: Option<u32>,
    candidate_tokens: u32,
}

impl ChunkAccumulator {
    fn new(model: String) -> Self {
        Self {
            model,
            tool_calls: Vec::new(),
            finish: None,
            prompt_tokens: None,
            candidate_tokens: 0,
        }
    }

    fn process(&mut self, chunk: GenerateResponse) -> Result<Vec<ChatResponse>> {
        let mut out = Vec::new();

        if let Some(usage) = chunk.usage_metadata {
            if self.prompt_tokens.is_none() && usage.prompt_token_count > 0 {
                self.prompt_tokens = Some(usage.prompt_token_count);
            }
            self.candidate_tokens += usage.candidates_token_count;
        }

        for candidate in chunk.candidates {
            if let Some(content) = candidate.content {
                for part in content.parts {
                    match part {
                        WirePart::Text(text) => {
                            if !text.is_empty() {
                                out.push(ChatResponse::text_delta(self.model.clone(), text));
                            }
                        }
                        WirePart::FunctionCall(call) => {
                            let arguments = match call.args {
                                Value::Object(map) => map,
                                Value::Null => serde_json::Map::new(),
                                _ => {
                                    return Err(Error::stream(
                                        "function call args are not an object",
                                    ));
                                }
                            };
                            // This wire carries no call ids; synthesize one so
                            // results can pair up downstream.
                            self.tool_calls.push(ToolCallPart::new(
                                Uuid::new_v4().to_string(),
                                call.name,
                                arguments,
                            ));
                        }
                        _ => {}
                    }
                }
            }
            if let Some(reason) = candidate.finish_reason {
                self.finish = Some(map_finish(&reason));
            }
        }

        Ok(out)
    }

    fn terminal(&mut self) -> Result<ChatResponse> {
        let calls = std::mem::take(&mut self.tool_calls);
        let finish = if calls.is_empty() {
            self.finish.unwrap_or(FinishReason::Unknown)
        } else {
            FinishReason::ToolUse
        };
        let usage = self
            .prompt_tokens
            .map(|prompt| Usage::new(prompt, self.candidate_tokens));
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
    async fn post(&self, path_and_query: &str, body: &impl Serialize) -> Result<reqwest::Response> {
        let separator = if path_and_query.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}/{}{}key={}",
            self.base_url.trim_end_matches('/'),
            path_and_query,
            separator,
            self.api_key
        );
        if self.debug {
            log_wire(true, "request", &serde_json::to_string(body)?);
        }
        let response = self
            .client
            .post(&url)
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

/// Gemini chat and embedder provider.
pub struct GeminiProvider {
    backend: Arc<Backend>,
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = config
            .resolve_api_key(KnownProvider::Gemini)
            .ok_or_else(|| Error::config("gemini API key is not set"))?;
        Ok(Self {
            backend: Arc::new(Backend {
                client: http_client(config)?,
                base_url: config.resolve_base_url(KnownProvider::Gemini),
                api_key,
                debug: config.debug,
            }),
        })
    }
}

impl ChatProvider for GeminiProvider {
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
        Ok(Box::new(GeminiChat {
            backend: Arc::clone(&self.backend),
            system_prompt: system_prompt.to_string(),
            model: model.clone(),
        }))
    }
}

struct GeminiChat {
    backend: Arc<Backend>,
    system_prompt: String,
    model: ModelInfo,
}

impl GeminiChat {
    fn request(&self, messages: &[Message], options: &ChatOptions) -> Result<GenerateRequest> {
        let (system_instruction, contents) = build_request_parts(&self.system_prompt, messages);
        Ok(GenerateRequest {
            contents,
            system_instruction,
            generation_config: Some(GenerationConfig {
                temperature: options.temperature,
                top_p: options.top_p,
                frequency_penalty: options.frequency_penalty,
                presence_penalty: options.presence_penalty,
                max_output_tokens: Some(
                    options
                        .max_completion_tokens
                        .unwrap_or(self.model.default_max_tokens),
                ),
            }),
            tools: wire_tools(&options.tools)?,
        })
    }

    async fn send_streaming(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatStream> {
        let request = self.request(messages, options)?;
        let path = format!(
            "models/{}:streamGenerateContent?alt=sse",
            self.model.wire_name
        );
        let response = self.backend.post(&path, &request).await?;

        // The SSE stream just ends after the last chunk, so the terminal
        // response is chained behind the delta stream.
        let accumulator = Arc::new(Mutex::new(ChunkAccumulator::new(
            self.model.wire_name.clone(),
        )));
        let delta_state = Arc::clone(&accumulator);
        let deltas = response
            .bytes_stream()
            .eventsource()
            .map(move |item| -> Vec<Result<ChatResponse>> {
                match item {
                    Ok(event) => match serde_json::from_str::<GenerateResponse>(&event.data) {
                        Ok(chunk) => {
                            let mut acc = delta_state.lock().expect("accumulator poisoned");
                            match acc.process(chunk) {
                                Ok(responses) => responses.into_iter().map(Ok).collect(),
                                Err(e) => vec![Err(e)],
                            }
                        }
                        Err(e) => vec![Err(Error::stream(format!("failed to parse chunk: {e}")))],
                    },
                    Err(e) => vec![Err(Error::stream(e.to_string()))],
                }
            })
            .flat_map(futures::stream::iter);

        let terminal = futures::stream::once(async move {
            accumulator
                .lock()
                .expect("accumulator poisoned")
                .terminal()
        });

        Ok(Box::pin(
            deltas
                .chain(terminal)
                .take_until(cancel.clone().cancelled_owned()),
        ))
    }

    async fn send_oneshot(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatStream> {
        let request = self.request(messages, options)?;
        let path = format!("models/{}:generateContent", self.model.wire_name);
        let response = self.backend.post(&path, &request).await?;
        let body: GenerateResponse = response.json().await?;

        let mut text = String::new();
        let mut calls = Vec::new();
        let mut finish = FinishReason::Unknown;
        for candidate in body.candidates {
            if let Some(content) = candidate.content {
                for part in content.parts {
                    match part {
                        WirePart::Text(t) => text.push_str(&t),
                        WirePart::FunctionCall(call) => {
                            let arguments = match call.args {
                                Value::Object(map) => map,
                                Value::Null => serde_json::Map::new(),
                                _ => {
                                    return Err(Error::stream(
                                        "function call args are not an object",
                                    ));
                                }
                            };
                            calls.push(ToolCallPart::new(
                                Uuid::new_v4().to_string(),
                                call.name,
                                arguments,
                            ));
                        }
                        _ => {}
                    }
                }
            }
            if let Some(reason) = candidate.finish_reason {
                finish = map_finish(&reason);
            }
        }
        if !calls.is_empty() {
            finish = FinishReason::ToolUse;
        }

        Ok(once_stream(ChatResponse::terminal(
            Message::assistant(
                Uuid::new_v4().to_string(),
                self.model.wire_name.clone(),
                text,
                calls,
            ),
            finish,
            body.usage_metadata
                .map(|u| Usage::new(u.prompt_token_count, u.candidates_token_count)),
        )))
    }
}

#[async_trait]
impl Chat for GeminiChat {
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
impl EmbedderProvider for GeminiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn embeddings(
        &self,
        cancel: &CancellationToken,
        texts: &[String],
    ) -> Result<Embeddings> {
        if texts.is_empty() {
            return Err(Error::invalid_input("no texts to embed"));
        }
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedRequest {
                    model: format!("models/{EMBEDDING_MODEL}"),
                    content: WireContent {
                        role: None,
                        parts: vec![WirePart::Text(text.clone())],
                    },
                })
                .collect(),
        };

        let path = format!("models/{EMBEDDING_MODEL}:batchEmbedContents");
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::cancelled("embeddings aborted")),
            response = self.backend.post(&path, &request) => response?,
        };
        let body: BatchEmbedResponse = response.json().await?;

        if body.embeddings.len() != texts.len() {
            return Err(Error::EmbeddingSession(format!(
                "expected {} vectors, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }

        Ok(Embeddings {
            model: EMBEDDING_MODEL.to_string(),
            vectors: body.embeddings.into_iter().map(|e| e.values).collect(),
            usage: None,
        })
    }
}

fn stock_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo::new(PROVIDER_NAME, "gemini-2.0-flash")
            .with_name("Gemini 2.0 Flash")
            .with_context_window(1_048_576)
            .with_default_max_tokens(8_192)
            .with_capabilities(vec![Capability::Completion, Capability::Attachment])
            .with_costs(0.1, 0.4),
        ModelInfo::new(PROVIDER_NAME, "gemini-2.5-pro")
            .with_name("Gemini 2.5 Pro")
            .with_context_window(1_048_576)
            .with_default_max_tokens(65_536)
            .with_capabilities(vec![
                Capability::Completion,
                Capability::Reasoning,
                Capability::Attachment,
            ])
            .with_costs(1.25, 10.0),
        ModelInfo::new(PROVIDER_NAME, EMBEDDING_MODEL)
            .with_name("Text Embedding 004")
            .with_context_window(2_048)
            .with_capabilities(vec![Capability::Embedding]),
    ]
}

/// Register this adapter's providers and stock models.
pub fn register(registry: &Registry) -> Result<()> {
    registry.register_chat_provider(PROVIDER_NAME, |config| {
        Ok(Arc::new(GeminiProvider::new(config)?) as Arc<dyn ChatProvider>)
    })?;
    registry.register_embedder_provider(PROVIDER_NAME, |config| {
        Ok(Arc::new(GeminiProvider::new(config)?) as Arc<dyn EmbedderProvider>)
    })?;
    for model in stock_models() {
        registry.register_model(model)?;
    }
    Ok(())
}
