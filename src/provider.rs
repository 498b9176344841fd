//! Provider abstraction: the uniform chat and embedding contracts every
//! backend adapter implements.
//!
//! A [`ChatProvider`] creates session-bound [`Chat`] handles for a model; a
//! [`Chat`] sends a normalized message list and returns a [`ChatStream`],
//! a lazy stream of [`ChatResponse`]s. Intermediate stream elements carry
//! text/thinking deltas; the final element carries the terminal
//! [`FinishReason`] and [`Usage`] and may carry aggregated tool-call parts.
//! Non-streaming backends present their one-shot response through
//! [`once_stream`].
//!
//! Providers must tolerate and ignore options they do not support:
//! `reasoning_effort` only reaches models with the `Reasoning` capability,
//! `tools` only backends whose function-calling schema the descriptors
//! survive.

use crate::message::Message;
use crate::model::ModelInfo;
use crate::tool::ToolDescriptor;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::Stream;
use futures::stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// How hard a reasoning-capable model should think.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

/// Token accounting for one provider call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Dollar cost of this usage under the model's coefficients. Reported,
    /// never enforced.
    pub fn cost(&self, model: &ModelInfo) -> f64 {
        (self.prompt_tokens as f64 * model.input_cost_per_mtok
            + self.completion_tokens as f64 * model.output_cost_per_mtok)
            / 1_000_000.0
    }
}

/// Why a provider turn ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural completion, including stop sequences.
    NormalEnd,
    /// Output budget exhausted.
    MaxTokens,
    /// The model requested one or more tool calls.
    ToolUse,
    /// Safety or recitation filtering.
    Denied,
    /// The session context was cancelled.
    Canceled,
    /// Terminal failure.
    Error,
    /// Anything the adapter could not map.
    Unknown,
}

/// One element of a [`ChatStream`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    /// Message content of this element. For deltas, the parts cover only
    /// the increment.
    pub message: Message,
    /// Set only on the final element.
    pub finish_reason: Option<FinishReason>,
    /// Set only on the final element, when the backend reported it.
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// An intermediate text delta.
    pub fn text_delta(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message: Message::assistant(
                uuid::Uuid::new_v4().to_string(),
                model,
                text,
                Vec::new(),
            ),
            finish_reason: None,
            usage: None,
        }
    }

    /// The terminal element of a stream.
    pub fn terminal(message: Message, finish_reason: FinishReason, usage: Option<Usage>) -> Self {
        Self {
            message,
            finish_reason: Some(finish_reason),
            usage,
        }
    }

    /// True when this element carries the terminal finish reason.
    pub fn is_final(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Lazy stream of chat responses.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatResponse>> + Send>>;

/// Present a one-shot response as a stream of length 1.
///
/// Non-streaming adapter paths use this to satisfy the streaming contract.
pub fn once_stream(response: ChatResponse) -> ChatStream {
    Box::pin(stream::once(async move { Ok::<_, Error>(response) }))
}

/// Options for one chat send.
///
/// Constructed through [`ChatOptions::builder`]; ranges are validated at
/// build time.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub max_completion_tokens: Option<u32>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub tools: Vec<ToolDescriptor>,
    pub streaming: bool,
}

/// Streaming-first: the default option set streams.
impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            max_completion_tokens: None,
            reasoning_effort: None,
            tools: Vec::new(),
            streaming: true,
        }
    }
}

impl ChatOptions {
    pub fn builder() -> ChatOptionsBuilder {
        ChatOptionsBuilder::default()
    }
}

/// Builder for [`ChatOptions`] with validation.
#[derive(Debug, Default)]
pub struct ChatOptionsBuilder {
    temperature: Option<f32>,
    top_p: Option<f32>,
    frequency_penalty: Option<f32>,
    presence_penalty: Option<f32>,
    max_completion_tokens: Option<u32>,
    reasoning_effort: Option<ReasoningEffort>,
    tools: Vec<ToolDescriptor>,
    streaming: Option<bool>,
}

impl ChatOptionsBuilder {
    /// Sampling temperature, 0.0 to 2.0.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Frequency penalty, -2.0 to 2.0.
    pub fn frequency_penalty(mut self, penalty: f32) -> Self {
        self.frequency_penalty = Some(penalty);
        self
    }

    /// Presence penalty, -2.0 to 2.0.
    pub fn presence_penalty(mut self, penalty: f32) -> Self {
        self.presence_penalty = Some(penalty);
        self
    }

    pub fn max_completion_tokens(mut self, tokens: u32) -> Self {
        self.max_completion_tokens = Some(tokens);
        self
    }

    /// Honored only by models with the `Reasoning` capability.
    pub fn reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    /// Tool descriptors offered to the model.
    pub fn tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = Some(streaming);
        self
    }

    pub fn build(self) -> Result<ChatOptions> {
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(Error::invalid_input(
                    "temperature must be between 0.0 and 2.0",
                ));
            }
        }
        for (name, value) in [
            ("frequency_penalty", self.frequency_penalty),
            ("presence_penalty", self.presence_penalty),
        ] {
            if let Some(value) = value {
                if !(-2.0..=2.0).contains(&value) {
                    return Err(Error::invalid_input(format!(
                        "{name} must be between -2.0 and 2.0"
                    )));
                }
            }
        }
        if let Some(tokens) = self.max_completion_tokens {
            if tokens == 0 {
                return Err(Error::invalid_input(
                    "max_completion_tokens must be greater than 0",
                ));
            }
        }

        Ok(ChatOptions {
            temperature: self.temperature,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            max_completion_tokens: self.max_completion_tokens,
            reasoning_effort: self.reasoning_effort,
            tools: self.tools,
            streaming: self.streaming.unwrap_or(true),
        })
    }
}

/// HTTP status codes worth retrying.
pub fn retryable_status(status: u16) -> bool {
    matches!(status, 409 | 429 | 500 | 502 | 503 | 504)
}

/// Default retryability classification shared by the adapters: network
/// timeouts, transient statuses, and broken streams retry; everything else
/// is terminal.
pub fn default_is_retryable(err: &Error) -> bool {
    match err {
        Error::Timeout | Error::RateLimited(_) | Error::Unavailable(_) => true,
        Error::Stream(_) => true,
        Error::RetryAfter { .. } => true,
        Error::Http(e) => e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| retryable_status(s.as_u16())),
        _ => false,
    }
}

/// A backend adapter that creates chat handles for a model family.
pub trait ChatProvider: Send + Sync {
    /// Registry name of the provider.
    fn name(&self) -> &str;

    /// Create a session-bound chat handle.
    ///
    /// Fails with [`Error::FeatureNotMatched`] when the model lacks the
    /// `Completion` capability.
    fn new_chat(&self, system_prompt: &str, model: &ModelInfo) -> Result<Box<dyn Chat>>;

    /// Classify an error for the retry engine.
    fn is_retryable_error(&self, err: &Error) -> bool {
        default_is_retryable(err)
    }
}

/// A session-bound handle that sends a message list and streams the reply.
#[async_trait]
pub trait Chat: Send {
    async fn send(
        &mut self,
        cancel: &CancellationToken,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatStream>;
}

/// Embedding result: one vector per input text, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Embeddings {
    pub model: String,
    pub vectors: Vec<Vec<f32>>,
    pub usage: Option<Usage>,
}

/// A backend adapter that turns text batches into vectors.
///
/// Failure is all-or-nothing per call.
#[async_trait]
pub trait EmbedderProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn embeddings(
        &self,
        cancel: &CancellationToken,
        texts: &[String],
    ) -> Result<Embeddings>;
}
