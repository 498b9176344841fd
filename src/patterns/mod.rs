//! Behavior patterns: pluggable state machines that decide what to ask the
//! LLM next and how to interpret its output.
//!
//! A pattern sees the session from three angles: [`BehaviorPattern::start`]
//! shapes the first provider turn from the user request,
//! [`BehaviorPattern::on_provider_response`] interprets each terminal
//! provider response, and [`BehaviorPattern::on_external_result`] resumes the
//! session after the external actor answered a tool call or a confirmation
//! prompt. The run loop acts on the returned [`Interpretation`].
//!
//! Patterns are stateful for the lifetime of one session and are driven from
//! that session's single task only.
//!
//! Three patterns ship with the crate: [`ChainOfThought`], [`React`], and
//! [`PlanAndExecute`].

mod cot;
mod plan;
mod react;

pub use cot::ChainOfThought;
pub use plan::PlanAndExecute;
pub use react::React;

use crate::Result;
use crate::events::EventPayload;
use crate::message::{Message, ToolCallPart};
use crate::provider::FinishReason;

/// Setup of the first provider turn.
#[derive(Debug, Clone, Default)]
pub struct TurnSetup {
    /// Extra system-style instructions, carried for every turn of the
    /// session.
    pub instructions: Option<String>,
    /// A synthesized user message appended to the conversation before the
    /// first send.
    pub prompt: Option<Message>,
}

/// What the run loop should do next.
#[derive(Debug, Clone)]
pub enum Interpretation {
    /// Publish `emit` (when present) and run another provider turn,
    /// appending `next_prompt` to the conversation first.
    EmitAndContinue {
        emit: Option<Message>,
        next_prompt: Option<Message>,
    },
    /// Emit an external action carrying this tool call and wait for its
    /// result.
    RequestToolCall(ToolCallPart),
    /// Emit an external action carrying this prompt and wait for the
    /// answer.
    RequestConfirmation(String),
    /// End the session turn.
    Finish(FinishReason),
}

impl Interpretation {
    /// Another provider turn with nothing to publish and nothing to append.
    pub fn next_turn() -> Self {
        Interpretation::EmitAndContinue {
            emit: None,
            next_prompt: None,
        }
    }

    /// Another provider turn after appending a synthesized user message.
    pub fn next_turn_with(prompt: Message) -> Self {
        Interpretation::EmitAndContinue {
            emit: None,
            next_prompt: Some(prompt),
        }
    }
}

/// A state processor owning the conversation strategy of one session.
pub trait BehaviorPattern: Send + Sync {
    /// Shape the first provider turn from the user request.
    fn start(&mut self, request: &Message) -> Result<TurnSetup>;

    /// Interpret the terminal response of a provider turn.
    fn on_provider_response(&mut self, response: &Message) -> Result<Interpretation>;

    /// Resume after the external actor answered a requested action.
    fn on_external_result(&mut self, event: &EventPayload) -> Result<Interpretation>;

    /// True once the pattern has decided to finish.
    fn finished(&self) -> bool;
}

/// Extract the first JSON object from model text, tolerating code fences and
/// prose around it.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Parse a numbered plan ("1. step" / "2) step") into its steps.
pub(crate) fn parse_numbered_list(text: &str) -> Vec<String> {
    let mut steps = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        let Some(first_non_digit) = trimmed.find(|c: char| !c.is_ascii_digit()) else {
            continue;
        };
        if first_non_digit == 0 {
            continue;
        }
        let rest = &trimmed[first_non_digit..];
        if let Some(step) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            let step = step.trim();
            if !step.is_empty() {
                steps.push(step.to_string());
            }
        }
    }
    steps
}
