//! Chain-of-Thought: single-turn, reason-step-by-step.

use super::{BehaviorPattern, Interpretation, TurnSetup};
use crate::Result;
use crate::events::EventPayload;
use crate::message::{Message, ToolCallPart};
use crate::provider::FinishReason;
use std::collections::VecDeque;

const INSTRUCTIONS: &str = "Think through the problem step by step before answering. \
Lay out your reasoning, then state the final answer.";

/// Single-turn pattern: the assistant reasons step by step and the first
/// full response finishes the session, unless it carries tool calls, in
/// which case they are dispatched and the model gets one more look at the
/// results.
#[derive(Default)]
pub struct ChainOfThought {
    pending_calls: VecDeque<ToolCallPart>,
    done: bool,
}

impl ChainOfThought {
    pub fn new() -> Self {
        Self::default()
    }

    fn dispatch_or_continue(&mut self) -> Interpretation {
        match self.pending_calls.pop_front() {
            Some(call) => Interpretation::RequestToolCall(call),
            None => Interpretation::next_turn(),
        }
    }
}

impl BehaviorPattern for ChainOfThought {
    fn start(&mut self, _request: &Message) -> Result<TurnSetup> {
        Ok(TurnSetup {
            instructions: Some(INSTRUCTIONS.to_string()),
            prompt: None,
        })
    }

    fn on_provider_response(&mut self, response: &Message) -> Result<Interpretation> {
        let calls: Vec<ToolCallPart> = response.tool_calls().into_iter().cloned().collect();
        if calls.is_empty() {
            self.done = true;
            return Ok(Interpretation::Finish(FinishReason::NormalEnd));
        }
        self.pending_calls.extend(calls);
        Ok(self.dispatch_or_continue())
    }

    fn on_external_result(&mut self, _event: &EventPayload) -> Result<Interpretation> {
        Ok(self.dispatch_or_continue())
    }

    fn finished(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_call(id: &str) -> ToolCallPart {
        ToolCallPart::new(id, "clock", serde_json::Map::new())
    }

    #[test]
    fn test_plain_response_finishes() {
        let mut pattern = ChainOfThought::new();
        pattern.start(&Message::user("what is 15 x 23?")).unwrap();

        let response = Message::assistant("m1", "test-model", "15 × 23 = 345", Vec::new());
        let interpretation = pattern.on_provider_response(&response).unwrap();
        assert!(matches!(
            interpretation,
            Interpretation::Finish(FinishReason::NormalEnd)
        ));
        assert!(pattern.finished());
    }

    #[test]
    fn test_tool_calls_dispatch_then_follow_up_turn() {
        let mut pattern = ChainOfThought::new();
        pattern.start(&Message::user("what time is it?")).unwrap();

        let response = Message::assistant(
            "m1",
            "test-model",
            "",
            vec![tool_call("c1"), tool_call("c2")],
        );
        let first = pattern.on_provider_response(&response).unwrap();
        assert!(matches!(first, Interpretation::RequestToolCall(ref c) if c.id == "c1"));
        assert!(!pattern.finished());

        let result = EventPayload::ToolCallResult {
            result: crate::message::ToolCallResultPart::new("c1", "clock", serde_json::Map::new()),
        };
        let second = pattern.on_external_result(&result).unwrap();
        assert!(matches!(second, Interpretation::RequestToolCall(ref c) if c.id == "c2"));

        let third = pattern.on_external_result(&result).unwrap();
        assert!(matches!(
            third,
            Interpretation::EmitAndContinue {
                emit: None,
                next_prompt: None
            }
        ));

        // The follow-up turn's plain response finishes the session.
        let final_response = Message::assistant("m2", "test-model", "It is noon.", Vec::new());
        assert!(matches!(
            pattern.on_provider_response(&final_response).unwrap(),
            Interpretation::Finish(FinishReason::NormalEnd)
        ));
    }

    #[test]
    fn test_start_sets_instructions() {
        let mut pattern = ChainOfThought::new();
        let setup = pattern.start(&Message::user("hi")).unwrap();
        assert!(setup.instructions.unwrap().contains("step by step"));
        assert!(setup.prompt.is_none());
    }
}
