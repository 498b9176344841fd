//! ReAct: reason/act loop driven by a JSON step envelope.

use super::{BehaviorPattern, Interpretation, TurnSetup, extract_json_object};
use crate::Result;
use crate::events::EventPayload;
use crate::message::{Message, ToolCallPart};
use crate::provider::FinishReason;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use uuid::Uuid;

const INSTRUCTIONS: &str = "Work in steps. Answer every turn with a single JSON object of the \
form {\"thought\": \"...\", \"action\": \"...\", \"tool_calls\": [{\"name\": \"...\", \
\"arguments\": {...}}], \"observation\": \"...\", \"continue\": true|false}. Use \"tool_calls\" \
only when you need a tool; set \"continue\" to false when the task is done and put the final \
answer in \"observation\".";

/// One step envelope as emitted by the model.
#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    #[allow(dead_code)]
    thought: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    action: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<EnvelopeCall>>,
    #[serde(default)]
    #[allow(dead_code)]
    observation: Option<String>,
    #[serde(default, rename = "continue")]
    continue_: bool,
}

#[derive(Debug, Deserialize)]
struct EnvelopeCall {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

/// Reason/act pattern: the model emits a step envelope per turn, tool
/// results are fed back as the next user message, and the loop ends when
/// the envelope says `continue: false` or the step budget runs out.
pub struct React {
    max_steps: u32,
    step: u32,
    pending_calls: VecDeque<ToolCallPart>,
    observations: Vec<Value>,
    done: bool,
}

impl React {
    pub fn new(max_steps: u32) -> Self {
        Self {
            max_steps,
            step: 0,
            pending_calls: VecDeque::new(),
            observations: Vec::new(),
            done: false,
        }
    }

    fn finish(&mut self) -> Interpretation {
        self.done = true;
        Interpretation::Finish(FinishReason::NormalEnd)
    }

    /// Feed collected observations back as the next user message.
    fn observation_prompt(&mut self) -> Message {
        let observations = std::mem::take(&mut self.observations);
        Message::user(format!(
            "Observation: {}",
            Value::Array(observations)
        ))
    }

    fn after_tools(&mut self) -> Interpretation {
        if let Some(call) = self.pending_calls.pop_front() {
            return Interpretation::RequestToolCall(call);
        }
        if self.step >= self.max_steps {
            return self.finish();
        }
        let prompt = self.observation_prompt();
        Interpretation::next_turn_with(prompt)
    }
}

impl BehaviorPattern for React {
    fn start(&mut self, _request: &Message) -> Result<TurnSetup> {
        Ok(TurnSetup {
            instructions: Some(INSTRUCTIONS.to_string()),
            prompt: None,
        })
    }

    fn on_provider_response(&mut self, response: &Message) -> Result<Interpretation> {
        self.step += 1;

        // Structural tool calls (function-calling backends) win over the
        // envelope's inline list.
        let mut calls: VecDeque<ToolCallPart> =
            response.tool_calls().into_iter().cloned().collect();

        let envelope = extract_json_object(&response.text())
            .and_then(|json| serde_json::from_str::<Envelope>(json).ok());

        let envelope = match envelope {
            Some(envelope) => envelope,
            // Not an envelope: treat the text as the final answer.
            None => {
                if calls.is_empty() {
                    return Ok(self.finish());
                }
                Envelope {
                    continue_: true,
                    ..Envelope::default()
                }
            }
        };

        if calls.is_empty() {
            if let Some(envelope_calls) = envelope.tool_calls {
                for call in envelope_calls {
                    calls.push_back(ToolCallPart::new(
                        Uuid::new_v4().to_string(),
                        call.name,
                        call.arguments,
                    ));
                }
            }
        }

        if !calls.is_empty() {
            self.pending_calls = calls;
            // Dispatch even when the envelope claims it is done; unanswered
            // calls would violate the pairing invariant.
            let first = self.pending_calls.pop_front().expect("non-empty queue");
            return Ok(Interpretation::RequestToolCall(first));
        }

        if !envelope.continue_ || self.step >= self.max_steps {
            return Ok(self.finish());
        }
        Ok(Interpretation::next_turn_with(Message::user(
            "Continue with the next step.",
        )))
    }

    fn on_external_result(&mut self, event: &EventPayload) -> Result<Interpretation> {
        match event {
            EventPayload::ToolCallResult { result } => {
                self.observations.push(serde_json::json!({
                    "tool": result.name,
                    "result": Value::Object(result.result.clone()),
                }));
            }
            EventPayload::ToolCallFailed { name, error, .. } => {
                self.observations.push(serde_json::json!({
                    "tool": name,
                    "error": error,
                }));
            }
            _ => {}
        }
        Ok(self.after_tools())
    }

    fn finished(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCallResultPart;
    use serde_json::json;

    fn envelope_response(envelope: Value) -> Message {
        Message::assistant("m", "test-model", envelope.to_string(), Vec::new())
    }

    #[test]
    fn test_envelope_with_tool_calls_dispatches() {
        let mut pattern = React::new(5);
        pattern.start(&Message::user("what time is it?")).unwrap();

        let response = envelope_response(json!({
            "thought": "I need the time",
            "action": "call the clock",
            "tool_calls": [{"name": "current_time", "arguments": {"timezone": "UTC"}}],
            "continue": true
        }));
        let interpretation = pattern.on_provider_response(&response).unwrap();
        match interpretation {
            Interpretation::RequestToolCall(call) => {
                assert_eq!(call.name, "current_time");
                assert_eq!(call.arguments["timezone"], "UTC");
                assert!(!call.id.is_empty());
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn test_tool_result_feeds_back_as_observation() {
        let mut pattern = React::new(5);
        pattern.start(&Message::user("x")).unwrap();
        pattern
            .on_provider_response(&envelope_response(json!({
                "tool_calls": [{"name": "current_time", "arguments": {}}],
                "continue": true
            })))
            .unwrap();

        let mut result = Map::new();
        result.insert("current_time".into(), json!("2024-01-01T00:00:00Z"));
        let interpretation = pattern
            .on_external_result(&EventPayload::ToolCallResult {
                result: ToolCallResultPart::new("c1", "current_time", result),
            })
            .unwrap();

        match interpretation {
            Interpretation::EmitAndContinue {
                next_prompt: Some(prompt),
                ..
            } => {
                let text = prompt.text();
                assert!(text.starts_with("Observation:"));
                assert!(text.contains("2024-01-01T00:00:00Z"));
            }
            other => panic!("expected continuation, got {other:?}"),
        }
    }

    #[test]
    fn test_continue_false_finishes() {
        let mut pattern = React::new(5);
        pattern.start(&Message::user("x")).unwrap();

        let interpretation = pattern
            .on_provider_response(&envelope_response(json!({
                "observation": "the answer is 42",
                "continue": false
            })))
            .unwrap();
        assert!(matches!(
            interpretation,
            Interpretation::Finish(FinishReason::NormalEnd)
        ));
        assert!(pattern.finished());
    }

    #[test]
    fn test_step_budget_exhaustion_finishes() {
        let mut pattern = React::new(2);
        pattern.start(&Message::user("x")).unwrap();

        let keep_going = envelope_response(json!({"continue": true}));
        assert!(matches!(
            pattern.on_provider_response(&keep_going).unwrap(),
            Interpretation::EmitAndContinue { .. }
        ));
        assert!(matches!(
            pattern.on_provider_response(&keep_going).unwrap(),
            Interpretation::Finish(FinishReason::NormalEnd)
        ));
    }

    #[test]
    fn test_non_envelope_text_is_final_answer() {
        let mut pattern = React::new(5);
        pattern.start(&Message::user("x")).unwrap();

        let response = Message::assistant("m", "test-model", "Just an answer.", Vec::new());
        assert!(matches!(
            pattern.on_provider_response(&response).unwrap(),
            Interpretation::Finish(FinishReason::NormalEnd)
        ));
    }

    #[test]
    fn test_envelope_in_code_fence_parses() {
        let mut pattern = React::new(5);
        pattern.start(&Message::user("x")).unwrap();

        let response = Message::assistant(
            "m",
            "test-model",
            "```json\n{\"continue\": false}\n```",
            Vec::new(),
        );
        assert!(matches!(
            pattern.on_provider_response(&response).unwrap(),
            Interpretation::Finish(FinishReason::NormalEnd)
        ));
    }
}
