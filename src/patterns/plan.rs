//! Plan-and-Execute: plan first, then walk the steps.

use super::{BehaviorPattern, Interpretation, TurnSetup, parse_numbered_list};
use crate::Result;
use crate::events::EventPayload;
use crate::message::{Message, ToolCallPart};
use crate::provider::FinishReason;
use std::collections::VecDeque;

const INSTRUCTIONS: &str = "First produce a numbered plan for the task, one step per line \
(\"1. ...\"), without executing anything. After the plan is settled you will be asked to \
execute the steps one at a time.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingPlan,
    AwaitingPlanConfirmation,
    Executing,
    AwaitingStepConfirmation,
    Done,
}

/// Plan-first pattern: the first turn asks for a numbered plan, optionally
/// confirmed by the user; each step then runs as its own provider turn,
/// optionally confirmed, with tool calls dispatched as the step demands.
pub struct PlanAndExecute {
    confirm_plan: bool,
    confirm_steps: bool,
    phase: Phase,
    steps: Vec<String>,
    current: usize,
    pending_calls: VecDeque<ToolCallPart>,
}

impl PlanAndExecute {
    pub fn new(confirm_plan: bool, confirm_steps: bool) -> Self {
        Self {
            confirm_plan,
            confirm_steps,
            phase: Phase::AwaitingPlan,
            steps: Vec::new(),
            current: 0,
            pending_calls: VecDeque::new(),
        }
    }

    fn finish(&mut self, reason: FinishReason) -> Interpretation {
        self.phase = Phase::Done;
        Interpretation::Finish(reason)
    }

    fn step_prompt(&self) -> Message {
        Message::user(format!(
            "Execute step {} of the plan: {}",
            self.current + 1,
            self.steps[self.current]
        ))
    }

    fn begin_step(&mut self) -> Interpretation {
        if self.current >= self.steps.len() {
            return self.finish(FinishReason::NormalEnd);
        }
        if self.confirm_steps {
            self.phase = Phase::AwaitingStepConfirmation;
            return Interpretation::RequestConfirmation(format!(
                "Proceed with step {}: {}?",
                self.current + 1,
                self.steps[self.current]
            ));
        }
        self.phase = Phase::Executing;
        Interpretation::next_turn_with(self.step_prompt())
    }

    fn approved(answer: &str) -> bool {
        let normalized = answer.trim().to_lowercase();
        !(normalized.starts_with("no")
            || normalized.contains("reject")
            || normalized.contains("deny")
            || normalized.contains("cancel"))
    }
}

impl BehaviorPattern for PlanAndExecute {
    fn start(&mut self, _request: &Message) -> Result<TurnSetup> {
        Ok(TurnSetup {
            instructions: Some(INSTRUCTIONS.to_string()),
            prompt: None,
        })
    }

    fn on_provider_response(&mut self, response: &Message) -> Result<Interpretation> {
        match self.phase {
            Phase::AwaitingPlan => {
                self.steps = parse_numbered_list(&response.text());
                if self.steps.is_empty() {
                    // The model answered outright; nothing to execute.
                    return Ok(self.finish(FinishReason::NormalEnd));
                }
                if self.confirm_plan {
                    self.phase = Phase::AwaitingPlanConfirmation;
                    return Ok(Interpretation::RequestConfirmation(format!(
                        "Confirm the plan:\n{}",
                        self.steps
                            .iter()
                            .enumerate()
                            .map(|(i, step)| format!("{}. {}", i + 1, step))
                            .collect::<Vec<_>>()
                            .join("\n")
                    )));
                }
                Ok(self.begin_step())
            }
            Phase::Executing => {
                let calls: Vec<ToolCallPart> =
                    response.tool_calls().into_iter().cloned().collect();
                if !calls.is_empty() {
                    self.pending_calls.extend(calls);
                    let first = self.pending_calls.pop_front().expect("non-empty queue");
                    return Ok(Interpretation::RequestToolCall(first));
                }
                // Step complete; move on.
                self.current += 1;
                Ok(self.begin_step())
            }
            // Provider responses are not expected in the other phases; treat
            // them as noise and keep waiting.
            _ => Ok(Interpretation::next_turn()),
        }
    }

    fn on_external_result(&mut self, event: &EventPayload) -> Result<Interpretation> {
        match self.phase {
            Phase::AwaitingPlanConfirmation => match event {
                EventPayload::ExternalActionResult { content } => {
                    if Self::approved(content) {
                        self.phase = Phase::Executing;
                        Ok(self.begin_step())
                    } else {
                        Ok(self.finish(FinishReason::Denied))
                    }
                }
                _ => Ok(self.finish(FinishReason::Error)),
            },
            Phase::AwaitingStepConfirmation => match event {
                EventPayload::ExternalActionResult { content } => {
                    if Self::approved(content) {
                        self.phase = Phase::Executing;
                        Ok(Interpretation::next_turn_with(self.step_prompt()))
                    } else {
                        Ok(self.finish(FinishReason::Denied))
                    }
                }
                _ => Ok(self.finish(FinishReason::Error)),
            },
            Phase::Executing => {
                if let Some(call) = self.pending_calls.pop_front() {
                    return Ok(Interpretation::RequestToolCall(call));
                }
                // Let the model wrap up the step with the tool results.
                Ok(Interpretation::next_turn())
            }
            _ => Ok(self.finish(FinishReason::Error)),
        }
    }

    fn finished(&self) -> bool {
        self.phase == Phase::Done
    }
}
