//! # agent-core
//!
//! A concurrent agent runtime: an orchestration engine that drives an LLM
//! chat loop with pluggable reasoning behaviors, tool invocation,
//! conversational memory, and in-process pub/sub event distribution.
//!
//! ## Overview
//!
//! The crate accepts a user request, iteratively consults one of several LLM
//! providers, emits a stream of events (model deltas, tool-call requests,
//! confirmation prompts, lifecycle markers), optionally solicits tool
//! results or user confirmations from an external actor, and terminates with
//! a final answer or a failure.
//!
//! ## Key Pieces
//!
//! - **Agent run loop**: one cooperative task per session, multiplexing an
//!   inbound event channel against outbound progress events
//! - **Behavior patterns**: Chain-of-Thought, ReAct, and Plan-and-Execute
//!   state machines deciding what to ask the model next
//! - **Provider abstraction**: one streaming chat contract over Anthropic,
//!   Gemini, OpenAI, and any OpenAI-wire-compatible server
//! - **Event bus**: topic pub/sub with sync and buffered-async subscribers
//! - **Memory**: ordered conversation log, in-memory or file-backed
//! - **Retry engine**: exponential backoff with jitter, permanent and
//!   retry-after sentinels, cancellation-aware
//!
//! ## Two Interaction Modes
//!
//! ### 1. Conversation Facade
//! For single-turn callers that want an answer string:
//!
//! ```rust,no_run
//! use agent_core::{Agent, Conversation};
//! use agent_core::config::ProviderConfig;
//! use agent_core::patterns::ChainOfThought;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     agent_core::providers::register_default_providers();
//!
//!     let provider = agent_core::model::global()
//!         .chat_provider("anthropic", &ProviderConfig::new())?;
//!     let agent = Agent::builder()
//!         .provider(provider)
//!         .model_id("claude-sonnet-4-5")
//!         .system_prompt("You are a helpful assistant")
//!         .pattern(ChainOfThought::new())
//!         .build()?;
//!
//!     let answer = Conversation::new(agent)
//!         .ask_default(&CancellationToken::new(), "What is 15 x 23?")
//!         .await?;
//!     println!("{answer}");
//!     Ok(())
//! }
//! ```
//!
//! ### 2. Session Channels
//! For callers that drive the event protocol themselves:
//!
//! ```rust,no_run
//! use agent_core::{Agent, EventPayload, Message};
//! use agent_core::config::ProviderConfig;
//! use agent_core::patterns::React;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     agent_core::providers::register_default_providers();
//!
//!     let provider = agent_core::model::global()
//!         .chat_provider("openai", &ProviderConfig::new())?;
//!     let agent = Agent::builder()
//!         .provider(provider)
//!         .model_id("gpt-4o")
//!         .pattern(React::new(8))
//!         .build()?;
//!
//!     let mut session = agent.run(CancellationToken::new())?;
//!     session
//!         .post(EventPayload::UserRequest {
//!             message: Message::user("What time is it in UTC?"),
//!         })
//!         .await?;
//!
//!     while let Some(event) = session.next_event().await {
//!         // React to AgentMessage / ExternalAction / ResponseEnd here.
//!         println!("{:?}", event.payload);
//!     }
//!     Ok(())
//! }
//! ```

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Topic-addressed pub/sub with sync and buffered-async subscribers.
pub mod bus;

/// Provider option set and per-provider environment fallbacks.
pub mod config;

/// Single-turn request/response facade over the run loop.
mod conversation;

/// Error enum, `Result` alias, and the retry sentinels.
mod error;

/// Event envelope and session payloads.
pub mod events;

/// Conversational memory: item codec and the two stores.
pub mod memory;

/// Normalized multi-part message model and its JSON codec.
pub mod message;

/// Model descriptors, capabilities, and the provider/model registry.
pub mod model;

/// Behavior patterns: Chain-of-Thought, ReAct, Plan-and-Execute.
pub mod patterns;

/// Chat/embedder contracts, chat options, streaming types.
pub mod provider;

/// Backend adapters: Anthropic, Gemini, OpenAI, and the compat shim.
pub mod providers;

/// Exponential-backoff retry driver.
pub mod retry;

/// The agent run loop and its session handle.
mod session;

/// Tool contract, closure builder, collection dispatch, parameter schema.
pub mod tool;

#[cfg(test)]
mod testing;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

pub use conversation::{AutoHandler, Conversation, ConversationHandler};
pub use error::{Error, Result};
pub use events::{Event, EventPayload, ExternalAction};
pub use message::{Message, Part, Role};
pub use provider::{ChatOptions, ChatProvider, FinishReason, Usage};
pub use session::{Agent, AgentBuilder, Session};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// The most commonly used types and functions.
/// Import with `use agent_core::prelude::*;`.
pub mod prelude {
    pub use crate::bus::{Delivery, EventBus};
    pub use crate::config::ProviderConfig;
    pub use crate::memory::{FileMemory, InMemoryMemory, Memory};
    pub use crate::patterns::{BehaviorPattern, ChainOfThought, PlanAndExecute, React};
    pub use crate::tool::{Tool, ToolCollection, tool};
    pub use crate::{
        Agent, AgentBuilder, AutoHandler, Conversation, ConversationHandler, Error, Event,
        EventPayload, ExternalAction, FinishReason, Message, Result, Session,
    };
}
