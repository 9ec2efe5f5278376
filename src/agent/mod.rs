//! Conversational agent over the function registry.
//!
//! The orchestrator binds the registry to an LLM function-calling provider:
//! the model picks a function, the registry computes the numbers, and the
//! model (or the fallback formatter) phrases the answer.

pub mod agent_loop;
pub mod provider;
pub mod tools;
pub mod vocabulary;

pub use agent_loop::{
    ChatRequest, ChatResponse, ChatRole, ChatTurn, Orchestrator, OrchestratorConfig, TokenUsage,
};
pub use provider::{GeminiConfig, GeminiProvider, LlmProvider};
