//! Model access for research runs
//!
//! - [`LLMClient`] - chat request/response capability used by every phase
//! - [`OpenAIClient`] - OpenAI-compatible HTTP implementation
//! - [`ModelPool`] - per-run model handles, inserted at admission and
//!   removed at cleanup

/// Core LLM client trait and request/response types.
pub mod client;
/// OpenAI-compatible chat completions client.
pub mod openai;
/// Run-scoped model handles and their factory.
pub mod pool;

pub use client::{
    ChatRequest, ChatResponse, ChatRole, ChatTurn, LLMClient, Provider, ResponseFormat,
    StreamDelta, TokenUsage, ToolChoice,
};
pub use openai::OpenAIClient;
pub use pool::{ConfigModelFactory, ModelFactory, ModelPool};
