//! LLM Gateway: the trait boundary every agent calls through, plus the
//! Anthropic adapter and the structured-output contract machinery.
//!
//! The concrete model provider is a non-goal of this crate's spec — agents
//! and the ReAct loop depend only on [`LlmGateway`]. `AnthropicGateway` is
//! kept as the one adapter that ships, the way the teacher crate shipped
//! `AnthropicClient` as a concrete `LLMClient`.

mod anthropic;
mod gateway;
mod schema;
mod types;

pub use anthropic::{AnthropicConfig, AnthropicGateway};
pub use gateway::{complete_structured, LlmGateway, ToolCallOutcome};
pub use schema::{validate_fields, FieldSpec, FieldType, StructuredSchema, ValidationError};
pub use types::{
    CacheControl, ChatMessage, ChatRole, CompletionRequest, CompletionResponse, CostTracker,
    ModelCosts, ModelSpec, Provider, StopReason, ToolCall, ToolDefinition, TokenUsage, ToolTurn,
};
