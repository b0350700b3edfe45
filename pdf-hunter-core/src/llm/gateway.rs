//! The `LlmGateway` trait: the single seam through which every agent talks
//! to a model. Generalizes the teacher's single-provider `LLMClient` trait
//! into the three call shapes spec.md's agents actually need.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::llm::schema::{validate_fields, StructuredSchema};
use crate::llm::types::{ChatMessage, CompletionResponse, ModelSpec, ToolDefinition};

/// A completed tool-calling turn: either the model wants to call tools, or
/// it produced a final answer.
#[derive(Debug, Clone)]
pub enum ToolCallOutcome {
    ToolCalls(CompletionResponse),
    FinalAnswer(CompletionResponse),
}

/// Abstraction over an LLM provider, used by the ReAct loop and every
/// agent. Bound by `Send + Sync` so it can live behind an `Arc` and be
/// shared across the parallel branches the orchestrator spawns.
///
/// Object-safe by design: `complete_structured` (the generic, type-checked
/// entry point agents actually call) is a free function built on top of
/// [`LlmGateway::complete_structured_raw`], which is the trait-object-safe
/// primitive — it only knows about a tool name and a JSON Schema.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Plain-text completion, bounded by `deadline`.
    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
        deadline: Duration,
    ) -> Result<CompletionResponse>;

    /// Force a single tool call shaped like `schema`, named `tool_name`,
    /// and return its raw JSON arguments. Implementations retry once,
    /// appending the model's malformed output and a nudge to the
    /// transcript, before giving up with `Error::LlmSchemaError`.
    async fn complete_structured_raw(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tool_name: &str,
        schema: Value,
        deadline: Duration,
    ) -> Result<Value>;

    /// One turn of a tool-calling conversation: the model either returns
    /// tool calls to execute, or a final answer.
    async fn complete_with_tools(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        deadline: Duration,
    ) -> Result<ToolCallOutcome>;

    fn default_model(&self) -> ModelSpec;
}

/// Typed structured completion built on the object-safe
/// `complete_structured_raw` primitive: forces `T::schema_name()`/
/// `T::json_schema()`, validates the raw value against `T::fields()`, then
/// deserializes. Agents call this rather than the raw trait method.
pub async fn complete_structured<T: StructuredSchema>(
    gateway: &dyn LlmGateway,
    system: &str,
    messages: &[ChatMessage],
    deadline: Duration,
) -> Result<T> {
    let raw = gateway
        .complete_structured_raw(system, messages, T::schema_name(), T::json_schema(), deadline)
        .await?;

    validate_fields(&raw, T::fields())
        .map_err(|e| Error::LlmSchemaError(e.to_string()))?;

    serde_json::from_value(raw).map_err(|e| Error::LlmSchemaError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::schema::{FieldSpec, FieldType};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Dummy {
        ok: bool,
    }

    impl StructuredSchema for Dummy {
        fn schema_name() -> &'static str {
            "dummy"
        }
        fn fields() -> &'static [FieldSpec] {
            &[FieldSpec::required("ok", FieldType::Bool)]
        }
        fn json_schema() -> Value {
            json!({"type": "object", "properties": {"ok": {"type": "boolean"}}, "required": ["ok"]})
        }
    }

    struct StubGateway;

    #[async_trait]
    impl LlmGateway for StubGateway {
        async fn complete(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
            _deadline: Duration,
        ) -> Result<CompletionResponse> {
            unimplemented!()
        }

        async fn complete_structured_raw(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
            tool_name: &str,
            _schema: Value,
            _deadline: Duration,
        ) -> Result<Value> {
            assert_eq!(tool_name, "dummy");
            Ok(json!({"ok": true}))
        }

        async fn complete_with_tools(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
            _tools: &[ToolDefinition],
            _deadline: Duration,
        ) -> Result<ToolCallOutcome> {
            unimplemented!()
        }

        fn default_model(&self) -> ModelSpec {
            ModelSpec::claude_sonnet()
        }
    }

    #[tokio::test]
    async fn complete_structured_round_trips_through_validation() {
        let gw = StubGateway;
        let out: Dummy = complete_structured(&gw, "sys", &[], Duration::from_secs(1))
            .await
            .unwrap();
        assert!(out.ok);
    }
}
