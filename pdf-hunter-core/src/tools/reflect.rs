//! The strategic `reflect` no-op tool.
//!
//! Gives a ReAct-looping agent a way to think out loud without invoking any
//! real side effect and without counting against the action budget (spec
//! §4.4: "pure observation tools ... do not count"). Grounded on the
//! teacher's `FallbackLoop` pattern of giving the model an explicit
//! checkpoint step distinct from its tool-using steps.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::llm::ToolDefinition;
use crate::react::Tool;

pub struct ReflectTool;

#[derive(Debug, Deserialize)]
struct ReflectArgs {
    thought: String,
}

#[async_trait]
impl Tool for ReflectTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "reflect".into(),
            description: "Record a reasoning checkpoint without taking any action. Use this to \
                plan your next steps or reconsider evidence so far."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"thought": {"type": "string"}},
                "required": ["thought"]
            }),
        }
    }

    fn mutates_remote_state(&self) -> bool {
        false
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: ReflectArgs =
            serde_json::from_value(arguments).map_err(|e| Error::tool("reflect", e.to_string()))?;
        Ok(format!("noted: {}", args.thought))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reflect_never_mutates_remote_state() {
        assert!(!ReflectTool.mutates_remote_state());
    }

    #[tokio::test]
    async fn reflect_echoes_the_thought() {
        let out = ReflectTool.call(serde_json::json!({"thought": "check the OpenAction"})).await.unwrap();
        assert!(out.contains("check the OpenAction"));
    }
}
