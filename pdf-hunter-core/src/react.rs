//! Generic bounded ReAct loop driver: `model -> tool calls? -> execute ->
//! observations` until the model stops calling tools or a budget runs out.
//!
//! Generalizes the teacher's `FallbackLoop`/`ExecutionLimits` budget-driven
//! loop: the driver never interprets tool results (spec §4.4, "the driver
//! never interprets tool results; it only routes them") — that is always
//! the caller's analyst node.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::llm::{ChatMessage, LlmGateway, ToolCallOutcome, ToolDefinition};

/// One callable tool. `mutates_remote_state` marks tools that count
/// against the action budget (browser navigate/click/fill) as opposed to
/// pure observation tools (screenshot, evaluate, network, whois, reflect).
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    fn mutates_remote_state(&self) -> bool {
        false
    }

    /// Invoke the tool. Blocking implementations must offload their work
    /// to `tokio::task::spawn_blocking` themselves; the driver awaits this
    /// call directly either way.
    async fn call(&self, arguments: Value) -> Result<String>;
}

/// A tool registry keyed by name, handed to the driver for one mission or
/// URL investigation.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.definition().name.clone(), tool);
        self
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }
}

/// Why a ReAct loop ended. Per spec P9, these are the *only* two terminal
/// conditions: natural (model stopped asking for tools) or budget
/// exhaustion. There is no third way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactStatus {
    /// The model returned no tool calls: natural termination.
    Done,
    /// The step budget was exhausted before the model stopped.
    StepBudgetExhausted,
    /// The action budget (remote-state-mutating calls) was exhausted.
    ActionBudgetExhausted,
}

#[derive(Debug, Clone)]
pub struct ReactOutcome {
    pub final_text: String,
    pub transcript: Vec<ChatMessage>,
    pub status: ReactStatus,
    pub steps_used: u32,
    pub actions_used: u32,
}

impl ReactOutcome {
    /// Maps driver termination onto the caller's own vocabulary: a file
    /// analysis mission calls this `BLOCKED`, a URL investigation calls it
    /// `Inaccessible` — spec §4.4 rule 5.
    pub fn was_blocked(&self) -> bool {
        self.status != ReactStatus::Done
    }
}

/// Run one bounded ReAct loop.
///
/// `step_budget` bounds total turns; `action_budget_soft`/`action_budget_hard`
/// bound remote-state-mutating tool calls specifically (spec §4.4: "soft
/// limit 6-12, hard limit 15; pure observation tools do not count"). When the
/// soft limit is crossed, a nudge message is appended to the transcript
/// asking the model to wrap up; crossing the hard limit forces termination.
pub async fn run_react_loop(
    gateway: &dyn LlmGateway,
    tools: &ToolRegistry,
    system: &str,
    mut transcript: Vec<ChatMessage>,
    step_budget: u32,
    action_budget_soft: u32,
    action_budget_hard: u32,
    deadline_per_call: Duration,
) -> Result<ReactOutcome> {
    let definitions = tools.definitions();
    let mut steps_used = 0u32;
    let mut actions_used = 0u32;
    let mut soft_limit_warned = false;

    loop {
        if steps_used >= step_budget {
            return Ok(ReactOutcome {
                final_text: String::new(),
                transcript,
                status: ReactStatus::StepBudgetExhausted,
                steps_used,
                actions_used,
            });
        }

        let outcome = gateway
            .complete_with_tools(system, &transcript, &definitions, deadline_per_call)
            .await?;
        steps_used += 1;

        let response = match outcome {
            ToolCallOutcome::FinalAnswer(response) => {
                return Ok(ReactOutcome {
                    final_text: response.content,
                    transcript,
                    status: ReactStatus::Done,
                    steps_used,
                    actions_used,
                });
            }
            ToolCallOutcome::ToolCalls(response) => response,
        };

        transcript.push(ChatMessage::assistant_tool_calls(response.tool_calls.clone()));

        for call in &response.tool_calls {
            let tool = tools.get(&call.name);

            let mutates_remote = tool.map(|t| t.mutates_remote_state()).unwrap_or(false);
            if mutates_remote {
                actions_used += 1;
            }

            if mutates_remote && actions_used > action_budget_hard {
                transcript.push(ChatMessage::tool_result(
                    call.id.clone(),
                    "action budget exhausted; no further remote-state-mutating actions permitted",
                ));
                return Ok(ReactOutcome {
                    final_text: String::new(),
                    transcript,
                    status: ReactStatus::ActionBudgetExhausted,
                    steps_used,
                    actions_used,
                });
            }

            let observation = match tool {
                Some(tool) => match tool.call(call.arguments.clone()).await {
                    Ok(result) => result,
                    Err(e) => format!("tool error: {e}"),
                },
                None => format!("tool error: unknown tool `{}`", call.name),
            };

            transcript.push(ChatMessage::tool_result(call.id.clone(), observation));
        }

        if actions_used >= action_budget_soft && !soft_limit_warned {
            soft_limit_warned = true;
            transcript.push(ChatMessage::user(
                "You are approaching the action budget for this investigation. Wrap up and \
                 submit your conclusion soon; prefer observation over further remote actions.",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatRole, CompletionResponse, ModelSpec, StopReason, TokenUsage, ToolCall};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedGateway {
        turns: Mutex<Vec<ToolCallOutcome>>,
    }

    #[async_trait]
    impl LlmGateway for ScriptedGateway {
        async fn complete(&self, _s: &str, _m: &[ChatMessage], _d: Duration) -> Result<CompletionResponse> {
            unimplemented!()
        }

        async fn complete_structured_raw(
            &self,
            _s: &str,
            _m: &[ChatMessage],
            _t: &str,
            _schema: Value,
            _d: Duration,
        ) -> Result<Value> {
            unimplemented!()
        }

        async fn complete_with_tools(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
            _tools: &[ToolDefinition],
            _deadline: Duration,
        ) -> Result<ToolCallOutcome> {
            let mut turns = self.turns.lock().unwrap();
            Ok(turns.remove(0))
        }

        fn default_model(&self) -> ModelSpec {
            ModelSpec::claude_sonnet()
        }
    }

    fn response(content: &str, tool_calls: Vec<ToolCall>, stop: StopReason) -> CompletionResponse {
        CompletionResponse {
            id: "r1".into(),
            model: "claude-3-5-sonnet-20241022".into(),
            content: content.into(),
            tool_calls,
            stop_reason: Some(stop),
            usage: TokenUsage::default(),
            timestamp: chrono::Utc::now(),
            cost: None,
        }
    }

    struct EchoTool {
        calls: Arc<AtomicU32>,
        mutates: bool,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "echoes input".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        fn mutates_remote_state(&self) -> bool {
            self.mutates
        }

        async fn call(&self, arguments: Value) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(arguments.to_string())
        }
    }

    #[tokio::test]
    async fn terminates_naturally_when_model_stops_calling_tools() {
        let gateway = ScriptedGateway {
            turns: Mutex::new(vec![ToolCallOutcome::FinalAnswer(response("done", vec![], StopReason::EndTurn))]),
        };
        let tools = ToolRegistry::new();

        let outcome = run_react_loop(&gateway, &tools, "sys", vec![], 5, 6, 15, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(outcome.status, ReactStatus::Done);
        assert_eq!(outcome.final_text, "done");
        assert_eq!(outcome.steps_used, 1);
    }

    #[tokio::test]
    async fn terminates_on_step_budget_exhaustion() {
        let call = ToolCall {
            id: "c1".into(),
            name: "echo".into(),
            arguments: serde_json::json!({"x": 1}),
        };
        let turn = ToolCallOutcome::ToolCalls(response("", vec![call], StopReason::ToolUse));
        let gateway = ScriptedGateway {
            turns: Mutex::new(vec![turn.clone(), turn.clone(), turn]),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let tools = ToolRegistry::new().register(Arc::new(EchoTool { calls: calls.clone(), mutates: false }));

        let outcome = run_react_loop(&gateway, &tools, "sys", vec![], 2, 6, 15, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(outcome.status, ReactStatus::StepBudgetExhausted);
        assert!(outcome.was_blocked());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn terminates_on_action_budget_hard_limit() {
        let call = ToolCall {
            id: "c1".into(),
            name: "navigate".into(),
            arguments: serde_json::json!({"url": "http://x"}),
        };
        let turn = ToolCallOutcome::ToolCalls(response("", vec![call], StopReason::ToolUse));
        let gateway = ScriptedGateway {
            turns: Mutex::new((0..5).map(|_| turn.clone()).collect()),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let tools = ToolRegistry::new().register(Arc::new(EchoTool { calls: calls.clone(), mutates: true }));

        let outcome = run_react_loop(&gateway, &tools, "sys", vec![], 20, 1, 2, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(outcome.status, ReactStatus::ActionBudgetExhausted);
        assert_eq!(outcome.actions_used, 3);
    }
}
