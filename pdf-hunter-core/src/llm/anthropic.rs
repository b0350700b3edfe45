//! Anthropic Claude implementation of [`LlmGateway`].
//!
//! Adapted from the teacher's `AnthropicClient`: same HTTP client
//! construction (including the proxy-auto-detection panic guard some
//! sandboxed environments trigger), same request/response wire shapes,
//! extended with tool use and the forced-single-tool-call structured output
//! path.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::llm::gateway::{LlmGateway, ToolCallOutcome};
use crate::llm::types::{
    ChatMessage, ChatRole, CompletionResponse, ModelSpec, StopReason, ToolCall, ToolDefinition,
    TokenUsage,
};

/// Configuration for the Anthropic gateway.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub default_model: String,
    pub timeout_secs: u64,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: ModelSpec::claude_sonnet().id,
            timeout_secs: 120,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

fn build_http_client(timeout_secs: u64) -> Client {
    let timeout = Duration::from_secs(timeout_secs);

    // Some sandboxed environments panic during proxy auto-detection in
    // reqwest's default client builder. Fall back to no-proxy in that case.
    match catch_unwind(AssertUnwindSafe(|| Client::builder().timeout(timeout).build())) {
        Ok(Ok(client)) => client,
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .expect("failed to construct fallback HTTP client"),
    }
}

pub struct AnthropicGateway {
    config: AnthropicConfig,
    http: Client,
}

impl AnthropicGateway {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: AnthropicConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(Self::DEFAULT_BASE_URL)
    }

    fn to_wire_message(m: &ChatMessage) -> WireMessage {
        match m.role {
            ChatRole::System | ChatRole::User => WireMessage {
                role: "user".to_string(),
                content: WireContent::Text(m.content.clone()),
            },
            ChatRole::Assistant => {
                if let Some(calls) = &m.tool_calls {
                    WireMessage {
                        role: "assistant".to_string(),
                        content: WireContent::Blocks(
                            calls
                                .iter()
                                .map(|c| WireBlock::ToolUse {
                                    id: c.id.clone(),
                                    name: c.name.clone(),
                                    input: c.arguments.clone(),
                                })
                                .collect(),
                        ),
                    }
                } else {
                    WireMessage {
                        role: "assistant".to_string(),
                        content: WireContent::Text(m.content.clone()),
                    }
                }
            }
            ChatRole::Tool => WireMessage {
                role: "user".to_string(),
                content: WireContent::Blocks(vec![WireBlock::ToolResult {
                    tool_use_id: m.tool_call_id.clone().unwrap_or_default(),
                    content: m.content.clone(),
                }]),
            },
        }
    }

    fn system_prompt(system: &str, messages: &[ChatMessage]) -> String {
        let extra: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        if extra.is_empty() {
            system.to_string()
        } else {
            format!("{system}\n\n{}", extra.join("\n\n"))
        }
    }

    async fn send(&self, body: &AnthropicRequest, deadline: Duration) -> Result<AnthropicResponse> {
        let url = format!("{}/v1/messages", self.base_url());

        let send = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send();

        let response = tokio::time::timeout(deadline, send)
            .await
            .map_err(|_| Error::llm_timeout(deadline.as_millis() as u64))?
            .map_err(|e| Error::llm_api("anthropic", e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::llm_api("anthropic", format!("failed to read body: {e}")))?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<AnthropicError>(&text) {
                return Err(Error::llm_api(
                    "anthropic",
                    format!("{}: {}", err.error.error_type, err.error.message),
                ));
            }
            return Err(Error::llm_api("anthropic", format!("HTTP {status}: {text}")));
        }

        serde_json::from_str(&text).map_err(Error::Serialization)
    }

    fn model_spec(&self, model: &str) -> ModelSpec {
        [ModelSpec::claude_sonnet(), ModelSpec::claude_haiku()]
            .into_iter()
            .find(|m| m.id == model)
            .unwrap_or_else(ModelSpec::claude_sonnet)
    }

    fn to_completion_response(&self, model: &str, resp: AnthropicResponse) -> CompletionResponse {
        let content = resp
            .content
            .iter()
            .filter_map(|b| match b {
                WireBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let tool_calls = resp
            .content
            .iter()
            .filter_map(|b| match b {
                WireBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => None,
            })
            .collect::<Vec<_>>();

        let stop_reason = resp.stop_reason.as_deref().map(|r| match r {
            "end_turn" => StopReason::EndTurn,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            "tool_use" => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        });

        let usage = TokenUsage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
            cache_read_tokens: resp.usage.cache_read_input_tokens,
            cache_creation_tokens: resp.usage.cache_creation_input_tokens,
        };

        let cost = self.model_spec(model).calculate_cost(usage.input_tokens, usage.output_tokens);

        CompletionResponse {
            id: resp.id,
            model: resp.model,
            content,
            tool_calls,
            stop_reason,
            usage,
            timestamp: Utc::now(),
            cost: Some(cost),
        }
    }
}

#[async_trait]
impl LlmGateway for AnthropicGateway {
    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
        deadline: Duration,
    ) -> Result<CompletionResponse> {
        let model = self.config.default_model.clone();
        let body = AnthropicRequest {
            model: model.clone(),
            system: Some(Self::system_prompt(system, messages)),
            messages: messages
                .iter()
                .filter(|m| m.role != ChatRole::System)
                .map(Self::to_wire_message)
                .collect(),
            max_tokens: 4096,
            temperature: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
        };

        let resp = self.send(&body, deadline).await?;
        Ok(self.to_completion_response(&model, resp))
    }

    async fn complete_structured_raw(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tool_name: &str,
        schema: Value,
        deadline: Duration,
    ) -> Result<Value> {
        let model = self.config.default_model.clone();
        let tool = WireTool {
            name: tool_name.to_string(),
            description: format!("Submit the final {tool_name} result."),
            input_schema: schema,
        };

        let mut transcript: Vec<ChatMessage> = messages.to_vec();

        for attempt in 0..2 {
            let body = AnthropicRequest {
                model: model.clone(),
                system: Some(Self::system_prompt(system, &transcript)),
                messages: transcript
                    .iter()
                    .filter(|m| m.role != ChatRole::System)
                    .map(Self::to_wire_message)
                    .collect(),
                max_tokens: 4096,
                temperature: None,
                stop_sequences: None,
                tools: Some(vec![tool.clone()]),
                tool_choice: Some(WireToolChoice::Tool { name: tool_name.to_string() }),
            };

            let resp = self.send(&body, deadline).await?;
            let call = resp.content.iter().find_map(|b| match b {
                WireBlock::ToolUse { name, input, .. } if name == tool_name => Some(input.clone()),
                _ => None,
            });

            match call {
                Some(value) => return Ok(value),
                None if attempt == 0 => {
                    transcript.push(ChatMessage::user(format!(
                        "Your previous response did not call the `{tool_name}` tool with valid \
                         arguments. Call it now with a complete, schema-conformant payload."
                    )));
                }
                None => {
                    return Err(Error::LlmSchemaError(format!(
                        "model never called `{tool_name}` after a retry"
                    )));
                }
            }
        }

        unreachable!("loop returns or errors on every iteration")
    }

    async fn complete_with_tools(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        deadline: Duration,
    ) -> Result<ToolCallOutcome> {
        let model = self.config.default_model.clone();
        let body = AnthropicRequest {
            model: model.clone(),
            system: Some(Self::system_prompt(system, messages)),
            messages: messages
                .iter()
                .filter(|m| m.role != ChatRole::System)
                .map(Self::to_wire_message)
                .collect(),
            max_tokens: 4096,
            temperature: None,
            stop_sequences: None,
            tools: Some(
                tools
                    .iter()
                    .map(|t| WireTool {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        input_schema: t.input_schema.clone(),
                    })
                    .collect(),
            ),
            tool_choice: Some(WireToolChoice::Auto),
        };

        let resp = self.send(&body, deadline).await?;
        let completion = self.to_completion_response(&model, resp);

        if completion.stop_reason == Some(StopReason::ToolUse) && !completion.tool_calls.is_empty() {
            Ok(ToolCallOutcome::ToolCalls(completion))
        } else {
            Ok(ToolCallOutcome::FinalAnswer(completion))
        }
    }

    fn default_model(&self) -> ModelSpec {
        self.model_spec(&self.config.default_model)
    }
}

// --- Anthropic wire format ---

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<WireToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: String,
    content: WireContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<WireBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult {
        #[serde(rename = "tool_use_id")]
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireToolChoice {
    Auto,
    Tool { name: String },
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<WireBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}
