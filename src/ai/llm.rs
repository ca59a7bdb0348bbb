//! LLM port and the OpenAI-compatible chat adapter. The model may answer
//! with plain text or surface a `hangup`/`refer` tool call; the adapter
//! relays the call as a typed action for the media layer to act on.

use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;
use serde_json::json;

use crate::ai::error::LlmError;
use crate::ai::AiFuture;

pub const QUERY_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_MODEL: &str = "qwen-plus";
const TEMPERATURE: f64 = 0.7;

/// Call-control action surfaced by the model through a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmAction {
    Hangup { reason: String },
    Refer { target: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmReply {
    pub text: String,
    pub action: Option<LlmAction>,
}

impl LlmReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: None,
        }
    }
}

pub trait LlmPort: Send + Sync {
    fn query(&self, prompt: String) -> AiFuture<Result<LlmReply, LlmError>>;
}

/// OpenAI-compatible chat completion adapter.
pub struct OpenAiLlm {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    refer_target: Option<String>,
}

impl OpenAiLlm {
    pub fn new(
        endpoint: String,
        api_key: String,
        model: Option<String>,
        refer_target: Option<String>,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(QUERY_TIMEOUT)
            .build()
            .map_err(|e| LlmError::GenerationFailed(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            refer_target,
        })
    }

    fn tools(&self) -> serde_json::Value {
        let mut tools = vec![json!({
            "type": "function",
            "function": {
                "name": "hangup",
                "description": "End the conversation and hang up the call",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "reason": { "type": "string", "description": "Reason for hanging up" }
                    },
                    "required": []
                }
            }
        })];
        if self.refer_target.is_some() {
            tools.push(json!({
                "type": "function",
                "function": {
                    "name": "refer",
                    "description": "Refer the call to another target",
                    "parameters": { "type": "object", "properties": {}, "required": [] }
                }
            }));
        }
        json!(tools)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: ToolFunction,
}

#[derive(Deserialize)]
struct ToolFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl LlmPort for OpenAiLlm {
    fn query(&self, prompt: String) -> AiFuture<Result<LlmReply, LlmError>> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let api_key = self.api_key.clone();
        let model = self.model.clone();
        let tools = self.tools();
        let refer_target = self.refer_target.clone();
        Box::pin(async move {
            let body = json!({
                "model": model,
                "messages": [ { "role": "user", "content": prompt } ],
                "temperature": TEMPERATURE,
                "tools": tools,
            });
            let resp = client
                .post(&endpoint)
                .bearer_auth(&api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        LlmError::Timeout
                    } else {
                        LlmError::GenerationFailed(e.to_string())
                    }
                })?;

            if resp.status().as_u16() == 429 {
                return Err(LlmError::RateLimited);
            }
            if !resp.status().is_success() {
                return Err(LlmError::GenerationFailed(format!(
                    "vendor returned {}",
                    resp.status()
                )));
            }

            let parsed: ChatResponse = resp
                .json()
                .await
                .map_err(|e| LlmError::GenerationFailed(e.to_string()))?;
            let Some(choice) = parsed.choices.into_iter().next() else {
                return Err(LlmError::GenerationFailed("no choices returned".into()));
            };

            let mut action = None;
            for call in &choice.message.tool_calls {
                match call.function.name.as_str() {
                    "hangup" => {
                        let reason = serde_json::from_str::<serde_json::Value>(&call.function.arguments)
                            .ok()
                            .and_then(|v| v.get("reason").and_then(|r| r.as_str()).map(str::to_string))
                            .unwrap_or_else(|| "model requested hangup".to_string());
                        info!("[llm] model requested hangup: {reason}");
                        action = Some(LlmAction::Hangup { reason });
                    }
                    "refer" => {
                        if let Some(target) = refer_target.clone() {
                            info!("[llm] model requested refer to {target}");
                            action = Some(LlmAction::Refer { target });
                        }
                    }
                    other => debug!("[llm] ignoring unknown tool call {other:?}"),
                }
            }

            Ok(LlmReply {
                text: choice.message.content.unwrap_or_default(),
                action,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_arguments_parse_into_actions() {
        let raw = json!({
            "choices": [ { "message": {
                "content": "好的，再见",
                "tool_calls": [ { "function": { "name": "hangup",
                                                 "arguments": "{\"reason\":\"done\"}" } } ]
            } } ]
        });
        let parsed: ChatResponse = serde_json::from_value(raw).unwrap();
        let msg = &parsed.choices[0].message;
        assert_eq!(msg.content.as_deref(), Some("好的，再见"));
        assert_eq!(msg.tool_calls[0].function.name, "hangup");
    }

    #[test]
    fn missing_fields_default_cleanly() {
        let raw = json!({ "choices": [ { "message": {} } ] });
        let parsed: ChatResponse = serde_json::from_value(raw).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
        assert!(parsed.choices[0].message.tool_calls.is_empty());
    }
}
