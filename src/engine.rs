//! Reasoning-engine client.
//!
//! The engine is an OpenAI-compatible chat-completions endpoint. Each call
//! submits the running message list plus the tool roster rendered as
//! function tools, and yields either a final answer or a batch of tool-call
//! requests for the loop to execute.

use async_trait::async_trait;
use rmcp::model::Tool;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    /// JSON-encoded arguments, exactly as the engine produced them.
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub enum EngineReply {
    Answer(String),
    ToolCalls(Vec<ToolCallRequest>),
}

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn complete(&self, messages: &[Value], tools: &[Value]) -> EngineResult<EngineReply>;
}

pub struct EngineClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl EngineClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        EngineClient {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ReasoningEngine for EngineClient {
    async fn complete(&self, messages: &[Value], tools: &[Value]) -> EngineResult<EngineReply> {
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
        });
        if !tools.is_empty() {
            payload["tools"] = Value::Array(tools.to_vec());
        }

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EngineError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let completion = response
            .json::<ChatCompletion>()
            .await
            .map_err(|e| EngineError::MalformedResponse(e.to_string()))?;
        reply_from_completion(completion)
    }
}

/// Render the cached MCP tool roster as chat-completions function tools.
pub fn tools_as_functions(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": Value::Object((*t.input_schema).clone()),
                }
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

fn reply_from_completion(completion: ChatCompletion) -> EngineResult<EngineReply> {
    let choice = completion.choices.into_iter().next().ok_or_else(|| {
        EngineError::MalformedResponse("completion contained no choices".to_string())
    })?;
    if !choice.message.tool_calls.is_empty() {
        let calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|c| ToolCallRequest {
                call_id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();
        return Ok(EngineReply::ToolCalls(calls));
    }
    match choice.message.content {
        Some(content) if !content.is_empty() => Ok(EngineReply::Answer(content)),
        _ => Err(EngineError::MalformedResponse(
            "completion had neither content nor tool calls".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(body: Value) -> ChatCompletion {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn a_plain_completion_is_a_final_answer() {
        let reply = reply_from_completion(completion(json!({
            "choices": [{"message": {"content": "Natural gas is on the margin."}}]
        })))
        .unwrap();
        match reply {
            EngineReply::Answer(text) => assert_eq!(text, "Natural gas is on the margin."),
            EngineReply::ToolCalls(_) => panic!("expected an answer"),
        }
    }

    #[test]
    fn tool_calls_take_precedence_over_content() {
        let reply = reply_from_completion(completion(json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "current_grid_status", "arguments": "{}"}
                }]
            }}]
        })))
        .unwrap();
        match reply {
            EngineReply::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].call_id, "call_1");
                assert_eq!(calls[0].name, "current_grid_status");
                assert_eq!(calls[0].arguments, "{}");
            }
            EngineReply::Answer(_) => panic!("expected tool calls"),
        }
    }

    #[test]
    fn an_empty_completion_is_malformed() {
        let err = reply_from_completion(completion(json!({"choices": []}))).unwrap_err();
        assert!(matches!(err, EngineError::MalformedResponse(_)));

        let err = reply_from_completion(completion(json!({
            "choices": [{"message": {"content": null}}]
        })))
        .unwrap_err();
        assert!(matches!(err, EngineError::MalformedResponse(_)));
    }
}
