//! LLM client abstraction and OpenAI-compatible chat completion types.
//!
//! The agent only talks to backends through [`LlmClient`], so the loop can be
//! driven by a scripted client in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

mod openai;
mod stream;

pub use openai::OpenAiClient;
pub use stream::StreamAccumulator;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("LLM API error ({status}): {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Failed to decode LLM response: {0}")]
    Decode(String),

    #[error("LLM stream error: {0}")]
    Stream(String),

    #[error("LLM returned no choices")]
    EmptyResponse,
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content.into())
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }

    fn plain(role: Role, content: String) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

/// Function name and JSON-encoded argument object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Give every call a correlation id; some backends omit them.
pub(crate) fn ensure_call_ids(calls: &mut [ToolCall]) {
    for call in calls.iter_mut().filter(|c| c.id.is_empty()) {
        call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
    }
}

/// Tool schema entry of the `tools` request array.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            kind: "function",
            function: FunctionDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

/// Token counts reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Parse a `usage` object, accepting the field spellings different
    /// providers use.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| value.get(*k).and_then(Value::as_u64))
                .find(|n| *n > 0)
                .unwrap_or(0)
        };
        let prompt_tokens = first(&["prompt_tokens", "input_tokens"]);
        let completion_tokens = first(&["completion_tokens", "output_tokens", "generated_tokens"]);
        let mut total_tokens = first(&["total_tokens"]);
        if total_tokens == 0 {
            total_tokens = prompt_tokens + completion_tokens;
        }
        Some(Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        })
    }
}

/// One model reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    /// Plain text reply with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::assistant(self.content.clone(), self.tool_calls.clone())
    }
}

/// Parameters of a single chat completion call.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolDefinition],
    pub temperature: Option<f32>,
    pub stream: bool,
}

/// Backend capable of answering chat completion requests.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion. Streamed text deltas are passed to `on_token` as
    /// they arrive; non-streaming implementations may never call it.
    async fn chat(
        &self,
        request: ChatRequest<'_>,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<ChatResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_message_with_tool_calls_serializes_openai_shape() {
        let msg = ChatMessage::assistant(None, vec![ToolCall::new("call_1", "read_file", "{}")]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert!(value["content"].is_null());
        assert_eq!(value["tool_calls"][0]["type"], "function");
        assert_eq!(value["tool_calls"][0]["function"]["name"], "read_file");
        assert!(value.get("tool_call_id").is_none());
    }

    #[test]
    fn tool_message_carries_correlation_id() {
        let msg = ChatMessage::tool("call_9", "calculator", "4");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_9");
        assert_eq!(value["name"], "calculator");
        assert_eq!(value["content"], "4");
    }

    #[test]
    fn usage_accepts_alternate_field_names() {
        let usage = TokenUsage::from_value(&json!({"input_tokens": 10, "output_tokens": 5})).unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);

        let usage = TokenUsage::from_value(&json!({
            "prompt_tokens": 7,
            "generated_tokens": 3,
            "total_tokens": 11
        }))
        .unwrap();
        assert_eq!(usage.completion_tokens, 3);
        assert_eq!(usage.total_tokens, 11);

        assert!(TokenUsage::from_value(&Value::Null).is_none());
    }

    #[test]
    fn missing_call_ids_are_filled() {
        let mut calls = vec![ToolCall::new("", "a", "{}"), ToolCall::new("keep", "b", "{}")];
        ensure_call_ids(&mut calls);
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[1].id, "keep");
    }
}
