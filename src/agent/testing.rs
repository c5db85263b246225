//! Scripted model and tools for driving the agent in tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{Backend, SessionConfig};
use crate::llm::{ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmError, ToolCall};
use crate::tools::{str_arg, Tool, ToolContext, ToolRegistry};

use super::{Agent, Chain};

/// Replays canned responses and records every request it receives.
pub(crate) struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
    requests: Mutex<Vec<(Vec<ChatMessage>, usize)>>,
}

impl ScriptedLlm {
    pub(crate) fn new(replies: Vec<Result<ChatResponse, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub(crate) fn tool_counts(&self) -> Vec<usize> {
        self.requests.lock().unwrap().iter().map(|(_, n)| *n).collect()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(
        &self,
        request: ChatRequest<'_>,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<ChatResponse, LlmError> {
        self.requests
            .lock()
            .unwrap()
            .push((request.messages.to_vec(), request.tools.len()));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse));
        if let Ok(response) = &reply {
            if request.stream {
                if let Some(text) = &response.content {
                    on_token(text);
                }
            }
        }
        reply
    }
}

/// Echoes its `text` argument.
pub(crate) struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the text argument"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<String> {
        Ok(str_arg(&args, "text")?.to_string())
    }
}

pub(crate) fn tool_reply(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse {
        tool_calls: calls,
        ..ChatResponse::default()
    }
}

pub(crate) fn scripted_agent(llm: Arc<ScriptedLlm>, max_iterations: usize) -> Agent {
    let mut config = SessionConfig::new(Backend::Qwen, "http://127.0.0.1:9".into(), PathBuf::from("."));
    config.max_iterations = max_iterations;

    let mut tools = ToolRegistry::new(ToolContext::new(std::env::temp_dir()));
    tools.register(Arc::new(EchoTool)).unwrap();

    let chain = Chain::new(&config, llm, tools.definitions());
    Agent::new(chain, tools, &config)
}
