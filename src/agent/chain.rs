//! A model bound to its system prompt and tool catalog.

use std::sync::Arc;

use crate::config::SessionConfig;
use crate::llm::{
    ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmError, OpenAiClient, ToolDefinition,
};

use super::events::{AgentEvent, EventSink};
use super::prompt::build_system_prompt;

pub struct Chain {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    tools: Vec<ToolDefinition>,
    model: String,
    temperature: f32,
    streaming: bool,
}

impl Chain {
    pub fn new(config: &SessionConfig, llm: Arc<dyn LlmClient>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            llm,
            system_prompt: build_system_prompt(&config.model, config.interactive),
            tools,
            model: config.model.clone(),
            temperature: config.temperature,
            streaming: config.streaming,
        }
    }

    /// Chain talking to the session's OpenAI-compatible backend.
    pub fn from_session(config: &SessionConfig, tools: Vec<ToolDefinition>) -> Result<Self, LlmError> {
        let client = OpenAiClient::new(&config.base_url, &config.api_key, config.request_timeout)?;
        Ok(Self::new(config, Arc::new(client), tools))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// One model call over `history` with the system prompt prepended and the
    /// tool catalog bound. Streamed text goes to `sink` as it arrives.
    pub async fn invoke(
        &self,
        history: &[ChatMessage],
        sink: &mut dyn EventSink,
    ) -> Result<ChatResponse, LlmError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend_from_slice(history);

        let request = ChatRequest {
            model: &self.model,
            messages: &messages,
            tools: &self.tools,
            temperature: Some(self.temperature),
            stream: self.streaming,
        };
        let mut on_token = |text: &str| {
            sink.emit(AgentEvent::TextDelta {
                content: text.to_string(),
            })
        };
        self.llm.chat(request, &mut on_token).await
    }

    /// Plain model call: no system prompt, no tools, nothing streamed.
    pub async fn invoke_bare(&self, messages: &[ChatMessage]) -> Result<ChatResponse, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            tools: &[],
            temperature: Some(self.temperature),
            stream: false,
        };
        self.llm.chat(request, &mut |_: &str| {}).await
    }
}
