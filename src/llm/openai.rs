//! OpenAI-compatible `/chat/completions` client.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    ensure_call_ids, ChatRequest, ChatResponse, LlmClient, LlmError, StreamAccumulator,
    TokenUsage, ToolCall,
};

/// Client for any backend speaking the OpenAI chat completions protocol.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Option<Duration>,
}

impl OpenAiClient {
    /// `timeout` bounds a whole call, streaming included; `None` lets a call
    /// run indefinitely.
    pub fn new(
        base_url: &str,
        api_key: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn body(request: &ChatRequest<'_>) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": request.stream,
        });
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }
        if request.stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(body);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }

    async fn complete(&self, request: ChatRequest<'_>) -> Result<ChatResponse, LlmError> {
        let body = Self::body(&request);
        let resp = self.post(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let text = resp.text().await?;
        parse_completion(&text)
    }

    async fn complete_stream(
        &self,
        request: ChatRequest<'_>,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<ChatResponse, LlmError> {
        let body = Self::body(&request);
        let mut source =
            EventSource::new(self.post(&body)).map_err(|e| LlmError::Stream(e.to_string()))?;
        // A failed completion must surface to the caller rather than be replayed.
        source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        let mut acc = StreamAccumulator::new();
        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    let data = message.data.trim();
                    if data == "[DONE]" {
                        break;
                    }
                    match serde_json::from_str::<Value>(data) {
                        Ok(chunk) => {
                            if let Some(text) = acc.apply(&chunk) {
                                on_token(&text);
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "Skipping undecodable stream chunk");
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    source.close();
                    let body = response.text().await.unwrap_or_default();
                    return Err(LlmError::Status { status, body });
                }
                Err(e) => {
                    source.close();
                    return Err(LlmError::Stream(e.to_string()));
                }
            }
        }
        source.close();

        Ok(acc.finish())
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(
        &self,
        request: ChatRequest<'_>,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<ChatResponse, LlmError> {
        tracing::debug!(
            model = request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            stream = request.stream,
            "Calling chat completions"
        );
        if request.stream {
            self.complete_stream(request, on_token).await
        } else {
            self.complete(request).await
        }
    }
}

// Fields we read from a non-streaming completion body.
#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

fn parse_completion(text: &str) -> Result<ChatResponse, LlmError> {
    let body: CompletionBody =
        serde_json::from_str(text).map_err(|e| LlmError::Decode(e.to_string()))?;
    let usage = body.usage.as_ref().and_then(TokenUsage::from_value);
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or(LlmError::EmptyResponse)?;

    let mut tool_calls = choice.message.tool_calls.unwrap_or_default();
    ensure_call_ids(&mut tool_calls);

    Ok(ChatResponse {
        content: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls,
        usage,
        finish_reason: choice.finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ToolDefinition};

    #[test]
    fn request_body_binds_tools_and_stream_options() {
        let messages = vec![ChatMessage::user("hi")];
        let tools = vec![ToolDefinition::function(
            "calculator",
            "Evaluate",
            json!({"type": "object", "properties": {}}),
        )];
        let body = OpenAiClient::body(&ChatRequest {
            model: "gpt-5",
            messages: &messages,
            tools: &tools,
            temperature: Some(0.1),
            stream: true,
        });
        assert_eq!(body["model"], "gpt-5");
        assert_eq!(body["tools"][0]["function"]["name"], "calculator");
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn request_body_omits_empty_tools() {
        let messages = vec![ChatMessage::user("hi")];
        let body = OpenAiClient::body(&ChatRequest {
            model: "m",
            messages: &messages,
            tools: &[],
            temperature: None,
            stream: false,
        });
        assert!(body.get("tools").is_none());
        assert!(body.get("temperature").is_none());
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn parses_tool_call_completion() {
        let resp = parse_completion(
            r#"{
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {"name": "calculator", "arguments": "{\"expression\":\"2+2\"}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {"prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120}
            }"#,
        )
        .unwrap();
        assert!(resp.content.is_none());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].function.name, "calculator");
        assert_eq!(resp.usage.unwrap().prompt_tokens, 100);
    }

    #[test]
    fn empty_choices_is_an_error() {
        assert!(matches!(
            parse_completion(r#"{"choices": []}"#),
            Err(LlmError::EmptyResponse)
        ));
        assert!(matches!(parse_completion("not json"), Err(LlmError::Decode(_))));
    }
}
