//! Accumulation of OpenAI-style streaming deltas into a full response.

use std::collections::BTreeMap;

use serde_json::Value;

use super::{ensure_call_ids, ChatResponse, FunctionCall, TokenUsage, ToolCall};

/// Folds `chat.completion.chunk` payloads into a [`ChatResponse`].
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    /// Keyed by the upstream `index`; only indexes actually seen get a slot.
    tool_calls: BTreeMap<u64, ToolCall>,
    usage: Option<TokenUsage>,
    finish_reason: Option<String>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one decoded chunk. Returns the text delta it carried, if any.
    pub fn apply(&mut self, chunk: &Value) -> Option<String> {
        if let Some(usage) = chunk.get("usage").and_then(TokenUsage::from_value) {
            self.usage = Some(usage);
        }

        let mut text = String::new();
        let choices = chunk.get("choices").and_then(Value::as_array);
        for choice in choices.into_iter().flatten() {
            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                self.finish_reason = Some(reason.to_string());
            }

            let Some(delta) = choice.get("delta") else {
                continue;
            };

            if let Some(piece) = delta.get("content").and_then(Value::as_str) {
                text.push_str(piece);
            }

            // Tool call fragments arrive keyed by index.
            let deltas = delta.get("tool_calls").and_then(Value::as_array);
            for tc in deltas.into_iter().flatten() {
                let idx = tc.get("index").and_then(Value::as_u64).unwrap_or(0);
                let slot = self.tool_calls.entry(idx).or_insert_with(|| ToolCall {
                    id: String::new(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: String::new(),
                        arguments: String::new(),
                    },
                });
                if let Some(id) = tc.get("id").and_then(Value::as_str) {
                    slot.id = id.to_string();
                }
                if let Some(func) = tc.get("function") {
                    if let Some(name) = func.get("name").and_then(Value::as_str) {
                        slot.function.name.push_str(name);
                    }
                    if let Some(args) = func.get("arguments").and_then(Value::as_str) {
                        slot.function.arguments.push_str(args);
                    }
                }
            }
        }

        if text.is_empty() {
            None
        } else {
            self.content.push_str(&text);
            Some(text)
        }
    }

    pub fn finish(self) -> ChatResponse {
        let mut tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_values()
            .filter(|c| !c.function.name.is_empty())
            .collect();
        ensure_call_ids(&mut tool_calls);

        ChatResponse {
            content: (!self.content.is_empty()).then_some(self.content),
            tool_calls,
            usage: self.usage,
            finish_reason: self.finish_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_deltas_concatenate() {
        let mut acc = StreamAccumulator::new();
        assert_eq!(
            acc.apply(&json!({"choices": [{"delta": {"content": "Hel"}}]})),
            Some("Hel".to_string())
        );
        acc.apply(&json!({"choices": [{"delta": {"content": "lo"}, "finish_reason": "stop"}]}));
        let resp = acc.finish();
        assert_eq!(resp.content.as_deref(), Some("Hello"));
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert!(resp.tool_calls.is_empty());
    }

    #[test]
    fn tool_call_fragments_merge_by_index() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "call_a", "function": {"name": "read_", "arguments": "{\"file"}}
        ]}}]}));
        acc.apply(&json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"name": "file", "arguments": "path\": \"x\"}"}},
            {"index": 1, "function": {"name": "ls", "arguments": "{}"}}
        ]}}]}));
        acc.apply(&json!({"choices": [], "usage": {"prompt_tokens": 12, "completion_tokens": 4}}));

        let resp = acc.finish();
        assert_eq!(resp.tool_calls.len(), 2);
        assert_eq!(resp.tool_calls[0].id, "call_a");
        assert_eq!(resp.tool_calls[0].function.name, "read_file");
        assert_eq!(resp.tool_calls[0].function.arguments, "{\"filepath\": \"x\"}");
        assert_eq!(resp.tool_calls[1].function.name, "ls");
        assert!(!resp.tool_calls[1].id.is_empty());
        assert_eq!(resp.usage.unwrap().total_tokens, 16);
        assert!(resp.content.is_none());
    }

    #[test]
    fn sparse_indexes_do_not_allocate_gaps() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&json!({"choices": [{"delta": {"tool_calls": [
            {"index": 5_000_000u64, "id": "call_far", "function": {"name": "ls", "arguments": "{}"}},
            {"index": 2, "id": "call_near", "function": {"name": "read_file", "arguments": "{}"}}
        ]}}]}));

        assert_eq!(acc.tool_calls.len(), 2);
        let resp = acc.finish();
        // Ordered by index, not arrival.
        assert_eq!(resp.tool_calls[0].id, "call_near");
        assert_eq!(resp.tool_calls[1].id, "call_far");
    }
}
