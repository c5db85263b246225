//! History compression: replace the conversation with a model-written summary.

use crate::llm::{ChatMessage, LlmError};

use super::agent_loop::Agent;
use super::events::{AgentEvent, EventSink};

const SUMMARY_INSTRUCTION: &str = "Summarize our conversation up to this point. The summary should be a concise yet comprehensive overview of all key topics, questions, answers, and important details discussed. This summary will replace the current chat history to conserve tokens, so it must capture everything essential to understand the context and continue our conversation effectively as if no information was lost.";

const SUMMARY_PREFIX: &str = "This is a summary of the previous conversation:\n";

#[derive(Debug)]
pub enum CompressOutcome {
    /// Fewer than two messages; nothing to do.
    TooShort,
    /// History now holds a single summary message.
    Compressed(String),
    /// The summary call failed; history is unchanged.
    Failed(LlmError),
}

impl Agent {
    /// Summarize the history with one tool-less model call and replace it by
    /// that summary.
    pub async fn compress(&mut self, sink: &mut dyn EventSink) -> CompressOutcome {
        if self.history.len() < 2 {
            return CompressOutcome::TooShort;
        }

        let mut messages = self.history.clone();
        messages.push(ChatMessage::user(SUMMARY_INSTRUCTION));

        let summary = match self.chain.invoke_bare(&messages).await {
            Ok(response) => match response.content.filter(|c| !c.trim().is_empty()) {
                Some(summary) => summary,
                None => return self.compress_failed(LlmError::EmptyResponse, sink),
            },
            Err(e) => return self.compress_failed(e, sink),
        };

        let before = self.history.len();
        self.history = vec![ChatMessage::user(format!("{}{}", SUMMARY_PREFIX, summary))];
        self.usage.reset();
        tracing::info!(before, "History compressed");

        CompressOutcome::Compressed(summary)
    }

    fn compress_failed(&self, error: LlmError, sink: &mut dyn EventSink) -> CompressOutcome {
        tracing::warn!(error = %error, "History compression failed");
        sink.emit(AgentEvent::Error {
            message: format!("Compression failed: {}", error),
        });
        CompressOutcome::Failed(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{scripted_agent, ScriptedLlm};
    use crate::agent::NullSink;
    use crate::llm::{ChatResponse, Role, TokenUsage};

    #[tokio::test]
    async fn short_history_is_left_alone() {
        let llm = ScriptedLlm::new(vec![Ok(ChatResponse::text("unused"))]);
        let mut agent = scripted_agent(llm.clone(), 5);

        let outcome = agent.compress(&mut NullSink).await;

        assert!(matches!(outcome, CompressOutcome::TooShort));
        assert!(agent.history().is_empty());
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn history_becomes_single_summary_message() {
        let mut answer = ChatResponse::text("Paris.");
        answer.usage = Some(TokenUsage {
            prompt_tokens: 50,
            completion_tokens: 5,
            total_tokens: 55,
        });
        let llm = ScriptedLlm::new(vec![
            Ok(answer),
            Ok(ChatResponse::text("User asked for the capital of France.")),
        ]);
        let mut agent = scripted_agent(llm.clone(), 5);
        let mut events: Vec<AgentEvent> = Vec::new();
        agent.run_turn("Capital of France?", &mut events).await;
        assert_eq!(agent.usage().total_tokens, 55);

        let outcome = agent.compress(&mut events).await;

        assert!(matches!(outcome, CompressOutcome::Compressed(ref s) if s.contains("capital")));
        assert_eq!(agent.history().len(), 1);
        assert_eq!(agent.history()[0].role, Role::User);
        assert!(agent.history()[0]
            .text()
            .starts_with("This is a summary of the previous conversation:\n"));
        assert_eq!(agent.usage().total_tokens, 0);

        // Summary call: whole history + instruction, no system prompt, no tools.
        let requests = llm.requests();
        let sent = &requests[1];
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].role, Role::User);
        assert!(sent[2].text().starts_with("Summarize our conversation"));
        assert_eq!(llm.tool_counts()[1], 0);
    }

    #[tokio::test]
    async fn failure_keeps_history() {
        let llm = ScriptedLlm::new(vec![
            Ok(ChatResponse::text("hello")),
            Err(LlmError::Stream("connection reset".into())),
        ]);
        let mut agent = scripted_agent(llm, 5);
        let mut events: Vec<AgentEvent> = Vec::new();
        agent.run_turn("hi", &mut events).await;
        let before = agent.history().to_vec();

        let outcome = agent.compress(&mut events).await;

        assert!(matches!(outcome, CompressOutcome::Failed(_)));
        assert_eq!(agent.history(), before.as_slice());
    }
}
