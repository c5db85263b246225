//! Core agent loop implementation.

use crate::config::SessionConfig;
use crate::llm::{ChatMessage, LlmError, TokenUsage};
use crate::tools::{ToolContext, ToolRegistry};

use super::chain::Chain;
use super::events::{AgentEvent, EventSink};

/// Last token counts reported by the backend. Advisory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub max_tokens: u64,
}

impl ContextUsage {
    pub fn new(max_tokens: u64) -> Self {
        Self {
            max_tokens,
            ..Self::default()
        }
    }

    pub fn update(&mut self, usage: &TokenUsage) {
        self.prompt_tokens = usage.prompt_tokens;
        self.completion_tokens = usage.completion_tokens;
        self.total_tokens = usage.total_tokens;
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.max_tokens);
    }

    /// Share of the context window taken by the last prompt, 0.0..=1.0.
    pub fn fraction_used(&self) -> f64 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        (self.prompt_tokens as f64 / self.max_tokens as f64).min(1.0)
    }
}

/// How a turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The model answered without requesting tools.
    Completed(String),
    /// The iteration cap was reached while the model kept calling tools.
    IterationLimit,
    /// A model call failed; the turn was abandoned.
    Failed(LlmError),
}

/// The conversational agent: a chain, its tools and the session history.
pub struct Agent {
    pub(super) chain: Chain,
    tools: ToolRegistry,
    pub(super) history: Vec<ChatMessage>,
    pub(super) usage: ContextUsage,
    max_iterations: usize,
}

impl Agent {
    pub fn new(chain: Chain, tools: ToolRegistry, config: &SessionConfig) -> Self {
        Self {
            chain,
            tools,
            history: Vec::new(),
            usage: ContextUsage::new(config.max_context_tokens),
            max_iterations: config.max_iterations,
        }
    }

    /// Wire up the builtin tool catalog and the session's backend.
    pub fn from_session(config: &SessionConfig) -> anyhow::Result<Self> {
        let tools = ToolRegistry::builtin(ToolContext::from_session(config))?;
        let chain = Chain::from_session(config, tools.definitions())?;
        tracing::info!(
            model = chain.model(),
            tools = tools.names().len(),
            "Agent ready"
        );
        Ok(Self::new(chain, tools, config))
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn usage(&self) -> ContextUsage {
        self.usage
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Handle one user input: invoke the model, run requested tools one by
    /// one and feed their results back until the model answers or the
    /// iteration cap is hit.
    pub async fn run_turn(&mut self, input: &str, sink: &mut dyn EventSink) -> TurnOutcome {
        self.history.push(ChatMessage::user(input));

        for iteration in 0..self.max_iterations {
            tracing::debug!("Agent iteration {}", iteration + 1);

            let response = match self.chain.invoke(&self.history, sink).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, "Model call failed");
                    sink.emit(AgentEvent::Error {
                        message: e.to_string(),
                    });
                    return TurnOutcome::Failed(e);
                }
            };

            match &response.usage {
                Some(usage) => {
                    self.usage.update(usage);
                    sink.emit(AgentEvent::Usage(*usage));
                }
                None => {
                    self.usage.reset();
                    sink.emit(AgentEvent::UsageUnavailable);
                }
            }

            if !response.has_tool_calls() {
                let text = response.content.unwrap_or_default();
                self.history
                    .push(ChatMessage::assistant(Some(text.clone()), Vec::new()));
                return TurnOutcome::Completed(text);
            }

            self.history.push(response.to_message());

            for call in &response.tool_calls {
                sink.emit(AgentEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                });

                let result = self.tools.dispatch(call).await;

                sink.emit(AgentEvent::ToolResult {
                    id: result.call_id.clone(),
                    name: result.name.clone(),
                    content: result.content.clone(),
                    is_error: result.is_error,
                });
                self.history.push(result.to_message());
            }
        }

        tracing::warn!(max = self.max_iterations, "Iteration limit reached");
        sink.emit(AgentEvent::Warning {
            message: format!(
                "Stopped after {} iterations without a final answer",
                self.max_iterations
            ),
        });
        TurnOutcome::IterationLimit
    }
}
