use crate::llm::TokenUsage;

/// Observable progress of an agent turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Streamed model text.
    TextDelta { content: String },
    /// The model asked for a tool.
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// A tool finished (successfully or not).
    ToolResult {
        id: String,
        name: String,
        content: String,
        is_error: bool,
    },
    /// Token usage reported by the backend.
    Usage(TokenUsage),
    /// The backend reported no token usage for the last call.
    UsageUnavailable,
    /// Something the user should know about, e.g. the iteration cap.
    Warning { message: String },
    /// A model call failed; the turn was abandoned.
    Error { message: String },
}

/// Receiver of [`AgentEvent`]s, e.g. the terminal renderer.
pub trait EventSink: Send {
    fn emit(&mut self, event: AgentEvent);
}

/// Collects events in memory.
impl EventSink for Vec<AgentEvent> {
    fn emit(&mut self, event: AgentEvent) {
        self.push(event);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: AgentEvent) {}
}
