//! Agent module - the conversational tool-calling agent.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Append the user input to the session history
//! 2. Call the model with the system prompt and the tool catalog
//! 3. If the model requests tools, run them one by one and feed results back
//! 4. Repeat until the model answers or the iteration cap is reached

mod agent_loop;
mod chain;
mod compress;
mod events;
mod prompt;

#[cfg(test)]
pub(crate) mod testing;

pub use agent_loop::{Agent, ContextUsage, TurnOutcome};
pub use chain::Chain;
pub use compress::CompressOutcome;
pub use events::{AgentEvent, EventSink, NullSink};
pub use prompt::build_system_prompt;
