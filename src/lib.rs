//! # termux-agent
//!
//! A conversational terminal agent and a streaming chat proxy.
//!
//! This library provides:
//! - A tool-calling agent loop over OpenAI-compatible chat backends
//! - A catalog of local and web tools (files, shell, search, math, ...)
//! - A pass-through HTTP proxy that relays streamed completions
//!
//! ## Architecture
//!
//! The agent follows the "tools in a loop" pattern:
//! 1. Read a user message (REPL or one-shot query)
//! 2. Send history, system prompt and tool schemas to the model
//! 3. Execute each requested tool and append its result
//! 4. Repeat until the model answers in plain text or the iteration cap hits
//!
//! ## Example
//!
//! ```rust,ignore
//! use termux_agent::{agent::{Agent, NullSink}, config::*};
//!
//! let file = FileConfig::load(&resolve_config_path(None)?)?;
//! let session = SessionConfig::resolve(&file, Some(Backend::Gpt), false)?;
//! let mut agent = Agent::from_session(&session)?;
//! let outcome = agent.run_turn("What is 2 + 2?", &mut NullSink).await;
//! ```

pub mod agent;
pub mod api;
pub mod cli;
pub mod config;
pub mod llm;
pub mod tools;

pub use config::{Backend, SessionConfig};
