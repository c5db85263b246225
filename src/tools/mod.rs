//! Tool catalog exposed to the model.
//!
//! Tools are registered explicitly in [`ToolRegistry::builtin`]; each one
//! declares its JSON parameter schema, which becomes the `tools` array of
//! every chat completion request.

mod files;
mod git;
mod image;
mod knowledge;
mod math;
mod pty;
mod system;
mod terminal;
mod weather;
mod web;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::SessionConfig;
use crate::llm::{ChatMessage, ToolCall, ToolDefinition};

pub use files::{replace_first, EditFile, ListDirectory, ReadFile, WriteFile};
pub use git::GetGitRepo;
pub use image::CreateImage;
pub use knowledge::{QueryWikidata, StackOverflow, Wikipedia};
pub use math::{evaluate_expression, solve_equation, Calculator, Solution, SolveEquation};
pub use pty::{run_interactive, InteractiveCommand, RelayOutcome};
pub use system::{AskUser, OpenUrl};
pub use terminal::RunCommand;
pub use weather::WeatherForecast;
pub use web::{DuckDuckGo, ScrapeWebpage};

/// Longest tool output handed back to the model.
pub const MAX_OUTPUT_CHARS: usize = 10_000;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Tool '{0}' is registered twice")]
    Duplicate(String),
}

/// Environment shared by all tool invocations of a session.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Relative paths resolve against this directory.
    pub working_dir: PathBuf,
    /// Whether a human is at the terminal.
    pub interactive: bool,
    pub command_timeout: Duration,
    /// Repository-to-text converter script; fetched when missing.
    pub repo_converter: PathBuf,
    /// Where repository ingestion clones and converts.
    pub scratch_dir: PathBuf,
    pub http: reqwest::Client,
}

impl ToolContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("termux-agent/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            working_dir: working_dir.into(),
            interactive: false,
            command_timeout: Duration::from_secs(120),
            repo_converter: crate::config::data_dir().join("repo2txt.py"),
            scratch_dir: std::env::temp_dir(),
            http,
        }
    }

    pub fn from_session(config: &SessionConfig) -> Self {
        let mut ctx = Self::new(config.working_dir.clone());
        ctx.interactive = config.interactive;
        ctx.command_timeout = Duration::from_secs(config.tools.command_timeout_secs);
        if let Some(path) = &config.tools.repo_converter {
            ctx.repo_converter = expand_home(path);
        }
        ctx
    }

    /// Resolve a tool-supplied path: `~` expands to the home directory and
    /// relative paths are taken from the working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let expanded = expand_home(Path::new(path));
        if expanded.is_absolute() {
            expanded
        } else {
            self.working_dir.join(expanded)
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// A capability the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the argument object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String>;
}

/// Outcome of one dispatched tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    fn ok(call: &ToolCall, content: String) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.function.name.clone(),
            content,
            is_error: false,
        }
    }

    fn error(call: &ToolCall, content: String) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.function.name.clone(),
            content,
            is_error: true,
        }
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::tool(&self.call_id, &self.name, &self.content)
    }
}

/// Name → tool table, in registration order.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
    ctx: ToolContext,
}

impl ToolRegistry {
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            tools: Vec::new(),
            by_name: HashMap::new(),
            ctx,
        }
    }

    /// The standard catalog. `ask` is only offered when a human is present.
    pub fn builtin(ctx: ToolContext) -> Result<Self, RegistryError> {
        let interactive = ctx.interactive;
        let mut registry = Self::new(ctx);

        registry.register(Arc::new(ReadFile))?;
        registry.register(Arc::new(WriteFile))?;
        registry.register(Arc::new(EditFile))?;
        registry.register(Arc::new(ListDirectory))?;
        registry.register(Arc::new(RunCommand))?;
        registry.register(Arc::new(InteractiveCommand))?;
        registry.register(Arc::new(Calculator))?;
        registry.register(Arc::new(SolveEquation))?;
        registry.register(Arc::new(DuckDuckGo))?;
        registry.register(Arc::new(ScrapeWebpage))?;
        registry.register(Arc::new(Wikipedia))?;
        registry.register(Arc::new(QueryWikidata))?;
        registry.register(Arc::new(StackOverflow))?;
        registry.register(Arc::new(WeatherForecast))?;
        registry.register(Arc::new(CreateImage))?;
        registry.register(Arc::new(GetGitRepo))?;
        registry.register(Arc::new(OpenUrl))?;
        if interactive {
            registry.register(Arc::new(AskUser))?;
        }

        Ok(registry)
    }

    /// Add a tool; a second tool with the same name is rejected.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Schema catalog for the model, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition::function(t.name(), t.description(), t.parameters_schema()))
            .collect()
    }

    /// Run one tool call. Never fails: unknown tools, bad arguments, tool
    /// errors and panics all come back as an error result for the model.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let name = call.function.name.as_str();

        let Some(tool) = self.get(name) else {
            tracing::warn!(tool = name, "Model requested an unknown tool");
            return ToolResult::error(call, format!("Unknown tool: {}", name));
        };

        let args = match parse_arguments(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                return ToolResult::error(
                    call,
                    format!("Error calling tool '{}': invalid arguments: {}", name, e),
                );
            }
        };

        tracing::info!(tool = name, call_id = %call.id, "Executing tool");

        // Run on its own task so a panicking tool cannot take the loop down.
        let tool = Arc::clone(tool);
        let ctx = self.ctx.clone();
        let handle = tokio::spawn(async move { tool.execute(args, &ctx).await });

        match handle.await {
            Ok(Ok(output)) => ToolResult::ok(call, output),
            Ok(Err(e)) => {
                tracing::warn!(tool = name, error = %e, "Tool failed");
                ToolResult::error(call, format!("Error calling tool '{}': {:#}", name, e))
            }
            Err(e) => {
                tracing::error!(tool = name, error = %e, "Tool panicked");
                ToolResult::error(call, format!("Error calling tool '{}': {}", name, e))
            }
        }
    }
}

fn parse_arguments(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument helpers
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn str_arg<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    args[key]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' argument", key))
}

/// Numeric argument given either as a JSON number or a numeric string.
pub(crate) fn f64_arg(args: &Value, key: &str) -> anyhow::Result<f64> {
    match &args[key] {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("Invalid '{}' argument", key)),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid '{}' argument: {}", key, s)),
        _ => Err(anyhow::anyhow!("Missing '{}' argument", key)),
    }
}

/// Cut `text` to at most `max` bytes on a char boundary, noting the cut.
pub(crate) fn truncate_output(mut text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("\n... [output truncated]");
    text
}
