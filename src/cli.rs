//! Command line front end: argument parsing, the REPL and terminal rendering.

use std::io::Write;
use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use rustyline::error::ReadlineError;

use crate::agent::{Agent, AgentEvent, CompressOutcome, ContextUsage, EventSink, TurnOutcome};
use crate::config::{data_dir, Backend};

const HISTORY_FILE: &str = ".assistant_history";
const BAR_WIDTH: usize = 30;
const PREVIEW_CHARS: usize = 300;

#[derive(Debug, Parser)]
#[command(name = "termux-agent", version, about = "Terminal AI agent with tools")]
#[command(group(ArgGroup::new("backend").args(["qwen", "gpt", "gemini", "deepseek", "kimi"])))]
pub struct Args {
    /// Use Qwen3 235B
    #[arg(long)]
    pub qwen: bool,

    /// Use GPT-5
    #[arg(long)]
    pub gpt: bool,

    /// Use Gemini 2.5 Pro
    #[arg(long)]
    pub gemini: bool,

    /// Use DeepSeek V3
    #[arg(long)]
    pub deepseek: bool,

    /// Use Kimi K2
    #[arg(long)]
    pub kimi: bool,

    /// Config file path
    #[arg(long, env = "TERMUX_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Wait for complete responses instead of streaming tokens
    #[arg(long)]
    pub no_stream: bool,

    /// Maximum model calls per turn
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// One-shot query; starts the interactive session when omitted
    pub query: Vec<String>,
}

impl Args {
    /// Backend chosen on the command line, if any.
    pub fn backend(&self) -> Option<Backend> {
        [
            (self.qwen, Backend::Qwen),
            (self.gpt, Backend::Gpt),
            (self.gemini, Backend::Gemini),
            (self.deepseek, Backend::DeepSeek),
            (self.kimi, Backend::Kimi),
        ]
        .into_iter()
        .find_map(|(set, backend)| set.then_some(backend))
    }

    /// Joined query words, `None` for an interactive session.
    pub fn one_shot_query(&self) -> Option<String> {
        let query = self.query.join(" ");
        (!query.trim().is_empty()).then_some(query)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────────────────

/// Renders agent events on the terminal: model text on stdout, tool
/// activity and notices on stderr.
#[derive(Debug, Default)]
pub struct TerminalSink {
    streamed: bool,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any model text was printed since the last call.
    fn take_streamed(&mut self) -> bool {
        std::mem::take(&mut self.streamed)
    }
}

impl EventSink for TerminalSink {
    fn emit(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::TextDelta { content } => {
                let mut out = std::io::stdout();
                let _ = out.write_all(content.as_bytes());
                let _ = out.flush();
                self.streamed = true;
            }
            AgentEvent::ToolCall { name, arguments, .. } => {
                if self.streamed {
                    println!();
                }
                eprintln!("→ {}({})", name, arguments);
            }
            AgentEvent::ToolResult {
                content, is_error, ..
            } => {
                let marker = if is_error { "✗" } else { "←" };
                eprintln!("{} {}", marker, preview(&content, PREVIEW_CHARS));
            }
            AgentEvent::Usage(_) => {}
            AgentEvent::UsageUnavailable => {
                tracing::debug!("Backend reported no token usage");
            }
            AgentEvent::Warning { message } => eprintln!("⚠ {}", message),
            AgentEvent::Error { message } => eprintln!("✗ {}", message),
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &flat[..cut]),
        None => flat,
    }
}

/// One-line gauge of the last prompt against the context window, e.g.
/// `[#####-----] 12.3% (15744/128000 tokens)`.
pub fn usage_bar(usage: &ContextUsage) -> String {
    let fraction = usage.fraction_used();
    let filled = (fraction * BAR_WIDTH as f64).round() as usize;
    format!(
        "[{}{}] {:.1}% ({}/{} tokens)",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        fraction * 100.0,
        usage.prompt_tokens,
        usage.max_tokens
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Exit,
    Compress,
    Empty,
    Message(String),
}

pub fn parse_repl_input(line: &str) -> ReplCommand {
    let input = line.trim();
    if input.is_empty() {
        return ReplCommand::Empty;
    }
    match input.to_lowercase().as_str() {
        "exit" | "quit" | "q" => ReplCommand::Exit,
        "/compress" => ReplCommand::Compress,
        _ => ReplCommand::Message(input.to_string()),
    }
}

/// Answer a single query without a human in the loop.
pub async fn run_once(agent: &mut Agent, query: &str) -> anyhow::Result<()> {
    let mut sink = TerminalSink::new();
    report_turn(agent.run_turn(query, &mut sink).await, &mut sink)
}

/// Interactive read-eval loop until the user leaves.
pub async fn run_repl(agent: &mut Agent) -> anyhow::Result<()> {
    let mut rl = rustyline::DefaultEditor::new()
        .map_err(|e| anyhow::anyhow!("Failed to create line editor: {}", e))?;

    let history_path = data_dir().join(HISTORY_FILE);
    if let Some(parent) = history_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if rl.load_history(&history_path).is_err() {
        tracing::debug!(path = %history_path.display(), "No REPL history yet");
    }

    eprintln!("Type 'exit' to quit, '/compress' to summarize the conversation.");
    let mut sink = TerminalSink::new();

    loop {
        eprintln!("{}", usage_bar(&agent.usage()));
        let line = match rl.readline("You> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("Failed to read input: {}", e)),
        };

        match parse_repl_input(&line) {
            ReplCommand::Empty => continue,
            ReplCommand::Exit => {
                let _ = rl.add_history_entry(line.trim());
                break;
            }
            ReplCommand::Compress => {
                let _ = rl.add_history_entry(line.trim());
                match agent.compress(&mut sink).await {
                    CompressOutcome::TooShort => eprintln!("Not enough history to compress."),
                    CompressOutcome::Compressed(summary) => {
                        eprintln!("History compressed. Summary:\n{}", summary)
                    }
                    // Already reported through the sink.
                    CompressOutcome::Failed(_) => {}
                }
            }
            ReplCommand::Message(input) => {
                let _ = rl.add_history_entry(input.as_str());
                let outcome = agent.run_turn(&input, &mut sink).await;
                if let Err(e) = report_turn(outcome, &mut sink) {
                    tracing::debug!(error = %e, "Turn did not complete");
                }
            }
        }
    }

    if let Err(e) = rl.save_history(&history_path) {
        tracing::warn!(error = %e, "Failed to save REPL history");
    }
    eprintln!("Bye!");
    Ok(())
}

fn report_turn(outcome: TurnOutcome, sink: &mut TerminalSink) -> anyhow::Result<()> {
    let streamed = sink.take_streamed();
    match outcome {
        TurnOutcome::Completed(text) => {
            if streamed {
                println!();
            } else {
                println!("{}", text);
            }
            Ok(())
        }
        TurnOutcome::IterationLimit => {
            if streamed {
                println!();
            }
            Err(anyhow::anyhow!("Iteration limit reached"))
        }
        TurnOutcome::Failed(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_flags_are_exclusive() {
        let args = Args::try_parse_from(["termux-agent", "--gpt", "hello", "there"]).unwrap();
        assert_eq!(args.backend(), Some(Backend::Gpt));
        assert_eq!(args.one_shot_query().as_deref(), Some("hello there"));

        assert!(Args::try_parse_from(["termux-agent", "--gpt", "--kimi"]).is_err());
    }

    #[test]
    fn no_query_means_interactive() {
        let args = Args::try_parse_from(["termux-agent", "--no-stream"]).unwrap();
        assert!(args.one_shot_query().is_none());
        assert!(args.backend().is_none());
        assert!(args.no_stream);
    }

    #[test]
    fn repl_commands() {
        assert_eq!(parse_repl_input("  "), ReplCommand::Empty);
        assert_eq!(parse_repl_input("EXIT"), ReplCommand::Exit);
        assert_eq!(parse_repl_input("q"), ReplCommand::Exit);
        assert_eq!(parse_repl_input("/compress"), ReplCommand::Compress);
        assert_eq!(
            parse_repl_input(" list files "),
            ReplCommand::Message("list files".to_string())
        );
    }

    #[test]
    fn usage_bar_scales_with_usage() {
        let mut usage = ContextUsage::new(1000);
        assert!(usage_bar(&usage).starts_with(&format!("[{}]", "-".repeat(BAR_WIDTH))));

        usage.prompt_tokens = 500;
        usage.total_tokens = 900;
        let bar = usage_bar(&usage);
        assert!(bar.contains("50.0%"));
        assert!(bar.contains("(500/1000 tokens)"));
        assert_eq!(bar.matches('#').count(), BAR_WIDTH / 2);
    }

    #[test]
    fn preview_flattens_and_cuts() {
        assert_eq!(preview("a\n  b", 10), "a b");
        assert_eq!(preview("abcdef", 3), "abc…");
    }
}
