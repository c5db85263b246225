//! Device integration: opening URLs and asking the user.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{str_arg, Tool, ToolContext};

/// Openers tried in order; the first that exists wins.
const OPENERS: [&str; 3] = ["termux-open-url", "xdg-open", "open"];

pub struct OpenUrl;

#[async_trait]
impl Tool for OpenUrl {
    fn name(&self) -> &str {
        "open_url"
    }

    fn description(&self) -> &str {
        "Open a URL in the device's browser or default handler app."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The URL to open"}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<String> {
        let url = url::Url::parse(str_arg(&args, "url")?)?;

        for opener in OPENERS {
            let status = Command::new(opener)
                .arg(url.as_str())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .status()
                .await;
            match status {
                Ok(s) if s.success() => return Ok(format!("Opened {}", url)),
                Ok(s) => anyhow::bail!("{} exited with {}", opener, s),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        anyhow::bail!("No URL opener available (tried {})", OPENERS.join(", "))
    }
}

/// Put a question to the human at the terminal.
pub struct AskUser;

#[async_trait]
impl Tool for AskUser {
    fn name(&self) -> &str {
        "ask"
    }

    fn description(&self) -> &str {
        "Ask the user a question and wait for the typed answer. Use only when the task cannot continue without the user's input."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {"type": "string", "description": "The question to ask"}
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        if !ctx.interactive {
            anyhow::bail!("No user is available to answer in non-interactive mode");
        }
        let prompt = format!("\n{} => Your answer: ", str_arg(&args, "question")?);

        let answer = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let mut editor = rustyline::DefaultEditor::new()?;
            Ok(editor.readline(&prompt)?)
        })
        .await??;

        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ask_refuses_without_a_user() {
        let ctx = ToolContext::new(std::env::temp_dir());
        let err = AskUser
            .execute(json!({"question": "continue?"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-interactive"));
    }

    #[tokio::test]
    async fn open_url_rejects_invalid_urls() {
        let ctx = ToolContext::new(std::env::temp_dir());
        assert!(OpenUrl
            .execute(json!({"url": "not a url"}), &ctx)
            .await
            .is_err());
    }
}
