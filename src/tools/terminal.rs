//! Batch shell command execution.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{str_arg, truncate_output, Tool, ToolContext, MAX_OUTPUT_CHARS};

/// Run a non-interactive shell command and capture its output.
pub struct RunCommand;

#[async_trait]
impl Tool for RunCommand {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Execute a non-interactive shell command in the working directory. Returns the exit code, stdout and stderr. Standard input is closed, so use run_interactive for programs that prompt for input."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 120)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let command = str_arg(&args, "command")?;
        let timeout = args["timeout_secs"]
            .as_u64()
            .map(Duration::from_secs)
            .unwrap_or(ctx.command_timeout);

        tracing::info!("Executing command: {}", command);

        let (shell, shell_arg) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let output = tokio::time::timeout(
            timeout,
            Command::new(shell)
                .arg(shell_arg)
                .arg(command)
                .current_dir(&ctx.working_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Command timed out after {} seconds", timeout.as_secs()))?
        .map_err(|e| anyhow::anyhow!("Failed to execute command: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        let mut result = format!("Exit code: {}\n", exit_code);
        if !stdout.is_empty() {
            result.push_str("\n--- stdout ---\n");
            result.push_str(&stdout);
        }
        if !stderr.is_empty() {
            result.push_str("\n--- stderr ---\n");
            result.push_str(&stderr);
        }

        Ok(truncate_output(result, MAX_OUTPUT_CHARS))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn ctx() -> (tempfile::TempDir, ToolContext) {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = ToolContext::new(dir.path());
        (dir, ctx)
    }

    #[tokio::test]
    async fn captures_exit_code_and_streams() {
        let (_dir, ctx) = ctx();
        let out = RunCommand
            .execute(json!({"command": "echo out; echo err >&2; exit 4"}), &ctx)
            .await
            .expect("run");
        assert!(out.starts_with("Exit code: 4"));
        assert!(out.contains("--- stdout ---\nout"));
        assert!(out.contains("--- stderr ---\nerr"));
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let (dir, ctx) = ctx();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let out = RunCommand
            .execute(json!({"command": "ls"}), &ctx)
            .await
            .unwrap();
        assert!(out.contains("marker.txt"));
    }

    #[tokio::test]
    async fn stdin_is_closed() {
        let (_dir, ctx) = ctx();
        let out = RunCommand
            .execute(json!({"command": "cat; echo done"}), &ctx)
            .await
            .unwrap();
        assert!(out.contains("done"));
    }

    #[tokio::test]
    async fn timeout_is_enforced() {
        let (_dir, ctx) = ctx();
        let err = RunCommand
            .execute(json!({"command": "sleep 5", "timeout_secs": 1}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
