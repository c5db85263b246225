//! Repository ingestion: clone a git repository and flatten it to text.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{str_arg, truncate_output, Tool, ToolContext};

const CONVERTER_URL: &str = "https://raw.githubusercontent.com/pde-rent/repo2txt/main/main.py";
const CLONE_DIR: &str = "temp_git_repo";
const OUTPUT_FILE: &str = "repo_content.txt";
/// Repository dumps are large; allow more than ordinary tool output.
const MAX_REPO_CHARS: usize = 100_000;

/// Removes its paths when dropped, whatever happened in between.
struct Scratch {
    paths: Vec<PathBuf>,
}

impl Scratch {
    fn new(paths: Vec<PathBuf>) -> Self {
        let scratch = Self { paths };
        scratch.clear();
        scratch
    }

    fn clear(&self) {
        for path in &self.paths {
            let result = if path.is_dir() {
                std::fs::remove_dir_all(path)
            } else if path.exists() {
                std::fs::remove_file(path)
            } else {
                Ok(())
            };
            if let Err(e) = result {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove scratch path");
            }
        }
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        self.clear();
    }
}

pub struct GetGitRepo;

#[async_trait]
impl Tool for GetGitRepo {
    fn name(&self) -> &str {
        "get_git_repo"
    }

    fn description(&self) -> &str {
        "Download a git repository and return its whole content (file tree and file contents) as a single text document."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "Clone URL of the repository"}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let url = str_arg(&args, "url")?;
        ingest_repository(url, ctx).await
    }
}

async fn ingest_repository(url: &str, ctx: &ToolContext) -> anyhow::Result<String> {
    let clone_dir = ctx.scratch_dir.join(CLONE_DIR);
    let output = ctx.scratch_dir.join(OUTPUT_FILE);
    let _scratch = Scratch::new(vec![clone_dir.clone(), output.clone()]);

    tracing::info!(url, "Cloning repository");
    let clone_target = clone_dir.to_string_lossy().into_owned();
    run_git_command(&["clone", "--depth", "1", url, &clone_target], &ctx.scratch_dir).await?;

    ensure_converter(ctx).await?;
    run_converter(&ctx.repo_converter, &clone_dir, &output).await?;

    let content = tokio::fs::read_to_string(&output)
        .await
        .map_err(|e| anyhow::anyhow!("Converter produced no output: {}", e))?;
    Ok(truncate_output(content, MAX_REPO_CHARS))
}

async fn ensure_converter(ctx: &ToolContext) -> anyhow::Result<()> {
    if ctx.repo_converter.exists() {
        return Ok(());
    }
    tracing::info!(path = %ctx.repo_converter.display(), "Downloading repository converter");
    let script = ctx
        .http
        .get(CONVERTER_URL)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    if let Some(parent) = ctx.repo_converter.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&ctx.repo_converter, &script).await?;
    Ok(())
}

/// Python scripts go through an interpreter; anything else runs directly.
async fn run_converter(converter: &Path, repo: &Path, output: &Path) -> anyhow::Result<()> {
    let is_python = converter.extension().is_some_and(|e| e == "py");
    let candidates: Vec<Command> = if is_python {
        ["python3", "python"]
            .into_iter()
            .map(|interpreter| {
                let mut cmd = Command::new(interpreter);
                cmd.arg(converter);
                cmd
            })
            .collect()
    } else {
        vec![Command::new(converter)]
    };

    for mut cmd in candidates {
        let result = cmd
            .arg("-d")
            .arg(repo)
            .arg("-o")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;
        match result {
            Ok(out) if out.status.success() => return Ok(()),
            Ok(out) => anyhow::bail!(
                "Repository converter failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }
    }
    anyhow::bail!("No interpreter found for {}", converter.display())
}

/// Run a git command and return its output.
async fn run_git_command(args: &[&str], cwd: &Path) -> anyhow::Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run git: {}", e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        if stderr.is_empty() {
            return Err(anyhow::anyhow!("Git command failed: {}", stdout.trim()));
        }
        return Err(anyhow::anyhow!("Git error: {}", stderr.trim()));
    }

    Ok(stdout.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_paths_are_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("clone");
        let file = dir.path().join("out.txt");
        {
            let _scratch = Scratch::new(vec![sub.clone(), file.clone()]);
            std::fs::create_dir_all(sub.join("nested")).unwrap();
            std::fs::write(&file, "dump").unwrap();
        }
        assert!(!sub.exists());
        assert!(!file.exists());
    }

    #[test]
    fn stale_scratch_is_cleared_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("temp_git_repo");
        std::fs::create_dir_all(&stale).unwrap();
        let scratch = Scratch::new(vec![stale.clone()]);
        assert!(!stale.exists());
        drop(scratch);
    }

    #[tokio::test]
    async fn failed_clone_leaves_no_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ToolContext::new(dir.path());
        ctx.scratch_dir = dir.path().to_path_buf();

        let missing = dir.path().join("no-such-repo");
        let result = GetGitRepo
            .execute(json!({"url": missing.to_string_lossy()}), &ctx)
            .await;
        assert!(result.is_err());
        assert!(!dir.path().join(CLONE_DIR).exists());
        assert!(!dir.path().join(OUTPUT_FILE).exists());
    }
}
