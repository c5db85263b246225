//! File reading, writing, editing and directory listing.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{str_arg, Tool, ToolContext};

/// Replace the first occurrence of `old` in `content`.
///
/// Returns `None` when `old` does not occur (or is empty).
pub fn replace_first(content: &str, old: &str, new: &str) -> Option<String> {
    if old.is_empty() {
        return None;
    }
    let start = content.find(old)?;
    let mut out = String::with_capacity(content.len() - old.len() + new.len());
    out.push_str(&content[..start]);
    out.push_str(new);
    out.push_str(&content[start + old.len()..]);
    Some(out)
}

pub struct ReadFile;

#[async_trait]
impl Tool for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the full text content of a file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filepath": {
                    "type": "string",
                    "description": "Path of the file, absolute or relative to the working directory"
                }
            },
            "required": ["filepath"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let path = ctx.resolve(str_arg(&args, "filepath")?);
        if !path.exists() {
            anyhow::bail!("File not found: {}", path.display());
        }
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))
    }
}

pub struct WriteFile;

#[async_trait]
impl Tool for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text to a file, replacing its content or appending to it. Parent directories are created as needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filepath": {"type": "string", "description": "Path of the file to write"},
                "content": {"type": "string", "description": "Text to write"},
                "append": {"type": "boolean", "description": "Append instead of overwriting (default: false)"}
            },
            "required": ["filepath", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let path = ctx.resolve(str_arg(&args, "filepath")?);
        let content = str_arg(&args, "content")?;
        let append = args["append"].as_bool().unwrap_or(false);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            Ok(format!("Content appended to {}", path.display()))
        } else {
            tokio::fs::write(&path, content).await?;
            Ok(format!("File {} written successfully", path.display()))
        }
    }
}

pub struct EditFile;

#[async_trait]
impl Tool for EditFile {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing the first occurrence of an exact text snippet with new text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filepath": {"type": "string", "description": "Path of the file to edit"},
                "old_snippet": {"type": "string", "description": "Exact text to find"},
                "new_snippet": {"type": "string", "description": "Replacement text"}
            },
            "required": ["filepath", "old_snippet", "new_snippet"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let path = ctx.resolve(str_arg(&args, "filepath")?);
        let old = str_arg(&args, "old_snippet")?;
        let new = str_arg(&args, "new_snippet")?;

        if !path.exists() {
            anyhow::bail!("File not found: {}", path.display());
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let Some(edited) = replace_first(&content, old, new) else {
            anyhow::bail!("Snippet not found in {}", path.display());
        };
        tokio::fs::write(&path, edited).await?;

        Ok(format!("File {} edited successfully", path.display()))
    }
}

pub struct ListDirectory;

#[async_trait]
impl Tool for ListDirectory {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List the entries of a directory as JSON with their names and types (file, directory or other)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list (default: working directory)"}
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let path = ctx.resolve(args["path"].as_str().unwrap_or("."));
        if !path.is_dir() {
            anyhow::bail!("Not a directory: {}", path.display());
        }

        let mut entries = tokio::fs::read_dir(&path).await?;
        let mut contents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let kind = if file_type.is_dir() {
                "directory"
            } else if file_type.is_file() {
                "file"
            } else {
                "other"
            };
            contents.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "type": kind,
            }));
        }
        contents.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        let listing = json!({
            "path": path.display().to_string(),
            "contents": contents,
        });
        Ok(serde_json::to_string_pretty(&listing)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_only_first_occurrence() {
        assert_eq!(
            replace_first("abcXYZdef", "XYZ", "123").as_deref(),
            Some("abc123def")
        );
        assert_eq!(
            replace_first("a b a b", "a", "x").as_deref(),
            Some("x b a b")
        );
        assert_eq!(replace_first("abc", "zz", "x"), None);
        assert_eq!(replace_first("abc", "", "x"), None);
    }

    #[tokio::test]
    async fn write_append_read_edit_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());

        WriteFile
            .execute(json!({"filepath": "notes/a.txt", "content": "hello "}), &ctx)
            .await
            .expect("write");
        WriteFile
            .execute(
                json!({"filepath": "notes/a.txt", "content": "world", "append": true}),
                &ctx,
            )
            .await
            .expect("append");
        let text = ReadFile
            .execute(json!({"filepath": "notes/a.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(text, "hello world");

        EditFile
            .execute(
                json!({"filepath": "notes/a.txt", "old_snippet": "world", "new_snippet": "rust"}),
                &ctx,
            )
            .await
            .expect("edit");
        let on_disk = std::fs::read_to_string(dir.path().join("notes/a.txt")).unwrap();
        assert_eq!(on_disk, "hello rust");
    }

    #[tokio::test]
    async fn edit_reports_missing_snippet_and_leaves_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "keep me").unwrap();
        let ctx = ToolContext::new(dir.path());

        let err = EditFile
            .execute(
                json!({"filepath": "f.txt", "old_snippet": "absent", "new_snippet": "x"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "keep me");
    }

    #[tokio::test]
    async fn read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let err = ReadFile
            .execute(json!({"filepath": "nope.txt"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }

    #[tokio::test]
    async fn ls_reports_names_and_types() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        let ctx = ToolContext::new(dir.path());

        let out = ListDirectory.execute(json!({}), &ctx).await.unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        let contents = value["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["name"], "b.txt");
        assert_eq!(contents[0]["type"], "file");
        assert_eq!(contents[1]["name"], "sub");
        assert_eq!(contents[1]["type"], "directory");
    }
}
