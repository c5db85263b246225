//! Text-to-image generation through Pollinations.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{str_arg, Tool, ToolContext};

const IMAGE_ENDPOINT: &str = "https://image.pollinations.ai/prompt/";

fn image_url(prompt: &str) -> String {
    format!("{}{}", IMAGE_ENDPOINT, urlencoding::encode(prompt))
}

pub struct CreateImage;

#[async_trait]
impl Tool for CreateImage {
    fn name(&self) -> &str {
        "create_image"
    }

    fn description(&self) -> &str {
        "Generate an image from a text prompt and save it to a file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {"type": "string", "description": "Description of the image"},
                "filename": {"type": "string", "description": "Where to save the image, e.g. cat.jpg"}
            },
            "required": ["prompt", "filename"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let prompt = str_arg(&args, "prompt")?;
        let path = ctx.resolve(str_arg(&args, "filename")?);

        let bytes = ctx
            .http
            .get(image_url(prompt))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        if bytes.is_empty() {
            anyhow::bail!("Image service returned no data");
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;

        Ok(format!("Image saved to {} ({} bytes)", path.display(), bytes.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_is_path_encoded() {
        assert_eq!(
            image_url("a cat / on mars"),
            "https://image.pollinations.ai/prompt/a%20cat%20%2F%20on%20mars"
        );
    }

    #[tokio::test]
    async fn filename_is_required() {
        let schema = CreateImage.parameters_schema();
        assert_eq!(schema["required"], json!(["prompt", "filename"]));

        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let err = CreateImage
            .execute(json!({"prompt": "a cat"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("filename"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
