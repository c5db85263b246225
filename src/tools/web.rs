//! Web search and page scraping.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use super::{str_arg, truncate_output, Tool, ToolContext, MAX_OUTPUT_CHARS};

const BROWSER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Search the web through DuckDuckGo's HTML endpoint (no API key needed).
pub struct DuckDuckGo;

#[async_trait]
impl Tool for DuckDuckGo {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    fn description(&self) -> &str {
        "Search the web with DuckDuckGo. Returns result titles, snippets and URLs. Use it to look up facts instead of guessing."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "num_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default: 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let query = str_arg(&args, "query")?;
        let limit = args["num_results"].as_u64().unwrap_or(5) as usize;

        let url = format!(
            "https://html.duckduckgo.com/html/?q={}",
            urlencoding::encode(query)
        );
        let html = ctx
            .http
            .get(&url)
            .header(reqwest::header::USER_AGENT, BROWSER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let results = extract_ddg_results(&html, limit);
        if results.is_empty() {
            Ok(format!("No results found for: {}", query))
        } else {
            Ok(results.join("\n\n"))
        }
    }
}

fn extract_ddg_results(html: &str, limit: usize) -> Vec<String> {
    let field = |chunk: &str, class: &str| {
        chunk
            .split(class)
            .nth(1)
            .and_then(|s| s.split_once('>'))
            .and_then(|(_, rest)| rest.split("</").next())
            .map(|s| html_to_text(s))
            .unwrap_or_default()
    };

    html.split("class=\"result__body\"")
        .skip(1)
        .filter_map(|chunk| {
            let title = field(chunk, "class=\"result__a\"");
            if title.is_empty() {
                return None;
            }
            let snippet = field(chunk, "class=\"result__snippet\"");
            let url = field(chunk, "class=\"result__url\"");
            Some(format!("{}\n{}\nURL: {}", title, snippet, url))
        })
        .take(limit)
        .collect()
}

/// Fetch a page and return its readable text.
pub struct ScrapeWebpage;

#[async_trait]
impl Tool for ScrapeWebpage {
    fn name(&self) -> &str {
        "scrape_webpage"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its readable text content with scripts, styles and markup removed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let url = url::Url::parse(str_arg(&args, "url")?)?;

        let response = ctx
            .http
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, BROWSER_AGENT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP error: {}", status);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await?;

        let text = if content_type.contains("html") || content_type.is_empty() {
            html_to_text(&body)
        } else {
            body
        };
        Ok(truncate_output(text, MAX_OUTPUT_CHARS))
    }
}

/// Reduce an HTML document or fragment to whitespace-normalized text.
pub(crate) fn html_to_text(html: &str) -> String {
    static SKIPPED: OnceLock<Regex> = OnceLock::new();
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();

    let skipped = SKIPPED.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript|svg|head)\b.*?</(script|style|noscript|svg|head)\s*>|<!--.*?-->")
            .expect("static regex")
    });
    let block = BLOCK.get_or_init(|| {
        Regex::new(r"(?i)<\s*(br|/p|/div|/li|/h[1-6]|/tr|/section|/article)\b[^>]*>")
            .expect("static regex")
    });
    let tag = TAG.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));

    let text = skipped.replace_all(html, " ");
    let text = block.replace_all(&text, "\n");
    let text = tag.replace_all(&text, " ");
    let text = html_decode(&text);

    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode the handful of entities common in page text.
pub(crate) fn html_decode(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
