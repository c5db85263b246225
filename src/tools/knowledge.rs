//! Reference lookups: Wikipedia, Wikidata and Stack Overflow.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::web::html_to_text;
use super::{str_arg, truncate_output, Tool, ToolContext, MAX_OUTPUT_CHARS};

const WIKI_RESULTS: usize = 3;
const WIKI_EXTRACT_CHARS: usize = 4000;

/// Wikipedia page summaries for a query.
pub struct Wikipedia;

#[async_trait]
impl Tool for Wikipedia {
    fn name(&self) -> &str {
        "wikipedia"
    }

    fn description(&self) -> &str {
        "Search Wikipedia and return the summaries of the best matching pages."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to look up"},
                "lang": {"type": "string", "description": "Wikipedia language code (default: en)"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let query = str_arg(&args, "query")?;
        let lang = args["lang"].as_str().unwrap_or("en");
        if !lang.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
            anyhow::bail!("Invalid language code: {}", lang);
        }
        let api = format!("https://{}.wikipedia.org/w/api.php", lang);
        let limit = WIKI_RESULTS.to_string();

        let search: Value = ctx
            .http
            .get(&api)
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("format", "json"),
                ("srsearch", query),
                ("srlimit", limit.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let titles: Vec<String> = search["query"]["search"]
            .as_array()
            .map(|hits| {
                hits.iter()
                    .filter_map(|h| h["title"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if titles.is_empty() {
            return Ok(format!("No Wikipedia pages found for: {}", query));
        }

        let joined = titles.join("|");
        let pages: Value = ctx
            .http
            .get(&api)
            .query(&[
                ("action", "query"),
                ("prop", "extracts"),
                ("explaintext", "1"),
                ("exintro", "1"),
                ("redirects", "1"),
                ("format", "json"),
                ("titles", joined.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(format_wiki_pages(&titles, &pages))
    }
}

/// "Page/Summary" blocks in search rank order.
fn format_wiki_pages(titles: &[String], pages: &Value) -> String {
    let Some(map) = pages["query"]["pages"].as_object() else {
        return "No Wikipedia content returned".to_string();
    };
    let extract_for = |title: &str| {
        map.values()
            .find(|p| p["title"].as_str() == Some(title))
            .and_then(|p| p["extract"].as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let blocks: Vec<String> = titles
        .iter()
        .filter_map(|title| {
            let extract = extract_for(title)?;
            let extract = truncate_output(extract.to_string(), WIKI_EXTRACT_CHARS);
            Some(format!("Page: {}\nSummary: {}", title, extract))
        })
        .collect();

    if blocks.is_empty() {
        "No Wikipedia content returned".to_string()
    } else {
        blocks.join("\n\n")
    }
}

/// Entity search against Wikidata.
pub struct QueryWikidata;

#[derive(Debug, Deserialize)]
struct WikidataSearch {
    #[serde(default)]
    search: Vec<WikidataHit>,
}

#[derive(Debug, Deserialize)]
struct WikidataHit {
    id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[async_trait]
impl Tool for QueryWikidata {
    fn name(&self) -> &str {
        "query_wikidata"
    }

    fn description(&self) -> &str {
        "Look up entities on Wikidata. Returns matching item ids with labels and descriptions, plus aliases and the Wikipedia link of the best match."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Entity to search for"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let query = str_arg(&args, "query")?;
        let api = "https://www.wikidata.org/w/api.php";

        let found: WikidataSearch = ctx
            .http
            .get(api)
            .query(&[
                ("action", "wbsearchentities"),
                ("search", query),
                ("language", "en"),
                ("format", "json"),
                ("limit", "5"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if found.search.is_empty() {
            return Ok(format!("No Wikidata entities found for: {}", query));
        }

        let mut out: Vec<String> = found
            .search
            .iter()
            .map(|hit| {
                format!(
                    "Result {}: {}: {}",
                    hit.id,
                    hit.label.as_deref().unwrap_or("(no label)"),
                    hit.description.as_deref().unwrap_or("(no description)")
                )
            })
            .collect();

        // Aliases and sitelink for the top hit.
        let top = &found.search[0].id;
        let entity: Value = ctx
            .http
            .get(api)
            .query(&[
                ("action", "wbgetentities"),
                ("ids", top.as_str()),
                ("languages", "en"),
                ("props", "aliases|sitelinks/urls"),
                ("sitefilter", "enwiki"),
                ("format", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        out.extend(entity_details(&entity["entities"][top]));

        Ok(out.join("\n"))
    }
}

fn entity_details(entity: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    let aliases: Vec<&str> = entity["aliases"]["en"]
        .as_array()
        .map(|a| a.iter().filter_map(|v| v["value"].as_str()).collect())
        .unwrap_or_default();
    if !aliases.is_empty() {
        lines.push(format!("Aliases: {}", aliases.join(", ")));
    }
    if let Some(url) = entity["sitelinks"]["enwiki"]["url"].as_str() {
        lines.push(format!("Wikipedia: {}", url));
    }
    lines
}

/// Question search on Stack Overflow.
pub struct StackOverflow;

#[async_trait]
impl Tool for StackOverflow {
    fn name(&self) -> &str {
        "stackoverflow"
    }

    fn description(&self) -> &str {
        "Search Stack Overflow for programming questions and answers. Returns question titles with matching excerpts."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Programming question or error message"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let query = str_arg(&args, "query")?;

        let body: Value = ctx
            .http
            .get("https://api.stackexchange.com/2.3/search/excerpts")
            .query(&[
                ("order", "desc"),
                ("sort", "relevance"),
                ("site", "stackoverflow"),
                ("pagesize", "10"),
                ("q", query),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let out = format_excerpts(&body);
        if out.is_empty() {
            Ok(format!("No Stack Overflow results found for: {}", query))
        } else {
            Ok(truncate_output(out, MAX_OUTPUT_CHARS))
        }
    }
}

fn format_excerpts(body: &Value) -> String {
    let items = body["items"].as_array().map(Vec::as_slice).unwrap_or_default();
    items
        .iter()
        .map(|item| {
            let title = html_to_text(item["title"].as_str().unwrap_or(""));
            let excerpt = html_to_text(item["excerpt"].as_str().unwrap_or(""));
            match item["item_type"].as_str() {
                Some("answer") => format!("Answer to: {}\n{}", title, excerpt),
                _ => format!("Question: {}\n{}", title, excerpt),
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
