//! Web tools: Brave search and page fetch.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::base::{optional_i64, require_string, Tool};

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_7_2) AppleWebKit/537.36 (KHTML, like Gecko)";

/// Fetch timeout. Web pages, not LLMs, so keep it tight.
const FETCH_TIMEOUT_SECS: u64 = 30;

const DEFAULT_FETCH_MAX_CHARS: usize = 50_000;
const DEFAULT_SEARCH_RESULTS: i64 = 5;

// ─────────────────────────────────────────────
// web_search
// ─────────────────────────────────────────────

/// Brave Search API client.
pub struct WebSearchTool {
    api_key: Option<String>,
    client: Client,
}

impl WebSearchTool {
    /// `api_key` may be `None`; the `BRAVE_API_KEY` env var is the fallback.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            client: Client::builder()
                .user_agent(USER_AGENT)
                .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
        }
    }

    fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("BRAVE_API_KEY").ok())
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns a numbered list of results with titles, URLs, \
         and descriptions."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"},
                "count": {
                    "type": "integer",
                    "description": "Number of results (1-10, default 5)",
                    "minimum": 1,
                    "maximum": 10
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let query = require_string(&params, "query")?;
        let count = optional_i64(&params, "count")
            .unwrap_or(DEFAULT_SEARCH_RESULTS)
            .clamp(1, 10);

        let api_key = self.resolve_api_key().ok_or_else(|| {
            anyhow::anyhow!("No Brave API key configured (set BRAVE_API_KEY or tools.web.search.apiKey)")
        })?;

        debug!(query = %query, count = count, "web search");

        let resp = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", &api_key)
            .query(&[("q", query.as_str()), ("count", &count.to_string())])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Search request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Search API returned {status}: {body}");
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse search response: {e}"))?;
        let results = body["web"]["results"].as_array().cloned().unwrap_or_default();

        if results.is_empty() {
            return Ok("No results found.".into());
        }

        let listing: Vec<String> = results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                format!(
                    "{}. {}\n   {}\n   {}",
                    i + 1,
                    r["title"].as_str().unwrap_or("(no title)"),
                    r["url"].as_str().unwrap_or(""),
                    r["description"].as_str().unwrap_or("")
                )
            })
            .collect();
        Ok(listing.join("\n\n"))
    }
}

// ─────────────────────────────────────────────
// web_fetch
// ─────────────────────────────────────────────

/// Fetch a URL and reduce it to something an LLM can read.
pub struct WebFetchTool {
    client: Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .user_agent(USER_AGENT)
                .redirect(reqwest::redirect::Policy::limited(5))
                .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its main content. HTML is reduced to plain \
         text; JSON is pretty-printed."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "URL to fetch"},
                "maxChars": {
                    "type": "integer",
                    "description": "Truncate the content at this many characters",
                    "minimum": 100
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let url = require_string(&params, "url")?;
        let max_chars = optional_i64(&params, "maxChars")
            .unwrap_or(DEFAULT_FETCH_MAX_CHARS as i64)
            .max(100) as usize;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("Invalid URL: must start with http:// or https://");
        }

        debug!(url = %url, "fetching page");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Fetch failed: {e}"))?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read body: {e}"))?;

        let (text, extractor) = if content_type.contains("json") {
            match serde_json::from_str::<Value>(&body) {
                Ok(v) => (serde_json::to_string_pretty(&v).unwrap_or(body), "json"),
                Err(_) => (body, "raw"),
            }
        } else if content_type.contains("html") || body.trim_start().starts_with('<') {
            (html_to_text(&body), "text")
        } else {
            (body, "raw")
        };

        let truncated = text.len() > max_chars;
        let text = if truncated {
            let mut end = max_chars;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text[..end].to_string()
        } else {
            text
        };

        Ok(serde_json::to_string_pretty(&json!({
            "url": url,
            "finalUrl": final_url,
            "status": status,
            "extractor": extractor,
            "truncated": truncated,
            "length": text.len(),
            "text": text,
        }))
        .unwrap_or_default())
    }
}

// ─────────────────────────────────────────────
// HTML reduction
// ─────────────────────────────────────────────

/// Drop tags, scripts, and styles; decode common entities; collapse runs of
/// whitespace. Good enough for LLM consumption, not a real HTML parser.
fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    let mut skip_depth = false;
    let mut tag = String::new();

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag.to_lowercase();
                match name.as_str() {
                    "script" | "style" => skip_depth = true,
                    "/script" | "/style" => skip_depth = false,
                    "br" | "br/" | "p" | "/p" | "div" | "/div" | "li" | "/li" => out.push('\n'),
                    _ => {}
                }
            }
            _ if in_tag => {
                if ch.is_alphanumeric() || ch == '/' {
                    tag.push(ch);
                }
            }
            _ if skip_depth => {}
            _ => out.push(ch),
        }
    }

    let decoded = out
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    // Collapse horizontal whitespace, then newline runs.
    let mut collapsed = String::with_capacity(decoded.len());
    let mut prev_space = false;
    let mut prev_newline = false;
    for ch in decoded.chars() {
        if ch == '\n' {
            if !prev_newline {
                collapsed.push('\n');
            }
            prev_newline = true;
            prev_space = false;
        } else if ch.is_whitespace() {
            if !prev_space {
                collapsed.push(' ');
            }
            prev_space = true;
            prev_newline = false;
        } else {
            collapsed.push(ch);
            prev_space = false;
            prev_newline = false;
        }
    }

    collapsed.trim().to_string()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
