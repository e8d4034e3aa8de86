//! Web tools: search and fetch.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::builtins::require;
use crate::context::ToolContext;
use crate::{Tool, ToolOutput, ToolParam, ToolSpec};

const FETCH_BODY_LIMIT: usize = 8_192;

pub struct WebSearchTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_search".to_string(),
            description: "Search the web (Brave Search API).".to_string(),
            params: vec![ToolParam::required("query", "Search query")],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let query = match require(args, "query") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let Some(api_key) = &self.ctx.web_search_key else {
            return Ok(ToolOutput::fail(
                "web search is not configured (BRAVE_API_KEY missing)",
            ));
        };

        let response = self
            .ctx
            .http
            .get("https://api.search.brave.com/res/v1/web/search")
            .query(&[("q", query), ("count", "5")])
            .header("X-Subscription-Token", api_key)
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(e) => return Ok(ToolOutput::fail(format!("web search failed: {e}"))),
        };
        if !response.status().is_success() {
            return Ok(ToolOutput::fail(format!(
                "web search failed: HTTP {}",
                response.status()
            )));
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return Ok(ToolOutput::fail(format!("web search returned invalid JSON: {e}"))),
        };
        let mut lines = Vec::new();
        if let Some(results) = body["web"]["results"].as_array() {
            for result in results.iter().take(5) {
                lines.push(format!(
                    "- {} — {}\n  {}",
                    result["title"].as_str().unwrap_or("(untitled)"),
                    result["url"].as_str().unwrap_or(""),
                    result["description"].as_str().unwrap_or(""),
                ));
            }
        }
        if lines.is_empty() {
            return Ok(ToolOutput::ok("No results."));
        }
        Ok(ToolOutput::ok(lines.join("\n")))
    }
}

pub struct WebFetchTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for WebFetchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_fetch".to_string(),
            description: "Fetch a URL and return the beginning of its body.".to_string(),
            params: vec![ToolParam::required("url", "URL to fetch (http or https)")],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let url = match require(args, "url") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Ok(ToolOutput::fail("only http(s) URLs are supported"));
        }

        let response = match self.ctx.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => return Ok(ToolOutput::fail(format!("fetch failed: {e}"))),
        };
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let mut end = body.len().min(FETCH_BODY_LIMIT);
        while end > 0 && !body.is_char_boundary(end) {
            end -= 1;
        }
        let mut output = format!("HTTP {status}\n{}", &body[..end]);
        if body.len() > end {
            output.push_str("…[truncated]");
        }
        Ok(ToolOutput {
            success: status.is_success(),
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use athena_exec::ActionExecutor;
    use athena_memory::InventoryStore;
    use athena_triage::ErrorAnalyzer;

    #[tokio::test]
    async fn web_search_without_key_fails_cleanly() {
        let store = Arc::new(InventoryStore::open_in_memory().await.unwrap());
        let executor = Arc::new(ActionExecutor::new(Arc::new(ErrorAnalyzer::new())));
        let ctx = Arc::new(ToolContext::new(store, executor, None));

        let tool = WebSearchTool { ctx };
        let mut args = HashMap::new();
        args.insert("query".to_string(), "rust".to_string());
        let output = tool.run(&args).await.unwrap();
        assert!(!output.success);
        assert!(output.output.contains("not configured"));
    }

    #[tokio::test]
    async fn web_fetch_rejects_non_http() {
        let store = Arc::new(InventoryStore::open_in_memory().await.unwrap());
        let executor = Arc::new(ActionExecutor::new(Arc::new(ErrorAnalyzer::new())));
        let ctx = Arc::new(ToolContext::new(store, executor, None));

        let tool = WebFetchTool { ctx };
        let mut args = HashMap::new();
        args.insert("url".to_string(), "file:///etc/passwd".to_string());
        let output = tool.run(&args).await.unwrap();
        assert!(!output.success);
    }
}
