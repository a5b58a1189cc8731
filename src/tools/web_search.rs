//! Live web lookup via the DuckDuckGo Instant Answer API.
//!
//! One GET per call, no retry. The JSON response is flattened into a short
//! plain-text observation: heading, abstract, direct answer, definition,
//! then up to `max_results` related topics.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::{Tool, ToolError};
use crate::config::WebSearchConfig;

pub const WEB_SEARCH_TOOL: &str = "Web_Search";

const WEB_SEARCH_DESCRIPTION: &str = "Useful for finding real-time information, such as current \
stock prices, news, or general data not available in the provided documents. Input should be a \
search query.";

pub const NO_RESULTS: &str = "No good search result found.";

pub struct WebSearchTool {
    client: reqwest::Client,
    url: String,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(config: &WebSearchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("finrag/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            max_results: config.max_results,
        })
    }

    pub async fn search(&self, query: &str) -> Result<String, ToolError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ToolError::invalid_input(WEB_SEARCH_TOOL, "query is empty"));
        }

        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| ToolError::execution(WEB_SEARCH_TOOL, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::execution(
                WEB_SEARCH_TOOL,
                format!("search backend returned {status}"),
            ));
        }

        // DuckDuckGo answers with `application/x-javascript`, so parse by hand.
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::execution(WEB_SEARCH_TOOL, e.to_string()))?;
        let json: Value = serde_json::from_str(&body)
            .map_err(|e| ToolError::execution(WEB_SEARCH_TOOL, format!("invalid response: {e}")))?;

        Ok(summarize_instant_answer(&json, self.max_results))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        WEB_SEARCH_DESCRIPTION
    }

    async fn invoke(&self, input: &str) -> Result<String, ToolError> {
        self.search(input).await
    }
}

/// Flatten an Instant Answer payload into observation text.
pub fn summarize_instant_answer(json: &Value, max_results: usize) -> String {
    let field = |name: &str| {
        json.get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let mut lines = Vec::new();
    match (field("Heading"), field("AbstractText")) {
        (Some(h), Some(a)) => lines.push(format!("{h}: {a}")),
        (None, Some(a)) => lines.push(a.to_string()),
        (Some(h), None) => lines.push(h.to_string()),
        (None, None) => {}
    }
    if let Some(answer) = field("Answer") {
        lines.push(answer.to_string());
    }
    if let Some(def) = field("Definition") {
        lines.push(def.to_string());
    }

    let mut topics = Vec::new();
    if let Some(related) = json.get("RelatedTopics").and_then(Value::as_array) {
        collect_topics(related, &mut topics);
    }
    for text in topics.into_iter().take(max_results) {
        lines.push(format!("- {text}"));
    }

    if lines.is_empty() {
        NO_RESULTS.to_string()
    } else {
        lines.join("\n")
    }
}

/// Related topics are either `{Text, FirstURL}` or a named group with its own
/// `Topics` array.
fn collect_topics(items: &[Value], out: &mut Vec<String>) {
    for item in items {
        if let Some(text) = item.get("Text").and_then(Value::as_str) {
            if !text.trim().is_empty() {
                out.push(text.trim().to_string());
            }
        } else if let Some(nested) = item.get("Topics").and_then(Value::as_array) {
            collect_topics(nested, out);
        }
    }
}
