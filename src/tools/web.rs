//! Web search tool backed by DuckDuckGo's HTML endpoint.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::Tool;

const MAX_RESULTS: usize = 5;

/// Search the web (no API key needed).
pub struct WebSearch {
    client: reqwest::Client,
    result_pattern: Regex,
}

impl WebSearch {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; ReactLoop/0.1)")
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();

        // Title link, then the snippet of the same result block.
        let result_pattern = Regex::new(
            r#"(?s)class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>.*?class="result__snippet"[^>]*>(.*?)</a>"#,
        )
        .unwrap_or_else(|e| unreachable!("result pattern is valid: {e}"));

        Self {
            client,
            result_pattern,
        }
    }
}

impl Default for WebSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Input is the query string, e.g. 'ESG lectures'. Returns titles, snippets and URLs."
    }

    async fn execute(&self, input: Value) -> anyhow::Result<String> {
        let query = match &input {
            Value::String(q) => q.as_str(),
            Value::Object(map) => map
                .get("query")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("Missing 'query' argument"))?,
            other => anyhow::bail!("Expected a query string, got {}", other),
        };
        if query.trim().is_empty() {
            anyhow::bail!("Query is empty");
        }

        tracing::info!("Searching the web: {}", query);

        let url = format!(
            "https://html.duckduckgo.com/html/?q={}",
            urlencoding::encode(query)
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP error: {}", status);
        }
        let html = response.text().await?;

        let results = self.extract_results(&html);
        if results.is_empty() {
            Ok(format!("No results found for: {}", query))
        } else {
            Ok(results.join("\n\n"))
        }
    }
}

impl WebSearch {
    fn extract_results(&self, html: &str) -> Vec<String> {
        self.result_pattern
            .captures_iter(html)
            .take(MAX_RESULTS)
            .filter_map(|caps| {
                let title = clean_html(caps.get(2)?.as_str());
                if title.is_empty() {
                    return None;
                }
                let url = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                let snippet = caps
                    .get(3)
                    .map(|m| clean_html(m.as_str()))
                    .unwrap_or_default();
                Some(format!("{}\n{}\nURL: {}", title, snippet, decode_redirect(url)))
            })
            .collect()
    }
}

/// Strip inline tags and decode the common entities.
fn clean_html(fragment: &str) -> String {
    let mut text = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for c in fragment.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// DuckDuckGo wraps result links as `//duckduckgo.com/l/?uddg=<encoded>&...`.
fn decode_redirect(href: &str) -> String {
    href.split("uddg=")
        .nth(1)
        .map(|rest| rest.split('&').next().unwrap_or(rest))
        .and_then(|encoded| urlencoding::decode(encoded).ok())
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|| href.to_string())
}
