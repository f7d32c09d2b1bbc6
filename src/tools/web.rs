//! google_search via the Google Custom Search JSON API.

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::clamp::clamp_text;
use crate::tools::args::{get_optional_u64, get_string};
use crate::tools::context::ToolCtx;
use crate::tools::registry::{BoxFuture, Tool};
use crate::tools::result::Envelope;

const USER_AGENT: &str = concat!("agentgate/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 60;
const CONNECT_TIMEOUT_SECS: u64 = 15;
const MAX_REDIRECTS: usize = 5;

pub const GOOGLE_CSE_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
/// Results per page; also the API maximum.
const PAGE_SIZE: u64 = 10;
/// The API serves at most 100 results, so `start + num` must stay within 101.
const MAX_START: u64 = 91;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

/// Credentials and endpoint for Custom Search.
#[derive(Clone)]
pub struct WebSearchProvider {
    api_key: String,
    cx: String,
    endpoint: String,
}

impl WebSearchProvider {
    pub fn google(api_key: &str, cx: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            cx: cx.to_string(),
            endpoint: GOOGLE_CSE_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub async fn search(&self, client: &Client, query: &str, start: u64) -> Result<Vec<SearchHit>, String> {
        let start = start.to_string();
        let num = PAGE_SIZE.to_string();
        let url = reqwest::Url::parse_with_params(
            &self.endpoint,
            &[
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("q", query),
                ("start", start.as_str()),
                ("num", num.as_str()),
            ],
        )
        .map_err(|e| e.to_string())?;
        let res = client.get(url).send().await.map_err(|e| e.to_string())?;
        let status = res.status();
        let body = res.text().await.map_err(|e| e.to_string())?;
        if !status.is_success() {
            return Err(format!("Google search error {}: {}", status, api_error_message(&body)));
        }
        let v: Value = serde_json::from_str(&body).map_err(|e| e.to_string())?;
        Ok(parse_hits(&v))
    }
}

/// `error.message` from an API error body, else the trimmed body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}

fn parse_hits(v: &Value) -> Vec<SearchHit> {
    v.get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|r| SearchHit {
                    title: r.get("title").and_then(Value::as_str).unwrap_or("").to_string(),
                    link: r.get("link").and_then(Value::as_str).unwrap_or("").to_string(),
                    snippet: r.get("snippet").and_then(Value::as_str).unwrap_or("").trim().to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Format hits for the model.
fn format_results(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results.".to_string();
    }
    hits.iter()
        .map(|h| format!("- **{}**\n  {}\n  {}", h.title, h.link, h.snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// google_search tool.
pub struct GoogleSearchTool {
    pub provider: WebSearchProvider,
    pub client: Client,
}

impl GoogleSearchTool {
    pub fn new(provider: WebSearchProvider, client: Client) -> Self {
        Self { provider, client }
    }
}

impl Tool for GoogleSearchTool {
    fn name(&self) -> &str {
        "google_search"
    }

    fn description(&self) -> &str {
        "Search the web with Google. Returns titles, links and snippets, ten per page; \
         pass start=11 for the second page."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "start": { "type": "integer", "description": "1-based index of the first result (1-91)", "minimum": 1, "maximum": 91 }
            },
            "required": ["query"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a ToolCtx, args: &'a Value) -> BoxFuture<'a, Envelope> {
        Box::pin(async move {
            let query = match get_string(args, "query") {
                Ok(q) if !q.trim().is_empty() => q,
                Ok(_) => return Envelope::error("query is empty"),
                Err(e) => return Envelope::error(e),
            };
            let start = match get_optional_u64(args, "start") {
                Ok(s) => s.unwrap_or(1).clamp(1, MAX_START),
                Err(e) => return Envelope::error(e),
            };
            let hits = tokio::select! {
                r = self.provider.search(&self.client, &query, start) => r,
                _ = ctx.cancel.cancelled() => Err("search canceled".to_string()),
            };
            match hits {
                Ok(hits) => {
                    let content = clamp_text(&format_results(&hits), ctx.limits.read_clamp_chars);
                    Envelope::ok()
                        .with("query", query)
                        .with("start", start)
                        .with_json("results", &hits)
                        .with_clamped("content", content)
                }
                Err(e) => Envelope::error(clamp_text(&e, ctx.limits.stderr_clamp_chars).text),
            }
        })
    }
}

/// Build a HTTP client for provider tools (timeouts, redirect limit, User-Agent).
pub fn web_client() -> Result<Client, String> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_results_empty() {
        assert_eq!(format_results(&[]), "No results.");
    }

    #[test]
    fn parse_and_format_one() {
        let v = serde_json::json!({
            "items": [{ "title": "Example", "link": "https://example.com", "snippet": " An example. " }]
        });
        let hits = parse_hits(&v);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].snippet, "An example.");
        let s = format_results(&hits);
        assert!(s.contains("**Example**"));
        assert!(s.contains("https://example.com"));
    }

    #[test]
    fn parse_missing_items_is_empty() {
        assert!(parse_hits(&serde_json::json!({ "searchInformation": {} })).is_empty());
        let hits = parse_hits(&serde_json::json!({ "items": [{ "link": "https://u.org" }] }));
        assert_eq!(hits[0].title, "");
    }

    #[test]
    fn api_error_message_prefers_json_message() {
        let body = r#"{"error":{"code":403,"message":"API key not valid"}}"#;
        assert_eq!(api_error_message(body), "API key not valid");
        assert_eq!(api_error_message(" plain "), "plain");
    }
}
