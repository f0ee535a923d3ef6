//! Web search via the Exa API. Registered only when an API key is
//! present and web access is enabled.

use super::{Meta, Tool, ToolOutput};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const ENDPOINT: &str = "https://api.exa.ai/search";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: u32 = 2;
const SNIPPET_LIMIT: usize = 1200;
const SNIPPET_FLOOR: usize = 200;

#[derive(Deserialize)]
struct ExaArgs {
    query: String,
    #[serde(default)]
    num_results: Option<usize>,
    #[serde(default)]
    include_text: Option<bool>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    #[serde(rename = "numResults")]
    num_results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    contents: Option<ContentsRequest>,
}

#[derive(Serialize)]
struct ContentsRequest {
    text: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: Option<String>,
    url: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize, Clone)]
struct FittedResult {
    title: String,
    url: String,
    snippet: String,
}

pub struct ExaTool {
    http: reqwest::Client,
    api_key: String,
}

impl ExaTool {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
        })
    }

    async fn search(&self, req: &SearchRequest<'_>) -> Result<SearchResponse> {
        let mut attempt = 0u32;
        loop {
            let response = self
                .http
                .post(ENDPOINT)
                .header("x-api-key", &self.api_key)
                .json(req)
                .send()
                .await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response.json().await?);
            }
            let text = response.text().await.unwrap_or_default();
            if (status.as_u16() == 429 || status.is_server_error()) && attempt < MAX_RETRIES {
                attempt += 1;
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                continue;
            }
            return Err(anyhow!("web search failed ({}): {}", status, text));
        }
    }
}

fn clip(text: &str, limit: usize) -> String {
    crate::truncate::truncate_bytes(text, limit).0
}

/// Fits results into the byte budget: first halve snippets (down to a
/// floor), then drop trailing results.
fn fit_results(mut results: Vec<FittedResult>, max_bytes: usize) -> (Vec<FittedResult>, bool) {
    let size = |rs: &[FittedResult]| serde_json::to_string(rs).map(|s| s.len()).unwrap_or(0);
    if size(&results) <= max_bytes {
        return (results, false);
    }

    let mut limit = SNIPPET_LIMIT;
    while limit >= SNIPPET_FLOOR {
        for r in &mut results {
            r.snippet = clip(&r.snippet, limit);
        }
        if size(&results) <= max_bytes {
            return (results, true);
        }
        limit /= 2;
    }
    while results.len() > 1 && size(&results) > max_bytes {
        results.pop();
    }
    (results, true)
}

#[async_trait]
impl Tool for ExaTool {
    fn name(&self) -> &'static str {
        "exa_search"
    }

    fn description(&self) -> &'static str {
        "Search the web for documentation, error messages, or library \
         references. Returns titles, URLs, and text snippets."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "num_results": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 10,
                    "description": "Number of results (default 5)"
                },
                "include_text": {
                    "type": "boolean",
                    "description": "Include page text snippets (default true)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: &str, meta: &Meta) -> Result<ToolOutput> {
        let args: ExaArgs =
            serde_json::from_str(args).map_err(|e| anyhow!("invalid search arguments: {}", e))?;
        if args.query.trim().is_empty() {
            return Err(anyhow!("query must not be empty"));
        }
        let num_results = args.num_results.unwrap_or(5).clamp(1, 10);
        let include_text = args.include_text.unwrap_or(true);

        let request = SearchRequest {
            query: &args.query,
            num_results,
            contents: include_text.then_some(ContentsRequest { text: true }),
        };

        let start = Instant::now();
        let response = self.search(&request).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let results: Vec<FittedResult> = response
            .results
            .into_iter()
            .map(|r| FittedResult {
                title: r.title.unwrap_or_default(),
                url: r.url,
                snippet: clip(&r.text.unwrap_or_default(), SNIPPET_LIMIT),
            })
            .collect();
        let (results, truncated) = fit_results(results, meta.max_bytes);

        let line_count = results.len();
        let preview = results
            .iter()
            .take(3)
            .map(|r| format!("{} — {}", r.title, r.url))
            .collect::<Vec<_>>()
            .join("\n");
        let payload = serde_json::json!({
            "results": results,
            "duration_ms": duration_ms,
            "truncated": truncated,
        });
        let byte_count = serde_json::to_string(&payload).map(|s| s.len()).unwrap_or(0);

        Ok(ToolOutput {
            payload,
            preview,
            line_count,
            byte_count,
            truncated,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(snippet_len: usize) -> FittedResult {
        FittedResult {
            title: "Result".to_string(),
            url: "https://example.com".to_string(),
            snippet: "x".repeat(snippet_len),
        }
    }

    #[test]
    fn fit_results_passes_small_payloads_through() {
        let (fitted, truncated) = fit_results(vec![result(100); 3], 30 * 1024);
        assert!(!truncated);
        assert_eq!(fitted.len(), 3);
        assert_eq!(fitted[0].snippet.len(), 100);
    }

    #[test]
    fn fit_results_halves_snippets_before_dropping() {
        let (fitted, truncated) = fit_results(vec![result(1200); 4], 3000);
        assert!(truncated);
        assert_eq!(fitted.len(), 4);
        assert!(fitted.iter().all(|r| r.snippet.len() < 1200));
    }

    #[test]
    fn fit_results_drops_trailing_results_last() {
        let (fitted, truncated) = fit_results(vec![result(1200); 8], 600);
        assert!(truncated);
        assert!(fitted.len() < 8);
        assert!(!fitted.is_empty());
    }
}
