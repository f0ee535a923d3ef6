//! OpenRouter chat-completions client (OpenAI-compatible API).

use super::{Client, Message, Request, Response, ToolCall, ToolCallMessage};
use crate::tools::ToolDefinition;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Longer than a plain completion timeout: tool-loop turns can carry a
// large message history.
const REQUEST_TIMEOUT_SECS: u64 = 90;
const MAX_RETRIES: u32 = 2;
const INITIAL_BACKOFF_SECS: u64 = 2;

pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    referer: Option<String>,
    title: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallMessage>>,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenRouterClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        referer: Option<String>,
        title: Option<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into(),
            referer,
            title,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn send(&self, req: &Request, stream: bool) -> Result<reqwest::Response> {
        let body = ChatRequest {
            model: &req.model,
            messages: &req.messages,
            stream,
            temperature: 0.2,
            tools: (!req.tools.is_empty()).then_some(req.tools.as_slice()),
            tool_choice: req.tool_choice.as_deref(),
        };

        let mut attempt = 0u32;
        loop {
            let mut builder = self
                .http
                .post(self.endpoint())
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key));
            if let Some(referer) = &self.referer {
                builder = builder.header("HTTP-Referer", referer);
            }
            if let Some(title) = &self.title {
                builder = builder.header("X-Title", title);
            }

            let response = builder.json(&body).send().await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 && attempt < MAX_RETRIES {
                attempt += 1;
                let backoff = INITIAL_BACKOFF_SECS * 2u64.pow(attempt - 1);
                tracing::warn!(attempt, backoff, "rate limited, retrying");
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                continue;
            }

            return Err(match status.as_u16() {
                401 => anyhow!("invalid API key (check OPENROUTER_API_KEY)"),
                429 => anyhow!("rate limited after {} retries", attempt),
                500..=599 => anyhow!("model provider server error ({})", status),
                _ => anyhow!("API error {}: {}", status, text),
            });
        }
    }
}

#[async_trait]
impl Client for OpenRouterClient {
    async fn create(&self, req: &Request) -> Result<Response> {
        let response = self.send(req, false).await?;
        let text = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("failed to parse completion response: {}: {}", e, text))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("empty response from model"))?;

        let mut out = Response {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: Vec::new(),
        };
        for call in choice.message.tool_calls.unwrap_or_default() {
            if call.call_type != "function" {
                continue;
            }
            out.tool_calls.push(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            });
        }
        Ok(out)
    }

    async fn stream(
        &self,
        req: &Request,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Response> {
        let response = self.send(req, true).await?;
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut content = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer.drain(..=line_end);
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(Response {
                        content,
                        tool_calls: Vec::new(),
                    });
                }
                let Ok(event) = serde_json::from_str::<StreamEvent>(data) else {
                    continue;
                };
                for choice in event.choices {
                    if let Some(delta) = choice.delta.content {
                        if !delta.is_empty() {
                            content.push_str(&delta);
                            on_delta(&delta);
                        }
                    }
                }
            }
        }

        Ok(Response {
            content,
            tool_calls: Vec::new(),
        })
    }
}
