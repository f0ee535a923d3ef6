//! Deterministic client for tests and offline runs (`COMET_MOCK_LLM=1`).

use super::{Client, Request, Response, ToolCall};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

const FINAL_CONTENT: &str = "Summary: Mock response based on tool results. [tool:grep]\nNext steps: Review the referenced files for details.";

/// Scripted three-turn conversation: plan, one grep call, final answer.
#[derive(Default)]
pub struct MockClient {
    calls: Mutex<u32>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Client for MockClient {
    async fn create(&self, _req: &Request) -> Result<Response> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;

        match *calls {
            1 => Ok(Response {
                content: "- Review repository context\n- Use grep to find signals\n- Summarize findings with citations".to_string(),
                tool_calls: Vec::new(),
            }),
            2 => Ok(Response {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "call_1".to_string(),
                    name: "grep".to_string(),
                    arguments: r#"{"pattern":"COMET","case_sensitive":false,"max_results":20}"#
                        .to_string(),
                }],
            }),
            _ => Ok(Response {
                content: FINAL_CONTENT.to_string(),
                tool_calls: Vec::new(),
            }),
        }
    }

    async fn stream(
        &self,
        _req: &Request,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Response> {
        on_delta(FINAL_CONTENT);
        Ok(Response {
            content: FINAL_CONTENT.to_string(),
            tool_calls: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        Request {
            model: "mock".to_string(),
            messages: Vec::new(),
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    #[tokio::test]
    async fn scripted_turns_are_deterministic() {
        let client = MockClient::new();
        let plan = client.create(&request()).await.unwrap();
        assert!(plan.content.starts_with("- "));
        assert!(plan.tool_calls.is_empty());

        let tool_turn = client.create(&request()).await.unwrap();
        assert_eq!(tool_turn.tool_calls.len(), 1);
        assert_eq!(tool_turn.tool_calls[0].name, "grep");

        let final_turn = client.create(&request()).await.unwrap();
        assert!(final_turn.content.contains("[tool:grep]"));
    }

    #[tokio::test]
    async fn stream_delivers_one_delta() {
        let client = MockClient::new();
        let mut seen = String::new();
        let resp = client
            .stream(&request(), &mut |delta| seen.push_str(delta))
            .await
            .unwrap();
        assert_eq!(seen, resp.content);
    }
}
