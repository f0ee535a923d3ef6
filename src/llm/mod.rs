//! Chat-completion wire types and the client abstraction.
//!
//! The agent is written against [`Client`]; production runs use the
//! OpenRouter implementation, tests the deterministic mock.

mod mock;
mod openrouter;

pub use mock::MockClient;
pub use openrouter::OpenRouterClient;

use crate::tools::ToolDefinition;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One conversation message. Every assistant tool call must be answered
/// by exactly one `tool` message carrying the same `tool_call_id` before
/// the next model request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    pub fn developer(content: impl Into<String>) -> Self {
        Self::text("developer", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCallMessage>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool(content: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCallMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallMessage {
    pub name: String,
    pub arguments: String,
}

/// A tool call extracted from a model response. `arguments` is raw JSON
/// validated only by the target tool.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Response {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Model transport. `stream` must aggregate to the same result whether
/// or not deltas are observed, so text and JSON modes share one path.
#[async_trait]
pub trait Client: Send + Sync {
    async fn create(&self, req: &Request) -> Result<Response>;

    async fn stream(
        &self,
        req: &Request,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Response>;
}
