//! Tool registry and the execution contract shared by all tools.

mod exa;
mod grep;
mod shell;

pub use exa::ExaTool;
pub use grep::GrepTool;
pub use shell::{split_command, Allowlist, ShellTool};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Per-call execution context. Limits vary by tool; the agent fills
/// them in from config before each dispatch.
#[derive(Debug, Clone)]
pub struct Meta {
    pub repo_root: PathBuf,
    pub unsafe_shell: bool,
    pub tool_timeout_secs: u64,
    pub max_bytes: usize,
    pub max_results: usize,
}

/// Structured result of one tool execution. `payload` is what the model
/// sees (serialized as the tool message); `preview` is display-only.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub payload: serde_json::Value,
    pub preview: String,
    pub line_count: usize,
    pub byte_count: usize,
    pub truncated: bool,
    pub duration_ms: u64,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> serde_json::Value;
    async fn execute(&self, args: &str, meta: &Meta) -> Result<ToolOutput>;
}

/// Function-call tool description in the chat-completions wire format.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Default)]
pub struct Registry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.schema(),
                },
            })
            .collect()
    }
}
