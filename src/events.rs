//! Run event stream shared by the agent, the renderer, and the JSON
//! run record.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Timestamped event envelope. Recorded into the run result and
/// forwarded to an optional renderer; the agent does not depend on any
/// subscriber existing.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Event {
    pub fn now(payload: Payload) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum Payload {
    RunStarted {
        version: String,
        repo_root: String,
        model: String,
        run_id: String,
        started_at: DateTime<Utc>,
    },
    PlanGenerated {
        plan: Vec<String>,
    },
    ToolCallStarted {
        tool_name: String,
        input: serde_json::Value,
        started_at: DateTime<Utc>,
    },
    ToolCallFinished(ToolCallFinishedPayload),
    ToolCallFailed(ToolCallFinishedPayload),
    #[serde(rename = "ModelStreamingDelta")]
    ModelDelta {
        delta: String,
    },
    FinalAnswerReady {
        answer: String,
    },
    RunFinished {
        status: String,
        finished_at: DateTime<Utc>,
    },
    RunError {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallFinishedPayload {
    pub tool_name: String,
    pub status: String,
    pub output: serde_json::Value,
    pub preview: String,
    pub line_count: usize,
    pub byte_count: usize,
    pub truncated: bool,
    pub duration_ms: u64,
}
