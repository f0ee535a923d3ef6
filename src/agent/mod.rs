//! Orchestration loop: question in, evidence-gathering tool calls,
//! final answer out.

mod prompts;

use crate::config::Config;
use crate::events::{Event, Payload, ToolCallFinishedPayload};
use crate::history::load_shell_history;
use crate::llm::{Client, FunctionCallMessage, Message, Request, ToolCallMessage};
use crate::redact::redact_secrets;
use crate::render::Renderer;
use crate::repo::RepoContext;
use crate::tools::{Meta, Registry};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Full record of one run; this is the JSON-mode output shape.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: String,
    #[serde(rename = "timestamp_start")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "timestamp_end")]
    pub finished_at: DateTime<Utc>,
    pub repo_root: String,
    pub question: String,
    pub model: String,
    pub steps_used: u32,
    pub status: String,
    pub final_answer: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

pub struct Agent {
    client: Arc<dyn Client>,
    tools: Registry,
    renderer: Option<Box<dyn Renderer>>,
    cfg: Config,
}

fn emit(events: &mut Vec<Event>, renderer: &mut Option<Box<dyn Renderer>>, payload: Payload) {
    let event = Event::now(payload);
    if let Some(renderer) = renderer {
        renderer.emit(&event);
    }
    events.push(event);
}

impl Agent {
    pub fn new(
        client: Arc<dyn Client>,
        tools: Registry,
        renderer: Option<Box<dyn Renderer>>,
        cfg: Config,
    ) -> Self {
        Self {
            client,
            tools,
            renderer,
            cfg,
        }
    }

    /// Runs the loop to completion. A partial or failed run still
    /// returns its `RunResult`; the error rides alongside it.
    pub async fn run(
        &mut self,
        question: &str,
        repo_ctx: &RepoContext,
    ) -> (RunResult, Option<anyhow::Error>) {
        let started = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let repo_root = repo_ctx.repo_root.to_string_lossy().to_string();
        let mut result = RunResult {
            run_id: run_id.clone(),
            started_at: started,
            finished_at: started,
            repo_root: repo_root.clone(),
            question: question.to_string(),
            model: self.cfg.model.clone(),
            steps_used: 0,
            status: "failure".to_string(),
            final_answer: String::new(),
            tool_calls: Vec::new(),
            events: Vec::new(),
        };

        let mut events = Vec::new();
        let mut renderer = self.renderer.take();

        emit(
            &mut events,
            &mut renderer,
            Payload::RunStarted {
                version: env!("CARGO_PKG_VERSION").to_string(),
                repo_root: repo_root.clone(),
                model: self.cfg.model.clone(),
                run_id,
                started_at: started,
            },
        );

        let mut plan = Vec::new();
        if !self.cfg.no_plan {
            plan = self.generate_plan(question, repo_ctx).await;
            emit(
                &mut events,
                &mut renderer,
                Payload::PlanGenerated { plan: plan.clone() },
            );
        }

        let mut messages = vec![
            Message::system(prompts::system_prompt()),
            Message::developer(prompts::developer_prompt(
                &self.tools.names(),
                !self.cfg.no_web,
            )),
            Message::developer(format!("Repository context:\n{}", repo_ctx.summary())),
        ];
        if !self.cfg.no_plan && !plan.is_empty() {
            messages.push(Message::developer(format!(
                "Plan:\n{}",
                format_plan(&plan)
            )));
        }
        if !self.cfg.no_history && self.cfg.history_lines > 0 {
            let history = load_shell_history(self.cfg.history_lines);
            if !history.is_empty() {
                messages.push(Message::developer(format!(
                    "Recent shell history (most recent last):\n- {}",
                    history.join("\n- ")
                )));
            }
        }
        messages.push(Message::user(question));

        let tool_defs = self.tools.definitions();
        let tool_choice = (!tool_defs.is_empty()).then(|| "auto".to_string());

        let mut steps = 0u32;
        while steps < self.cfg.max_steps {
            steps += 1;
            let request = Request {
                model: self.cfg.model.clone(),
                messages: messages.clone(),
                tools: tool_defs.clone(),
                tool_choice: tool_choice.clone(),
            };
            let response = match self.client.create(&request).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!(error = %err, "model request failed");
                    emit(
                        &mut events,
                        &mut renderer,
                        Payload::RunError {
                            message: err.to_string(),
                        },
                    );
                    result.steps_used = steps;
                    result.finished_at = Utc::now();
                    result.events = events;
                    self.renderer = renderer;
                    return (result, Some(err));
                }
            };

            if response.tool_calls.is_empty() {
                let mut final_answer = response.content.trim().to_string();
                if !self.cfg.json {
                    match self
                        .stream_final(&request, &mut events, &mut renderer)
                        .await
                    {
                        Ok(streamed) if !streamed.trim().is_empty() => {
                            final_answer = streamed.trim().to_string();
                        }
                        Ok(_) => {}
                        Err(err) => tracing::error!(error = %err, "streaming failed"),
                    }
                }
                result.final_answer = final_answer;
                result.status = "success".to_string();
                result.steps_used = steps;
                result.finished_at = Utc::now();
                emit(
                    &mut events,
                    &mut renderer,
                    Payload::FinalAnswerReady {
                        answer: result.final_answer.clone(),
                    },
                );
                emit(
                    &mut events,
                    &mut renderer,
                    Payload::RunFinished {
                        status: result.status.clone(),
                        finished_at: result.finished_at,
                    },
                );
                result.events = events;
                self.renderer = renderer;
                return (result, None);
            }

            messages.push(Message::assistant_tool_calls(
                response
                    .tool_calls
                    .iter()
                    .map(|call| ToolCallMessage {
                        id: call.id.clone(),
                        call_type: "function".to_string(),
                        function: FunctionCallMessage {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    })
                    .collect(),
            ));

            for call in &response.tool_calls {
                let Some(tool) = self.tools.get(&call.name) else {
                    // Unknown tool still gets a paired tool message so
                    // the conversation stays valid and the run continues.
                    let message = format!("unknown tool: {}", call.name);
                    emit(
                        &mut events,
                        &mut renderer,
                        Payload::ToolCallFailed(ToolCallFinishedPayload {
                            tool_name: call.name.clone(),
                            status: "error".to_string(),
                            output: serde_json::Value::Null,
                            preview: message.clone(),
                            line_count: 1,
                            byte_count: message.len(),
                            truncated: false,
                            duration_ms: 0,
                        }),
                    );
                    let payload = serde_json::json!({ "error": message });
                    messages.push(Message::tool(payload.to_string(), call.id.clone()));
                    continue;
                };

                let input = sanitize_input(&call.arguments);
                let call_started = Utc::now();
                emit(
                    &mut events,
                    &mut renderer,
                    Payload::ToolCallStarted {
                        tool_name: call.name.clone(),
                        input: input.clone(),
                        started_at: call_started,
                    },
                );

                let meta = self.meta_for(&call.name, &repo_ctx.repo_root);
                let start = Instant::now();
                let outcome = tool.execute(&call.arguments, &meta).await;
                let duration_ms = start.elapsed().as_millis() as u64;

                match outcome {
                    Err(err) => {
                        let payload = serde_json::json!({
                            "error": err.to_string(),
                            "duration_ms": duration_ms,
                        });
                        result.tool_calls.push(ToolCallRecord {
                            tool_name: call.name.clone(),
                            input,
                            output: payload.clone(),
                            status: "error".to_string(),
                            started_at: call_started,
                            duration_ms,
                        });
                        emit(
                            &mut events,
                            &mut renderer,
                            Payload::ToolCallFailed(ToolCallFinishedPayload {
                                tool_name: call.name.clone(),
                                status: "error".to_string(),
                                output: serde_json::Value::Null,
                                preview: err.to_string(),
                                line_count: 1,
                                byte_count: err.to_string().len(),
                                truncated: false,
                                duration_ms,
                            }),
                        );
                        messages.push(Message::tool(payload.to_string(), call.id.clone()));
                    }
                    Ok(output) => {
                        result.tool_calls.push(ToolCallRecord {
                            tool_name: call.name.clone(),
                            input,
                            output: output.payload.clone(),
                            status: "success".to_string(),
                            started_at: call_started,
                            duration_ms,
                        });
                        emit(
                            &mut events,
                            &mut renderer,
                            Payload::ToolCallFinished(ToolCallFinishedPayload {
                                tool_name: call.name.clone(),
                                status: "success".to_string(),
                                output: output.payload.clone(),
                                preview: output.preview.clone(),
                                line_count: output.line_count,
                                byte_count: output.byte_count,
                                truncated: output.truncated,
                                duration_ms,
                            }),
                        );
                        messages.push(Message::tool(
                            output.payload.to_string(),
                            call.id.clone(),
                        ));
                    }
                }
            }
        }

        // Step budget exhausted: ask for a best-effort partial answer.
        messages.push(Message::developer(
            "Max steps reached. Provide the best possible partial answer and include a warning.",
        ));
        let request = Request {
            model: self.cfg.model.clone(),
            messages,
            tools: tool_defs,
            tool_choice,
        };
        let mut final_answer = "Max steps reached; unable to complete.".to_string();
        if !self.cfg.json {
            if let Ok(streamed) = self
                .stream_final(&request, &mut events, &mut renderer)
                .await
            {
                if !streamed.trim().is_empty() {
                    final_answer = streamed;
                }
            }
        }
        if !final_answer.to_lowercase().contains("max steps") {
            final_answer = format!("Max steps reached. {}", final_answer);
        }
        result.final_answer = final_answer.trim().to_string();
        result.status = "partial".to_string();
        result.steps_used = steps;
        result.finished_at = Utc::now();
        emit(
            &mut events,
            &mut renderer,
            Payload::FinalAnswerReady {
                answer: result.final_answer.clone(),
            },
        );
        emit(
            &mut events,
            &mut renderer,
            Payload::RunFinished {
                status: result.status.clone(),
                finished_at: result.finished_at,
            },
        );
        result.events = events;
        self.renderer = renderer;
        (result, Some(anyhow!("max steps reached")))
    }

    fn meta_for(&self, tool_name: &str, repo_root: &std::path::Path) -> Meta {
        let mut meta = Meta {
            repo_root: repo_root.to_path_buf(),
            unsafe_shell: self.cfg.unsafe_shell,
            tool_timeout_secs: self.cfg.tool_timeout_secs,
            max_bytes: 0,
            max_results: 0,
        };
        match tool_name {
            "grep" => {
                meta.max_results = self.cfg.limits.grep_max_results;
                meta.max_bytes = self.cfg.limits.grep_max_bytes;
            }
            "shell" => meta.max_bytes = self.cfg.limits.shell_max_bytes,
            "exa_search" => meta.max_bytes = self.cfg.limits.web_max_bytes,
            _ => {}
        }
        meta
    }

    async fn generate_plan(&self, question: &str, repo_ctx: &RepoContext) -> Vec<String> {
        let request = Request {
            model: self.cfg.model.clone(),
            messages: vec![
                Message::system(prompts::system_prompt()),
                Message::developer(prompts::plan_prompt()),
                Message::developer(format!("Repository context:\n{}", repo_ctx.summary())),
                Message::user(question),
            ],
            tools: Vec::new(),
            tool_choice: None,
        };
        match self.client.create(&request).await {
            Ok(response) => parse_plan(&response.content),
            Err(err) => {
                tracing::warn!(error = %err, "plan generation failed");
                vec![
                    "Review repository context".to_string(),
                    "Run focused searches".to_string(),
                    "Summarize evidence with citations".to_string(),
                ]
            }
        }
    }

    async fn stream_final(
        &self,
        request: &Request,
        events: &mut Vec<Event>,
        renderer: &mut Option<Box<dyn Renderer>>,
    ) -> anyhow::Result<String> {
        let mut answer = String::new();
        let mut on_delta = |delta: &str| {
            emit(
                events,
                renderer,
                Payload::ModelDelta {
                    delta: delta.to_string(),
                },
            );
            answer.push_str(delta);
        };
        // The final answer is requested a second time in streaming mode
        // so deltas can be rendered live.
        self.client.stream(request, &mut on_delta).await?;
        drop(on_delta);
        Ok(answer)
    }
}

fn parse_plan(text: &str) -> Vec<String> {
    let mut plan: Vec<String> = text
        .lines()
        .map(|line| line.trim().trim_start_matches(['-', '*']).trim())
        .filter(|line| !line.is_empty())
        .take(8)
        .map(|line| line.to_string())
        .collect();
    if plan.len() < 3 {
        plan.extend([
            "Review repository context".to_string(),
            "Run targeted tool calls".to_string(),
            "Produce cited answer".to_string(),
        ]);
    }
    plan
}

fn format_plan(plan: &[String]) -> String {
    plan.iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Tool-call arguments as recorded in events and the run result:
/// parsed when possible, always redacted.
fn sanitize_input(args: &str) -> serde_json::Value {
    if args.is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<serde_json::Value>(args) {
        Ok(value) => serde_json::Value::String(redact_secrets(&value.to_string())),
        Err(_) => serde_json::json!({ "raw": redact_secrets(args) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Response, ToolCall};
    use crate::repo::Limits;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptClient {
        responses: Mutex<VecDeque<Response>>,
        seen: Mutex<Vec<Request>>,
    }

    impl ScriptClient {
        fn new(responses: Vec<Response>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Client for ScriptClient {
        async fn create(&self, req: &Request) -> anyhow::Result<Response> {
            self.seen.lock().unwrap().push(req.clone());
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }

        async fn stream(
            &self,
            req: &Request,
            _on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
        ) -> anyhow::Result<Response> {
            self.create(req).await
        }
    }

    fn test_cfg() -> Config {
        Config {
            no_plan: true,
            no_history: true,
            json: true,
            ..Config::default()
        }
    }

    fn test_ctx(root: &std::path::Path) -> RepoContext {
        crate::repo::build_context(
            root,
            Limits {
                context_max_bytes: 80 * 1024,
                max_file_bytes: 32 * 1024,
            },
        )
    }

    fn text_response(content: &str) -> Response {
        Response {
            content: content.to_string(),
            tool_calls: Vec::new(),
        }
    }

    #[test]
    fn parse_plan_trims_bullets_and_caps_length() {
        let text = "- one\n* two\n- three\n\n- four\n- five\n- six\n- seven\n- eight\n- nine";
        let plan = parse_plan(text);
        assert_eq!(plan.len(), 8);
        assert_eq!(plan[0], "one");
        assert_eq!(plan[1], "two");
    }

    #[test]
    fn parse_plan_pads_short_plans() {
        let plan = parse_plan("- only step");
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0], "only step");
    }

    #[test]
    fn sanitize_input_redacts_secrets() {
        let value = sanitize_input(r#"{"command":"export api_key=hunter2"}"#);
        let text = value.as_str().unwrap();
        assert!(text.contains("[REDACTED]"));
        assert!(!text.contains("hunter2"));

        let raw = sanitize_input("not json password=hunter2");
        assert!(!raw["raw"].as_str().unwrap().contains("hunter2"));
    }

    #[tokio::test]
    async fn unknown_tool_gets_paired_error_message() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptClient::new(vec![
            Response {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "call_x".to_string(),
                    name: "nope".to_string(),
                    arguments: "{}".to_string(),
                }],
            },
            text_response("done"),
        ]));
        let mut agent = Agent::new(client.clone(), Registry::new(), None, test_cfg());

        let (result, err) = agent.run("question", &test_ctx(dir.path())).await;
        assert!(err.is_none());
        assert_eq!(result.status, "success");
        assert_eq!(result.steps_used, 2);
        assert_eq!(result.final_answer, "done");

        let seen = client.seen.lock().unwrap();
        let tool_msg = seen[1]
            .messages
            .iter()
            .find(|m| m.role == "tool")
            .expect("tool message paired with the call");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_x"));
        assert!(tool_msg
            .content
            .as_deref()
            .unwrap()
            .contains("unknown tool"));
    }

    #[tokio::test]
    async fn every_call_in_a_multi_call_turn_gets_a_paired_message() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "alpha line\n").unwrap();

        let client = Arc::new(ScriptClient::new(vec![
            Response {
                content: String::new(),
                tool_calls: vec![
                    ToolCall {
                        id: "call_a".to_string(),
                        name: "grep".to_string(),
                        arguments: r#"{"pattern":"alpha"}"#.to_string(),
                    },
                    ToolCall {
                        id: "call_b".to_string(),
                        name: "nope".to_string(),
                        arguments: "{}".to_string(),
                    },
                    ToolCall {
                        id: "call_c".to_string(),
                        name: "grep".to_string(),
                        arguments: r#"{"pattern":"[bad"}"#.to_string(),
                    },
                ],
            },
            text_response("done"),
        ]));
        let mut registry = Registry::new();
        registry.register(Arc::new(crate::tools::GrepTool::new(None)));
        let mut agent = Agent::new(client.clone(), registry, None, test_cfg());

        let (result, err) = agent.run("question", &test_ctx(dir.path())).await;
        assert!(err.is_none());
        assert_eq!(result.status, "success");

        let seen = client.seen.lock().unwrap();
        let assistant = seen[1]
            .messages
            .iter()
            .find(|m| m.role == "assistant")
            .expect("assistant turn with tool calls");
        assert_eq!(assistant.tool_calls.as_ref().unwrap().len(), 3);

        let tool_ids: Vec<&str> = seen[1]
            .messages
            .iter()
            .filter(|m| m.role == "tool")
            .map(|m| m.tool_call_id.as_deref().unwrap())
            .collect();
        assert_eq!(tool_ids, vec!["call_a", "call_b", "call_c"]);

        // Success, unknown tool, and tool failure all stay in the run;
        // only real tool executions are recorded.
        assert_eq!(result.tool_calls.len(), 2);
        assert_eq!(result.tool_calls[0].status, "success");
        assert_eq!(result.tool_calls[1].status, "error");
    }

    #[tokio::test]
    async fn step_exhaustion_yields_partial_status() {
        let dir = tempfile::tempdir().unwrap();
        let looping = Response {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: "nope".to_string(),
                arguments: "{}".to_string(),
            }],
        };
        let client = Arc::new(ScriptClient::new(vec![looping.clone(), looping]));
        let mut cfg = test_cfg();
        cfg.max_steps = 2;
        let mut agent = Agent::new(client, Registry::new(), None, cfg);

        let (result, err) = agent.run("question", &test_ctx(dir.path())).await;
        assert!(err.is_some());
        assert_eq!(result.status, "partial");
        assert_eq!(result.steps_used, 2);
        assert!(result.final_answer.to_lowercase().contains("max steps"));
    }

    #[tokio::test]
    async fn model_failure_is_run_fatal() {
        struct FailClient;

        #[async_trait]
        impl Client for FailClient {
            async fn create(&self, _req: &Request) -> anyhow::Result<Response> {
                Err(anyhow!("boom"))
            }
            async fn stream(
                &self,
                _req: &Request,
                _on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
            ) -> anyhow::Result<Response> {
                Err(anyhow!("boom"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut agent = Agent::new(Arc::new(FailClient), Registry::new(), None, test_cfg());
        let (result, err) = agent.run("question", &test_ctx(dir.path())).await;
        assert!(err.is_some());
        assert_eq!(result.status, "failure");
        assert!(result
            .events
            .iter()
            .any(|e| matches!(e.payload, Payload::RunError { .. })));
    }
}
