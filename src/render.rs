//! Plain-text rendering of run events.

use crate::events::{Event, Payload};
use std::io::Write;

/// Sink for run events. The agent emits to at most one renderer; JSON
/// mode runs with none and serializes the recorded events instead.
pub trait Renderer: Send {
    fn emit(&mut self, event: &Event);
}

/// Streams events as human-readable text, including incremental model
/// deltas under a single "Final Answer:" header.
pub struct StdoutRenderer {
    w: Box<dyn Write + Send>,
    verbose: bool,
    quiet: bool,
    no_plan: bool,
    printed_final_header: bool,
    saw_delta: bool,
    ended_with_newline: bool,
}

impl StdoutRenderer {
    pub fn new(w: Box<dyn Write + Send>, verbose: bool, quiet: bool, no_plan: bool) -> Self {
        Self {
            w,
            verbose,
            quiet,
            no_plan,
            printed_final_header: false,
            saw_delta: false,
            ended_with_newline: false,
        }
    }

    fn final_header(&mut self) {
        if !self.printed_final_header {
            if !self.quiet {
                let _ = writeln!(self.w, "\nFinal Answer:");
            }
            self.printed_final_header = true;
        }
    }
}

impl Renderer for StdoutRenderer {
    fn emit(&mut self, event: &Event) {
        match &event.payload {
            Payload::RunStarted {
                version,
                repo_root,
                model,
                run_id,
                started_at,
            } => {
                if self.quiet {
                    return;
                }
                let _ = writeln!(
                    self.w,
                    "comet v{} | repo: {} | model: {} | run: {}",
                    version, repo_root, model, run_id
                );
                let _ = writeln!(self.w, "Started: {}", started_at.to_rfc3339());
            }
            Payload::PlanGenerated { plan } => {
                if self.quiet || self.no_plan {
                    return;
                }
                let _ = writeln!(self.w, "\nPlan:");
                for item in plan {
                    let _ = writeln!(self.w, "- {}", item);
                }
            }
            Payload::ToolCallStarted {
                tool_name, input, ..
            } => {
                if self.quiet {
                    return;
                }
                let _ = writeln!(self.w, "\nTool: {} (started)", tool_name);
                if self.verbose {
                    let _ = writeln!(self.w, "Input: {}", input);
                }
            }
            Payload::ToolCallFinished(p) | Payload::ToolCallFailed(p) => {
                if self.quiet {
                    return;
                }
                let _ = writeln!(
                    self.w,
                    "Tool: {} ({}, {}ms, lines={}, bytes={}, truncated={})",
                    p.tool_name, p.status, p.duration_ms, p.line_count, p.byte_count, p.truncated
                );
                if self.verbose && !p.preview.is_empty() {
                    let _ = writeln!(self.w, "Preview:");
                    for line in p.preview.split('\n') {
                        let _ = writeln!(self.w, "  {}", line);
                    }
                }
            }
            Payload::ModelDelta { delta } => {
                self.final_header();
                if !delta.is_empty() {
                    let _ = write!(self.w, "{}", delta);
                    let _ = self.w.flush();
                    self.saw_delta = true;
                    self.ended_with_newline = delta.ends_with('\n');
                }
            }
            Payload::FinalAnswerReady { answer } => {
                if self.saw_delta {
                    if !self.ended_with_newline {
                        let _ = writeln!(self.w);
                    }
                    return;
                }
                self.final_header();
                let _ = writeln!(self.w, "{}", answer);
            }
            Payload::RunFinished { .. } => {}
            Payload::RunError { message } => {
                let _ = writeln!(self.w, "\nError: {}", message);
            }
        }
    }
}

/// Writes everything to multiple sinks; used for `--log-file`.
pub struct TeeWriter {
    sinks: Vec<Box<dyn Write + Send>>,
}

impl TeeWriter {
    pub fn new(sinks: Vec<Box<dyn Write + Send>>) -> Self {
        Self { sinks }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for sink in &mut self.sinks {
            sink.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}
