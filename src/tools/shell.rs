//! Sandboxed shell command execution.
//!
//! Commands never pass through a real shell: the same token vector the
//! allowlist is matched against becomes the argv. The child runs inside
//! the repo root with a scrubbed environment and a hard timeout.

use super::{Meta, Tool, ToolOutput};
use crate::redact::redact_secrets;
use crate::truncate::{preview, truncate_bytes};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const INTERACTIVE_COMMANDS: &[&str] = &[
    "vim", "vi", "nano", "less", "more", "man", "top", "htop", "ssh", "sftp",
];

const NETWORK_COMMANDS: &[&str] = &["curl", "wget", "ssh", "scp", "nc", "netcat"];

fn destructive_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\brm\b",
            r"(?i)\bmkfs\b",
            r"(?i)\bdd\b",
            r"(?i)\bshutdown\b",
            r"(?i)\breboot\b",
            r"(?i)\bkill\s+-9\b",
            r":\(\)\{",
            r"(?i)chmod\s+-R\s+777\s+/",
            r"(?i)(>|>>)\s*(/etc|/bin|/usr|/var|/lib|/sbin|/System|/Library)",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

/// Splits a command line into tokens with shell-style quoting: single
/// quotes are literal, double quotes and bare text honor backslash
/// escapes. Errors on an unterminated quote or dangling escape.
pub fn split_command(input: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => bail!("unterminated single quote"),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => current.push(escaped),
                            None => bail!("dangling escape in double quote"),
                        },
                        Some(inner) => current.push(inner),
                        None => bail!("unterminated double quote"),
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => bail!("dangling escape"),
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Ordered token-sequence prefixes. A command is permitted when its
/// leading tokens match every token of some entry, case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    entries: Vec<Vec<String>>,
}

impl Allowlist {
    pub fn from_entries(entries: &[String]) -> Self {
        let entries = entries
            .iter()
            .filter_map(|e| {
                let tokens: Vec<String> = e
                    .split_whitespace()
                    .map(|t| t.to_lowercase())
                    .collect();
                (!tokens.is_empty()).then_some(tokens)
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn permits(&self, tokens: &[String]) -> bool {
        self.entries.iter().any(|entry| {
            entry.len() <= tokens.len()
                && entry
                    .iter()
                    .zip(tokens)
                    .all(|(want, got)| want.eq_ignore_ascii_case(got))
        })
    }
}

fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[derive(Deserialize)]
struct ShellArgs {
    command: String,
    #[serde(default)]
    cwd: Option<String>,
}

pub struct ShellTool {
    allowlist: Allowlist,
}

impl ShellTool {
    pub fn new(allowlist: Allowlist) -> Self {
        Self { allowlist }
    }

    fn validate(&self, command: &str, tokens: &[String], unsafe_shell: bool) -> Result<()> {
        let program = tokens
            .first()
            .ok_or_else(|| anyhow!("empty command"))?
            .to_lowercase();
        let program = program
            .rsplit('/')
            .next()
            .unwrap_or(program.as_str())
            .to_string();

        // Interactive commands hang a non-tty child regardless of the
        // unsafe override, so this check comes first and always applies.
        if INTERACTIVE_COMMANDS.contains(&program.as_str()) {
            bail!("interactive command not supported: {}", program);
        }
        if unsafe_shell {
            return Ok(());
        }
        if NETWORK_COMMANDS.contains(&program.as_str()) {
            bail!("network command not permitted: {}", program);
        }
        if destructive_patterns().iter().any(|p| p.is_match(command)) {
            bail!("command matches a destructive pattern");
        }
        if self.allowlist.is_empty() {
            bail!("shell allowlist is empty; pass --unsafe-shell to bypass");
        }
        if !self.allowlist.permits(tokens) {
            bail!("command not in allowlist: {}", program);
        }
        Ok(())
    }

    fn resolve_cwd(&self, repo_root: &Path, cwd: Option<&str>) -> Result<PathBuf> {
        let Some(cwd) = cwd.filter(|c| !c.is_empty()) else {
            return Ok(repo_root.to_path_buf());
        };
        let requested = Path::new(cwd);
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            repo_root.join(requested)
        };
        let cleaned = lexical_clean(&joined);
        if !cleaned.starts_with(repo_root) {
            bail!("cwd must stay within repo root");
        }
        Ok(cleaned)
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn description(&self) -> &'static str {
        "Run a read-only shell command inside the repository. Commands are \
         tokenized and executed directly (no shell features like pipes or \
         redirection), and must match the configured allowlist."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command and arguments, e.g. \"git log --oneline -5\""
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory relative to the repo root"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: &str, meta: &Meta) -> Result<ToolOutput> {
        let args: ShellArgs =
            serde_json::from_str(args).map_err(|e| anyhow!("invalid shell arguments: {}", e))?;
        let tokens = split_command(&args.command)?;
        self.validate(&args.command, &tokens, meta.unsafe_shell)?;
        let cwd = self.resolve_cwd(&meta.repo_root, args.cwd.as_deref())?;

        let mut cmd = tokio::process::Command::new(&tokens[0]);
        cmd.args(&tokens[1..])
            .current_dir(&cwd)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in ["PATH", "HOME", "LANG"] {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }

        let start = Instant::now();
        let output = tokio::time::timeout(
            Duration::from_secs(meta.tool_timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| anyhow!("command timed out after {}s", meta.tool_timeout_secs))?
        .map_err(|e| anyhow!("failed to run {}: {}", tokens[0], e))?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let stdout = redact_secrets(&String::from_utf8_lossy(&output.stdout));
        let stderr = redact_secrets(&String::from_utf8_lossy(&output.stderr));
        let (stdout, out_trunc) = truncate_bytes(&stdout, meta.max_bytes);
        let (stderr, err_trunc) = truncate_bytes(&stderr, meta.max_bytes);
        let truncated = out_trunc || err_trunc;

        let combined = if stderr.is_empty() {
            stdout.clone()
        } else {
            format!("{}\n{}", stdout, stderr)
        };
        let line_count = combined.lines().count();
        let byte_count = combined.len();

        Ok(ToolOutput {
            payload: serde_json::json!({
                "stdout": stdout,
                "stderr": stderr,
                "exit_code": output.status.code().unwrap_or(-1),
                "duration_ms": duration_ms,
                "truncated": truncated,
            }),
            preview: preview(&combined, 12, 2000),
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

    fn meta(root: &Path) -> Meta {
        Meta {
            repo_root: root.to_path_buf(),
            unsafe_shell: false,
            tool_timeout_secs: 10,
            max_bytes: 20 * 1024,
            max_results: 200,
        }
    }

    fn tokens(s: &str) -> Vec<String> {
        split_command(s).unwrap()
    }

    #[test]
    fn tokenizer_handles_quoting() {
        assert_eq!(tokens("git status -sb"), vec!["git", "status", "-sb"]);
        assert_eq!(tokens(r#"echo "a b""#), vec!["echo", "a b"]);
        assert_eq!(tokens("echo 'it''s'"), vec!["echo", "its"]);
        assert_eq!(tokens(r#"echo a\ b"#), vec!["echo", "a b"]);
        assert_eq!(tokens(r#"echo "say \"hi\"""#), vec!["echo", r#"say "hi""#]);
        assert!(tokens("  spaced   out  ") == vec!["spaced", "out"]);
        assert!(split_command("echo \"open").is_err());
        assert!(split_command("echo 'open").is_err());
        assert!(split_command("echo trailing\\").is_err());
    }

    #[test]
    fn allowlist_matches_token_prefixes() {
        let list = Allowlist::from_entries(&[
            "git status".to_string(),
            "git log".to_string(),
            "ls".to_string(),
        ]);
        assert!(list.permits(&tokens("git status -sb")));
        assert!(list.permits(&tokens("GIT LOG --oneline")));
        assert!(list.permits(&tokens("ls -la src")));
        assert!(!list.permits(&tokens("git commit -m x")));
        assert!(!list.permits(&tokens("cat Cargo.toml")));
        assert!(!list.permits(&tokens("git")));
    }

    #[test]
    fn empty_allowlist_rejects_without_unsafe() {
        let tool = ShellTool::new(Allowlist::default());
        let err = tool
            .validate("ls", &tokens("ls"), false)
            .unwrap_err()
            .to_string();
        assert!(err.contains("allowlist is empty"));
        assert!(tool.validate("ls", &tokens("ls"), true).is_ok());
    }

    #[test]
    fn destructive_and_network_commands_blocked() {
        let tool = ShellTool::new(Allowlist::from_entries(&["rm".to_string()]));
        assert!(tool.validate("rm -rf /", &tokens("rm -rf /"), false).is_err());
        assert!(tool
            .validate("curl example.com", &tokens("curl example.com"), false)
            .is_err());
        // Unsafe skips both of those but never the interactive ban.
        assert!(tool.validate("rm -rf /tmp/x", &tokens("rm -rf /tmp/x"), true).is_ok());
        assert!(tool.validate("vim notes.txt", &tokens("vim notes.txt"), true).is_err());
    }

    #[test]
    fn cwd_cannot_escape_repo_root() {
        let tool = ShellTool::new(Allowlist::default());
        let root = Path::new("/repo/project");
        assert_eq!(
            tool.resolve_cwd(root, Some("src")).unwrap(),
            PathBuf::from("/repo/project/src")
        );
        assert_eq!(
            tool.resolve_cwd(root, Some("src/../docs")).unwrap(),
            PathBuf::from("/repo/project/docs")
        );
        assert!(tool.resolve_cwd(root, Some("../outside")).is_err());
        assert!(tool.resolve_cwd(root, Some("/etc")).is_err());
    }

    #[tokio::test]
    async fn executes_allowlisted_command() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();
        let tool = ShellTool::new(Allowlist::from_entries(&["ls".to_string()]));

        let out = tool
            .execute(r#"{"command":"ls"}"#, &meta(dir.path()))
            .await
            .unwrap();
        assert_eq!(out.payload["exit_code"], 0);
        assert!(out.payload["stdout"].as_str().unwrap().contains("hello.txt"));
    }

    #[tokio::test]
    async fn child_environment_is_scrubbed() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new(Allowlist::from_entries(&["env".to_string()]));

        std::env::set_var("COMET_SHELL_SCRUB_PROBE", "leaky");
        let out = tool
            .execute(r#"{"command":"env"}"#, &meta(dir.path()))
            .await
            .unwrap();
        std::env::remove_var("COMET_SHELL_SCRUB_PROBE");

        let stdout = out.payload["stdout"].as_str().unwrap();
        assert!(!stdout.contains("COMET_SHELL_SCRUB_PROBE"));
        assert!(stdout.contains("PATH="));
    }

    #[tokio::test]
    async fn disallowed_command_fails_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new(Allowlist::from_entries(&["ls".to_string()]));
        let err = tool
            .execute(r#"{"command":"cat /etc/passwd"}"#, &meta(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not in allowlist"));
    }
}
