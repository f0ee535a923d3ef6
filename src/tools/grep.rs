//! Repository text search. Shells out to ripgrep when available and
//! falls back to a walkdir + regex scan otherwise, so the payload shape
//! is identical either way.

use super::{Meta, Tool, ToolOutput};
use crate::redact::redact_secrets;
use crate::repo::{denylist_globs, is_denylisted};
use crate::truncate::{preview, truncate_lines_and_bytes};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

const BINARY_SNIFF_BYTES: usize = 8000;

#[derive(Deserialize, Clone)]
struct GrepArgs {
    pattern: String,
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    glob: Vec<String>,
    #[serde(default)]
    case_sensitive: bool,
    #[serde(default)]
    max_results: Option<usize>,
}

/// Resolve requested search paths relative to the repo root, dropping
/// anything that escapes it.
fn sanitize_paths(paths: &[String], root: &Path) -> Vec<String> {
    paths
        .iter()
        .filter(|p| !p.is_empty())
        .filter_map(|p| {
            let requested = Path::new(p);
            let abs = if requested.is_absolute() {
                requested.to_path_buf()
            } else {
                root.join(requested)
            };
            let mut clean = PathBuf::new();
            for component in abs.components() {
                match component {
                    std::path::Component::CurDir => {}
                    std::path::Component::ParentDir => {
                        if !clean.pop() {
                            return None;
                        }
                    }
                    other => clean.push(other),
                }
            }
            clean.strip_prefix(root).ok().map(|rel| {
                let rel = rel.to_string_lossy().to_string();
                if rel.is_empty() {
                    ".".to_string()
                } else {
                    rel
                }
            })
        })
        .collect()
}

pub struct GrepTool {
    rg_path: Option<PathBuf>,
}

impl GrepTool {
    pub fn new(rg_path: Option<PathBuf>) -> Self {
        Self { rg_path }
    }

    /// Looks for `rg` on PATH so the tool degrades gracefully on hosts
    /// without ripgrep installed.
    pub fn detect() -> Self {
        let rg_path = std::env::var_os("PATH").and_then(|path| {
            std::env::split_paths(&path)
                .map(|dir| dir.join("rg"))
                .find(|candidate| candidate.is_file())
        });
        Self { rg_path }
    }

    async fn run_rg(
        &self,
        rg: &Path,
        args: &GrepArgs,
        meta: &Meta,
    ) -> Result<Vec<String>> {
        let mut cmd = tokio::process::Command::new(rg);
        cmd.arg("--no-heading")
            .arg("--line-number")
            .current_dir(&meta.repo_root)
            .kill_on_drop(true);
        if !args.case_sensitive {
            cmd.arg("--ignore-case");
        }
        for glob in &args.glob {
            cmd.arg("--glob").arg(glob);
        }
        for glob in denylist_globs() {
            cmd.arg("--glob").arg(glob);
        }
        cmd.arg("--").arg(&args.pattern);
        let mut paths = sanitize_paths(&args.paths, &meta.repo_root);
        if paths.is_empty() {
            paths.push(".".to_string());
        }
        for path in &paths {
            cmd.arg(path);
        }

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(meta.tool_timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| anyhow!("search timed out after {}s", meta.tool_timeout_secs))?
        .map_err(|e| anyhow!("failed to run ripgrep: {}", e))?;
        // Exit 1 means no matches, which is an empty success.
        match output.status.code() {
            Some(0) | Some(1) => {}
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(anyhow!("ripgrep failed: {}", stderr.trim()));
            }
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim_start_matches("./").to_string())
            .collect())
    }
}

/// Minimal glob matcher for the fallback path: `**` spans directories,
/// `*` stops at separators, `?` matches one character.
fn glob_match(glob: &str, path: &str) -> bool {
    let mut regex = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        regex.push_str("(?:.*/)?");
                    } else {
                        regex.push_str(".*");
                    }
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push('.'),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex)
        .map(|r| r.is_match(path) || path.ends_with(&format!("/{}", glob)))
        .unwrap_or(false)
}

fn matches_globs(globs: &[String], rel: &str) -> bool {
    if globs.is_empty() {
        return true;
    }
    let base = rel.rsplit('/').next().unwrap_or(rel);
    globs
        .iter()
        .any(|g| glob_match(g, rel) || glob_match(g, base))
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(BINARY_SNIFF_BYTES)].contains(&0)
}

fn fallback_search(root: &Path, args: &GrepArgs, max_results: usize) -> Result<Vec<String>> {
    let pattern = if args.case_sensitive {
        args.pattern.clone()
    } else {
        format!("(?i){}", args.pattern)
    };
    let re = Regex::new(&pattern).map_err(|e| anyhow!("invalid pattern: {}", e))?;

    let mut starts = sanitize_paths(&args.paths, root)
        .into_iter()
        .map(|rel| root.join(rel))
        .collect::<Vec<_>>();
    if starts.is_empty() {
        starts.push(root.to_path_buf());
    }

    let mut matches = Vec::new();
    'roots: for start in &starts {
        // Skip hidden directories below the start; the start itself may
        // be hidden (tempdirs, dotfile checkouts) and must still walk.
        let walker = WalkDir::new(start).into_iter().filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0
                || !(entry.file_type().is_dir() && name.starts_with('.') && name.len() > 1)
        });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if is_denylisted(path) {
                continue;
            }
            let rel = match path.strip_prefix(root) {
                Ok(r) => r.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if !matches_globs(&args.glob, &rel) {
                continue;
            }
            let Ok(bytes) = std::fs::read(path) else {
                continue;
            };
            if looks_binary(&bytes) {
                continue;
            }
            let text = String::from_utf8_lossy(&bytes);
            for (idx, line) in text.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(format!("{}:{}:{}", rel, idx + 1, line));
                    if matches.len() >= max_results {
                        break 'roots;
                    }
                }
            }
        }
    }
    Ok(matches)
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &'static str {
        "grep"
    }

    fn description(&self) -> &'static str {
        "Search file contents in the repository with a regular expression. \
         Returns path:line:text matches. Prefer this over shell for any \
         text search."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "paths": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Paths to search, relative to the repo root"
                },
                "glob": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional file globs, e.g. [\"*.rs\", \"src/**\"]"
                },
                "case_sensitive": {
                    "type": "boolean",
                    "description": "Match case exactly (default false)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Cap on returned matches"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: &str, meta: &Meta) -> Result<ToolOutput> {
        let args: GrepArgs =
            serde_json::from_str(args).map_err(|e| anyhow!("invalid grep arguments: {}", e))?;
        if args.pattern.is_empty() {
            return Err(anyhow!("pattern must not be empty"));
        }
        // Zero or absent means "use the configured cap".
        let max_results = args
            .max_results
            .filter(|&n| n > 0)
            .unwrap_or(meta.max_results)
            .min(meta.max_results);

        let start = Instant::now();
        let mut warning = None;
        let lines = match &self.rg_path {
            Some(rg) => self.run_rg(rg, &args, meta).await?,
            None => {
                warning = Some("ripgrep not found; using slower builtin search".to_string());
                let root = meta.repo_root.clone();
                let fallback_args = args.clone();
                tokio::task::spawn_blocking(move || {
                    fallback_search(&root, &fallback_args, max_results)
                })
                .await
                .map_err(|e| anyhow!("search task failed: {}", e))??
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let lines: Vec<String> = lines.iter().map(|l| redact_secrets(l)).collect();
        let (matches, truncated, byte_count) =
            truncate_lines_and_bytes(&lines, max_results, meta.max_bytes);
        let line_count = matches.len();

        let mut payload = serde_json::json!({
            "matches": matches,
            "truncated": truncated,
            "duration_ms": duration_ms,
        });
        if let Some(warning) = warning {
            payload["warning"] = serde_json::Value::String(warning);
        }

        Ok(ToolOutput {
            preview: preview(&matches.join("\n"), 12, 2000),
            payload,
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

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/main.rs"),
            "fn main() {\n    println!(\"hello world\");\n}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "Hello World project\n").unwrap();
        std::fs::write(dir.path().join(".env"), "API_KEY=supersecret\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn fallback_finds_matches_case_insensitively() {
        let dir = fixture();
        let tool = GrepTool::new(None);
        let out = tool
            .execute(r#"{"pattern":"hello"}"#, &meta(dir.path()))
            .await
            .unwrap();

        let matches = out.payload["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches
            .iter()
            .any(|m| m.as_str().unwrap().starts_with("src/main.rs:2:")));
        assert!(out.payload["warning"]
            .as_str()
            .unwrap()
            .contains("ripgrep not found"));
    }

    #[tokio::test]
    async fn fallback_skips_denylisted_files() {
        let dir = fixture();
        let tool = GrepTool::new(None);
        let out = tool
            .execute(r#"{"pattern":"supersecret"}"#, &meta(dir.path()))
            .await
            .unwrap();
        assert!(out.payload["matches"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn globs_filter_results() {
        let dir = fixture();
        let tool = GrepTool::new(None);
        let out = tool
            .execute(
                r#"{"pattern":"hello","glob":["*.rs"]}"#,
                &meta(dir.path()),
            )
            .await
            .unwrap();
        let matches = out.payload["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].as_str().unwrap().contains("main.rs"));
    }

    #[tokio::test]
    async fn max_results_caps_matches() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (0..50).map(|i| format!("needle {}\n", i)).collect();
        std::fs::write(dir.path().join("haystack.txt"), body).unwrap();

        let tool = GrepTool::new(None);
        let out = tool
            .execute(
                r#"{"pattern":"needle","max_results":5}"#,
                &meta(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(out.payload["matches"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn zero_max_results_means_default_cap() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (0..10).map(|i| format!("needle {}\n", i)).collect();
        std::fs::write(dir.path().join("haystack.txt"), body).unwrap();

        let tool = GrepTool::new(None);
        let out = tool
            .execute(
                r#"{"pattern":"needle","max_results":0}"#,
                &meta(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(out.payload["matches"].as_array().unwrap().len(), 10);
        assert_eq!(out.payload["truncated"], false);
    }

    #[tokio::test]
    async fn invalid_pattern_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = GrepTool::new(None);
        let err = tool
            .execute(r#"{"pattern":"[unclosed"}"#, &meta(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[tokio::test]
    async fn paths_scope_the_search() {
        let dir = fixture();
        let tool = GrepTool::new(None);
        let out = tool
            .execute(
                r#"{"pattern":"hello","paths":["src"]}"#,
                &meta(dir.path()),
            )
            .await
            .unwrap();
        let matches = out.payload["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].as_str().unwrap().contains("main.rs"));
    }

    #[test]
    fn sanitize_paths_drops_escapes() {
        let root = Path::new("/repo");
        let paths = sanitize_paths(
            &[
                "src".to_string(),
                "../outside".to_string(),
                "/etc".to_string(),
                "docs/../src".to_string(),
                String::new(),
            ],
            root,
        );
        assert_eq!(paths, vec!["src".to_string(), "src".to_string()]);
    }

    #[test]
    fn glob_matcher_semantics() {
        assert!(glob_match("*.rs", "main.rs"));
        assert!(!glob_match("*.rs", "src/main.rs"));
        assert!(glob_match("src/**/*.rs", "src/tools/grep.rs"));
        assert!(glob_match("**/*.md", "docs/guide.md"));
        assert!(glob_match("?.txt", "a.txt"));
        assert!(!glob_match("?.txt", "ab.txt"));
    }
}
