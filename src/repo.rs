//! Repository discovery and the context summary injected into prompts.

use crate::redact::redact_secrets;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Locate the repository root by git discovery, falling back to the
/// absolute start path when no repository is found.
pub fn find_root(start: &Path) -> PathBuf {
    let mut abs = start
        .canonicalize()
        .unwrap_or_else(|_| start.to_path_buf());
    if abs.is_file() {
        if let Some(parent) = abs.parent() {
            abs = parent.to_path_buf();
        }
    }
    match git2::Repository::discover(&abs) {
        Ok(repo) => repo.workdir().map(Path::to_path_buf).unwrap_or(abs),
        Err(_) => abs,
    }
}

/// Files that must never be read into context or search output.
pub fn is_denylisted(path: &Path) -> bool {
    let lower = path.to_string_lossy().to_lowercase();
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    base.starts_with(".env")
        || base.ends_with(".pem")
        || base.ends_with(".key")
        || base.ends_with(".p12")
        || base.ends_with(".pfx")
        || base.starts_with("id_rsa")
        || base == ".npmrc"
        || lower.contains(".aws/credentials")
        || lower.contains(".docker/config.json")
}

/// Negated glob excludes matching the denylist, for ripgrep invocations.
pub fn denylist_globs() -> &'static [&'static str] {
    &[
        "!.env*",
        "!*.pem",
        "!*.key",
        "!*.p12",
        "!*.pfx",
        "!id_rsa*",
        "!.aws/credentials",
        "!.npmrc",
        "!.docker/config.json",
    ]
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub context_max_bytes: usize,
    pub max_file_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct FileSnippet {
    pub path: String,
    pub snippet: String,
    pub truncated: bool,
}

/// Repository metadata and key-file snippets rendered into one prompt
/// blob. The agent treats the rendered summary as opaque text.
#[derive(Debug, Clone, Default)]
pub struct RepoContext {
    pub repo_root: PathBuf,
    pub top_level: Vec<String>,
    pub key_files: BTreeMap<String, bool>,
    pub framework_indicators: BTreeMap<String, bool>,
    pub snippets: Vec<FileSnippet>,
    pub warnings: Vec<String>,
    bytes: usize,
}

const KEY_FILES: &[&str] = &[
    "package.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "package-lock.json",
    "go.mod",
    "Cargo.toml",
    "Dockerfile",
    "docker-compose.yml",
    "Makefile",
    "README.md",
    ".env.example",
    "tsconfig.json",
];

const INDICATOR_DIRS: &[&str] = &["app", "pages", "src", "server", "api"];

/// Gather top-level structure, key-file presence, and redacted snippets.
pub fn build_context(repo_root: &Path, limits: Limits) -> RepoContext {
    let mut ctx = RepoContext {
        repo_root: repo_root.to_path_buf(),
        ..Default::default()
    };

    if let Ok(entries) = fs::read_dir(repo_root) {
        for entry in entries.flatten() {
            ctx.top_level.push(entry.file_name().to_string_lossy().to_string());
        }
        ctx.top_level.sort();
    }

    for name in KEY_FILES {
        let present = repo_root.join(name).exists();
        ctx.key_files.insert((*name).to_string(), present);
    }

    for name in INDICATOR_DIRS {
        let present = repo_root.join(name).is_dir();
        ctx.framework_indicators.insert(format!("{}/", name), present);
    }

    let next_configs: Vec<PathBuf> = ctx
        .top_level
        .iter()
        .filter(|n| n.starts_with("next.config."))
        .map(|n| repo_root.join(n))
        .collect();
    ctx.key_files
        .insert("next.config.*".to_string(), !next_configs.is_empty());
    for path in next_configs {
        let raw = read_file_limited(&path, limits.max_file_bytes);
        ctx.add_snippet(&path, &raw, limits);
    }

    if ctx.key_files["package.json"] {
        let path = repo_root.join("package.json");
        let raw = extract_package_json(&path, limits.max_file_bytes);
        ctx.add_snippet(&path, &raw, limits);
    }
    if ctx.key_files["README.md"] {
        let path = repo_root.join("README.md");
        let raw = read_first_lines(&path, 80, limits.max_file_bytes);
        ctx.add_snippet(&path, &raw, limits);
    }
    for name in ["pnpm-lock.yaml", "yarn.lock", "package-lock.json"] {
        if ctx.key_files[name] {
            let path = repo_root.join(name);
            let raw = read_first_lines(&path, 40, limits.max_file_bytes);
            ctx.add_snippet(&path, &raw, limits);
        }
    }
    for name in ["go.mod", "Cargo.toml", "Dockerfile", "docker-compose.yml", "Makefile"] {
        if ctx.key_files[name] {
            let path = repo_root.join(name);
            let raw = read_first_lines(&path, 80, limits.max_file_bytes);
            ctx.add_snippet(&path, &raw, limits);
        }
    }
    if ctx.key_files["tsconfig.json"] {
        let path = repo_root.join("tsconfig.json");
        let raw = read_file_limited(&path, limits.max_file_bytes);
        ctx.add_snippet(&path, &raw, limits);
    }

    if ctx.key_files[".env.example"] {
        ctx.warnings.push(
            "Detected .env.example but contents are redacted by denylist policy.".to_string(),
        );
    }

    ctx
}

impl RepoContext {
    fn add_snippet(&mut self, path: &Path, raw: &str, limits: Limits) {
        if raw.is_empty() {
            return;
        }
        let rel = path
            .strip_prefix(&self.repo_root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();
        let mut redacted = redact_secrets(raw);
        let mut truncated = false;
        if limits.context_max_bytes > 0 {
            let remaining = limits.context_max_bytes.saturating_sub(self.bytes);
            if remaining == 0 {
                return;
            }
            if redacted.len() > remaining {
                let (cut, _) = crate::truncate::truncate_bytes(&redacted, remaining);
                redacted = cut;
                truncated = true;
            }
            self.bytes += redacted.len();
        }
        self.snippets.push(FileSnippet {
            path: rel,
            snippet: redacted,
            truncated,
        });
    }

    /// Render the context as one prompt-ready text blob.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Repo root: {}\n", self.repo_root.display()));
        if !self.top_level.is_empty() {
            out.push_str("Top-level entries:\n");
            for entry in &self.top_level {
                out.push_str(&format!("- {}\n", entry));
            }
        }
        if !self.key_files.is_empty() {
            out.push_str("Key files:\n");
            for (name, present) in &self.key_files {
                out.push_str(&format!("- {}: {}\n", name, present));
            }
        }
        if !self.framework_indicators.is_empty() {
            out.push_str("Framework indicators:\n");
            for (name, present) in &self.framework_indicators {
                out.push_str(&format!("- {}: {}\n", name, present));
            }
        }
        if !self.snippets.is_empty() {
            out.push_str("Snippets:\n");
            for snip in &self.snippets {
                out.push_str(&format!("--- {}", snip.path));
                if snip.truncated {
                    out.push_str(" (truncated)");
                }
                out.push_str(" ---\n");
                out.push_str(&snip.snippet);
                out.push('\n');
            }
        }
        if !self.warnings.is_empty() {
            out.push_str("Warnings:\n");
            for warning in &self.warnings {
                out.push_str(&format!("- {}\n", warning));
            }
        }
        out
    }
}

fn read_file_limited(path: &Path, max_bytes: usize) -> String {
    if is_denylisted(path) {
        return String::new();
    }
    let Ok(mut file) = fs::File::open(path) else {
        return String::new();
    };
    let limit = if max_bytes == 0 { 32 * 1024 } else { max_bytes };
    let mut buf = vec![0u8; limit];
    let n = file.read(&mut buf).unwrap_or(0);
    String::from_utf8_lossy(&buf[..n]).to_string()
}

fn read_first_lines(path: &Path, max_lines: usize, max_bytes: usize) -> String {
    if is_denylisted(path) {
        return String::new();
    }
    let Ok(content) = fs::read_to_string(path) else {
        return String::new();
    };
    let mut lines = Vec::new();
    let mut bytes = 0usize;
    for line in content.lines() {
        if max_lines > 0 && lines.len() >= max_lines {
            break;
        }
        if max_bytes > 0 && bytes + line.len() > max_bytes {
            break;
        }
        bytes += line.len();
        lines.push(line);
    }
    lines.join("\n")
}

/// Reduce package.json to the keys worth prompting with.
fn extract_package_json(path: &Path, max_bytes: usize) -> String {
    let content = read_file_limited(path, max_bytes);
    if content.is_empty() {
        return content;
    }
    let Ok(data) = serde_json::from_str::<serde_json::Value>(&content) else {
        return content;
    };
    let mut filtered = serde_json::Map::new();
    for key in [
        "name",
        "private",
        "packageManager",
        "scripts",
        "dependencies",
        "devDependencies",
        "peerDependencies",
    ] {
        if let Some(val) = data.get(key) {
            filtered.insert(key.to_string(), val.clone());
        }
    }
    serde_json::to_string_pretty(&serde_json::Value::Object(filtered)).unwrap_or(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn denylist_covers_secret_files() {
        assert!(is_denylisted(Path::new(".env")));
        assert!(is_denylisted(Path::new("certs/server.pem")));
        assert!(is_denylisted(Path::new("/home/u/.ssh/id_rsa")));
        assert!(is_denylisted(Path::new("/home/u/.aws/credentials")));
        assert!(!is_denylisted(Path::new("src/main.rs")));
        assert!(!is_denylisted(Path::new("README.md")));
    }

    #[test]
    fn context_lists_top_level_and_key_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "# Demo\nA test repo.\n").unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();

        let ctx = build_context(
            dir.path(),
            Limits {
                context_max_bytes: 8192,
                max_file_bytes: 1024,
            },
        );
        assert!(ctx.top_level.contains(&"README.md".to_string()));
        assert!(ctx.key_files["README.md"]);
        assert!(!ctx.key_files["package.json"]);
        assert!(ctx.framework_indicators["src/"]);

        let summary = ctx.summary();
        assert!(summary.contains("Repo root:"));
        assert!(summary.contains("# Demo"));
    }

    #[test]
    fn context_redacts_snippets() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "setup: API_KEY=abc123\n").unwrap();
        let ctx = build_context(
            dir.path(),
            Limits {
                context_max_bytes: 8192,
                max_file_bytes: 1024,
            },
        );
        assert!(!ctx.summary().contains("abc123"));
    }

    #[test]
    fn context_respects_byte_budget() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "x".repeat(4096)).unwrap();
        let ctx = build_context(
            dir.path(),
            Limits {
                context_max_bytes: 100,
                max_file_bytes: 8192,
            },
        );
        let snip = &ctx.snippets[0];
        assert!(snip.truncated);
        assert!(snip.snippet.len() <= 100);
    }

    #[test]
    fn package_json_is_filtered() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"name":"demo","scripts":{"dev":"next dev"},"description":"long text"}"#,
        )
        .unwrap();
        let ctx = build_context(
            dir.path(),
            Limits {
                context_max_bytes: 8192,
                max_file_bytes: 4096,
            },
        );
        let summary = ctx.summary();
        assert!(summary.contains("next dev"));
        assert!(!summary.contains("long text"));
    }

    #[test]
    fn find_root_falls_back_without_git() {
        let dir = tempdir().unwrap();
        let root = find_root(dir.path());
        assert_eq!(root, dir.path().canonicalize().unwrap());
    }
}
