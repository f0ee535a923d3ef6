//! Configuration for comet
//!
//! Layered as defaults, then ~/.config/comet/config.toml, then COMET_*
//! environment variables. CLI flags are applied last in main.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: String,
    pub base_url: String,
    pub repo: PathBuf,
    pub max_steps: u32,
    pub timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub history_lines: usize,
    pub no_history: bool,
    pub persist_runs: bool,
    pub unsafe_shell: bool,
    pub no_web: bool,
    pub no_plan: bool,
    pub quiet: bool,
    pub json: bool,
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
    pub http_referer: Option<String>,
    pub title: Option<String>,
    pub shell_allowlist: Vec<String>,
    pub limits: ToolLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolLimits {
    pub grep_max_results: usize,
    pub grep_max_bytes: usize,
    pub shell_max_bytes: usize,
    pub web_max_bytes: usize,
    pub context_max_bytes: usize,
    pub max_file_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            repo: PathBuf::from("."),
            max_steps: 8,
            timeout_secs: 60,
            tool_timeout_secs: 10,
            history_lines: 50,
            no_history: false,
            persist_runs: false,
            unsafe_shell: false,
            no_web: false,
            no_plan: false,
            quiet: false,
            json: false,
            verbose: false,
            log_file: None,
            http_referer: None,
            title: None,
            shell_allowlist: default_allowlist(),
            limits: ToolLimits::default(),
        }
    }
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            grep_max_results: 200,
            grep_max_bytes: 20 * 1024,
            shell_max_bytes: 20 * 1024,
            web_max_bytes: 30 * 1024,
            context_max_bytes: 80 * 1024,
            max_file_bytes: 32 * 1024,
        }
    }
}

pub fn default_allowlist() -> Vec<String> {
    [
        "rg", "ls", "cat", "sed", "awk", "head", "tail", "git", "find", "pwd", "tree", "cargo",
        "go", "node", "npm", "pnpm", "yarn", "bun", "python", "pip", "make",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("comet").join("config.toml"))
    }

    /// Load config from disk with env overrides, or return defaults.
    pub fn load() -> Self {
        let mut config = Self::load_file();
        config.apply_env();
        config
    }

    fn load_file() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        eprintln!(
                            "  Warning: Config file {} is invalid ({}). Using defaults.",
                            path.display(),
                            err
                        );
                    }
                }
            }
        }
        Self::default()
    }

    fn apply_env(&mut self) {
        if let Ok(model) = std::env::var("COMET_MODEL") {
            if !model.is_empty() {
                self.model = model;
            }
        }
        if let Ok(base_url) = std::env::var("COMET_BASE_URL") {
            if !base_url.is_empty() {
                self.base_url = base_url;
            }
        }
        if let Ok(timeout) = std::env::var("COMET_TIMEOUT_SECONDS") {
            if let Ok(secs) = timeout.parse::<u64>() {
                if secs > 0 {
                    self.timeout_secs = secs;
                }
            }
        }
    }

    /// Directory run records are persisted to.
    pub fn runs_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("comet").join("runs"))
    }
}
