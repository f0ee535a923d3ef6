//! Recent shell history as optional prompt context.
//!
//! History lines often carry the commands a developer just ran, which is
//! strong evidence for "how do I run X" questions. Lines are normalized
//! across zsh/bash/fish formats and always redacted.

use crate::redact::redact_secrets;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// Return up to the last `max_lines` commands from the user's shell
/// history, redacted. Returns an empty vec when history is unavailable.
pub fn load_shell_history(max_lines: usize) -> Vec<String> {
    if max_lines == 0 {
        return Vec::new();
    }
    let Some(path) = history_path() else {
        return Vec::new();
    };
    let Ok(file) = File::open(&path) else {
        return Vec::new();
    };

    let mut lines: Vec<String> = Vec::new();
    for line in BufReader::new(file).lines().map_while(Result::ok) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        lines.push(normalize_history_line(line));
        if lines.len() > max_lines {
            let drop = lines.len() - max_lines;
            lines.drain(..drop);
        }
    }

    lines.iter().map(|l| redact_secrets(l)).collect()
}

fn history_path() -> Option<PathBuf> {
    if let Ok(hist) = std::env::var("HISTFILE") {
        if !hist.is_empty() {
            return Some(PathBuf::from(hist));
        }
    }
    let home = dirs::home_dir()?;
    let candidates = [
        home.join(".zsh_history"),
        home.join(".bash_history"),
        home.join(".config/fish/fish_history"),
    ];
    candidates.into_iter().find(|p| p.exists())
}

/// Strip shell-specific history framing down to the bare command.
fn normalize_history_line(line: &str) -> String {
    // zsh extended history: ": 1680000000:0;command"
    if let Some(rest) = line.strip_prefix(": ") {
        if let Some(idx) = rest.find(';') {
            return rest[idx + 1..].trim().to_string();
        }
    }
    // fish history: "- cmd: command"
    if let Some(rest) = line.strip_prefix("- cmd: ") {
        return rest.trim().to_string();
    }
    line.to_string()
}
