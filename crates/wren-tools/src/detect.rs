// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Content-based hazard detection on tool arguments.
//!
//! Runs independently of the tool's tier and the approval mode.  Blocking
//! findings deny the call in every mode; flagged findings force a human
//! decision unless the tool was explicitly granted.
use std::path::{Component, Path};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;
use wren_config::ToolTier;

/// Argument keys that carry shell command text.
const COMMAND_KEYS: &[&str] = &["command", "cmd", "shell_command", "script"];

/// Argument keys that carry a filesystem path written by the tool.
const PATH_KEYS: &[&str] = &["path", "file_path", "target", "destination", "dest"];

const BLOCKING: &[(&str, &str)] = &[
    ("fork bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
    ("filesystem format", r"\bmkfs(\.[a-z0-9]+)?\b"),
    ("raw device write", r"\bdd\b[^;|&]*\bof=/dev/(sd|hd|vd|xvd|nvme|mmcblk|disk)"),
    ("raw device write", r">\s*/dev/(sd|hd|vd|xvd|nvme|mmcblk|disk)[a-z0-9]*"),
    (
        "recursive delete of root or home",
        r"\brm\s+(-[a-zA-Z]+\s+)*-[a-zA-Z]*[rR][a-zA-Z]*\s+(-[a-zA-Z]+\s+)*(/|/\*|~|~/|~/\*|\$HOME|\$HOME/)(\s|;|$)",
    ),
];

const FLAGGED: &[(&str, &str)] = &[
    (
        "recursive force delete",
        r"\brm\s+(-[a-zA-Z]+\s+)*-[a-zA-Z]*([rR][a-zA-Z]*f|f[a-zA-Z]*[rR])",
    ),
    (
        "recursive force delete",
        r"\brm\b.*(--recursive.*--force|--force.*--recursive)",
    ),
    (
        "pipe to shell from network",
        r"\b(curl|wget)\b[^|]*\|\s*(sudo\s+)?(ba|z|da|k)?sh\b",
    ),
    (
        "privilege escalation with destructive command",
        r"\b(sudo|doas)\s+(-\S+\s+)*(rm|dd|mkfs\S*|shred|chmod|chown|truncate|wipefs|fdisk)\b",
    ),
    (
        "write into credential directory",
        r">>?\s*\S*(\.ssh|\.aws|\.gnupg|\.kube)/",
    ),
];

/// Directory names whose contents are credentials or keys.
const SENSITIVE_DIRS: &[&str] = &[".ssh", ".aws", ".gnupg", ".kube", ".docker"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub label: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hazards {
    /// Deny in every mode.
    pub blocking: Vec<Finding>,
    /// Require a human decision.
    pub flagged: Vec<Finding>,
}

impl Hazards {
    pub fn is_empty(&self) -> bool {
        self.blocking.is_empty() && self.flagged.is_empty()
    }
}

fn compile(table: &'static [(&'static str, &'static str)]) -> Vec<(&'static str, Regex)> {
    table
        .iter()
        .filter_map(|(label, pattern)| match Regex::new(pattern) {
            Ok(re) => Some((*label, re)),
            Err(e) => {
                warn!(label, error = %e, "hazard pattern failed to compile");
                None
            }
        })
        .collect()
}

fn blocking_patterns() -> &'static [(&'static str, Regex)] {
    static CELL: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    CELL.get_or_init(|| compile(BLOCKING))
}

fn flagged_patterns() -> &'static [(&'static str, Regex)] {
    static CELL: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    CELL.get_or_init(|| compile(FLAGGED))
}

fn string_args<'a>(
    args: &'a Value,
    keys: &'static [&'static str],
) -> impl Iterator<Item = &'a str> + 'a {
    keys.iter()
        .filter_map(move |k| args.get(*k))
        .filter_map(Value::as_str)
}

/// Scan one shell command.
pub fn scan_command(command: &str) -> Hazards {
    let mut hazards = Hazards::default();
    for (label, re) in blocking_patterns() {
        if let Some(m) = re.find(command) {
            hazards.blocking.push(Finding {
                label: *label,
                detail: format!("{label}: `{}`", m.as_str().trim()),
            });
        }
    }
    for (label, re) in flagged_patterns() {
        if hazards.flagged.iter().any(|f| f.label == *label) {
            continue;
        }
        if let Some(m) = re.find(command) {
            hazards.flagged.push(Finding {
                label: *label,
                detail: format!("{label}: `{}`", m.as_str().trim()),
            });
        }
    }
    hazards
}

/// True when `path` points into a credential directory, at a dotenv file,
/// or under `/etc`.
pub fn is_sensitive_path(path: &str) -> bool {
    if path.starts_with("/etc/") {
        return true;
    }
    let p = Path::new(path);
    let in_sensitive_dir = p.components().any(|c| match c {
        Component::Normal(name) => name
            .to_str()
            .map(|n| SENSITIVE_DIRS.contains(&n))
            .unwrap_or(false),
        _ => false,
    });
    let file_name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
    in_sensitive_dir
        || file_name == ".env"
        || file_name.starts_with(".env.")
        || file_name.starts_with("id_rsa")
        || file_name.starts_with("id_ed25519")
}

/// Scan a call's arguments.  Path arguments are only inspected for tools
/// that write.
pub fn scan(args: &Value, tier: ToolTier) -> Hazards {
    let mut hazards = Hazards::default();
    for command in string_args(args, COMMAND_KEYS) {
        let found = scan_command(command);
        hazards.blocking.extend(found.blocking);
        hazards.flagged.extend(found.flagged);
    }
    if tier >= ToolTier::Write {
        for path in string_args(args, PATH_KEYS) {
            if is_sensitive_path(path) {
                hazards.flagged.push(Finding {
                    label: "sensitive path",
                    detail: format!("sensitive path: {path}"),
                });
            }
        }
    }
    hazards
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
