//! Config validation (friendly errors)
//!
//! Purpose:
//! - Catch common rack.json mistakes early
//! - Explain *what* is wrong, *where* it lives, and *what to do*
//! - Keep the rack running where possible by falling back safely

use std::collections::BTreeSet;
use std::path::Path;

use glrack_engine::config::MAX_BLOCK_SIZE;
use glrack_engine::{loge, logi, logw};

const KNOWN_KEYS: &[&str] = &[
    "version",
    "sample_rate",
    "block_size",
    "canvas",
    "library_dirs",
    "lab",
    "subscriptions",
    "session",
    "log_file",
];

const SUBSCRIBERS: &[&str] = &["canvas", "glaze", "glcv"];

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub level: IssueLevel,
    pub path: String,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    Warn,
    Error,
}

impl ValidationIssue {
    pub fn warn(path: impl Into<String>, message: impl Into<String>, hint: Option<String>) -> Self {
        Self { level: IssueLevel::Warn, path: path.into(), message: message.into(), hint }
    }
    pub fn error(path: impl Into<String>, message: impl Into<String>, hint: Option<String>) -> Self {
        Self { level: IssueLevel::Error, path: path.into(), message: message.into(), hint }
    }
}

pub fn emit_issues(tag: &str, issues: &[ValidationIssue]) {
    for it in issues {
        match it.level {
            IssueLevel::Warn => {
                if let Some(h) = &it.hint {
                    logw!(tag, "{}: {} (hint: {})", it.path, it.message, h);
                } else {
                    logw!(tag, "{}: {}", it.path, it.message);
                }
            }
            IssueLevel::Error => {
                if let Some(h) = &it.hint {
                    loge!(tag, "{}: {} (hint: {})", it.path, it.message, h);
                } else {
                    loge!(tag, "{}: {}", it.path, it.message);
                }
            }
        }
    }
}

/// Emit a one-line summary even when there are zero issues.
pub fn emit_summary(tag: &str, label: &str, issues: &[ValidationIssue]) {
    let warns = issues.iter().filter(|i| i.level == IssueLevel::Warn).count();
    let errs = issues.iter().filter(|i| i.level == IssueLevel::Error).count();
    if errs == 0 && warns == 0 {
        logi!(tag, "validation: {label} OK (0 issues)");
    } else {
        logw!(tag, "validation: {label} issues found (errors={errs} warnings={warns})");
    }
}

/// Validate the raw rack.json document. `assets` is used to check that
/// referenced directories and files exist.
pub fn validate_rack_json(rack: &serde_json::Value, assets: &Path) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let Some(obj) = rack.as_object() else {
        issues.push(ValidationIssue::error(
            "rack.json:/",
            "top level must be an object",
            Some("expected: { \"version\": 1, \"library_dirs\": [\"shaders\"], ... }".into()),
        ));
        return issues;
    };

    for key in obj.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            issues.push(ValidationIssue::warn(
                format!("rack.json:/{}", escape_ptr(key)),
                format!("unknown key '{key}' is ignored"),
                Some(format!("known keys: {}", KNOWN_KEYS.join(", "))),
            ));
        }
    }

    if let Some(v) = obj.get("version") {
        if v.as_u64() != Some(1) {
            issues.push(ValidationIssue::error(
                "rack.json:/version",
                format!("unsupported version {v}"),
                Some("only version 1 is understood".into()),
            ));
        }
    }

    if let Some(v) = obj.get("sample_rate") {
        match v.as_f64() {
            Some(sr) if sr > 0.0 => {
                if !(8_000.0..=384_000.0).contains(&sr) {
                    issues.push(ValidationIssue::warn(
                        "rack.json:/sample_rate",
                        format!("unusual sample rate {sr}"),
                        Some("typical values are 44100, 48000 or 96000".into()),
                    ));
                }
            }
            _ => issues.push(ValidationIssue::error(
                "rack.json:/sample_rate",
                "sample_rate must be a positive number",
                Some("falls back to 48000".into()),
            )),
        }
    }

    if let Some(v) = obj.get("block_size") {
        match v.as_u64() {
            Some(n) if n >= 1 && n as usize <= MAX_BLOCK_SIZE => {}
            _ => issues.push(ValidationIssue::error(
                "rack.json:/block_size",
                format!("block_size must be an integer in 1..={MAX_BLOCK_SIZE}"),
                Some("clamped into range at load".into()),
            )),
        }
    }

    if let Some(canvas) = obj.get("canvas") {
        for dim in ["width", "height"] {
            if canvas.get(dim).and_then(|v| v.as_u64()).filter(|n| *n > 0).is_none() {
                issues.push(ValidationIssue::error(
                    format!("rack.json:/canvas/{dim}"),
                    format!("canvas {dim} must be a positive integer"),
                    Some("expected: \"canvas\": { \"width\": 975, \"height\": 800 }".into()),
                ));
            }
        }
    }

    match obj.get("library_dirs") {
        None => {}
        Some(serde_json::Value::Array(dirs)) => {
            if dirs.is_empty() {
                issues.push(ValidationIssue::warn(
                    "rack.json:/library_dirs",
                    "no library directories; no Glib will be created",
                    Some("add at least one folder of .vert/.frag pairs, e.g. [\"shaders\"]".into()),
                ));
            }
            let mut seen = BTreeSet::new();
            for (i, d) in dirs.iter().enumerate() {
                let path = format!("rack.json:/library_dirs/{i}");
                let Some(s) = d.as_str() else {
                    issues.push(ValidationIssue::error(
                        path,
                        "entry must be a string",
                        Some("use a folder name relative to the assets folder".into()),
                    ));
                    continue;
                };
                if !seen.insert(s.to_string()) {
                    issues.push(ValidationIssue::warn(
                        path,
                        format!("duplicate library dir '{s}'"),
                        Some("each directory becomes its own Glib; duplicates load the same pairs twice".into()),
                    ));
                } else if !assets.join(s).is_dir() {
                    issues.push(ValidationIssue::warn(
                        path,
                        format!("directory '{s}' not found under {}", assets.display()),
                        Some("paths are resolved relative to the assets folder".into()),
                    ));
                }
            }
        }
        Some(_) => issues.push(ValidationIssue::error(
            "rack.json:/library_dirs",
            "library_dirs must be an array of strings",
            Some("expected: \"library_dirs\": [\"shaders\"]".into()),
        )),
    }

    if let Some(lab) = obj.get("lab") {
        for stage in ["vert", "frag"] {
            let path = format!("rack.json:/lab/{stage}");
            match lab.get(stage).and_then(|v| v.as_str()) {
                Some(s) if !assets.join(s).is_file() => issues.push(ValidationIssue::warn(
                    path,
                    format!("lab file '{s}' not found"),
                    Some("the lab starts from its built-in defaults instead".into()),
                )),
                Some(_) => {}
                None => issues.push(ValidationIssue::error(
                    path,
                    format!("missing or non-string '{stage}'"),
                    Some("expected: \"lab\": { \"vert\": \"lab/lab.vert\", \"frag\": \"lab/lab.frag\" }".into()),
                )),
            }
        }
    }

    if let Some(subs) = obj.get("subscriptions") {
        match subs.as_object() {
            Some(m) => {
                for (module, name) in m {
                    let path = format!("rack.json:/subscriptions/{}", escape_ptr(module));
                    if !SUBSCRIBERS.contains(&module.as_str()) {
                        issues.push(ValidationIssue::warn(
                            path,
                            format!("'{module}' cannot subscribe to shaders"),
                            Some(format!("subscribers are: {}", SUBSCRIBERS.join(", "))),
                        ));
                    } else if name.as_str().filter(|s| !s.is_empty()).is_none() {
                        issues.push(ValidationIssue::warn(
                            path,
                            "shader name must be a non-empty string",
                            Some("use the file stem of a pair in a library dir, e.g. \"plasma\"".into()),
                        ));
                    }
                }
            }
            None => issues.push(ValidationIssue::error(
                "rack.json:/subscriptions",
                "subscriptions must be an object",
                Some("expected: \"subscriptions\": { \"canvas\": \"plasma\" }".into()),
            )),
        }
    }

    issues
}

/// Check startup subscriptions against the names that were actually loaded.
pub fn validate_subscription_names<'a>(
    wanted: impl IntoIterator<Item = (&'a str, &'a str)>,
    available: &BTreeSet<String>,
) -> Vec<ValidationIssue> {
    wanted
        .into_iter()
        .filter(|(_, name)| !available.contains(*name))
        .map(|(module, name)| {
            ValidationIssue::warn(
                format!("rack.json:/subscriptions/{module}"),
                format!("no loaded shader is named '{name}'"),
                Some(format!("available: {}", join_set(available))),
            )
        })
        .collect()
}

fn join_set(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

// JSON Pointer escaping for friendly paths
fn escape_ptr(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}
