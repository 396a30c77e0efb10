//! Content fingerprints and summaries for the code memory store.
//!
//! Normalization policy (this determines dedup granularity):
//!
//! - CRLF and lone CR line endings become LF.
//! - Trailing whitespace is removed from every line.
//! - Leading and trailing blank lines are removed.
//!
//! Indentation and interior blank lines are kept as-is, since indentation is
//! significant in several of the languages the agent writes.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Apply the normalization policy to `source`.
pub fn normalize(source: &str) -> String {
    let unified = source.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.lines().map(str::trim_end).collect();
    let start = lines.iter().position(|l| !l.is_empty());
    let end = lines.iter().rposition(|l| !l.is_empty());
    match (start, end) {
        (Some(start), Some(end)) => lines[start..=end].join("\n"),
        _ => String::new(),
    }
}

/// Canonical record id: lowercase hex SHA-256 of the normalized source.
pub fn code_id(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(source).as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether `id` is shaped like a value returned by [`code_id`].
pub fn is_code_id(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

static DEFINITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?\s+)?(?:export\s+)?(?:async\s+)?(?:def|fn|function)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
    .expect("definition regex is valid")
});

static DOCSTRING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:"""|''')\s*([^\n]*?)\s*(?:"""|''')?\s*$"#).expect("docstring regex is valid")
});

/// Name of the first function defined in `source`.
pub fn derive_name(source: &str) -> Option<String> {
    DEFINITION_RE
        .captures(source)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// One-line description of `source`.
///
/// Prefers the first line of a docstring directly below the first definition,
/// then a comment block at the top of the fragment.
pub fn derive_description(source: &str) -> Option<String> {
    docstring_after_definition(source).or_else(|| leading_comment(source))
}

fn docstring_after_definition(source: &str) -> Option<String> {
    let def = DEFINITION_RE.find(source)?;
    let rest = &source[def.end()..];
    let after_header = rest.split_once('\n')?.1;
    let first = after_header.lines().find(|l| !l.trim().is_empty())?;
    let caps = DOCSTRING_RE.captures(first)?;
    let text = caps.get(1)?.as_str().trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn leading_comment(source: &str) -> Option<String> {
    let mut parts = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() && parts.is_empty() {
            continue;
        }
        let Some(body) = ["///", "//", "#"]
            .iter()
            .find_map(|marker| trimmed.strip_prefix(marker))
        else {
            break;
        };
        if body.starts_with('!') {
            // shebangs and inner attributes
            continue;
        }
        let body = body.trim();
        if body.is_empty() {
            break;
        }
        parts.push(body.to_string());
    }
    (!parts.is_empty()).then(|| parts.join(" "))
}
