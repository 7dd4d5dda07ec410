//! Input sanitization (8.a).
//!
//! Rejects queries containing dangerous-instruction, SQL-injection, or
//! role-change patterns outright; otherwise truncates, restricts the
//! character class, collapses whitespace, and HTML-escapes what's left,
//! in that order — matching the original validator's
//! restrict-then-escape sequence, so the allowed character class is
//! always evaluated against raw input, never against an already-escaped
//! string.

use regex::Regex;
use std::sync::LazyLock;
use unicode_segmentation::UnicodeSegmentation;

/// Prompt-injection / dangerous-instruction substrings, checked
/// case-insensitively.
const DANGEROUS_PATTERNS: &[&str] = &[
    "ignore previous instructions",
    "ignora las instrucciones anteriores",
    "olvidar instrucciones anteriores",
    "system prompt",
    "actúa como",
    "actua como",
    "forget all",
    "nuevo rol",
    "reveal system",
    "show config",
    "muéstrame la configuración",
    "muestrame la configuracion",
];

/// SQL-injection substrings, checked case-insensitively.
const SQL_INJECTION_PATTERNS: &[&str] = &[
    "union", "select", "drop", "insert", "update", "delete", "--", "/*", "*/", "xp_", "sp_",
    "@@", "char(", "nchar(", "sysobjects", "syscolumns",
];

/// Role-change substrings, checked case-insensitively.
const ROLE_CHANGE_PATTERNS: &[&str] = &["ahora eres", "olvida todo", "desde ahora eres", "tu nuevo rol es"];

#[allow(clippy::unwrap_used)]
static DISALLOWED_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s\-.,?¿!¡áéíóúÁÉÍÓÚñÑ]").unwrap());

#[allow(clippy::unwrap_used)]
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Why sanitization rejected a query outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Matched a dangerous-instruction / prompt-injection pattern.
    DangerousInstruction,
    /// Matched a SQL-injection pattern.
    SqlInjection,
    /// Matched a role-change pattern.
    RoleChange,
}

/// Sanitizes `raw_query`, truncating and restricting it, or rejecting it
/// outright if it matches a blocked pattern.
///
/// # Errors
///
/// Returns the matched [`RejectReason`] if the query must be rejected
/// rather than transformed.
pub fn sanitize(raw_query: &str, max_len: usize) -> Result<String, RejectReason> {
    let lower = raw_query.to_lowercase();
    if DANGEROUS_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Err(RejectReason::DangerousInstruction);
    }
    if SQL_INJECTION_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Err(RejectReason::SqlInjection);
    }
    if ROLE_CHANGE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Err(RejectReason::RoleChange);
    }

    let truncated = truncate_chars(raw_query, max_len);
    let restricted = DISALLOWED_CHARS.replace_all(&truncated, "");
    let collapsed = WHITESPACE.replace_all(&restricted, " ");
    let escaped = html_escape(collapsed.trim());
    Ok(escaped)
}

/// Truncates to `max_len` grapheme clusters, not Unicode scalar values, so
/// a combining accent is never split from the base letter it modifies.
fn truncate_chars(s: &str, max_len: usize) -> String {
    s.graphemes(true).take(max_len).collect()
}

fn html_escape(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#x27;".to_string(),
            other => other.to_string(),
        })
        .collect()
}
