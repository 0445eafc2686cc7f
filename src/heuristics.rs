// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pure string heuristics over forwarded text and outgoing prompts.
//!
//! Everything here is a replaceable string → string transform: question
//! extraction from a child's reply, rewriting orchestrator-relative paths
//! into workspace-relative ones, and bounded excerpt truncation. None of
//! these can fail; at worst they return their input unchanged.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Leading list markers stripped before inspecting a line.
static BULLET_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+").expect("valid bullet regex"));

/// Interrogative openers that mark a question even without a trailing `?`.
static INTERROGATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:should|shall|which|what|where|when|who|why|how|do|does|did|can|could|would|will|is|are)\b.{8,}")
        .expect("valid interrogative regex")
});

/// Extract the question lines from a child's reply, if any.
///
/// A line counts as a question when, after stripping list markers, it ends
/// with `?` or opens with an interrogative word and has some substance.
pub fn extract_questions(text: &str) -> Option<String> {
    let mut questions = Vec::new();
    for line in text.lines() {
        let stripped = BULLET_PREFIX.replace(line.trim(), "");
        let candidate = stripped.trim();
        if candidate.is_empty() {
            continue;
        }
        let is_question = candidate.ends_with('?')
            || (candidate.contains('?') && INTERROGATIVE.is_match(candidate));
        if is_question {
            questions.push(candidate.to_string());
        }
    }

    if questions.is_empty() {
        None
    } else {
        Some(questions.join("\n"))
    }
}

/// Outcome of a path rewrite, reported back to the tool caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRewrite {
    /// Number of path occurrences replaced.
    pub replaced: usize,
    /// Set when the rewrite was skipped or degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PathRewrite {
    /// A rewrite that was skipped for the given reason.
    pub fn skipped(note: impl Into<String>) -> Self {
        Self {
            replaced: 0,
            note: Some(note.into()),
        }
    }
}

/// Rewrite absolute references to the orchestrator directory into the
/// child's workspace directory.
///
/// Both a trailing-slash form and the bare directory are replaced, longest
/// first so the bare form never clips a longer path.
pub fn rewrite_paths(prompt: &str, from: &Path, to: &Path) -> (String, PathRewrite) {
    let from_str = from.to_string_lossy();
    let to_str = to.to_string_lossy();

    if from_str.is_empty() || from_str == to_str {
        return (prompt.to_string(), PathRewrite::default());
    }

    let from_slash = format!("{}/", from_str.trim_end_matches('/'));
    let to_slash = format!("{}/", to_str.trim_end_matches('/'));

    let mut replaced = prompt.matches(from_slash.as_str()).count();
    let mut rewritten = prompt.replace(from_slash.as_str(), &to_slash);

    let bare = from_str.trim_end_matches('/');
    let bare_hits = count_bare_occurrences(&rewritten, bare);
    if bare_hits > 0 {
        rewritten = replace_bare_occurrences(&rewritten, bare, to_str.trim_end_matches('/'));
        replaced += bare_hits;
    }

    (rewritten, PathRewrite { replaced, note: None })
}

/// Occurrences of `needle` not followed by a path character, so that
/// `/repo` does not match inside `/repo-archive`.
fn count_bare_occurrences(text: &str, needle: &str) -> usize {
    text.match_indices(needle)
        .filter(|(idx, _)| !continues_path(text, idx + needle.len()))
        .count()
}

fn replace_bare_occurrences(text: &str, needle: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find(needle) {
        let end = idx + needle.len();
        out.push_str(&rest[..idx]);
        if continues_path(rest, end) {
            out.push_str(needle);
        } else {
            out.push_str(replacement);
        }
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}

fn continues_path(text: &str, idx: usize) -> bool {
    matches!(
        text[idx..].chars().next(),
        Some(c) if c == '/' || c == '-' || c == '_' || c.is_alphanumeric()
    )
}

/// Truncate to at most `max` characters on a char boundary, appending
/// `...` when something was cut. Inputs are trimmed first.
///
/// When `max` leaves no room for the suffix (≤ 3), the text is cut hard.
pub fn truncate_excerpt(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_string();
    }
    if max <= 3 {
        return trimmed.chars().take(max).collect();
    }
    let head: String = trimmed.chars().take(max - 3).collect();
    format!("{}...", head.trim_end())
}
