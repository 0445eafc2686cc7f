// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Forwarding resolver.
//!
//! A prompt dispatched to a child carries a secret handshake: the child is
//! instructed to terminate its final reply with a dedicated token line. When
//! the child goes stably idle, the resolver scans its message history for the
//! assistant turn carrying that line and returns exactly that turn, ignoring
//! scratch output emitted between tool calls.
//!
//! The scan is deterministic: it starts at the trigger marker captured when
//! the prompt was sent, and among matching assistant messages the **last**
//! one in the list wins (a child may echo the token early and again in its
//! real conclusion).

use crate::host::RawMessage;
use crate::registry::PendingForwardRequest;

/// Prefix of the token line planted in outgoing prompts.
pub const FORWARD_TOKEN_PREFIX: &str = "opencode_cc_forward_token:";

/// The exact token line for `token`.
pub fn forward_token_line(token: &str) -> String {
    format!("{FORWARD_TOKEN_PREFIX} {token}")
}

/// Instruction block appended to an outgoing prompt so the child echoes the
/// token on its own final line.
pub fn token_instruction(token: &str) -> String {
    format!(
        "\n\nWhen you have fully completed the request above, end your final reply with this exact line, alone on its own line:\n\n{}\n",
        forward_token_line(token)
    )
}

/// A child message projected to what the resolver needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub role: String,
    pub id: String,
    pub text: String,
}

impl NormalizedMessage {
    pub fn is_assistant(&self) -> bool {
        self.role == "assistant"
    }
}

/// The assistant turn that satisfies a pending forward request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardableAssistantMessage {
    pub assistant_message_id: String,
    /// Message text with the token line removed.
    pub cleaned_text: String,
}

/// Snapshot of "where are we now" in a child's message list, captured at
/// prompt time so the later scan skips everything that already existed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerMarker {
    pub after_message_count: Option<usize>,
    pub after_assistant_message_id: Option<String>,
}

/// Project raw host messages; messages without an id are discarded.
pub fn normalize_messages(raw: &[RawMessage]) -> Vec<NormalizedMessage> {
    raw.iter()
        .filter_map(|message| {
            let id = message.info.id.as_deref()?.trim();
            if id.is_empty() {
                return None;
            }
            Some(NormalizedMessage {
                role: message.info.role.clone(),
                id: id.to_string(),
                text: extract_text(message),
            })
        })
        .collect()
}

/// Concatenate the text of non-ignored `text` parts with newlines.
fn extract_text(message: &RawMessage) -> String {
    message
        .parts
        .iter()
        .filter(|part| part.kind == "text" && part.ignored != Some(true))
        .filter_map(|part| part.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether `text` contains the exact token line for `token` on its own line.
pub fn contains_token_line(text: &str, token: &str) -> bool {
    let line = forward_token_line(token);
    text.lines().any(|l| l.trim() == line)
}

/// Remove lines that match the exact token line after trimming. Partial
/// matches on a line are preserved.
pub fn strip_token_lines(text: &str, token: &str) -> String {
    let line = forward_token_line(token);
    text.lines()
        .filter(|l| l.trim() != line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Capture a trigger marker over the current message list.
pub fn create_trigger_marker(messages: &[NormalizedMessage]) -> TriggerMarker {
    TriggerMarker {
        after_message_count: Some(messages.len()),
        after_assistant_message_id: messages
            .iter()
            .rev()
            .find(|m| m.is_assistant())
            .map(|m| m.id.clone()),
    }
}

/// Pick the assistant turn that fulfils `request`, if any.
///
/// Returns the last assistant message at or after the request's anchor whose
/// text contains the token line and is non-empty once the line is stripped.
pub fn resolve(
    messages: &[NormalizedMessage],
    request: &PendingForwardRequest,
) -> Option<ForwardableAssistantMessage> {
    let start = start_index(messages, request);
    let mut found = None;

    for message in messages.iter().skip(start) {
        if !message.is_assistant() {
            continue;
        }
        if !contains_token_line(&message.text, &request.forward_token) {
            continue;
        }
        let cleaned = strip_token_lines(&message.text, &request.forward_token);
        if cleaned.trim().is_empty() {
            continue;
        }
        // Keep scanning: the last matching message wins.
        found = Some(ForwardableAssistantMessage {
            assistant_message_id: message.id.clone(),
            cleaned_text: cleaned,
        });
    }

    found
}

fn start_index(messages: &[NormalizedMessage], request: &PendingForwardRequest) -> usize {
    if let Some(count) = request.after_message_count {
        if count <= messages.len() {
            return count;
        }
    }
    if let Some(anchor) = &request.after_assistant_message_id {
        if let Some(position) = messages.iter().position(|m| &m.id == anchor) {
            return position + 1;
        }
    }
    0
}
