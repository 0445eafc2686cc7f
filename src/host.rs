// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Host runtime boundary.
//!
//! The supervisor is embedded in a host assistant runtime and never talks to
//! an LLM itself. Everything it needs from the host is expressed as the
//! [`HostClient`] capability set plus the [`HostEvent`] stream; any transport
//! satisfying those shapes works, and tests substitute an in-memory fake.
//!
//! # Capability set
//!
//! - `create_session` / `prompt_async` / `post_synthetic` — child lifecycle
//!   and message injection.
//! - `session_status` / `session_messages` — polling the child's activity
//!   and transcript.
//! - `create_worktree` / `remove_worktree` — version-control isolation.
//! - `list_agents` — optional; hosts without it report
//!   [`HostError::Unsupported`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HostError;

// ============================================================================
// Cooperative cancellation
// ============================================================================

/// Cooperative abort flag handed into tool calls by the host.
///
/// Cloning shares the underlying flag. Operations that loop or retry check it
/// between steps; nothing is forcibly interrupted.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    /// Create a fresh, un-aborted signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Session wire types
// ============================================================================

/// Request to create a child session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Orchestrator session the child belongs to.
    #[serde(rename = "parentID", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub title: String,
    /// Directory the child session runs in.
    pub directory: PathBuf,
}

/// Host response to a session create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedSession {
    pub id: String,
    pub title: String,
}

/// One text part of an outgoing prompt or synthetic message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    /// Set on supervisor-authored messages posted into the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthetic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl TextPart {
    /// Plain text part for an outgoing prompt.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
            synthetic: None,
            metadata: None,
        }
    }

    /// Synthetic part carrying supervisor metadata.
    pub fn synthetic(text: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
            synthetic: Some(true),
            metadata: Some(metadata),
        }
    }
}

/// Prompt dispatched to a session, either asynchronously (child work) or
/// synchronously (synthetic orchestrator messages).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub parts: Vec<TextPart>,
}

/// Whether a session is currently working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Busy,
    Idle,
}

/// Per-session activity entry from `session.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionActivity {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
}

impl SessionActivity {
    pub fn busy() -> Self {
        Self {
            kind: ActivityKind::Busy,
        }
    }

    pub fn idle() -> Self {
        Self {
            kind: ActivityKind::Idle,
        }
    }
}

/// Identity of a raw transcript message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInfo {
    pub role: String,
    #[serde(default)]
    pub id: Option<String>,
}

/// One part of a raw transcript message. Non-text parts keep their `type`
/// but carry no text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignored: Option<bool>,
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            ignored: None,
        }
    }
}

/// Raw message as the host reports it: `{info: {role, id}, parts: […]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub info: MessageInfo,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl RawMessage {
    /// Convenience constructor for a single-text-part message.
    pub fn new(role: impl Into<String>, id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            info: MessageInfo {
                role: role.into(),
                id: Some(id.into()),
            },
            parts: vec![MessagePart::text(text)],
        }
    }
}

/// Result of a worktree creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedWorktree {
    pub name: String,
    pub branch: String,
    pub directory: PathBuf,
}

/// Agent descriptor from the optional `app.agents` capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
}

// ============================================================================
// Permission wire types
// ============================================================================

/// Permission request as carried on `permission.updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(rename = "type")]
    pub permission_type: String,
    /// String, array of strings, or absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// ============================================================================
// Event stream
// ============================================================================

/// Events streamed by the host, `{type, properties}` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "properties")]
pub enum HostEvent {
    /// A session went quiet; debounce trigger.
    #[serde(rename = "session.idle")]
    SessionIdle {
        #[serde(rename = "sessionID")]
        session_id: String,
    },

    /// Activity change; `busy` cancels any pending debounce.
    #[serde(rename = "session.status")]
    SessionStatus {
        #[serde(rename = "sessionID")]
        session_id: String,
        status: SessionActivity,
    },

    /// A session failed; routed through the error path immediately.
    #[serde(rename = "session.error")]
    SessionError {
        #[serde(rename = "sessionID")]
        session_id: String,
        error: serde_json::Value,
    },

    /// A permission request was raised somewhere in the session tree.
    #[serde(rename = "permission.updated")]
    PermissionUpdated(PermissionRecord),

    /// The user answered a permission request.
    #[serde(rename = "permission.replied")]
    PermissionReplied {
        #[serde(rename = "permissionID")]
        permission_id: String,
        response: String,
    },
}

// ============================================================================
// Capability set
// ============================================================================

/// The host session client the supervisor is polymorphic over.
#[async_trait]
pub trait HostClient: Send + Sync {
    /// Create a child session running in `directory`.
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CreatedSession, HostError>;

    /// Dispatch a prompt without waiting for the reply.
    async fn prompt_async(&self, request: PromptRequest) -> Result<(), HostError>;

    /// Synchronously post a synthetic message into a session.
    async fn post_synthetic(&self, request: PromptRequest) -> Result<(), HostError>;

    /// Current busy/idle state of every session under `directory`.
    async fn session_status(
        &self,
        directory: &Path,
    ) -> Result<HashMap<String, SessionActivity>, HostError>;

    /// Full message list for a session.
    async fn session_messages(
        &self,
        session_id: &str,
        directory: &Path,
    ) -> Result<Vec<RawMessage>, HostError>;

    /// Create a worktree named `name` under the repository at `directory`.
    async fn create_worktree(
        &self,
        directory: &Path,
        name: &str,
    ) -> Result<CreatedWorktree, HostError>;

    /// Remove the worktree at `directory`; `Ok(false)` means the host did
    /// not know about it.
    async fn remove_worktree(&self, directory: &Path) -> Result<bool, HostError>;

    /// Optional capability: list the agents configured for `directory`.
    async fn list_agents(&self, _directory: &Path) -> Result<Vec<AgentInfo>, HostError> {
        Err(HostError::Unsupported("app.agents"))
    }
}

/// Shared host client handle.
pub type SharedHost = Arc<dyn HostClient>;
