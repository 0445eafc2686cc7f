// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persisted record types for the child-session registry.
//!
//! Field names on disk follow the host's wire spelling (`childSessionID`,
//! `afterAssistantMessageID`, …), so identifiers carrying `ID` get explicit
//! renames on top of the camelCase container attribute.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Current schema version of the registry document.
pub const REGISTRY_VERSION: u32 = 2;

// ============================================================================
// Child state machine
// ============================================================================

/// Lifecycle state of a child session.
///
/// Transitions: `created → prompt_sent → {result_received | error}`, and any
/// of the latter three re-enter `prompt_sent` on a new prompt. `error` is not
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildState {
    Created,
    PromptSent,
    ResultReceived,
    Error,
}

impl Default for ChildState {
    fn default() -> Self {
        Self::Created
    }
}

impl ChildState {
    /// Monotonic rank used to refuse state downgrades on re-registration.
    pub fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::PromptSent => 1,
            Self::ResultReceived | Self::Error => 2,
        }
    }

    /// A done child has produced a result or an error.
    pub fn is_done(self) -> bool {
        matches!(self, Self::ResultReceived | Self::Error)
    }
}

/// Derived progress of a child; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildProgress {
    /// Result or error received.
    Done,
    /// Not done, and the host reports the child busy.
    Running,
    /// Not done and not busy; waiting on the child to start or finish.
    Pending,
}

// ============================================================================
// Registration and tracking
// ============================================================================

/// Immutable-ish identity of a child session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildRegistration {
    /// Primary key, unique per process lifetime.
    #[serde(rename = "childSessionID")]
    pub child_session_id: String,
    /// Owning orchestrator; never empty for a registered record.
    #[serde(rename = "orchestratorSessionID")]
    pub orchestrator_session_id: String,
    /// Where the orchestrator runs; routes forwarded replies.
    #[serde(default)]
    pub orchestrator_directory: Option<PathBuf>,
    #[serde(default)]
    pub title: String,
    /// Milliseconds since epoch.
    pub created_at: i64,
    /// Isolated workspace, or `None` in fallback mode. Immutable once set.
    #[serde(default)]
    pub workspace_directory: Option<PathBuf>,
    #[serde(default)]
    pub workspace_branch: Option<String>,
}

/// Mutable per-child tracking updated by the supervisor on every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildTracking {
    #[serde(default)]
    pub last_prompt_at: Option<i64>,
    #[serde(default)]
    pub last_prompt_agent: Option<String>,
    #[serde(default)]
    pub last_result_at: Option<i64>,
    #[serde(default)]
    pub last_error_at: Option<i64>,
    #[serde(default)]
    pub last_assistant_message_at: Option<i64>,
    #[serde(default)]
    pub last_assistant_message_excerpt: Option<String>,
    #[serde(default)]
    pub state: ChildState,
}

// ============================================================================
// Pending forward queue
// ============================================================================

/// One outstanding "the orchestrator awaits a reply" obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingForwardRequest {
    /// Opaque, unique, non-empty correlation token.
    pub forward_token: String,
    pub created_at: i64,
    /// Scan starts at or after this index in the child's message list.
    #[serde(default)]
    pub after_message_count: Option<usize>,
    /// Fallback anchor when the index is unknown.
    #[serde(default, rename = "afterAssistantMessageID")]
    pub after_assistant_message_id: Option<String>,
}

// ============================================================================
// Record and document
// ============================================================================

/// The durable unit: everything the supervisor knows about one child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildRecord {
    #[serde(default = "default_version")]
    pub version: u32,
    pub registration: ChildRegistration,
    #[serde(default)]
    pub tracking: ChildTracking,
    /// Idempotency key for forwarding; compared for equality, never reset.
    #[serde(default, rename = "lastDeliveredAssistantMessageID")]
    pub last_delivered_assistant_message_id: Option<String>,
    /// FIFO; tokens within are unique.
    #[serde(default)]
    pub pending_forward_requests: Vec<PendingForwardRequest>,
}

fn default_version() -> u32 {
    REGISTRY_VERSION
}

impl ChildRecord {
    /// Fresh record for a newly registered child.
    pub fn new(registration: ChildRegistration) -> Self {
        Self {
            version: REGISTRY_VERSION,
            registration,
            tracking: ChildTracking::default(),
            last_delivered_assistant_message_id: None,
            pending_forward_requests: Vec::new(),
        }
    }

    /// Max over `createdAt` and every tracking timestamp.
    pub fn last_activity_at(&self) -> i64 {
        let t = &self.tracking;
        [
            Some(self.registration.created_at),
            t.last_prompt_at,
            t.last_result_at,
            t.last_error_at,
            t.last_assistant_message_at,
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(self.registration.created_at)
    }

    /// Derive progress given whether the host currently reports the child
    /// busy.
    pub fn progress(&self, busy: bool) -> ChildProgress {
        if self.tracking.state.is_done() {
            ChildProgress::Done
        } else if busy {
            ChildProgress::Running
        } else {
            ChildProgress::Pending
        }
    }

    /// Summary row for `session_list`.
    pub fn metadata(&self) -> ChildMetadata {
        ChildMetadata {
            child_session_id: self.registration.child_session_id.clone(),
            title: self.registration.title.clone(),
            created_at: self.registration.created_at,
            state: self.tracking.state,
            last_activity_at: self.last_activity_at(),
            workspace_directory: self.registration.workspace_directory.clone(),
            workspace_branch: self.registration.workspace_branch.clone(),
        }
    }
}

/// Per-child summary returned by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildMetadata {
    #[serde(rename = "childSessionID")]
    pub child_session_id: String,
    pub title: String,
    pub created_at: i64,
    pub state: ChildState,
    pub last_activity_at: i64,
    #[serde(default)]
    pub workspace_directory: Option<PathBuf>,
    #[serde(default)]
    pub workspace_branch: Option<String>,
}

/// The whole persisted document: `{version, sessions}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub version: u32,
    #[serde(default)]
    pub sessions: BTreeMap<String, ChildRecord>,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            sessions: BTreeMap::new(),
        }
    }
}
