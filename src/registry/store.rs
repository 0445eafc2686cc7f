// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File-backed registry store.
//!
//! Every operation re-reads the document, mutates it in memory, and writes it
//! back through a temp file + atomic rename. There is no in-memory cache:
//! the file is the single source of truth, which is what makes crash
//! recovery trivial (reconstructing the store is just re-opening the path).
//!
//! Durability is best-effort: read failures yield an empty store, write
//! failures are logged and swallowed. Callers must not treat a successful
//! mutation as confirmation of disk persistence; every subsequent host event
//! re-derives state.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config;

use super::legacy;
use super::record::{
    ChildMetadata, ChildRecord, ChildRegistration, PendingForwardRequest, RegistryDocument,
    REGISTRY_VERSION,
};

/// Reasons a registration is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("orchestrator session id is empty")]
    EmptyOrchestrator,

    #[error("session {0} is itself a tracked child; nested orchestration is not allowed")]
    NestedOrchestrator(String),
}

/// Durable registry of child sessions, keyed by child session ID.
pub struct SessionRegistry {
    path: PathBuf,
}

impl SessionRegistry {
    /// Registry at an explicit file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Registry at the canonical location under `repo_root`.
    pub fn for_root(repo_root: &Path) -> Self {
        Self::new(config::registry_path(repo_root))
    }

    /// The canonical file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ------------------------------------------------------------------
    // Document IO
    // ------------------------------------------------------------------

    fn read_document(&self) -> RegistryDocument {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                debug!("registry read failed ({}), starting empty", err);
                return RegistryDocument::default();
            }
        };

        let mut doc: RegistryDocument = match serde_json::from_str(&text) {
            Ok(doc) => doc,
            Err(err) => {
                warn!("registry parse failed ({}), starting empty", err);
                return RegistryDocument::default();
            }
        };

        if doc.version == 0 || doc.version > REGISTRY_VERSION {
            warn!(
                "unknown registry version {}, starting empty",
                doc.version
            );
            return RegistryDocument::default();
        }

        normalize(&mut doc);
        doc
    }

    fn load(&self) -> RegistryDocument {
        let mut doc = self.read_document();

        // One-shot legacy migration: fold the sibling per-child directory
        // into the document, then rename it aside so it never re-runs.
        if let Some(parent) = self.path.parent() {
            let legacy_dir = parent.join(config::LEGACY_REGISTRY_DIR);
            if legacy_dir.is_dir() && legacy::fold_legacy_dir(&legacy_dir, &mut doc) {
                self.write_document(&doc);
            }
        }

        doc
    }

    /// Serialize to a temp file named with pid + timestamp, then rename over
    /// the canonical path. Rename atomicity is the consistency contract.
    fn write_document(&self, doc: &RegistryDocument) {
        let Some(parent) = self.path.parent() else {
            warn!("registry path {:?} has no parent, skipping write", self.path);
            return;
        };
        if let Err(err) = fs::create_dir_all(parent) {
            warn!("registry directory create failed: {}", err);
            return;
        }

        let tmp = parent.join(format!(
            "{}.{}.{}.tmp",
            config::REGISTRY_FILE,
            std::process::id(),
            chrono::Utc::now().timestamp_millis(),
        ));

        let json = match serde_json::to_string_pretty(doc) {
            Ok(json) => json,
            Err(err) => {
                warn!("registry serialize failed: {}", err);
                return;
            }
        };

        if let Err(err) = fs::write(&tmp, json) {
            warn!("registry temp write failed: {}", err);
            let _ = fs::remove_file(&tmp);
            return;
        }
        if let Err(err) = fs::rename(&tmp, &self.path) {
            warn!("registry rename failed: {}", err);
            let _ = fs::remove_file(&tmp);
        }
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut RegistryDocument) -> R) -> R {
        let mut doc = self.load();
        let out = f(&mut doc);
        self.write_document(&doc);
        out
    }

    /// Apply `f` to the record for `child_id`; no-op when unregistered.
    fn with_record<R>(&self, child_id: &str, f: impl FnOnce(&mut ChildRecord) -> R) -> Option<R> {
        self.mutate(|doc| doc.sessions.get_mut(child_id).map(f))
    }

    fn read_record<R>(&self, child_id: &str, f: impl FnOnce(&ChildRecord) -> R) -> Option<R> {
        self.load().sessions.get(child_id).map(f)
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a child, idempotently by key.
    ///
    /// Re-registration preserves `createdAt`, tracking, the pending queue,
    /// and any previously assigned workspace directory. Refused when the
    /// orchestrator ID is empty or is itself a tracked child.
    pub fn register(&self, registration: ChildRegistration) -> Result<(), RegisterError> {
        if registration.orchestrator_session_id.trim().is_empty() {
            return Err(RegisterError::EmptyOrchestrator);
        }
        if registration.child_session_id.trim().is_empty() {
            return Err(RegisterError::EmptyOrchestrator);
        }

        self.mutate(|doc| {
            if doc
                .sessions
                .contains_key(&registration.orchestrator_session_id)
            {
                return Err(RegisterError::NestedOrchestrator(
                    registration.orchestrator_session_id.clone(),
                ));
            }

            let key = registration.child_session_id.clone();
            match doc.sessions.get_mut(&key) {
                Some(existing) => {
                    let created_at = existing.registration.created_at;
                    let (workspace_directory, workspace_branch) =
                        if existing.registration.workspace_directory.is_some() {
                            // Workspace directory is immutable once assigned.
                            (
                                existing.registration.workspace_directory.clone(),
                                existing.registration.workspace_branch.clone(),
                            )
                        } else {
                            (
                                registration.workspace_directory.clone(),
                                registration.workspace_branch.clone(),
                            )
                        };
                    existing.registration = ChildRegistration {
                        created_at,
                        workspace_directory,
                        workspace_branch,
                        ..registration
                    };
                }
                None => {
                    doc.sessions.insert(key, ChildRecord::new(registration));
                }
            }
            Ok(())
        })
    }

    /// Children of `orchestrator_id`, ascending by `createdAt`.
    pub fn list(&self, orchestrator_id: &str) -> Vec<ChildMetadata> {
        let doc = self.load();
        let mut children: Vec<ChildMetadata> = doc
            .sessions
            .values()
            .filter(|r| r.registration.orchestrator_session_id == orchestrator_id)
            .map(ChildRecord::metadata)
            .collect();
        children.sort_by_key(|c| c.created_at);
        children
    }

    /// Full record snapshot.
    pub fn get(&self, child_id: &str) -> Option<ChildRecord> {
        self.load().sessions.get(child_id).cloned()
    }

    // ------------------------------------------------------------------
    // State transitions
    // ------------------------------------------------------------------

    pub fn mark_prompt_sent(&self, child_id: &str, at: i64, agent: Option<&str>) {
        self.with_record(child_id, |record| {
            record.tracking.state = super::ChildState::PromptSent;
            record.tracking.last_prompt_at = Some(at);
            record.tracking.last_prompt_agent = agent.map(str::to_string);
        });
    }

    pub fn mark_result_received(&self, child_id: &str, at: i64, excerpt: Option<&str>) {
        self.with_record(child_id, |record| {
            record.tracking.state = super::ChildState::ResultReceived;
            record.tracking.last_result_at = Some(at);
            if let Some(excerpt) = excerpt {
                record.tracking.last_assistant_message_at = Some(at);
                record.tracking.last_assistant_message_excerpt = Some(excerpt.to_string());
            }
        });
    }

    pub fn mark_error(&self, child_id: &str, at: i64, excerpt: Option<&str>) {
        self.with_record(child_id, |record| {
            record.tracking.state = super::ChildState::Error;
            record.tracking.last_error_at = Some(at);
            if let Some(excerpt) = excerpt {
                record.tracking.last_assistant_message_excerpt = Some(excerpt.to_string());
            }
        });
    }

    /// Record an assistant message observation without a state transition.
    pub fn record_observed_assistant_message(&self, child_id: &str, at: i64, excerpt: Option<&str>) {
        self.with_record(child_id, |record| {
            record.tracking.last_assistant_message_at = Some(at);
            if let Some(excerpt) = excerpt {
                record.tracking.last_assistant_message_excerpt = Some(excerpt.to_string());
            }
        });
    }

    // ------------------------------------------------------------------
    // Pending forward queue (FIFO)
    // ------------------------------------------------------------------

    /// Append a request; duplicate tokens are ignored.
    pub fn enqueue_pending_forward(&self, child_id: &str, request: PendingForwardRequest) {
        self.with_record(child_id, |record| {
            let duplicate = record
                .pending_forward_requests
                .iter()
                .any(|r| r.forward_token == request.forward_token);
            if !duplicate {
                record.pending_forward_requests.push(request);
            }
        });
    }

    /// Oldest pending request, without consuming it.
    pub fn peek_pending_forward(&self, child_id: &str) -> Option<PendingForwardRequest> {
        self.read_record(child_id, |record| record.pending_forward_requests.first().cloned())
            .flatten()
    }

    /// Consume and return the oldest pending request.
    pub fn shift_pending_forward(&self, child_id: &str) -> Option<PendingForwardRequest> {
        self.with_record(child_id, |record| {
            if record.pending_forward_requests.is_empty() {
                None
            } else {
                Some(record.pending_forward_requests.remove(0))
            }
        })
        .flatten()
    }

    /// Remove the request with `token`; returns whether one was removed.
    pub fn remove_pending_forward(&self, child_id: &str, token: &str) -> bool {
        self.with_record(child_id, |record| {
            let before = record.pending_forward_requests.len();
            record
                .pending_forward_requests
                .retain(|r| r.forward_token != token);
            record.pending_forward_requests.len() != before
        })
        .unwrap_or(false)
    }

    pub fn has_pending_forward(&self, child_id: &str) -> bool {
        self.read_record(child_id, |record| !record.pending_forward_requests.is_empty())
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Delivery bookkeeping
    // ------------------------------------------------------------------

    /// Idempotent write of the delivery idempotency key.
    pub fn set_last_delivered_assistant_message_id(&self, child_id: &str, message_id: &str) {
        self.with_record(child_id, |record| {
            if record.last_delivered_assistant_message_id.as_deref() != Some(message_id) {
                record.last_delivered_assistant_message_id = Some(message_id.to_string());
            }
        });
    }

    pub fn last_delivered_assistant_message_id(&self, child_id: &str) -> Option<String> {
        self.read_record(child_id, |record| {
            record.last_delivered_assistant_message_id.clone()
        })
        .flatten()
    }

    /// Max over `createdAt` and every tracking timestamp.
    pub fn compute_last_activity_at(&self, child_id: &str) -> Option<i64> {
        self.read_record(child_id, ChildRecord::last_activity_at)
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn orchestrator_session_id(&self, child_id: &str) -> Option<String> {
        self.read_record(child_id, |record| {
            record.registration.orchestrator_session_id.clone()
        })
    }

    pub fn orchestrator_directory(&self, child_id: &str) -> Option<PathBuf> {
        self.read_record(child_id, |record| {
            record.registration.orchestrator_directory.clone()
        })
        .flatten()
    }

    pub fn child_workspace_directory(&self, child_id: &str) -> Option<PathBuf> {
        self.read_record(child_id, |record| {
            record.registration.workspace_directory.clone()
        })
        .flatten()
    }

    pub fn last_prompt_agent(&self, child_id: &str) -> Option<String> {
        self.read_record(child_id, |record| record.tracking.last_prompt_agent.clone())
            .flatten()
    }

    pub fn is_tracked_child_session(&self, session_id: &str) -> bool {
        self.load().sessions.contains_key(session_id)
    }

    /// A nested orchestrator is simply a session that is itself a tracked
    /// child.
    pub fn is_nested_orchestrator(&self, session_id: &str) -> bool {
        self.is_tracked_child_session(session_id)
    }
}

/// Fill defaults, drop malformed records, and de-duplicate queue tokens.
fn normalize(doc: &mut RegistryDocument) {
    doc.version = REGISTRY_VERSION;
    doc.sessions.retain(|key, record| {
        !key.trim().is_empty()
            && !record
                .registration
                .orchestrator_session_id
                .trim()
                .is_empty()
    });
    for (key, record) in doc.sessions.iter_mut() {
        record.version = REGISTRY_VERSION;
        if record.registration.child_session_id != *key {
            record.registration.child_session_id = key.clone();
        }
        let mut seen = std::collections::HashSet::new();
        record
            .pending_forward_requests
            .retain(|r| !r.forward_token.is_empty() && seen.insert(r.forward_token.clone()));
    }
}
