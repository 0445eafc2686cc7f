// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Child session supervisor.
//!
//! The central controller: it owns the registry, the debouncer, the
//! permission cache, and the workspace provisioner, and it is the only
//! component that talks to the host client. The tool surface calls into it
//! for `create`/`prompt`/`status`/`list`; the host event stream drives the
//! idle and error paths.
//!
//! # Delivery contract
//!
//! Every successful prompt enqueues exactly one pending forward request;
//! every forwarded reply or error delivery consumes exactly one; a failed
//! prompt removes its own request by token. For a given child, deliveries
//! reach the orchestrator in prompt order. The
//! `lastDeliveredAssistantMessageID` guard makes delivery at-most-once even
//! when stable-idle fires race.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{self, SupervisorConfig};
use crate::debounce::IdleDebouncer;
use crate::error::SupervisorError;
use crate::forward::{self, TriggerMarker};
use crate::heuristics::{self, PathRewrite};
use crate::host::{
    AbortSignal, ActivityKind, CreateSessionRequest, HostEvent, PermissionRecord, PromptRequest,
    SharedHost, TextPart,
};
use crate::permission::{self, PermissionCache, PermissionDecision};
use crate::registry::{
    ChildMetadata, ChildProgress, ChildState, PendingForwardRequest, RegisterError,
    SessionRegistry,
};
use crate::workspace::{ProvisionedWorkspace, WorkspaceProvisioner};

/// Identity of the session invoking a tool.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub session_id: String,
    pub directory: PathBuf,
}

/// Result of `create_child`.
#[derive(Debug, Clone)]
pub struct CreatedChild {
    pub session_id: String,
    pub title: String,
    pub workspace: ProvisionedWorkspace,
}

/// Result of `prompt_child`.
#[derive(Debug, Clone)]
pub struct PromptReceipt {
    pub child_session_id: String,
    pub agent: Option<String>,
    pub forward_token: String,
    pub path_rewrite: PathRewrite,
}

/// Snapshot returned by `child_status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildStatusSnapshot {
    #[serde(rename = "childSessionID")]
    pub child_session_id: String,
    pub state: ChildState,
    pub progress: ChildProgress,
    pub status_type: ActivityKind,
    pub created_at: i64,
    pub last_prompt_at: Option<i64>,
    pub last_result_at: Option<i64>,
    pub last_error_at: Option<i64>,
    pub last_assistant_message_at: Option<i64>,
    pub last_activity_at: i64,
    pub excerpt: Option<String>,
    pub workspace_directory: Option<PathBuf>,
    pub workspace_branch: Option<String>,
}

/// The orchestrator supervisor. One instance serves one host process.
pub struct Supervisor {
    registry: Arc<SessionRegistry>,
    host: SharedHost,
    debouncer: IdleDebouncer,
    permissions: PermissionCache,
    provisioner: WorkspaceProvisioner,
    config: SupervisorConfig,
    /// Back-reference handed to debounce timers so their fire callbacks can
    /// re-enter the supervisor.
    self_ref: Weak<Supervisor>,
}

impl Supervisor {
    /// Supervisor with the registry at its canonical path under the
    /// configured repository root.
    pub fn new(host: SharedHost, config: SupervisorConfig) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::for_root(&config.repo_root));
        Self::with_registry(host, registry, config)
    }

    /// Supervisor over an explicit registry (tests point this at a temp
    /// file).
    pub fn with_registry(
        host: SharedHost,
        registry: Arc<SessionRegistry>,
        config: SupervisorConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            provisioner: WorkspaceProvisioner::new(Arc::clone(&host), &config.repo_root),
            debouncer: IdleDebouncer::new(config.debounce),
            permissions: PermissionCache::new(),
            registry,
            host,
            config,
            self_ref: self_ref.clone(),
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Tool-facing operations
    // ------------------------------------------------------------------

    /// Provision a workspace and create a child session in it.
    pub async fn create_child(
        &self,
        caller: &CallerContext,
        title: &str,
        abort: &AbortSignal,
    ) -> Result<CreatedChild, SupervisorError> {
        if self.registry.is_nested_orchestrator(&caller.session_id) {
            return Err(SupervisorError::NestedOrchestrator(caller.session_id.clone()));
        }

        // The child session does not exist yet; the workspace name is
        // seeded from the orchestrator's session instead.
        let workspace = self
            .provisioner
            .provision(&caller.session_id, title, &caller.directory, abort)
            .await;

        let created = match self
            .host
            .create_session(CreateSessionRequest {
                parent_id: Some(caller.session_id.clone()),
                title: title.to_string(),
                directory: workspace.directory.clone(),
            })
            .await
        {
            Ok(created) => created,
            Err(err) => {
                if workspace.is_isolated() {
                    self.provisioner.cleanup(&workspace).await;
                }
                return Err(err.into());
            }
        };

        let registration = crate::registry::ChildRegistration {
            child_session_id: created.id.clone(),
            orchestrator_session_id: caller.session_id.clone(),
            orchestrator_directory: Some(caller.directory.clone()),
            title: created.title.clone(),
            created_at: now_ms(),
            workspace_directory: workspace
                .is_isolated()
                .then(|| workspace.directory.clone()),
            workspace_branch: workspace.branch.clone(),
        };
        self.register(registration)?;

        info!(
            "created child {} for {} in {:?}",
            created.id, caller.session_id, workspace.directory
        );
        Ok(CreatedChild {
            session_id: created.id,
            title: created.title,
            workspace,
        })
    }

    fn register(
        &self,
        registration: crate::registry::ChildRegistration,
    ) -> Result<(), SupervisorError> {
        self.registry.register(registration).map_err(|err| match err {
            RegisterError::EmptyOrchestrator => {
                SupervisorError::MissingMetadata("orchestrator session id".to_string())
            }
            RegisterError::NestedOrchestrator(id) => SupervisorError::NestedOrchestrator(id),
        })
    }

    /// Dispatch a prompt to a child, planting a forward token so the reply
    /// can be correlated later.
    pub async fn prompt_child(
        &self,
        caller: &CallerContext,
        child_id: &str,
        prompt: &str,
        agent: Option<String>,
    ) -> Result<PromptReceipt, SupervisorError> {
        if self.registry.is_nested_orchestrator(&caller.session_id) {
            return Err(SupervisorError::NestedOrchestrator(caller.session_id.clone()));
        }
        let record = self
            .registry
            .get(child_id)
            .ok_or_else(|| SupervisorError::UnknownChild(child_id.to_string()))?;
        if record.registration.orchestrator_session_id != caller.session_id {
            return Err(SupervisorError::NotOwnedByCaller {
                child: child_id.to_string(),
                caller: caller.session_id.clone(),
            });
        }

        // Best-effort path rewrite from orchestrator-relative to
        // workspace-relative; a skipped rewrite is a note, never an abort.
        let (rewritten, path_rewrite) = match (
            record.registration.orchestrator_directory.as_deref(),
            record.registration.workspace_directory.as_deref(),
        ) {
            (Some(from), Some(to)) => heuristics::rewrite_paths(prompt, from, to),
            (None, Some(_)) => (
                prompt.to_string(),
                PathRewrite::skipped("orchestrator directory unknown"),
            ),
            _ => (prompt.to_string(), PathRewrite::default()),
        };

        let child_dir = self.message_directory(child_id);

        // Snapshot "where are we now" so the scan skips existing messages.
        let marker = match self.host.session_messages(child_id, &child_dir).await {
            Ok(raw) => forward::create_trigger_marker(&forward::normalize_messages(&raw)),
            Err(err) => {
                debug!("trigger marker capture failed for {}: {}", child_id, err);
                TriggerMarker::default()
            }
        };

        if let Some(agent_name) = agent.as_deref() {
            self.check_agent_exists(agent_name, &child_dir).await;
        }

        let forward_token = Uuid::new_v4().to_string();
        self.registry.enqueue_pending_forward(
            child_id,
            PendingForwardRequest {
                forward_token: forward_token.clone(),
                created_at: now_ms(),
                after_message_count: marker.after_message_count,
                after_assistant_message_id: marker.after_assistant_message_id,
            },
        );

        let full_prompt = format!("{rewritten}{}", forward::token_instruction(&forward_token));
        let dispatch = self
            .host
            .prompt_async(PromptRequest {
                session_id: child_id.to_string(),
                directory: Some(child_dir),
                agent: agent.clone(),
                parts: vec![TextPart::text(full_prompt)],
            })
            .await;

        if let Err(err) = dispatch {
            // Do not leak a ghost request the child will never answer.
            self.registry.remove_pending_forward(child_id, &forward_token);
            return Err(err.into());
        }

        self.registry
            .mark_prompt_sent(child_id, now_ms(), agent.as_deref());
        debug!("prompt dispatched to {} (token {})", child_id, forward_token);

        Ok(PromptReceipt {
            child_session_id: child_id.to_string(),
            agent,
            forward_token,
            path_rewrite,
        })
    }

    /// Warn-only validation against the optional `app.agents` capability.
    async fn check_agent_exists(&self, agent_name: &str, directory: &std::path::Path) {
        match self.host.list_agents(directory).await {
            Ok(agents) => {
                if !agents.iter().any(|a| a.name == agent_name) {
                    warn!("agent {:?} is not known to the host", agent_name);
                }
            }
            Err(err) if err.is_unsupported() => {}
            Err(err) => debug!("agent listing failed: {}", err),
        }
    }

    /// Ownership-checked status snapshot, optionally refreshed from the
    /// child's latest assistant message.
    pub async fn child_status(
        &self,
        caller: &CallerContext,
        child_id: &str,
        refresh: bool,
    ) -> Result<ChildStatusSnapshot, SupervisorError> {
        let record = self
            .registry
            .get(child_id)
            .ok_or_else(|| SupervisorError::UnknownChild(child_id.to_string()))?;
        if record.registration.orchestrator_session_id != caller.session_id {
            return Err(SupervisorError::NotOwnedByCaller {
                child: child_id.to_string(),
                caller: caller.session_id.clone(),
            });
        }

        if refresh {
            self.refresh_observation(child_id).await;
        }

        let record = self
            .registry
            .get(child_id)
            .ok_or_else(|| SupervisorError::UnknownChild(child_id.to_string()))?;
        let busy = self.child_is_busy(child_id).await;

        Ok(ChildStatusSnapshot {
            child_session_id: child_id.to_string(),
            state: record.tracking.state,
            progress: record.progress(busy),
            status_type: if busy {
                ActivityKind::Busy
            } else {
                ActivityKind::Idle
            },
            created_at: record.registration.created_at,
            last_prompt_at: record.tracking.last_prompt_at,
            last_result_at: record.tracking.last_result_at,
            last_error_at: record.tracking.last_error_at,
            last_assistant_message_at: record.tracking.last_assistant_message_at,
            last_activity_at: record.last_activity_at(),
            excerpt: record.tracking.last_assistant_message_excerpt,
            workspace_directory: record.registration.workspace_directory,
            workspace_branch: record.registration.workspace_branch,
        })
    }

    async fn refresh_observation(&self, child_id: &str) {
        let directory = self.message_directory(child_id);
        match self.host.session_messages(child_id, &directory).await {
            Ok(raw) => {
                let normalized = forward::normalize_messages(&raw);
                if let Some(latest) = normalized.iter().rev().find(|m| m.is_assistant()) {
                    let excerpt =
                        heuristics::truncate_excerpt(&latest.text, config::MAX_EXCERPT_LEN);
                    self.registry.record_observed_assistant_message(
                        child_id,
                        now_ms(),
                        Some(&excerpt),
                    );
                }
            }
            Err(err) => debug!("status refresh failed for {}: {}", child_id, err),
        }
    }

    /// Children of the calling orchestrator, ascending by creation time.
    pub fn list_children(&self, caller: &CallerContext) -> Vec<ChildMetadata> {
        self.registry.list(&caller.session_id)
    }

    // ------------------------------------------------------------------
    // Event stream
    // ------------------------------------------------------------------

    /// Route one host event. Events for untracked sessions are ignored.
    pub async fn handle_event(&self, event: HostEvent) {
        match event {
            HostEvent::SessionIdle { session_id } => self.on_idle(&session_id).await,
            HostEvent::SessionStatus { session_id, status } => match status.kind {
                ActivityKind::Busy => {
                    if self.registry.is_tracked_child_session(&session_id) {
                        self.debouncer.cancel(&session_id).await;
                    }
                }
                ActivityKind::Idle => self.on_idle(&session_id).await,
            },
            HostEvent::SessionError { session_id, error } => {
                if self.registry.is_tracked_child_session(&session_id) {
                    self.debouncer.cancel(&session_id).await;
                    self.handle_session_error(&session_id, &error).await;
                }
            }
            HostEvent::PermissionUpdated(permission) => self.capture_permission(&permission),
            HostEvent::PermissionReplied {
                permission_id,
                response,
            } => self.permissions.record_reply(&permission_id, &response),
        }
    }

    async fn on_idle(&self, child_id: &str) {
        if !self.registry.is_tracked_child_session(child_id) {
            return;
        }
        self.debouncer.cancel(child_id).await;
        if !self.registry.has_pending_forward(child_id) {
            debug!("idle for {} with nothing pending", child_id);
            return;
        }

        let Some(supervisor) = self.self_ref.upgrade() else {
            return;
        };
        let id = child_id.to_string();
        self.debouncer
            .arm(child_id, move || async move {
                supervisor.handle_stable_idle(&id).await;
            })
            .await;
    }

    /// Timer fire: the child has been idle for the whole debounce period.
    pub async fn handle_stable_idle(&self, child_id: &str) {
        let Some(request) = self.registry.peek_pending_forward(child_id) else {
            return;
        };

        // A late busy event may have slipped past the debouncer; re-check.
        if self.child_is_busy(child_id).await {
            debug!("{} reported busy at stable-idle, retrying later", child_id);
            return;
        }

        let directory = self.message_directory(child_id);
        let raw = match self.host.session_messages(child_id, &directory).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!("message fetch failed for {}: {}", child_id, err);
                return;
            }
        };

        let messages = forward::normalize_messages(&raw);
        let Some(found) = forward::resolve(&messages, &request) else {
            // Not answered yet; the request stays queued and the next idle
            // re-arms the timer.
            debug!("no forwardable reply for {} yet", child_id);
            return;
        };

        if self.registry.shift_pending_forward(child_id).is_none() {
            return;
        }

        if self.registry.last_delivered_assistant_message_id(child_id).as_deref()
            == Some(found.assistant_message_id.as_str())
        {
            debug!(
                "message {} already delivered for {}, skipping",
                found.assistant_message_id, child_id
            );
            return;
        }

        let label = if self.registry.last_prompt_agent(child_id).as_deref() == Some("plan") {
            "plan"
        } else {
            "completed"
        };
        let body = format!("[Child session {child_id} {label}]\n\n{}", found.cleaned_text);
        let metadata = serde_json::json!({
            "childSessionID": child_id,
            "status": label,
            "assistantMessageID": found.assistant_message_id,
            "forwardToken": request.forward_token,
        });

        if !self.post_to_orchestrator(child_id, body, metadata).await {
            return;
        }

        if let Some(questions) = heuristics::extract_questions(&found.cleaned_text) {
            let body = format!("[Child session {child_id} questions]\n\n{questions}");
            let metadata = serde_json::json!({
                "childSessionID": child_id,
                "status": "questions",
                "assistantMessageID": found.assistant_message_id,
                "forwardToken": request.forward_token,
            });
            self.post_to_orchestrator(child_id, body, metadata).await;
        }

        self.registry
            .set_last_delivered_assistant_message_id(child_id, &found.assistant_message_id);
        let excerpt = heuristics::truncate_excerpt(&found.cleaned_text, config::MAX_EXCERPT_LEN);
        self.registry
            .mark_result_received(child_id, now_ms(), Some(&excerpt));
        info!(
            "forwarded {} from {} (token {})",
            found.assistant_message_id, child_id, request.forward_token
        );
    }

    /// Error path: always record, and consume at most one pending request so
    /// the "one reply per outstanding request" contract holds.
    pub async fn handle_session_error(&self, child_id: &str, error: &serde_json::Value) {
        if !self.registry.is_tracked_child_session(child_id) {
            return;
        }

        let message = stringify_error(error);
        let excerpt = heuristics::truncate_excerpt(&message, config::MAX_EXCERPT_LEN);
        self.registry.mark_error(child_id, now_ms(), Some(&excerpt));

        let Some(request) = self.registry.shift_pending_forward(child_id) else {
            return;
        };

        let body = format!(
            "[Child session {child_id} error]\n\n{}",
            heuristics::truncate_excerpt(&message, config::MAX_ERROR_LEN)
        );
        let metadata = serde_json::json!({
            "childSessionID": child_id,
            "status": "error",
            "forwardToken": request.forward_token,
        });
        self.post_to_orchestrator(child_id, body, metadata).await;
        info!("forwarded error from {} (token {})", child_id, request.forward_token);
    }

    async fn post_to_orchestrator(
        &self,
        child_id: &str,
        body: String,
        metadata: serde_json::Value,
    ) -> bool {
        let Some(orchestrator_id) = self.registry.orchestrator_session_id(child_id) else {
            warn!("no orchestrator for {}, dropping delivery", child_id);
            return false;
        };
        let directory = self.registry.orchestrator_directory(child_id);

        let result = self
            .host
            .post_synthetic(PromptRequest {
                session_id: orchestrator_id,
                directory,
                agent: None,
                parts: vec![TextPart::synthetic(body, metadata)],
            })
            .await;

        if let Err(err) = result {
            warn!("synthetic post for {} failed: {}", child_id, err);
            return false;
        }
        true
    }

    // ------------------------------------------------------------------
    // Permission hook
    // ------------------------------------------------------------------

    fn capture_permission(&self, permission: &PermissionRecord) {
        // Translate child → orchestrator; a permission raised directly in an
        // orchestrator session is keyed by that session.
        let orchestrator = self
            .registry
            .orchestrator_session_id(&permission.session_id)
            .unwrap_or_else(|| permission.session_id.clone());
        self.permissions.capture(&orchestrator, permission);
    }

    /// Forwarded decision for a permission raised in a child session, if
    /// the same orchestrator has already answered an equivalent one.
    pub fn forwarded_permission_decision(
        &self,
        permission: &PermissionRecord,
    ) -> Option<PermissionDecision> {
        let orchestrator = self
            .registry
            .orchestrator_session_id(&permission.session_id)?;
        let patterns = permission::normalize_patterns(permission.pattern.as_ref());
        self.permissions
            .lookup(&orchestrator, &permission.permission_type, &patterns)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Directory for message and prompt calls against a child.
    fn message_directory(&self, child_id: &str) -> PathBuf {
        self.registry
            .child_workspace_directory(child_id)
            .or_else(|| self.registry.orchestrator_directory(child_id))
            .unwrap_or_else(|| self.config.repo_root.clone())
    }

    /// Directory for status queries: the orchestrator's view.
    fn status_directory(&self, child_id: &str) -> PathBuf {
        self.registry
            .orchestrator_directory(child_id)
            .unwrap_or_else(|| self.config.repo_root.clone())
    }

    async fn child_is_busy(&self, child_id: &str) -> bool {
        let directory = self.status_directory(child_id);
        match self.host.session_status(&directory).await {
            Ok(map) => map
                .get(child_id)
                .map(|activity| activity.kind == ActivityKind::Busy)
                .unwrap_or(false),
            Err(err) => {
                debug!("status query failed for {}: {}", child_id, err);
                false
            }
        }
    }
}

/// Current time in milliseconds since the epoch.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Human-readable form of a host error value: prefer `message`, fall back
/// to the raw JSON.
fn stringify_error(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}
