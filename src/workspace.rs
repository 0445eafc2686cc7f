// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Workspace provisioning for child sessions.
//!
//! Each child runs in an isolated version-controlled workspace created
//! through the host's worktree capability under
//! `<repo>/.opencode/worktrees/`. When the repository does not support
//! worktrees, or creation keeps failing, the child falls back to the
//! orchestrator's own directory — provisioning degrades, it never errors
//! out to the caller.

use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::config;
use crate::error::WorkspaceError;
use crate::host::{AbortSignal, SharedHost};

/// How a workspace was provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceKind {
    /// Dedicated worktree with its own branch.
    Isolated,
    /// The orchestrator's directory, shared.
    Fallback,
}

/// Result of provisioning: where the child will run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedWorkspace {
    pub kind: WorkspaceKind,
    pub directory: PathBuf,
    /// Branch of the isolated worktree; `None` in fallback mode.
    pub branch: Option<String>,
}

impl ProvisionedWorkspace {
    pub fn is_isolated(&self) -> bool {
        self.kind == WorkspaceKind::Isolated
    }

    fn fallback(directory: &Path) -> Self {
        Self {
            kind: WorkspaceKind::Fallback,
            directory: directory.to_path_buf(),
            branch: None,
        }
    }
}

/// Creates and removes per-child workspaces through the host client.
pub struct WorkspaceProvisioner {
    host: SharedHost,
    repo_root: PathBuf,
}

impl WorkspaceProvisioner {
    pub fn new(host: SharedHost, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            host,
            repo_root: repo_root.into(),
        }
    }

    /// Whether the repository can host isolated worktrees at all.
    pub fn supports_isolation(&self) -> bool {
        self.repo_root.join(".git").exists()
    }

    /// Provision a workspace for `session_id`.
    ///
    /// Aborts, unsupported repositories, and persistent creation failures
    /// all short-circuit to the fallback workspace.
    pub async fn provision(
        &self,
        session_id: &str,
        title: &str,
        orchestrator_directory: &Path,
        abort: &AbortSignal,
    ) -> ProvisionedWorkspace {
        match self.try_isolated(session_id, title, abort).await {
            Ok(workspace) => workspace,
            Err(WorkspaceError::Aborted) => {
                debug!("workspace provisioning aborted, using fallback");
                ProvisionedWorkspace::fallback(orchestrator_directory)
            }
            Err(WorkspaceError::Unsupported(root)) => {
                debug!("no worktree support in {:?}, using fallback", root);
                ProvisionedWorkspace::fallback(orchestrator_directory)
            }
            Err(err) => {
                warn!("workspace creation failed ({}), using fallback", err);
                ProvisionedWorkspace::fallback(orchestrator_directory)
            }
        }
    }

    async fn try_isolated(
        &self,
        session_id: &str,
        title: &str,
        abort: &AbortSignal,
    ) -> Result<ProvisionedWorkspace, WorkspaceError> {
        if abort.is_aborted() {
            return Err(WorkspaceError::Aborted);
        }
        if !self.supports_isolation() {
            return Err(WorkspaceError::Unsupported(self.repo_root.clone()));
        }

        let enclosing = config::worktrees_dir(&self.repo_root);
        std::fs::create_dir_all(&enclosing)?;

        let stamp = Local::now().format("%Y%m%d%H%M%S").to_string();
        for attempt in 0..config::MAX_WORKSPACE_ATTEMPTS {
            if abort.is_aborted() {
                return Err(WorkspaceError::Aborted);
            }

            // Each retry regenerates the random token (feeding the branch
            // name) and suffixes the directory with the attempt number.
            let mut name = workspace_name(&stamp, title, session_id);
            if attempt > 0 {
                name = format!("{name}_{attempt}");
            }

            match self.host.create_worktree(&self.repo_root, &name).await {
                Ok(created) => {
                    self.wait_ready(&created.directory).await;
                    info!(
                        "provisioned workspace {:?} on branch {}",
                        created.directory, created.branch
                    );
                    return Ok(ProvisionedWorkspace {
                        kind: WorkspaceKind::Isolated,
                        directory: created.directory,
                        branch: Some(created.branch),
                    });
                }
                Err(err) if err.is_unsupported() => return Err(err.into()),
                Err(err) => {
                    debug!("worktree attempt {} ({}) failed: {}", attempt, name, err);
                }
            }
        }

        Err(WorkspaceError::CreationFailed(format!(
            "no workspace name available after {} attempts",
            config::MAX_WORKSPACE_ATTEMPTS
        )))
    }

    /// Best-effort removal: host worktree removal first, then a recursive
    /// directory delete if the host refused.
    pub async fn cleanup(&self, workspace: &ProvisionedWorkspace) {
        if !workspace.is_isolated() {
            return;
        }

        match self.host.remove_worktree(&workspace.directory).await {
            Ok(true) => {
                debug!("removed workspace {:?}", workspace.directory);
                return;
            }
            Ok(false) => debug!("host did not know workspace {:?}", workspace.directory),
            Err(err) => warn!("worktree removal failed: {}", err),
        }

        if workspace.directory.exists() {
            if let Err(err) = std::fs::remove_dir_all(&workspace.directory) {
                warn!(
                    "manual removal of {:?} failed: {}",
                    workspace.directory, err
                );
            }
        }
    }

    /// Wait for the created directory to appear, with bounded back-off.
    async fn wait_ready(&self, directory: &Path) {
        for delay_ms in config::READINESS_BACKOFF_MS {
            if directory.exists() {
                return;
            }
            sleep(Duration::from_millis(delay_ms)).await;
        }
        if !directory.exists() {
            warn!("workspace {:?} not visible after back-off", directory);
        }
    }
}

/// `wt_<stamp>_<title-slug>_<session-slug>_<hex>`; empty components are
/// dropped rather than leaving double separators.
fn workspace_name(stamp: &str, title: &str, session_id: &str) -> String {
    [
        config::WORKSPACE_NAME_PREFIX.to_string(),
        stamp.to_string(),
        slug(title, 40),
        slug(session_id, 20),
        random_hex(4),
    ]
    .into_iter()
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join("_")
}

/// Lowercase, collapse non-alphanumeric runs to `_`, trim, cap length.
fn slug(input: &str, cap: usize) -> String {
    let mut out = String::new();
    let mut last_was_sep = true;
    for c in input.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = out.trim_matches('_');
    trimmed.chars().take(cap).collect::<String>().trim_end_matches('_').to_string()
}

/// `bytes` random bytes as lowercase hex.
fn random_hex(bytes: usize) -> String {
    uuid::Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(bytes)
        .map(|b| format!("{b:02x}"))
        .collect()
}
