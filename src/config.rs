// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Path layout and tunable constants for the supervisor.
//!
//! The supervisor stores everything under the host's configuration directory
//! (`.opencode/`), discovered by walking upward from the working directory.
//! When no marker directory is found, the working directory itself is used as
//! the repository root.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Marker directory that identifies the repository root.
pub const CONFIG_DIR: &str = ".opencode";

/// Subdirectory of [`CONFIG_DIR`] owned by the supervisor.
pub const PRODUCT_DIR: &str = "orchestrator";

/// Canonical registry file name.
pub const REGISTRY_FILE: &str = "session-registry.json";

/// Legacy per-child registry directory, migrated once on first load.
pub const LEGACY_REGISTRY_DIR: &str = "session-registry.d";

/// Subdirectory of [`CONFIG_DIR`] holding isolated workspaces.
pub const WORKTREES_DIR: &str = "worktrees";

/// Prefix for isolated workspace names.
pub const WORKSPACE_NAME_PREFIX: &str = "wt";

/// Maximum attempts when workspace names collide (initial + 9 retries).
pub const MAX_WORKSPACE_ATTEMPTS: u32 = 10;

/// Back-off schedule for workspace readiness probing, in milliseconds.
pub const READINESS_BACKOFF_MS: [u64; 6] = [50, 100, 200, 400, 800, 1200];

/// Quiet period before a child counts as stably idle.
pub const DEFAULT_DEBOUNCE_MS: u64 = 5000;

/// Cap for user-visible error strings in tool responses.
pub const MAX_ERROR_LEN: usize = 2000;

/// Cap for stored assistant-message excerpts.
pub const MAX_EXCERPT_LEN: usize = 400;

/// Find the repository root by walking upward from `start` until a
/// directory containing [`CONFIG_DIR`] is found.
///
/// Falls back to `start` itself when no marker directory exists.
pub fn find_repo_root(start: &Path) -> PathBuf {
    for ancestor in start.ancestors() {
        let marker = ancestor.join(CONFIG_DIR);
        if marker.is_dir() {
            return ancestor.to_path_buf();
        }
    }
    start.to_path_buf()
}

/// Directory holding supervisor state: `<root>/.opencode/orchestrator`.
pub fn product_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(CONFIG_DIR).join(PRODUCT_DIR)
}

/// Canonical registry path: `<root>/.opencode/orchestrator/session-registry.json`.
pub fn registry_path(repo_root: &Path) -> PathBuf {
    product_dir(repo_root).join(REGISTRY_FILE)
}

/// Legacy per-child registry directory, sibling of the registry file.
pub fn legacy_registry_dir(repo_root: &Path) -> PathBuf {
    product_dir(repo_root).join(LEGACY_REGISTRY_DIR)
}

/// Enclosing directory for isolated workspaces: `<root>/.opencode/worktrees`.
pub fn worktrees_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(CONFIG_DIR).join(WORKTREES_DIR)
}

/// Runtime configuration for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Repository root; anchors the registry and workspace layout.
    pub repo_root: PathBuf,
    /// Idle debounce period.
    pub debounce: Duration,
}

impl SupervisorConfig {
    /// Configuration anchored at an explicit repository root.
    pub fn for_root(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }

    /// Discover the repository root upward from `start`.
    pub fn discover(start: &Path) -> Self {
        Self::for_root(find_repo_root(start))
    }

    /// Override the debounce period (tests use short periods).
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}
