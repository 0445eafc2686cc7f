// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the orchestrator supervisor.
//!
//! This module provides strongly-typed errors for the host boundary, workspace
//! provisioning, and supervisor validation, using `thiserror` for ergonomic
//! error definitions and `anyhow` for error propagation.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the host session client.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("host call failed: {0}")]
    Call(String),

    #[error("capability not supported: {0}")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Create a generic host-call failure.
    pub fn call(message: impl Into<String>) -> Self {
        Self::Call(message.into())
    }

    /// Check whether this error means the capability is absent rather
    /// than failing.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

/// Errors that can occur while provisioning an isolated workspace.
///
/// These never reach the tool caller: the provisioner degrades to the
/// fallback workspace instead.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("worktrees are not supported in {0:?}")]
    Unsupported(PathBuf),

    #[error("workspace creation failed: {0}")]
    CreationFailed(String),

    #[error("operation aborted")]
    Aborted,

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by supervisor operations to the tool surface.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("session {0} is itself a child session; nested orchestration is not allowed")]
    NestedOrchestrator(String),

    #[error("unknown child session: {0}")]
    UnknownChild(String),

    #[error("child session {child} is not owned by session {caller}")]
    NotOwnedByCaller { child: String, caller: String },

    #[error("missing metadata: {0}")]
    MissingMetadata(String),

    #[error("host error: {0}")]
    Host(#[from] HostError),
}

impl SupervisorError {
    /// Stable machine-readable kind, used in tool error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NestedOrchestrator(_) => "nested_orchestrator",
            Self::UnknownChild(_) => "unknown_child",
            Self::NotOwnedByCaller { .. } => "not_owned_by_caller",
            Self::MissingMetadata(_) => "missing_metadata",
            Self::Host(_) => "host_error",
        }
    }

    /// Validation errors leave no state behind; host errors may have
    /// transitioned the child to `error`.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Host(_))
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_error_kind() {
        assert_eq!(
            SupervisorError::NestedOrchestrator("c1".to_string()).kind(),
            "nested_orchestrator"
        );
        assert_eq!(
            SupervisorError::UnknownChild("c9".to_string()).kind(),
            "unknown_child"
        );
        assert_eq!(
            SupervisorError::NotOwnedByCaller {
                child: "c1".to_string(),
                caller: "o2".to_string(),
            }
            .kind(),
            "not_owned_by_caller"
        );
    }

    #[test]
    fn test_validation_classification() {
        assert!(SupervisorError::UnknownChild("c1".to_string()).is_validation());
        assert!(!SupervisorError::Host(HostError::call("boom")).is_validation());
    }

    #[test]
    fn test_host_error_unsupported() {
        assert!(HostError::Unsupported("app.agents").is_unsupported());
        assert!(!HostError::call("transport down").is_unsupported());
    }

    #[test]
    fn test_host_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let host_err: HostError = io_err.into();
        assert!(matches!(host_err, HostError::Io(_)));
    }
}
