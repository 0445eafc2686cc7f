// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Overseer - orchestrator supervisor for fan-out/fan-in agent sessions.
//!
//! Overseer turns a single conversational "orchestrator" session inside a
//! host assistant runtime into a scheduler over isolated child worker
//! sessions, each running in its own version-controlled workspace. The host
//! provides session execution, a permission hook, and an event bus; this
//! crate owns everything that has to stay correct under concurrency,
//! crashes, and adversarial child output:
//!
//! - [`registry`] - durable, crash-safe registry of child sessions, their
//!   state machines, and the FIFO queue of pending forward requests
//! - [`forward`] - forward-token protocol that correlates a child's final
//!   reply with the prompt that requested it
//! - [`debounce`] - per-child idle debouncing driving at-most-once delivery
//! - [`workspace`] - worktree provisioning with a safe fallback
//! - [`supervisor`] - the controller wiring the above to the host client
//! - [`permission`] - per-orchestrator permission decision memoization
//! - [`tools`] - the four JSON operations the orchestrator agent invokes
//! - [`host`] - the capability set and event stream the host must supply
//! - [`heuristics`] - replaceable string transforms (questions, paths)
//! - [`error`] - error types and result alias
//! - [`config`] - path layout and tunables
//! - [`telemetry`] - optional tracing setup for embedders
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use overseer::{Supervisor, SupervisorConfig, ToolContext, ToolSurface};
//!
//! // The host hands us its session client and event stream.
//! let supervisor = Supervisor::new(host_client, SupervisorConfig::discover(&cwd));
//! let tools = ToolSurface::new(Arc::clone(&supervisor));
//!
//! // Tool calls from the orchestrator agent:
//! let ctx = ToolContext::new("orc_session", &cwd);
//! let created = tools.session_create(&ctx, serde_json::json!({"title": "Fix login"})).await;
//!
//! // Host events drive the idle/error paths:
//! supervisor.handle_event(event).await;
//! ```

pub mod config;
pub mod debounce;
pub mod error;
pub mod forward;
pub mod heuristics;
pub mod host;
pub mod permission;
pub mod registry;
pub mod supervisor;
pub mod telemetry;
pub mod tools;
pub mod workspace;

#[cfg(test)]
pub(crate) mod fakehost;

// Re-export commonly used types at crate root
pub use config::SupervisorConfig;
pub use error::{HostError, Result, SupervisorError, WorkspaceError};
pub use host::{AbortSignal, HostClient, HostEvent, PermissionRecord, SharedHost};
pub use permission::PermissionDecision;
pub use registry::{
    ChildMetadata, ChildProgress, ChildRecord, ChildState, PendingForwardRequest, SessionRegistry,
};
pub use supervisor::{CallerContext, ChildStatusSnapshot, Supervisor};
pub use tools::{ToolContext, ToolSurface};
pub use workspace::{ProvisionedWorkspace, WorkspaceKind, WorkspaceProvisioner};

/// Overseer version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
