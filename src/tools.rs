// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool surface invoked by the orchestrator agent.
//!
//! Four operations with JSON inputs and outputs: `session_create`,
//! `session_prompt`, `session_status`, and `session_list`. Responses are
//! always a single JSON object with a `status` field in
//! `{created, prompt_sent, ok, error}`. Every tool first applies the
//! nested-orchestrator guard, and user-visible error strings are capped.

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config;
use crate::error::SupervisorError;
use crate::heuristics::truncate_excerpt;
use crate::host::AbortSignal;
use crate::supervisor::{CallerContext, Supervisor};

/// Invocation context the host provides with each tool call.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Session the tool call originates from (the orchestrator).
    pub session_id: String,
    /// Directory that session runs in.
    pub directory: PathBuf,
    pub abort: AbortSignal,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            directory: directory.into(),
            abort: AbortSignal::new(),
        }
    }

    fn caller(&self) -> CallerContext {
        CallerContext {
            session_id: self.session_id.clone(),
            directory: self.directory.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionCreateInput {
    title: String,
}

#[derive(Debug, Deserialize)]
struct SessionPromptInput {
    #[serde(rename = "sessionID")]
    session_id: String,
    prompt: String,
    #[serde(default)]
    agent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionStatusInput {
    #[serde(rename = "sessionID")]
    session_id: String,
    #[serde(default)]
    refresh: Option<bool>,
}

/// Parse JSON arguments into a typed struct.
fn parse_arguments<T>(arguments: &Value) -> Result<T, String>
where
    T: DeserializeOwned,
{
    serde_json::from_value(arguments.clone())
        .map_err(|err| format!("invalid arguments: {err}"))
}

/// `{status: "error", error: <capped message>}`.
fn error_response(message: impl AsRef<str>) -> Value {
    json!({
        "status": "error",
        "error": truncate_excerpt(message.as_ref(), config::MAX_ERROR_LEN),
    })
}

/// The externally invoked operations, bound to one supervisor.
pub struct ToolSurface {
    supervisor: Arc<Supervisor>,
}

impl ToolSurface {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }

    fn nested_guard(&self, context: &ToolContext) -> Option<Value> {
        if self
            .supervisor
            .registry()
            .is_nested_orchestrator(&context.session_id)
        {
            let err = SupervisorError::NestedOrchestrator(context.session_id.clone());
            debug!("refusing tool call: {}", err);
            Some(error_response(err.to_string()))
        } else {
            None
        }
    }

    /// `session_create({title})` → `{status: "created", sessionID, title,
    /// directory}`.
    pub async fn session_create(&self, context: &ToolContext, arguments: Value) -> Value {
        if let Some(refusal) = self.nested_guard(context) {
            return refusal;
        }
        let input: SessionCreateInput = match parse_arguments(&arguments) {
            Ok(input) => input,
            Err(err) => return error_response(err),
        };

        match self
            .supervisor
            .create_child(&context.caller(), &input.title, &context.abort)
            .await
        {
            Ok(created) => json!({
                "status": "created",
                "sessionID": created.session_id,
                "title": created.title,
                "directory": created.workspace.directory,
            }),
            Err(err) => error_response(err.to_string()),
        }
    }

    /// `session_prompt({sessionID, prompt, agent})` → `{status:
    /// "prompt_sent", sessionID, agent, forwardToken, pathRewrite}`.
    pub async fn session_prompt(&self, context: &ToolContext, arguments: Value) -> Value {
        if let Some(refusal) = self.nested_guard(context) {
            return refusal;
        }
        let input: SessionPromptInput = match parse_arguments(&arguments) {
            Ok(input) => input,
            Err(err) => return error_response(err),
        };

        match self
            .supervisor
            .prompt_child(
                &context.caller(),
                &input.session_id,
                &input.prompt,
                input.agent,
            )
            .await
        {
            Ok(receipt) => json!({
                "status": "prompt_sent",
                "sessionID": receipt.child_session_id,
                "agent": receipt.agent,
                "forwardToken": receipt.forward_token,
                "pathRewrite": receipt.path_rewrite,
            }),
            Err(err) => error_response(err.to_string()),
        }
    }

    /// `session_status({sessionID, refresh})` → `{status: "ok", sessionID,
    /// state, progress, statusType, timestamps…, excerpt, workspace…}`.
    pub async fn session_status(&self, context: &ToolContext, arguments: Value) -> Value {
        if let Some(refusal) = self.nested_guard(context) {
            return refusal;
        }
        let input: SessionStatusInput = match parse_arguments(&arguments) {
            Ok(input) => input,
            Err(err) => return error_response(err),
        };

        match self
            .supervisor
            .child_status(
                &context.caller(),
                &input.session_id,
                input.refresh.unwrap_or(false),
            )
            .await
        {
            Ok(snapshot) => {
                let mut value = serde_json::to_value(&snapshot).unwrap_or_else(|_| json!({}));
                if let Some(object) = value.as_object_mut() {
                    object.insert("status".to_string(), json!("ok"));
                    if let Some(id) = object.remove("childSessionID") {
                        object.insert("sessionID".to_string(), id);
                    }
                }
                value
            }
            Err(err) => error_response(err.to_string()),
        }
    }

    /// `session_list({})` → `{status: "ok", count, children}`.
    pub async fn session_list(&self, context: &ToolContext, _arguments: Value) -> Value {
        if let Some(refusal) = self.nested_guard(context) {
            return refusal;
        }

        let children = self.supervisor.list_children(&context.caller());
        json!({
            "status": "ok",
            "count": children.len(),
            "children": children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use crate::fakehost::FakeHost;
    use crate::host::SharedHost;
    use crate::registry::SessionRegistry;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        host: Arc<FakeHost>,
        tools: ToolSurface,
        context: ToolContext,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let host = Arc::new(FakeHost::new(dir.path()));
        let registry = Arc::new(SessionRegistry::new(
            dir.path().join("session-registry.json"),
        ));
        let supervisor = Supervisor::with_registry(
            Arc::clone(&host) as SharedHost,
            registry,
            SupervisorConfig::for_root(dir.path()),
        );
        let context = ToolContext::new("o1", dir.path());
        Fixture {
            _dir: dir,
            host,
            tools: ToolSurface::new(supervisor),
            context,
        }
    }

    async fn create(fixture: &Fixture) -> String {
        let response = fixture
            .tools
            .session_create(&fixture.context, json!({"title": "worker"}))
            .await;
        assert_eq!(response["status"], "created");
        response["sessionID"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_session_create_response() {
        let fixture = fixture();
        let response = fixture
            .tools
            .session_create(&fixture.context, json!({"title": "Fix login"}))
            .await;

        assert_eq!(response["status"], "created");
        assert_eq!(response["title"], "Fix login");
        assert!(response["sessionID"].as_str().is_some());
        assert!(response["directory"].as_str().unwrap().contains("worktrees"));
    }

    #[tokio::test]
    async fn test_session_create_invalid_input() {
        let fixture = fixture();
        let response = fixture
            .tools
            .session_create(&fixture.context, json!({"nope": true}))
            .await;
        assert_eq!(response["status"], "error");
        assert!(response["error"].as_str().unwrap().contains("invalid arguments"));
    }

    #[tokio::test]
    async fn test_session_prompt_response() {
        let fixture = fixture();
        let child = create(&fixture).await;

        let response = fixture
            .tools
            .session_prompt(
                &fixture.context,
                json!({"sessionID": child, "prompt": "Run git status", "agent": "build"}),
            )
            .await;

        assert_eq!(response["status"], "prompt_sent");
        assert_eq!(response["sessionID"], child.as_str());
        assert_eq!(response["agent"], "build");
        assert!(!response["forwardToken"].as_str().unwrap().is_empty());
        assert!(response["pathRewrite"]["replaced"].is_number());
    }

    #[tokio::test]
    async fn test_session_prompt_error_on_host_failure() {
        let fixture = fixture();
        let child = create(&fixture).await;
        fixture.host.state.lock().unwrap().fail_prompt = true;

        let response = fixture
            .tools
            .session_prompt(
                &fixture.context,
                json!({"sessionID": child, "prompt": "hi", "agent": null}),
            )
            .await;
        assert_eq!(response["status"], "error");
    }

    #[tokio::test]
    async fn test_nested_guard_refuses_every_tool() {
        let fixture = fixture();
        let child = create(&fixture).await;

        let nested = ToolContext::new(child, fixture.context.directory.clone());
        for response in [
            fixture
                .tools
                .session_create(&nested, json!({"title": "x"}))
                .await,
            fixture
                .tools
                .session_prompt(&nested, json!({"sessionID": "c", "prompt": "p"}))
                .await,
            fixture
                .tools
                .session_status(&nested, json!({"sessionID": "c"}))
                .await,
            fixture.tools.session_list(&nested, json!({})).await,
        ] {
            assert_eq!(response["status"], "error");
            assert!(response["error"]
                .as_str()
                .unwrap()
                .contains("nested orchestration"));
        }
    }

    #[tokio::test]
    async fn test_session_status_response() {
        let fixture = fixture();
        let child = create(&fixture).await;

        let response = fixture
            .tools
            .session_status(&fixture.context, json!({"sessionID": child, "refresh": false}))
            .await;

        assert_eq!(response["status"], "ok");
        assert_eq!(response["sessionID"], child.as_str());
        assert_eq!(response["state"], "created");
        assert_eq!(response["progress"], "pending");
        assert_eq!(response["statusType"], "idle");
        assert!(response.get("childSessionID").is_none());
    }

    #[tokio::test]
    async fn test_session_status_unknown_child() {
        let fixture = fixture();
        let response = fixture
            .tools
            .session_status(&fixture.context, json!({"sessionID": "ghost"}))
            .await;
        assert_eq!(response["status"], "error");
        assert!(response["error"].as_str().unwrap().contains("unknown child"));
    }

    #[tokio::test]
    async fn test_session_list_response() {
        let fixture = fixture();
        let first = create(&fixture).await;
        let second = create(&fixture).await;

        let response = fixture.tools.session_list(&fixture.context, json!({})).await;

        assert_eq!(response["status"], "ok");
        assert_eq!(response["count"], 2);
        let children = response["children"].as_array().unwrap();
        assert_eq!(children.len(), 2);
        let ids: Vec<&str> = children
            .iter()
            .map(|c| c["childSessionID"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&first.as_str()));
        assert!(ids.contains(&second.as_str()));
        assert!(children[0]["lastActivityAt"].is_number());
    }
}
