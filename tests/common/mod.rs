// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared in-memory host for end-to-end tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use overseer::host::{
    AgentInfo, CreateSessionRequest, CreatedSession, CreatedWorktree, HostClient, PromptRequest,
    RawMessage, SessionActivity,
};
use overseer::HostError;

#[derive(Default)]
pub struct ScriptedState {
    pub prompts: Vec<PromptRequest>,
    pub fail_prompt: bool,
    pub synthetic_posts: Vec<PromptRequest>,
    pub status: HashMap<String, SessionActivity>,
    pub messages: HashMap<String, Vec<RawMessage>>,
    session_counter: usize,
}

/// Scriptable [`HostClient`] rooted at a temp directory.
pub struct ScriptedHost {
    root: PathBuf,
    pub state: Mutex<ScriptedState>,
}

impl ScriptedHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(ScriptedState::default()),
        }
    }

    pub fn set_messages(&self, session_id: &str, messages: Vec<RawMessage>) {
        self.state
            .lock()
            .unwrap()
            .messages
            .insert(session_id.to_string(), messages);
    }

    pub fn set_busy(&self, session_id: &str, busy: bool) {
        let activity = if busy {
            SessionActivity::busy()
        } else {
            SessionActivity::idle()
        };
        self.state
            .lock()
            .unwrap()
            .status
            .insert(session_id.to_string(), activity);
    }

    pub fn synthetic_posts(&self) -> Vec<PromptRequest> {
        self.state.lock().unwrap().synthetic_posts.clone()
    }
}

#[async_trait]
impl HostClient for ScriptedHost {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CreatedSession, HostError> {
        let mut state = self.state.lock().unwrap();
        state.session_counter += 1;
        Ok(CreatedSession {
            id: format!("child_{}", state.session_counter),
            title: request.title,
        })
    }

    async fn prompt_async(&self, request: PromptRequest) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_prompt {
            return Err(HostError::call("prompt dispatch refused"));
        }
        state.prompts.push(request);
        Ok(())
    }

    async fn post_synthetic(&self, request: PromptRequest) -> Result<(), HostError> {
        self.state.lock().unwrap().synthetic_posts.push(request);
        Ok(())
    }

    async fn session_status(
        &self,
        _directory: &Path,
    ) -> Result<HashMap<String, SessionActivity>, HostError> {
        Ok(self.state.lock().unwrap().status.clone())
    }

    async fn session_messages(
        &self,
        session_id: &str,
        _directory: &Path,
    ) -> Result<Vec<RawMessage>, HostError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .messages
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_worktree(
        &self,
        _directory: &Path,
        name: &str,
    ) -> Result<CreatedWorktree, HostError> {
        let directory = self.root.join(".opencode").join("worktrees").join(name);
        std::fs::create_dir_all(&directory)?;
        Ok(CreatedWorktree {
            name: name.to_string(),
            branch: name.to_string(),
            directory,
        })
    }

    async fn remove_worktree(&self, directory: &Path) -> Result<bool, HostError> {
        let _ = std::fs::remove_dir_all(directory);
        Ok(true)
    }

    async fn list_agents(&self, _directory: &Path) -> Result<Vec<AgentInfo>, HostError> {
        Ok(vec![
            AgentInfo {
                name: "build".to_string(),
            },
            AgentInfo {
                name: "plan".to_string(),
            },
        ])
    }
}
