// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory host client for unit tests.
//!
//! Implements the full [`HostClient`] capability set over a scriptable state
//! struct: tests preload messages and status maps, flip failure switches,
//! and inspect what the supervisor dispatched.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config;
use crate::error::HostError;
use crate::host::{
    AgentInfo, CreateSessionRequest, CreatedSession, CreatedWorktree, HostClient, PromptRequest,
    RawMessage, SessionActivity,
};

/// Scriptable state behind the fake host.
pub struct FakeHostState {
    pub created_sessions: Vec<CreateSessionRequest>,
    pub next_session_ids: VecDeque<String>,
    pub fail_create: bool,
    pub prompts: Vec<PromptRequest>,
    pub fail_prompt: bool,
    pub synthetic_posts: Vec<PromptRequest>,
    pub fail_synthetic: bool,
    pub status: HashMap<String, SessionActivity>,
    pub fail_status: bool,
    pub messages: HashMap<String, Vec<RawMessage>>,
    pub fail_messages: bool,
    /// Number of upcoming `create_worktree` calls to fail.
    pub worktree_failures: usize,
    pub worktree_attempts: usize,
    pub created_worktrees: Vec<PathBuf>,
    pub remove_worktree_result: Result<bool, String>,
    pub removed_worktrees: Vec<PathBuf>,
    /// `None` means the capability is unsupported.
    pub agents: Option<Vec<AgentInfo>>,
    session_counter: usize,
}

impl Default for FakeHostState {
    fn default() -> Self {
        Self {
            created_sessions: Vec::new(),
            next_session_ids: VecDeque::new(),
            fail_create: false,
            prompts: Vec::new(),
            fail_prompt: false,
            synthetic_posts: Vec::new(),
            fail_synthetic: false,
            status: HashMap::new(),
            fail_status: false,
            messages: HashMap::new(),
            fail_messages: false,
            worktree_failures: 0,
            worktree_attempts: 0,
            created_worktrees: Vec::new(),
            remove_worktree_result: Ok(true),
            removed_worktrees: Vec::new(),
            agents: None,
            session_counter: 0,
        }
    }
}

/// In-memory [`HostClient`] rooted at a temp directory.
pub struct FakeHost {
    root: PathBuf,
    pub state: Mutex<FakeHostState>,
}

impl FakeHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(FakeHostState::default()),
        }
    }

    pub fn set_messages(&self, session_id: &str, messages: Vec<RawMessage>) {
        self.state
            .lock()
            .unwrap()
            .messages
            .insert(session_id.to_string(), messages);
    }

    pub fn set_status(&self, session_id: &str, activity: SessionActivity) {
        self.state
            .lock()
            .unwrap()
            .status
            .insert(session_id.to_string(), activity);
    }

    pub fn prompts(&self) -> Vec<PromptRequest> {
        self.state.lock().unwrap().prompts.clone()
    }

    pub fn synthetic_posts(&self) -> Vec<PromptRequest> {
        self.state.lock().unwrap().synthetic_posts.clone()
    }
}

#[async_trait]
impl HostClient for FakeHost {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CreatedSession, HostError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(HostError::call("session create refused"));
        }
        let id = match state.next_session_ids.pop_front() {
            Some(id) => id,
            None => {
                state.session_counter += 1;
                format!("child_{}", state.session_counter)
            }
        };
        let title = request.title.clone();
        state.created_sessions.push(request);
        Ok(CreatedSession { id, title })
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
        let mut state = self.state.lock().unwrap();
        if state.fail_synthetic {
            return Err(HostError::call("synthetic post refused"));
        }
        state.synthetic_posts.push(request);
        Ok(())
    }

    async fn session_status(
        &self,
        _directory: &Path,
    ) -> Result<HashMap<String, SessionActivity>, HostError> {
        let state = self.state.lock().unwrap();
        if state.fail_status {
            return Err(HostError::call("status query refused"));
        }
        Ok(state.status.clone())
    }

    async fn session_messages(
        &self,
        session_id: &str,
        _directory: &Path,
    ) -> Result<Vec<RawMessage>, HostError> {
        let state = self.state.lock().unwrap();
        if state.fail_messages {
            return Err(HostError::call("message fetch refused"));
        }
        Ok(state.messages.get(session_id).cloned().unwrap_or_default())
    }

    async fn create_worktree(
        &self,
        _directory: &Path,
        name: &str,
    ) -> Result<CreatedWorktree, HostError> {
        let mut state = self.state.lock().unwrap();
        state.worktree_attempts += 1;
        if state.worktree_failures > 0 {
            state.worktree_failures = state.worktree_failures.saturating_sub(1);
            return Err(HostError::call(format!("worktree {name} already exists")));
        }

        let directory = config::worktrees_dir(&self.root).join(name);
        std::fs::create_dir_all(&directory)?;
        state.created_worktrees.push(directory.clone());
        Ok(CreatedWorktree {
            name: name.to_string(),
            branch: name.to_string(),
            directory,
        })
    }

    async fn remove_worktree(&self, directory: &Path) -> Result<bool, HostError> {
        let mut state = self.state.lock().unwrap();
        state.removed_worktrees.push(directory.to_path_buf());
        match &state.remove_worktree_result {
            Ok(true) => {
                let _ = std::fs::remove_dir_all(directory);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(message) => Err(HostError::call(message.clone())),
        }
    }

    async fn list_agents(&self, _directory: &Path) -> Result<Vec<AgentInfo>, HostError> {
        let state = self.state.lock().unwrap();
        match &state.agents {
            Some(agents) => Ok(agents.clone()),
            None => Err(HostError::Unsupported("app.agents")),
        }
    }
}
