// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Permission decision memoization.
//!
//! When a user answers a permission prompt with "always" or "reject" inside
//! an orchestrator's tree, the decision is remembered per orchestrator and
//! replayed from the host's permission hook, so identical requests from
//! other children of the same orchestrator do not prompt again.
//!
//! State is in-memory only; decisions do not survive the process.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;

use crate::host::PermissionRecord;

/// A memoized decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    Allow,
    Deny,
}

/// `(permission_type, pattern)` — the memoization key.
type DecisionKey = (String, String);

#[derive(Default)]
struct OrchestratorDecisions {
    allow: HashSet<DecisionKey>,
    deny: HashSet<DecisionKey>,
}

/// Permission captured by ID, awaiting its reply.
struct CapturedPermission {
    orchestrator_id: String,
    permission_type: String,
    patterns: Vec<String>,
}

#[derive(Default)]
struct CacheInner {
    decisions: HashMap<String, OrchestratorDecisions>,
    captured: HashMap<String, CapturedPermission>,
}

/// Per-orchestrator allow/deny cache keyed by `(permission-type, pattern)`.
#[derive(Default)]
pub struct PermissionCache {
    inner: Mutex<CacheInner>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a raised permission by its ID until the reply arrives.
    ///
    /// `orchestrator_id` is the owner of the session the permission was
    /// raised in (the caller translates child → orchestrator).
    pub fn capture(&self, orchestrator_id: &str, permission: &PermissionRecord) {
        let patterns = normalize_patterns(permission.pattern.as_ref());
        let mut inner = self.inner.lock().expect("permission cache poisoned");
        inner.captured.insert(
            permission.id.clone(),
            CapturedPermission {
                orchestrator_id: orchestrator_id.to_string(),
                permission_type: permission.permission_type.clone(),
                patterns,
            },
        );
    }

    /// Apply a reply to a previously captured permission.
    ///
    /// `"always"` memoizes allow, `"reject"` memoizes deny; anything else is
    /// ignored (one-shot answers are not worth remembering).
    pub fn record_reply(&self, permission_id: &str, response: &str) {
        let decision = match response {
            "always" => PermissionDecision::Allow,
            "reject" => PermissionDecision::Deny,
            _ => return,
        };

        let mut inner = self.inner.lock().expect("permission cache poisoned");
        let Some(captured) = inner.captured.remove(permission_id) else {
            return;
        };

        let decisions = inner
            .decisions
            .entry(captured.orchestrator_id.clone())
            .or_default();
        for pattern in &captured.patterns {
            let key = (captured.permission_type.clone(), pattern.clone());
            match decision {
                PermissionDecision::Allow => {
                    decisions.deny.remove(&key);
                    decisions.allow.insert(key);
                }
                PermissionDecision::Deny => {
                    decisions.allow.remove(&key);
                    decisions.deny.insert(key);
                }
            }
        }
        debug!(
            "memoized {:?} for {} ({} pattern(s))",
            decision,
            captured.orchestrator_id,
            captured.patterns.len()
        );
    }

    /// Forwarded decision for a new permission in the same orchestrator.
    ///
    /// Deny wins over allow when patterns match both sets.
    pub fn lookup(
        &self,
        orchestrator_id: &str,
        permission_type: &str,
        patterns: &[String],
    ) -> Option<PermissionDecision> {
        let inner = self.inner.lock().expect("permission cache poisoned");
        let decisions = inner.decisions.get(orchestrator_id)?;

        let matches = |set: &HashSet<DecisionKey>| {
            patterns
                .iter()
                .any(|p| set.contains(&(permission_type.to_string(), p.clone())))
        };

        if matches(&decisions.deny) {
            Some(PermissionDecision::Deny)
        } else if matches(&decisions.allow) {
            Some(PermissionDecision::Allow)
        } else {
            None
        }
    }
}

/// Pattern normalization: string → [string]; array → array; absent → [""].
pub fn normalize_patterns(raw: Option<&serde_json::Value>) -> Vec<String> {
    match raw {
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => vec![String::new()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn permission(id: &str, permission_type: &str, pattern: serde_json::Value) -> PermissionRecord {
        PermissionRecord {
            id: id.to_string(),
            session_id: "c1".to_string(),
            permission_type: permission_type.to_string(),
            pattern: Some(pattern),
            metadata: None,
        }
    }

    #[test]
    fn test_normalize_patterns() {
        assert_eq!(normalize_patterns(Some(&json!("git *"))), vec!["git *"]);
        assert_eq!(
            normalize_patterns(Some(&json!(["a", "b"]))),
            vec!["a", "b"]
        );
        assert_eq!(normalize_patterns(None), vec![String::new()]);
        assert_eq!(normalize_patterns(Some(&json!(42))), vec![String::new()]);
    }

    #[test]
    fn test_always_memoizes_allow() {
        let cache = PermissionCache::new();
        cache.capture("o1", &permission("p1", "bash", json!("git *")));
        cache.record_reply("p1", "always");

        assert_eq!(
            cache.lookup("o1", "bash", &["git *".to_string()]),
            Some(PermissionDecision::Allow)
        );
        // Different orchestrator: no decision.
        assert_eq!(cache.lookup("o2", "bash", &["git *".to_string()]), None);
        // Different pattern: no decision.
        assert_eq!(cache.lookup("o1", "bash", &["rm *".to_string()]), None);
    }

    #[test]
    fn test_reject_memoizes_deny() {
        let cache = PermissionCache::new();
        cache.capture("o1", &permission("p1", "bash", json!("rm *")));
        cache.record_reply("p1", "reject");

        assert_eq!(
            cache.lookup("o1", "bash", &["rm *".to_string()]),
            Some(PermissionDecision::Deny)
        );
    }

    #[test]
    fn test_one_shot_replies_are_ignored() {
        let cache = PermissionCache::new();
        cache.capture("o1", &permission("p1", "bash", json!("git *")));
        cache.record_reply("p1", "once");

        assert_eq!(cache.lookup("o1", "bash", &["git *".to_string()]), None);
    }

    #[test]
    fn test_reply_without_capture_is_ignored() {
        let cache = PermissionCache::new();
        cache.record_reply("ghost", "always");
        assert_eq!(cache.lookup("o1", "bash", &[String::new()]), None);
    }

    #[test]
    fn test_allow_and_deny_displace_each_other() {
        let cache = PermissionCache::new();
        cache.capture("o1", &permission("p1", "bash", json!("git *")));
        cache.record_reply("p1", "always");

        cache.capture("o1", &permission("p2", "bash", json!("git *")));
        cache.record_reply("p2", "reject");
        assert_eq!(
            cache.lookup("o1", "bash", &["git *".to_string()]),
            Some(PermissionDecision::Deny)
        );

        cache.capture("o1", &permission("p3", "bash", json!("git *")));
        cache.record_reply("p3", "always");
        assert_eq!(
            cache.lookup("o1", "bash", &["git *".to_string()]),
            Some(PermissionDecision::Allow)
        );
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let cache = PermissionCache::new();
        cache.capture("o1", &permission("p1", "edit", json!("src/*")));
        cache.record_reply("p1", "always");
        cache.capture("o1", &permission("p2", "edit", json!("secrets/*")));
        cache.record_reply("p2", "reject");

        // A request matching both sets resolves to deny.
        assert_eq!(
            cache.lookup(
                "o1",
                "edit",
                &["src/*".to_string(), "secrets/*".to_string()]
            ),
            Some(PermissionDecision::Deny)
        );
    }

    #[test]
    fn test_absent_pattern_uses_empty_key() {
        let cache = PermissionCache::new();
        let mut record = permission("p1", "network", json!(null));
        record.pattern = None;
        cache.capture("o1", &record);
        cache.record_reply("p1", "always");

        assert_eq!(
            cache.lookup("o1", "network", &[String::new()]),
            Some(PermissionDecision::Allow)
        );
    }
}
