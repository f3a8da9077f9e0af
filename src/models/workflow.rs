//! WorkflowContext — per-workflow affinity, TTL, and cache-hit bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// How agents within a workflow share context. `Broadcast` is accepted and
/// stored but intentionally left a no-op in the dispatch path — see
/// `DESIGN.md` for the Open Question this resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextSharingStrategy {
    #[default]
    Auto,
    Broadcast,
    Selective,
    None,
}

/// Workflow metadata as it arrives on a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub workflow_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub workflow_priority: Option<i32>,
    #[serde(default)]
    pub context_sharing_strategy: Option<ContextSharingStrategy>,
}

/// Per-agent bookkeeping inside a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentActivity {
    pub last_activity: DateTime<Utc>,
}

/// The router's live view of one workflow: its pinned engine(s), member
/// agents, and counters.
///
/// Invariant: once `pinned_engine` is `Some`, every agent request routes to
/// that engine until the workflow expires or the engine leaves the
/// Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub workflow_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub ttl_seconds: u64,
    /// The engine this workflow's requests are pinned to (workflow-aware /
    /// session-sticky style routing; `None` until first assignment).
    pub pinned_engine: Option<String>,
    /// For disaggregated-prefill routing the prefill and decode pins are
    /// independent and may differ.
    pub pinned_prefill_engine: Option<String>,
    pub pinned_decode_engine: Option<String>,
    pub agents: HashMap<String, AgentActivity>,
    pub request_count: u64,
    pub cache_hit_count: u64,
    pub priority: Option<i32>,
    pub context_sharing_strategy: ContextSharingStrategy,
}

impl WorkflowContext {
    pub fn new(workflow_id: impl Into<String>, ttl_seconds: u64) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            created_at: now,
            last_activity: now,
            ttl_seconds,
            pinned_engine: None,
            pinned_prefill_engine: None,
            pinned_decode_engine: None,
            agents: HashMap::new(),
            request_count: 0,
            cache_hit_count: 0,
            priority: None,
            context_sharing_strategy: ContextSharingStrategy::Auto,
        }
    }

    pub fn touch_agent(&mut self, agent_id: &str) {
        let now = Utc::now();
        self.last_activity = now;
        self.agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentActivity { last_activity: now })
            .last_activity = now;
    }

    pub fn is_expired(&self) -> bool {
        let ttl = chrono::Duration::seconds(self.ttl_seconds as i64);
        Utc::now().signed_duration_since(self.last_activity) > ttl
    }

    pub fn active_agent_ids(&self) -> HashSet<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn cache_hit_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.cache_hit_count as f64 / self.request_count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_workflow_has_no_pin() {
        let ctx = WorkflowContext::new("w1", 3600);
        assert!(ctx.pinned_engine.is_none());
        assert_eq!(ctx.request_count, 0);
    }

    #[test]
    fn expiry_depends_on_ttl() {
        let mut ctx = WorkflowContext::new("w1", 1);
        ctx.last_activity = Utc::now() - chrono::Duration::seconds(5);
        assert!(ctx.is_expired());
    }

    #[test]
    fn cache_hit_rate_is_ratio() {
        let mut ctx = WorkflowContext::new("w1", 3600);
        ctx.request_count = 4;
        ctx.cache_hit_count = 3;
        assert!((ctx.cache_hit_rate() - 0.75).abs() < 1e-9);
    }
}
