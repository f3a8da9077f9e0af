//! Inter-agent message and mailbox types for the Message Bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// One inter-agent payload. `ttl_seconds` is optional; a message with no
/// TTL never expires on its own (only mailbox/workflow eviction removes
/// it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: Uuid,
    pub workflow_id: String,
    pub source_agent_id: String,
    pub target_agent_id: String,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: Option<u64>,
}

impl AgentMessage {
    pub fn is_expired(&self) -> bool {
        match self.ttl_seconds {
            None => false,
            Some(ttl) => {
                Utc::now().signed_duration_since(self.created_at) > chrono::Duration::seconds(ttl as i64)
            }
        }
    }
}

/// A bounded FIFO mailbox for one `(workflow_id, agent_id)` pair.
///
/// Overflow is producer-side backpressure: a full mailbox rejects new
/// sends rather than dropping the oldest message, which would violate
/// the ordering guarantee callers rely on.
#[derive(Debug)]
pub struct AgentMailbox {
    pub workflow_id: String,
    pub agent_id: String,
    capacity: usize,
    messages: VecDeque<AgentMessage>,
    pub last_activity: DateTime<Utc>,
}

impl AgentMailbox {
    pub fn new(workflow_id: impl Into<String>, agent_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            agent_id: agent_id.into(),
            capacity,
            messages: VecDeque::new(),
            last_activity: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }

    /// Enqueues a message, returning `false` if the mailbox is full.
    pub fn push(&mut self, message: AgentMessage) -> bool {
        if self.is_full() {
            return false;
        }
        self.last_activity = Utc::now();
        self.messages.push_back(message);
        true
    }

    /// Drains up to `max_messages` non-expired messages in FIFO order,
    /// silently discarding any expired messages encountered along the way.
    pub fn drain(&mut self, max_messages: usize) -> Vec<AgentMessage> {
        let mut drained = Vec::new();
        while drained.len() < max_messages {
            match self.messages.pop_front() {
                None => break,
                Some(msg) if msg.is_expired() => continue,
                Some(msg) => drained.push(msg),
            }
        }
        if !self.messages.is_empty() || !drained.is_empty() {
            self.last_activity = Utc::now();
        }
        drained
    }

    pub fn has_deliverable_message(&self) -> bool {
        self.messages.iter().any(|m| !m.is_expired())
    }

    pub fn idle_for(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.last_activity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(target: &str) -> AgentMessage {
        AgentMessage {
            id: Uuid::new_v4(),
            workflow_id: "w1".into(),
            source_agent_id: "a1".into(),
            target_agent_id: target.into(),
            message_type: "note".into(),
            payload: serde_json::json!({"k": 1}),
            created_at: Utc::now(),
            ttl_seconds: None,
        }
    }

    #[test]
    fn push_rejects_when_full() {
        let mut mailbox = AgentMailbox::new("w1", "a2", 2);
        assert!(mailbox.push(msg("a2")));
        assert!(mailbox.push(msg("a2")));
        assert!(!mailbox.push(msg("a2")));
        assert_eq!(mailbox.len(), 2);
    }

    #[test]
    fn drain_is_fifo_and_skips_expired() {
        let mut mailbox = AgentMailbox::new("w1", "a2", 10);
        let mut expired = msg("a2");
        expired.ttl_seconds = Some(0);
        expired.created_at = Utc::now() - chrono::Duration::seconds(5);
        mailbox.push(expired);
        mailbox.push(msg("a2"));
        mailbox.push(msg("a2"));

        let drained = mailbox.drain(10);
        assert_eq!(drained.len(), 2);
    }
}
