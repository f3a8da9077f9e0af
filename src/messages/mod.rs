//! Message Bus — bounded FIFO mailboxes for inter-agent communication,
//! with long-poll receive.
//!
//! A receiver that finds its mailbox empty awaits a per-mailbox `Notify`
//! with a timeout rather than busy-polling, and a send wakes exactly the
//! waiters for that mailbox.

use crate::error::{Result, RouterError};
use crate::models::{AgentMailbox, AgentMessage};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

struct MailboxSlot {
    mailbox: Mutex<AgentMailbox>,
    notify: Notify,
}

pub struct MessageBus {
    capacity: usize,
    mailboxes: DashMap<(String, String), Arc<MailboxSlot>>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            mailboxes: DashMap::new(),
        })
    }

    fn slot_for(&self, workflow_id: &str, agent_id: &str) -> Arc<MailboxSlot> {
        self.mailboxes
            .entry((workflow_id.to_string(), agent_id.to_string()))
            .or_insert_with(|| {
                Arc::new(MailboxSlot {
                    mailbox: Mutex::new(AgentMailbox::new(workflow_id, agent_id, self.capacity)),
                    notify: Notify::new(),
                })
            })
            .clone()
    }

    /// Enqueues a message in the target agent's mailbox, creating it on
    /// first send. Returns `QueueFull` rather than dropping the oldest
    /// message or blocking the sender.
    pub async fn send(&self, message: AgentMessage) -> Result<()> {
        let slot = self.slot_for(&message.workflow_id, &message.target_agent_id);
        let workflow_id = message.workflow_id.clone();
        let agent_id = message.target_agent_id.clone();
        let mut mailbox = slot.mailbox.lock().await;
        if !mailbox.push(message) {
            return Err(RouterError::QueueFull {
                workflow_id,
                agent_id,
            });
        }
        drop(mailbox);
        slot.notify.notify_waiters();
        Ok(())
    }

    /// Drains up to `max_messages` from the agent's mailbox, long-polling
    /// up to `timeout` if it is currently empty. Returns an empty `Vec` on
    /// timeout rather than an error — an empty inbox is a normal outcome.
    pub async fn receive(
        &self,
        workflow_id: &str,
        agent_id: &str,
        max_messages: usize,
        timeout: Duration,
    ) -> Vec<AgentMessage> {
        let slot = self.slot_for(workflow_id, agent_id);

        // Register for notification before the drain-check, not after, so a
        // send landing between the check and the wait still wakes us: build
        // the `Notified` future and `enable()` it so it starts observing
        // notifications immediately, *then* recheck the mailbox.
        let notified = slot.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        {
            let mut mailbox = slot.mailbox.lock().await;
            let drained = mailbox.drain(max_messages);
            if !drained.is_empty() {
                return drained;
            }
        }

        tokio::select! {
            _ = &mut notified => {}
            _ = tokio::time::sleep(timeout) => {
                debug!(workflow_id, agent_id, "receive long-poll timed out with no message");
            }
        }

        let mut mailbox = slot.mailbox.lock().await;
        mailbox.drain(max_messages)
    }

    pub async fn mailbox_depth(&self, workflow_id: &str, agent_id: &str) -> usize {
        match self.mailboxes.get(&(workflow_id.to_string(), agent_id.to_string())) {
            Some(slot) => slot.mailbox.lock().await.len(),
            None => 0,
        }
    }

    /// Removes every mailbox belonging to a workflow — called when the
    /// Workflow Manager evicts that workflow.
    pub fn remove_workflow(&self, workflow_id: &str) {
        self.mailboxes.retain(|(w, _), _| w != workflow_id);
    }

    /// Sweeps mailboxes idle longer than `idle_timeout` with nothing
    /// deliverable, bounding unbounded growth from one-shot workflows that
    /// sent a message but never registered for cleanup.
    pub async fn sweep_idle(&self, idle_timeout: chrono::Duration) {
        let keys: Vec<(String, String)> = self.mailboxes.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some(slot) = self.mailboxes.get(&key) {
                let mailbox = slot.mailbox.lock().await;
                let stale = !mailbox.has_deliverable_message() && mailbox.idle_for() > idle_timeout;
                drop(mailbox);
                if stale {
                    drop(slot);
                    self.mailboxes.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn msg(workflow_id: &str, target: &str) -> AgentMessage {
        AgentMessage {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            source_agent_id: "sender".into(),
            target_agent_id: target.into(),
            message_type: "note".into(),
            payload: serde_json::json!({}),
            created_at: Utc::now(),
            ttl_seconds: None,
        }
    }

    #[tokio::test]
    async fn send_then_receive_roundtrips() {
        let bus = MessageBus::new(10);
        bus.send(msg("w1", "a1")).await.unwrap();
        let received = bus.receive("w1", "a1", 10, Duration::from_millis(50)).await;
        assert_eq!(received.len(), 1);
    }

    #[tokio::test]
    async fn receive_times_out_on_empty_mailbox() {
        let bus = MessageBus::new(10);
        let received = bus.receive("w1", "a1", 10, Duration::from_millis(20)).await;
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn send_rejects_when_mailbox_full() {
        let bus = MessageBus::new(1);
        bus.send(msg("w1", "a1")).await.unwrap();
        let err = bus.send(msg("w1", "a1")).await.unwrap_err();
        assert_eq!(err.kind(), "queue_full");
    }

    #[tokio::test]
    async fn notify_wakes_pending_receiver() {
        let bus = MessageBus::new(10);
        let receiver = tokio::spawn({
            let bus = bus.clone();
            async move { bus.receive("w1", "a1", 10, Duration::from_secs(2)).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.send(msg("w1", "a1")).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), receiver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.len(), 1);
    }
}
