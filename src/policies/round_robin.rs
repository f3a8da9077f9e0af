use super::{RoutingDecision, RoutingPolicy};
use crate::error::Result;
use crate::models::RoutingFingerprint;
use crate::registry::EndpointRegistry;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Plain round-robin over the model's candidate set. No affinity of any
/// kind — the baseline every other policy is measured against.
///
/// Maintains a per-model cursor so one busy model cycling through its
/// candidates doesn't perturb the rotation of an unrelated model.
pub struct RoundRobinPolicy {
    registry: Arc<EndpointRegistry>,
    cursors: DashMap<String, AtomicUsize>,
}

impl RoundRobinPolicy {
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        Self {
            registry,
            cursors: DashMap::new(),
        }
    }

    fn next_index(&self, model: &str, candidate_count: usize) -> usize {
        let cursor = self.cursors.entry(model.to_string()).or_insert_with(|| AtomicUsize::new(0));
        cursor.fetch_add(1, Ordering::Relaxed) % candidate_count
    }
}

#[async_trait]
impl RoutingPolicy for RoundRobinPolicy {
    async fn select(&self, fingerprint: &RoutingFingerprint, exclude: &[String]) -> Result<RoutingDecision> {
        let all_candidates = self.registry.list_for_model(&fingerprint.model)?;
        let filtered: Vec<_> = all_candidates.iter().filter(|e| !exclude.contains(&e.url)).collect();
        let candidates = if filtered.is_empty() {
            all_candidates.iter().collect()
        } else {
            filtered
        };
        let index = self.next_index(&fingerprint.model, candidates.len());
        Ok(RoutingDecision {
            endpoint_url: candidates[index].url.clone(),
            decode_endpoint_url: None,
            cache_hit: false,
        })
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
