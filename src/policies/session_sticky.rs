use super::{RoutingDecision, RoutingPolicy};
use crate::error::{Result, RouterError};
use crate::models::RoutingFingerprint;
use crate::registry::EndpointRegistry;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Maps the request's session key (from the configured sticky header) to a
/// stable endpoint for as long as that endpoint remains in the Registry.
pub struct SessionStickyPolicy {
    registry: Arc<EndpointRegistry>,
    pins: DashMap<String, String>,
}

impl SessionStickyPolicy {
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        Self {
            registry,
            pins: DashMap::new(),
        }
    }
}

#[async_trait]
impl RoutingPolicy for SessionStickyPolicy {
    async fn select(&self, fingerprint: &RoutingFingerprint, exclude: &[String]) -> Result<RoutingDecision> {
        let all_candidates = self.registry.list_for_model(&fingerprint.model)?;
        let filtered: Vec<_> = all_candidates.iter().filter(|e| !exclude.contains(&e.url)).cloned().collect();
        let candidates = if filtered.is_empty() { all_candidates } else { filtered };

        let session_key = fingerprint.session_key.clone().ok_or_else(|| {
            RouterError::MisconfiguredRoute("session routing requires a session key".to_string())
        })?;

        if let Some(pinned) = self.pins.get(&session_key) {
            if candidates.iter().any(|e| &e.url == pinned.value()) {
                return Ok(RoutingDecision {
                    endpoint_url: pinned.value().clone(),
                    decode_endpoint_url: None,
                    cache_hit: true,
                });
            }
        }

        let chosen = &candidates[fnv_bucket(&session_key, candidates.len())];
        self.pins.insert(session_key, chosen.url.clone());
        Ok(RoutingDecision {
            endpoint_url: chosen.url.clone(),
            decode_endpoint_url: None,
            cache_hit: false,
        })
    }

    fn name(&self) -> &'static str {
        "session_sticky"
    }
}

/// Deterministic bucket index for a session key, so two router replicas
/// with an identical candidate ordering assign the same session to the
/// same initial bucket without sharing state.
fn fnv_bucket(key: &str, bucket_count: usize) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in key.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash as usize) % bucket_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Endpoint;

    #[tokio::test]
    async fn same_session_sticks_to_same_endpoint() {
        let registry = EndpointRegistry::new(
            vec![Endpoint::new("http://a", vec!["m".into()]), Endpoint::new("http://b", vec!["m".into()])],
            std::time::Duration::from_secs(60),
        );
        let policy = SessionStickyPolicy::new(registry);
        let fp = RoutingFingerprint {
            model: "m".into(),
            session_key: Some("user-42".into()),
            workflow: None,
            prefix_hash: None,
        };
        let first = policy.select(&fp, &[]).await.unwrap();
        let second = policy.select(&fp, &[]).await.unwrap();
        assert_eq!(first.endpoint_url, second.endpoint_url);
        assert!(second.cache_hit);
    }

    #[tokio::test]
    async fn missing_session_key_errors() {
        let registry = EndpointRegistry::new(
            vec![Endpoint::new("http://a", vec!["m".into()])],
            std::time::Duration::from_secs(60),
        );
        let policy = SessionStickyPolicy::new(registry);
        let fp = RoutingFingerprint {
            model: "m".into(),
            session_key: None,
            workflow: None,
            prefix_hash: None,
        };
        let err = policy.select(&fp, &[]).await.unwrap_err();
        assert_eq!(err.kind(), "misconfigured_route");
    }
}
