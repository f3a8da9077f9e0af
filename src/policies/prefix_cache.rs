use super::{RoutingDecision, RoutingPolicy};
use crate::config::RouterConfig;
use crate::error::Result;
use crate::models::{Endpoint, RoutingFingerprint};
use crate::registry::EndpointRegistry;
use crate::stats_collector::StatsCollector;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// The router's own estimate of how much of a candidate's KV cache would
/// already hold this prefix: the full bonus if this endpoint is the one
/// last chosen for that exact prefix hash, nothing otherwise. There is no
/// cheaper signal available without querying the engine's cache directly.
const CACHED_PREFIX_BONUS: f64 = 1.0;

/// Routes by prompt-prefix hash so repeated requests that share a system
/// prompt or few-shot preamble land on the engine most likely to already
/// hold that prefix in its KV cache.
///
/// Scores each candidate as `(expected cached prefix length) - (load
/// penalty)` and picks the maximum, breaking ties by the lowest current
/// running-request count.
pub struct PrefixCachePolicy {
    config: RouterConfig,
    registry: Arc<EndpointRegistry>,
    stats: Arc<StatsCollector>,
    /// Sticky map from prefix hash to the endpoint last chosen for it —
    /// this is the router's own cache-locality memory, independent of
    /// whatever the backend's actual KV cache contains.
    affinity: DashMap<u64, String>,
}

impl PrefixCachePolicy {
    pub fn new(registry: Arc<EndpointRegistry>, stats: Arc<StatsCollector>) -> Self {
        Self::with_config(RouterConfig::default(), registry, stats)
    }

    pub fn with_config(config: RouterConfig, registry: Arc<EndpointRegistry>, stats: Arc<StatsCollector>) -> Self {
        Self {
            config,
            registry,
            stats,
            affinity: DashMap::new(),
        }
    }

    /// `(expected cached prefix length) - (load penalty)` for one candidate.
    fn score(&self, endpoint: &Endpoint, pinned_url: Option<&str>) -> f64 {
        let stats = self.stats.get(&endpoint.url);
        let load_penalty = stats.load_score(
            self.config.load_weight_gpu,
            self.config.load_weight_memory,
            self.config.load_weight_qps,
            self.config.qps_normalization,
        );
        let cache_bonus = if pinned_url == Some(endpoint.url.as_str()) {
            CACHED_PREFIX_BONUS
        } else {
            0.0
        };
        cache_bonus - load_penalty
    }

    fn choose<'a>(&self, candidates: &'a [Endpoint], pinned_url: Option<&str>) -> &'a Endpoint {
        candidates
            .iter()
            .max_by(|a, b| {
                let score_a = self.score(a, pinned_url);
                let score_b = self.score(b, pinned_url);
                score_a
                    .partial_cmp(&score_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        let running_a = self.stats.get(&a.url).running_requests;
                        let running_b = self.stats.get(&b.url).running_requests;
                        running_b.cmp(&running_a)
                    })
            })
            .expect("candidates is non-empty")
    }
}

#[async_trait]
impl RoutingPolicy for PrefixCachePolicy {
    async fn select(&self, fingerprint: &RoutingFingerprint, exclude: &[String]) -> Result<RoutingDecision> {
        let all_candidates = self.registry.list_for_model(&fingerprint.model)?;
        let candidates: Vec<Endpoint> = all_candidates
            .iter()
            .filter(|e| !exclude.contains(&e.url))
            .cloned()
            .collect();
        let candidates = if candidates.is_empty() { all_candidates } else { candidates };

        let Some(prefix_hash) = fingerprint.prefix_hash else {
            // No prompt text to hash (e.g. an empty message list): score
            // purely on load, since there is no affinity to weigh.
            let chosen = self.choose(&candidates, None);
            return Ok(RoutingDecision {
                endpoint_url: chosen.url.clone(),
                decode_endpoint_url: None,
                cache_hit: false,
            });
        };

        let pinned = self.affinity.get(&prefix_hash).map(|v| v.value().clone());
        if let Some(pinned_url) = &pinned {
            if candidates.iter().any(|e| &e.url == pinned_url) {
                return Ok(RoutingDecision {
                    endpoint_url: pinned_url.clone(),
                    decode_endpoint_url: None,
                    cache_hit: true,
                });
            }
        }

        let chosen = self.choose(&candidates, pinned.as_deref());
        let chosen_url = chosen.url.clone();
        self.affinity.insert(prefix_hash, chosen_url.clone());
        Ok(RoutingDecision {
            endpoint_url: chosen_url,
            decode_endpoint_url: None,
            cache_hit: false,
        })
    }

    fn name(&self) -> &'static str {
        "prefix_cache"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Endpoint;
    use std::time::Duration;

    fn stats() -> Arc<StatsCollector> {
        StatsCollector::new(Duration::from_secs(30), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn same_prefix_reuses_endpoint() {
        let registry = EndpointRegistry::new(
            vec![Endpoint::new("http://a", vec!["m".into()]), Endpoint::new("http://b", vec!["m".into()])],
            Duration::from_secs(60),
        );
        let policy = PrefixCachePolicy::new(registry, stats());
        let fp = RoutingFingerprint {
            model: "m".into(),
            session_key: None,
            workflow: None,
            prefix_hash: Some(12345),
        };
        let first = policy.select(&fp, &[]).await.unwrap();
        let second = policy.select(&fp, &[]).await.unwrap();
        assert_eq!(first.endpoint_url, second.endpoint_url);
        assert!(second.cache_hit);
    }

    #[tokio::test]
    async fn missing_prefix_hash_uses_least_loaded_candidate() {
        let registry = EndpointRegistry::new(
            vec![Endpoint::new("http://a", vec!["m".into()])],
            Duration::from_secs(60),
        );
        let policy = PrefixCachePolicy::new(registry, stats());
        let fp = RoutingFingerprint {
            model: "m".into(),
            session_key: None,
            workflow: None,
            prefix_hash: None,
        };
        let decision = policy.select(&fp, &[]).await.unwrap();
        assert_eq!(decision.endpoint_url, "http://a");
    }

    #[tokio::test]
    async fn higher_load_loses_the_tie_when_prefix_unpinned() {
        let registry = EndpointRegistry::new(
            vec![Endpoint::new("http://busy", vec!["m".into()]), Endpoint::new("http://idle", vec!["m".into()])],
            Duration::from_secs(60),
        );
        let s = stats();
        s.record_completed_request("http://busy", chrono::Utc::now(), 10, 5);
        let policy = PrefixCachePolicy::new(registry, s);
        let fp = RoutingFingerprint {
            model: "m".into(),
            session_key: None,
            workflow: None,
            prefix_hash: Some(999),
        };
        let decision = policy.select(&fp, &[]).await.unwrap();
        assert_eq!(decision.endpoint_url, "http://idle");
    }

    #[tokio::test]
    async fn excluded_pinned_endpoint_is_passed_over() {
        let registry = EndpointRegistry::new(
            vec![Endpoint::new("http://a", vec!["m".into()]), Endpoint::new("http://b", vec!["m".into()])],
            Duration::from_secs(60),
        );
        let policy = PrefixCachePolicy::new(registry, stats());
        let fp = RoutingFingerprint {
            model: "m".into(),
            session_key: None,
            workflow: None,
            prefix_hash: Some(42),
        };
        let first = policy.select(&fp, &[]).await.unwrap();
        let retried = policy.select(&fp, &[first.endpoint_url.clone()]).await.unwrap();
        assert_ne!(first.endpoint_url, retried.endpoint_url);
    }
}
