use super::{PrefixCachePolicy, RoutingDecision, RoutingPolicy};
use crate::error::Result;
use crate::models::RoutingFingerprint;
use crate::registry::EndpointRegistry;
use crate::workflow_manager::WorkflowManager;
use async_trait::async_trait;
use std::sync::Arc;

/// Pins the workflow's first request to the least-loaded endpoint and
/// routes every subsequent request from any agent in that workflow to the
/// same place, so multi-agent pipelines batch onto one engine's KV cache.
///
/// Requests with no workflow metadata attached fall back to the
/// prefix/cache-aware policy rather than erroring, since workflow pinning
/// has nothing to key off for them.
pub struct WorkflowAwarePolicy {
    registry: Arc<EndpointRegistry>,
    workflow_manager: Arc<WorkflowManager>,
    fallback: Arc<PrefixCachePolicy>,
}

impl WorkflowAwarePolicy {
    pub fn new(registry: Arc<EndpointRegistry>, workflow_manager: Arc<WorkflowManager>, fallback: Arc<PrefixCachePolicy>) -> Self {
        Self {
            registry,
            workflow_manager,
            fallback,
        }
    }
}

#[async_trait]
impl RoutingPolicy for WorkflowAwarePolicy {
    async fn select(&self, fingerprint: &RoutingFingerprint, exclude: &[String]) -> Result<RoutingDecision> {
        let Some(workflow) = fingerprint.workflow.as_ref() else {
            return self.fallback.select(fingerprint, exclude).await;
        };

        // Surface registry emptiness up front with the expected error kind
        // before taking the per-workflow lock inside assign_engine.
        self.registry.list_for_model(&fingerprint.model)?;

        let already_pinned = self.workflow_manager.get_engine(&workflow.workflow_id).await.is_some();
        let endpoint_url = self
            .workflow_manager
            .assign_engine(&workflow.workflow_id, &workflow.agent_id, &fingerprint.model, exclude)
            .await?;

        Ok(RoutingDecision {
            endpoint_url,
            decode_endpoint_url: None,
            cache_hit: already_pinned,
        })
    }

    fn name(&self) -> &'static str {
        "workflow_aware"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::models::{Endpoint, WorkflowFingerprint};
    use crate::stats_collector::StatsCollector;
    use std::time::Duration;

    fn fallback(registry: Arc<EndpointRegistry>) -> Arc<PrefixCachePolicy> {
        Arc::new(PrefixCachePolicy::new(
            registry,
            StatsCollector::new(Duration::from_secs(30), Duration::from_secs(60)),
        ))
    }

    #[tokio::test]
    async fn subsequent_agents_reuse_pinned_engine() {
        let registry = EndpointRegistry::new(
            vec![Endpoint::new("http://a", vec!["m".into()]), Endpoint::new("http://b", vec!["m".into()])],
            Duration::from_secs(60),
        );
        let stats = StatsCollector::new(Duration::from_secs(30), Duration::from_secs(60));
        let message_bus = crate::messages::MessageBus::new(10);
        let manager = WorkflowManager::new(RouterConfig::default(), registry.clone(), stats, message_bus);
        let policy = WorkflowAwarePolicy::new(registry.clone(), manager, fallback(registry));

        let fp1 = RoutingFingerprint {
            model: "m".into(),
            session_key: None,
            workflow: Some(WorkflowFingerprint {
                workflow_id: "w1".into(),
                agent_id: "planner".into(),
            }),
            prefix_hash: None,
        };
        let fp2 = RoutingFingerprint {
            workflow: Some(WorkflowFingerprint {
                workflow_id: "w1".into(),
                agent_id: "executor".into(),
            }),
            ..fp1.clone()
        };

        let first = policy.select(&fp1, &[]).await.unwrap();
        assert!(!first.cache_hit);
        let second = policy.select(&fp2, &[]).await.unwrap();
        assert_eq!(first.endpoint_url, second.endpoint_url);
        assert!(second.cache_hit);
    }

    #[tokio::test]
    async fn missing_workflow_metadata_falls_back_to_prefix_cache() {
        let registry = EndpointRegistry::new(
            vec![Endpoint::new("http://a", vec!["m".into()])],
            Duration::from_secs(60),
        );
        let stats = StatsCollector::new(Duration::from_secs(30), Duration::from_secs(60));
        let message_bus = crate::messages::MessageBus::new(10);
        let manager = WorkflowManager::new(RouterConfig::default(), registry.clone(), stats, message_bus);
        let policy = WorkflowAwarePolicy::new(registry.clone(), manager, fallback(registry));

        let fp = RoutingFingerprint {
            model: "m".into(),
            session_key: None,
            workflow: None,
            prefix_hash: Some(7),
        };
        let decision = policy.select(&fp, &[]).await.unwrap();
        assert_eq!(decision.endpoint_url, "http://a");
    }
}
