use super::{RoutingDecision, RoutingPolicy};
use crate::error::{Result, RouterError};
use crate::models::RoutingFingerprint;
use crate::registry::EndpointRegistry;
use crate::workflow_manager::WorkflowManager;
use async_trait::async_trait;
use std::sync::Arc;

/// Splits a workflow's requests across a prefill-labeled endpoint and a
/// decode-labeled endpoint, so the expensive prompt-processing phase runs
/// on hardware tuned for throughput while the token-by-token phase runs on
/// hardware tuned for latency.
pub struct DisaggregatedPolicy {
    registry: Arc<EndpointRegistry>,
    workflow_manager: Arc<WorkflowManager>,
}

impl DisaggregatedPolicy {
    pub fn new(registry: Arc<EndpointRegistry>, workflow_manager: Arc<WorkflowManager>) -> Self {
        Self {
            registry,
            workflow_manager,
        }
    }
}

#[async_trait]
impl RoutingPolicy for DisaggregatedPolicy {
    async fn select(&self, fingerprint: &RoutingFingerprint, exclude: &[String]) -> Result<RoutingDecision> {
        let workflow = fingerprint.workflow.as_ref().ok_or_else(|| {
            RouterError::MisconfiguredRoute("disaggregated_prefill routing requires workflow_metadata".to_string())
        })?;

        self.registry.list_for_model(&fingerprint.model)?;

        let (prefill, decode) = self
            .workflow_manager
            .assign_prefill_decode(&workflow.workflow_id, &workflow.agent_id, &fingerprint.model, exclude)
            .await?;

        Ok(RoutingDecision {
            endpoint_url: prefill,
            decode_endpoint_url: Some(decode),
            cache_hit: false,
        })
    }

    fn name(&self) -> &'static str {
        "disaggregated_prefill"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::models::{Endpoint, WorkflowFingerprint};
    use crate::stats_collector::StatsCollector;
    use std::collections::HashMap;
    use std::time::Duration;

    fn labeled(url: &str, role: &str) -> Endpoint {
        let mut labels = HashMap::new();
        labels.insert("role".to_string(), role.to_string());
        Endpoint::new(url, vec!["m".into()]).with_labels(labels)
    }

    #[tokio::test]
    async fn splits_prefill_and_decode() {
        let registry = EndpointRegistry::new(
            vec![labeled("http://prefill-1", "prefill"), labeled("http://decode-1", "decode")],
            Duration::from_secs(60),
        );
        let mut config = RouterConfig::default();
        config.prefill_model_labels = vec!["prefill".into()];
        config.decode_model_labels = vec!["decode".into()];
        let stats = StatsCollector::new(Duration::from_secs(30), Duration::from_secs(60));
        let message_bus = crate::messages::MessageBus::new(10);
        let manager = WorkflowManager::new(config, registry.clone(), stats, message_bus);
        let policy = DisaggregatedPolicy::new(registry, manager);

        let fp = RoutingFingerprint {
            model: "m".into(),
            session_key: None,
            workflow: Some(WorkflowFingerprint {
                workflow_id: "w1".into(),
                agent_id: "a1".into(),
            }),
            prefix_hash: None,
        };
        let decision = policy.select(&fp, &[]).await.unwrap();
        assert_eq!(decision.endpoint_url, "http://prefill-1");
        assert_eq!(decision.decode_endpoint_url.as_deref(), Some("http://decode-1"));
    }

    #[tokio::test]
    async fn missing_role_split_errors() {
        let registry = EndpointRegistry::new(vec![Endpoint::new("http://a", vec!["m".into()])], Duration::from_secs(60));
        let stats = StatsCollector::new(Duration::from_secs(30), Duration::from_secs(60));
        let message_bus = crate::messages::MessageBus::new(10);
        let manager = WorkflowManager::new(RouterConfig::default(), registry.clone(), stats, message_bus);
        let policy = DisaggregatedPolicy::new(registry, manager);

        let fp = RoutingFingerprint {
            model: "m".into(),
            session_key: None,
            workflow: Some(WorkflowFingerprint {
                workflow_id: "w1".into(),
                agent_id: "a1".into(),
            }),
            prefix_hash: None,
        };
        let err = policy.select(&fp, &[]).await.unwrap_err();
        assert_eq!(err.kind(), "misconfigured_route");
    }
}
