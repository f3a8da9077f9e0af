//! Routing Policies — the pluggable selection strategies behind `/v1/*`
//! requests.
//!
//! Closed-capability pattern: a single `Box<dyn RoutingPolicy>` is selected
//! once from `RoutingLogic` at startup and never swapped at runtime, so
//! request handling never branches on a `match` over policy kind.

mod disaggregated;
mod prefix_cache;
mod round_robin;
mod session_sticky;
mod workflow_aware;

pub use disaggregated::DisaggregatedPolicy;
pub use prefix_cache::PrefixCachePolicy;
pub use round_robin::RoundRobinPolicy;
pub use session_sticky::SessionStickyPolicy;
pub use workflow_aware::WorkflowAwarePolicy;

use crate::config::RouterConfig;
use crate::error::Result;
use crate::models::RoutingFingerprint;
use crate::registry::EndpointRegistry;
use crate::stats_collector::StatsCollector;
use crate::workflow_manager::WorkflowManager;
use async_trait::async_trait;
use std::sync::Arc;

/// A routing decision: which endpoint(s) a request should be sent to.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub endpoint_url: String,
    /// Present only for the disaggregated-prefill policy: the decode-phase
    /// endpoint, when it differs from `endpoint_url` (the prefill engine).
    pub decode_endpoint_url: Option<String>,
    /// Whether this decision reused a pinned/sticky mapping rather than
    /// picking freshly — feeds the cache-hit-rate counter.
    pub cache_hit: bool,
}

/// One selection strategy. Implementations hold whatever shared state they
/// need (registry handle, stats handle, workflow manager) and are
/// constructed once at startup.
#[async_trait]
pub trait RoutingPolicy: Send + Sync {
    /// `exclude` lists endpoint URLs the caller has already tried and failed
    /// against for this same request, so a retry can route around them
    /// instead of re-selecting the identical candidate.
    async fn select(&self, fingerprint: &RoutingFingerprint, exclude: &[String]) -> Result<RoutingDecision>;

    fn name(&self) -> &'static str;
}

/// Builds the configured policy. Called once during process startup; the
/// result is never swapped afterward (closed-capability selection).
pub fn build_policy(
    config: &RouterConfig,
    registry: Arc<EndpointRegistry>,
    stats: Arc<StatsCollector>,
    workflow_manager: Arc<WorkflowManager>,
) -> Box<dyn RoutingPolicy> {
    use crate::config::RoutingLogic;
    match config.routing_logic {
        RoutingLogic::Roundrobin => Box::new(RoundRobinPolicy::new(registry)),
        RoutingLogic::Session => Box::new(SessionStickyPolicy::new(registry)),
        RoutingLogic::Prefix => Box::new(PrefixCachePolicy::with_config(config.clone(), registry, stats)),
        RoutingLogic::WorkflowAware => {
            let fallback = Arc::new(PrefixCachePolicy::with_config(config.clone(), registry.clone(), stats));
            Box::new(WorkflowAwarePolicy::new(registry, workflow_manager, fallback))
        }
        RoutingLogic::DisaggregatedPrefill => Box::new(DisaggregatedPolicy::new(registry, workflow_manager)),
    }
}
