//! Router configuration.
//!
//! Recognized options mirror the router's configuration table. `clap` provides
//! the CLI surface (with `env` fallback on every flag) and `RouterConfig` is
//! the single source of truth consulted everywhere else in the crate — no
//! component re-parses an environment variable of its own.

use clap::{Parser, ValueEnum};
use std::time::Duration;

/// Which selection strategy the running process uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum RoutingLogic {
    Roundrobin,
    Session,
    Prefix,
    WorkflowAware,
    DisaggregatedPrefill,
}

/// Where the Endpoint Registry learns backends from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum ServiceDiscoveryMode {
    Static,
    K8s,
}

/// CLI / environment configuration for the router process.
///
/// ## Rust Learning Notes:
///
/// `clap`'s `derive` feature turns this struct definition into a complete
/// argument parser: each field becomes a `--flag`, `#[arg(env = "...")]`
/// additionally reads the named environment variable when the flag is
/// absent, and `Parser::parse()` does validation and `--help` generation
/// for free.
#[derive(Parser, Debug, Clone)]
#[command(name = "fleet-router")]
#[command(about = "Cache-aware router for a fleet of LLM inference engines")]
pub struct RouterConfig {
    /// Routing strategy.
    #[arg(long, env = "ROUTING_LOGIC", value_enum, default_value = "prefix")]
    pub routing_logic: RoutingLogic,

    /// Discovery source for backends.
    #[arg(
        long,
        env = "SERVICE_DISCOVERY",
        value_enum,
        default_value = "static"
    )]
    pub service_discovery: ServiceDiscoveryMode,

    /// Comma-separated URL list (static discovery mode).
    #[arg(long, env = "STATIC_BACKENDS", value_delimiter = ',')]
    pub static_backends: Vec<String>,

    /// Comma-separated model names, one set per backend (static discovery mode).
    #[arg(long, env = "STATIC_MODELS", value_delimiter = ',')]
    pub static_models: Vec<String>,

    /// Cluster-controller URL used by `k8s` discovery.
    #[arg(long, env = "CONTROLLER_URL")]
    pub controller_url: Option<String>,

    /// Request header carrying the session-sticky key.
    #[arg(long, env = "SESSION_HEADER", default_value = "X-User-Id")]
    pub session_header: String,

    /// Seconds before an idle workflow is evicted.
    #[arg(long, env = "WORKFLOW_TTL", default_value_t = 3600)]
    pub workflow_ttl_seconds: u64,

    /// Cap on active workflows.
    #[arg(long, env = "MAX_WORKFLOWS", default_value_t = 1000)]
    pub max_workflows: usize,

    /// Per-mailbox capacity.
    #[arg(long, env = "MAX_MESSAGE_QUEUE_SIZE", default_value_t = 1000)]
    pub max_message_queue_size: usize,

    /// Locality bonus in [0,1] for workflow-aware scoring.
    #[arg(long, env = "BATCHING_PREFERENCE", default_value_t = 0.8)]
    pub batching_preference: f64,

    /// Seconds between stats scrapes.
    #[arg(long, env = "ENGINE_SCRAPE_INTERVAL", default_value_t = 30)]
    pub engine_scrape_interval_seconds: u64,

    /// Seconds of recent requests kept for QPS/latency derivation.
    #[arg(long, env = "REQUEST_STATS_WINDOW", default_value_t = 60)]
    pub request_stats_window_seconds: u64,

    /// Weight of GPU utilization in the load score.
    #[arg(long, env = "LOAD_WEIGHT_GPU", default_value_t = 0.4)]
    pub load_weight_gpu: f64,

    /// Weight of KV-cache memory fraction in the load score.
    #[arg(long, env = "LOAD_WEIGHT_MEMORY", default_value_t = 0.3)]
    pub load_weight_memory: f64,

    /// Weight of normalized QPS in the load score.
    #[arg(long, env = "LOAD_WEIGHT_QPS", default_value_t = 0.3)]
    pub load_weight_qps: f64,

    /// Denominator used to normalize QPS into [0,1]-ish range.
    #[arg(long, env = "QPS_NORMALIZATION", default_value_t = 100.0)]
    pub qps_normalization: f64,

    /// Endpoint labels (comma-separated) identifying prefill engines.
    #[arg(long, env = "PREFILL_MODEL_LABELS", value_delimiter = ',')]
    pub prefill_model_labels: Vec<String>,

    /// Endpoint labels (comma-separated) identifying decode engines.
    #[arg(long, env = "DECODE_MODEL_LABELS", value_delimiter = ',')]
    pub decode_model_labels: Vec<String>,

    /// Number of different backends an upstream-transient failure may
    /// retry against before giving up. Zero means no retry.
    #[arg(long, env = "RETRY_BUDGET", default_value_t = 0)]
    pub retry_budget: u32,

    /// Workflow cleanup tick cadence, in seconds.
    #[arg(long, env = "CLEANUP_INTERVAL", default_value_t = 60)]
    pub cleanup_interval_seconds: u64,

    /// Host to bind the HTTP server on.
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the HTTP server on.
    #[arg(long, env = "SERVER_PORT", default_value_t = 8080)]
    pub port: u16,
}

impl RouterConfig {
    pub fn workflow_ttl(&self) -> Duration {
        Duration::from_secs(self.workflow_ttl_seconds)
    }

    pub fn engine_scrape_interval(&self) -> Duration {
        Duration::from_secs(self.engine_scrape_interval_seconds)
    }

    pub fn request_stats_window(&self) -> Duration {
        Duration::from_secs(self.request_stats_window_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    /// Staleness bound used by the Registry: twice the scrape interval.
    pub fn staleness_bound(&self) -> Duration {
        self.engine_scrape_interval() * 2
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            routing_logic: RoutingLogic::Prefix,
            service_discovery: ServiceDiscoveryMode::Static,
            static_backends: Vec::new(),
            static_models: Vec::new(),
            controller_url: None,
            session_header: "X-User-Id".to_string(),
            workflow_ttl_seconds: 3600,
            max_workflows: 1000,
            max_message_queue_size: 1000,
            batching_preference: 0.8,
            engine_scrape_interval_seconds: 30,
            request_stats_window_seconds: 60,
            load_weight_gpu: 0.4,
            load_weight_memory: 0.3,
            load_weight_qps: 0.3,
            qps_normalization: 100.0,
            prefill_model_labels: Vec::new(),
            decode_model_labels: Vec::new(),
            retry_budget: 0,
            cleanup_interval_seconds: 60,
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = RouterConfig::default();
        assert_eq!(cfg.workflow_ttl_seconds, 3600);
        assert_eq!(cfg.max_workflows, 1000);
        assert_eq!(cfg.max_message_queue_size, 1000);
        assert_eq!(cfg.retry_budget, 0);
        assert_eq!(cfg.staleness_bound(), Duration::from_secs(60));
    }
}
