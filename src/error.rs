//! Crate-wide error taxonomy.
//!
//! Every request-path error carries a stable `kind` so that HTTP handlers
//! (see [`crate::api`]) can map it to a status code without re-deriving
//! intent from a message string.

use thiserror::Error;

/// Errors raised by any router component.
///
/// ## Rust Learning Notes:
///
/// `thiserror`'s `#[error(...)]` generates `Display`; `#[from]` generates
/// `From` so `?` can convert a lower-level error (e.g. `reqwest::Error`)
/// into a `RouterError` automatically at the call site.
#[derive(Error, Debug)]
pub enum RouterError {
    /// The registry's intersection with the requested model is empty.
    #[error("no backend serves model {model}")]
    NoBackendForModel { model: String },

    /// Every candidate endpoint is stale or has recently failed.
    #[error("all backends for model {model} are unhealthy")]
    AllBackendsUnhealthy { model: String },

    /// Upstream connect refused, read timeout, or 5xx — retryable.
    #[error("upstream transient failure at {url}: {reason}")]
    UpstreamTransient { url: String, reason: String },

    /// Upstream returned 4xx; forwarded to the client unchanged.
    #[error("upstream rejected the request at {url}: {status}")]
    UpstreamPermanent { url: String, status: u16, body: String },

    /// A mailbox send was rejected because it is at capacity.
    #[error("mailbox full for workflow {workflow_id} agent {agent_id}")]
    QueueFull {
        workflow_id: String,
        agent_id: String,
    },

    /// No workflow exists with the given id.
    #[error("unknown workflow {0}")]
    UnknownWorkflow(String),

    /// The workflow exists but has no such agent mailbox.
    #[error("unknown agent {agent_id} in workflow {workflow_id}")]
    UnknownAgent {
        workflow_id: String,
        agent_id: String,
    },

    /// A feature was requested that the configured policy doesn't implement.
    #[error("route not configured: {0}")]
    MisconfiguredRoute(String),

    /// Malformed request body or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Cluster controller discovery is unreachable; logged, non-fatal.
    #[error("discovery degraded: {0}")]
    DiscoveryDegraded(String),

    #[error("upstream HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Stable machine-readable tag surfaced in the HTTP error body so
    /// clients can branch on retryability without parsing `message`.
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::NoBackendForModel { .. } => "no_backend_for_model",
            RouterError::AllBackendsUnhealthy { .. } => "all_backends_unhealthy",
            RouterError::UpstreamTransient { .. } => "upstream_transient",
            RouterError::UpstreamPermanent { .. } => "upstream_permanent",
            RouterError::QueueFull { .. } => "queue_full",
            RouterError::UnknownWorkflow(_) => "unknown_workflow",
            RouterError::UnknownAgent { .. } => "unknown_agent",
            RouterError::MisconfiguredRoute(_) => "misconfigured_route",
            RouterError::InvalidRequest(_) => "invalid_request",
            RouterError::DiscoveryDegraded(_) => "discovery_degraded",
            RouterError::Http(_) => "upstream_transient",
            RouterError::Serialization(_) => "invalid_request",
            RouterError::Configuration(_) => "internal_error",
            RouterError::Internal(_) => "internal_error",
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RouterError>;
