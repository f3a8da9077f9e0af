//! Request Proxy — turns a routing decision into an actual upstream call,
//! with retry-on-transient-failure and streaming passthrough.
//!
//! One pooled client is built once and reused for every upstream call
//! rather than per-request construction.

mod counting_stream;

pub use counting_stream::CountingStream;

use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::models::{RoutingFingerprint, WorkflowFingerprint};
use crate::policies::{RoutingDecision, RoutingPolicy};
use crate::registry::EndpointRegistry;
use crate::stats_collector::StatsCollector;
use crate::workflow_manager::WorkflowManager;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RequestProxy {
    config: RouterConfig,
    client: reqwest::Client,
    policy: Box<dyn RoutingPolicy>,
    registry: Arc<EndpointRegistry>,
    stats: Arc<StatsCollector>,
    workflow_manager: Arc<WorkflowManager>,
}

/// What a completed proxy attempt produced: either a buffered response body
/// (non-streaming requests) or a token-counting wrapper around the upstream
/// byte stream (the API layer wraps this with `axum::body::Body::wrap_stream`,
/// keeping axum types out of this module). `cache_hit` is carried alongside
/// the buffered body so the API layer can feed the Workflow Manager's
/// cache-hit counter once it has parsed the real token usage out of the body.
pub enum ProxyOutcome {
    Buffered {
        endpoint_url: String,
        body: bytes::Bytes,
        cache_hit: bool,
        workflow_id: Option<String>,
    },
    Stream {
        endpoint_url: String,
        body: CountingStream,
    },
}

impl RequestProxy {
    pub fn new(
        config: RouterConfig,
        policy: Box<dyn RoutingPolicy>,
        registry: Arc<EndpointRegistry>,
        stats: Arc<StatsCollector>,
        workflow_manager: Arc<WorkflowManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(300))
                .build()
                .expect("failed to build upstream client"),
            config,
            policy,
            registry,
            stats,
            workflow_manager,
        })
    }

    /// Builds the routing fingerprint for a chat-completion-shaped request.
    pub fn fingerprint(
        &self,
        model: &str,
        prompt_text: &str,
        session_key: Option<String>,
        workflow: Option<WorkflowFingerprint>,
    ) -> RoutingFingerprint {
        const PREFIX_CHARS: usize = 256;
        let prefix_hash = if prompt_text.is_empty() {
            None
        } else {
            Some(RoutingFingerprint::hash_prefix(prompt_text, PREFIX_CHARS))
        };
        RoutingFingerprint {
            model: model.to_string(),
            session_key,
            workflow,
            prefix_hash,
        }
    }

    /// Dispatches one request body to the engine chosen by the configured
    /// policy, retrying against a different candidate on transient upstream
    /// failure up to `retry_budget` additional attempts.
    pub async fn dispatch(
        &self,
        fingerprint: &RoutingFingerprint,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<ProxyOutcome> {
        let mut attempts_left = self.config.retry_budget + 1;
        let mut tried: Vec<String> = Vec::new();
        let mut last_error = None;

        while attempts_left > 0 {
            attempts_left -= 1;

            let decision = self.policy.select(fingerprint, &tried).await?;
            if tried.contains(&decision.endpoint_url) && attempts_left > 0 {
                // Every candidate is already excluded (single-endpoint pool);
                // the policy fell back to the full set. Treat this as
                // exhausting the retry budget rather than looping forever.
                continue;
            }
            tried.push(decision.endpoint_url.clone());

            match self.send_once(fingerprint, &decision, body, stream).await {
                Ok(outcome) => {
                    self.record_outcome(&decision);
                    return Ok(outcome);
                }
                Err(RouterError::UpstreamTransient { url, reason }) => {
                    warn!(url, reason, attempts_left, "transient upstream failure, retrying");
                    last_error = Some(RouterError::UpstreamTransient { url, reason });
                    continue;
                }
                Err(other) => return Err(other),
            }
        }

        Err(last_error.unwrap_or_else(|| RouterError::AllBackendsUnhealthy {
            model: fingerprint.model.clone(),
        }))
    }

    async fn send_once(
        &self,
        fingerprint: &RoutingFingerprint,
        decision: &RoutingDecision,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<ProxyOutcome> {
        let handshake_id = if decision.decode_endpoint_url.is_some() {
            Some(uuid::Uuid::new_v4().to_string())
        } else {
            None
        };

        if let (Some(handshake_id), Some(_)) = (&handshake_id, &decision.decode_endpoint_url) {
            // Disaggregated prefill/decode: the prefill node only needs to
            // populate its KV cache, so its own response is discarded; the
            // client-facing response comes from the decode node.
            self.handshake_call(&decision.endpoint_url, "sender", handshake_id, body).await?;
        }

        let decode_url = decision.decode_endpoint_url.clone();
        let (target_url, role) = match &decode_url {
            Some(decode_url) => (decode_url.clone(), Some("receiver")),
            None => (decision.endpoint_url.clone(), None),
        };

        let path = format!("{}/v1/chat/completions", target_url.trim_end_matches('/'));
        let mut request = self.client.post(&path).json(body);
        if let (Some(role), Some(handshake_id)) = (role, &handshake_id) {
            request = request.header("x-router-role", role).header("x-router-handshake", handshake_id);
        }
        let response = request.send().await.map_err(|e| classify_send_error(&target_url, e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RouterError::UpstreamTransient {
                url: target_url,
                reason: format!("status {status}"),
            });
        }
        if status.is_client_error() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RouterError::UpstreamPermanent {
                url: target_url,
                status: status.as_u16(),
                body: body_text,
            });
        }

        let workflow_id = fingerprint.workflow.as_ref().map(|w| w.workflow_id.clone());
        if stream {
            let prompt_tokens = estimate_prompt_tokens(body);
            Ok(ProxyOutcome::Stream {
                endpoint_url: target_url.clone(),
                body: CountingStream::new(
                    response.bytes_stream(),
                    target_url,
                    self.stats.clone(),
                    self.workflow_manager.clone(),
                    workflow_id,
                    decision.cache_hit,
                    prompt_tokens,
                ),
            })
        } else {
            let bytes = response.bytes().await.map_err(|e| classify_send_error(&target_url, e))?;
            Ok(ProxyOutcome::Buffered {
                endpoint_url: target_url,
                body: bytes,
                cache_hit: decision.cache_hit,
                workflow_id,
            })
        }
    }

    /// Performs the prefill-side handshake call for a disaggregated request:
    /// fire the prompt at the prefill node so it populates its KV cache,
    /// tagged with the shared handshake id the decode node is expected to
    /// correlate against. The prefill response body itself carries no tokens
    /// the client needs, so it is discarded once received.
    async fn handshake_call(
        &self,
        endpoint_url: &str,
        role: &str,
        handshake_id: &str,
        body: &serde_json::Value,
    ) -> Result<()> {
        let path = format!("{}/v1/chat/completions", endpoint_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&path)
            .header("x-router-role", role)
            .header("x-router-handshake", handshake_id)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_send_error(endpoint_url, e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RouterError::UpstreamTransient {
                url: endpoint_url.to_string(),
                reason: format!("status {status}"),
            });
        }
        if status.is_client_error() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RouterError::UpstreamPermanent {
                url: endpoint_url.to_string(),
                status: status.as_u16(),
                body: body_text,
            });
        }
        Ok(())
    }

    fn record_outcome(&self, decision: &RoutingDecision) {
        info!(
            endpoint = %decision.endpoint_url,
            policy = self.policy.name(),
            cache_hit = decision.cache_hit,
            "request routed"
        );
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }
}

/// Rough prompt-token estimate (chars/4) used only to seed `RequestStats`
/// for the streaming path, where no upstream `usage` field is available
/// until the stream finishes (and many engines omit it even then). The
/// buffered path uses the engine's own reported `usage` instead.
fn estimate_prompt_tokens(body: &serde_json::Value) -> u32 {
    let chars: usize = body
        .get("messages")
        .and_then(|m| m.as_array())
        .map(|messages| {
            messages
                .iter()
                .filter_map(|m| m.get("content").and_then(|c| c.as_str()))
                .map(|s| s.len())
                .sum()
        })
        .unwrap_or(0);
    (chars / 4).try_into().unwrap_or(u32::MAX)
}

fn classify_send_error(url: &str, error: reqwest::Error) -> RouterError {
    if error.is_timeout() || error.is_connect() {
        RouterError::UpstreamTransient {
            url: url.to_string(),
            reason: error.to_string(),
        }
    } else {
        RouterError::Http(error)
    }
}
