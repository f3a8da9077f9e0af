//! OpenAI-compatible REST handlers: `/v1/chat/completions`, `/v1/models`,
//! `/health`, `/metrics`.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use super::types::{
    create_error_response, current_timestamp, generate_completion_id, ChatCompletionChoice,
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ErrorResponse, ModelInfo,
    ModelsResponse, Usage,
};
use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::messages::MessageBus;
use crate::proxy::{ProxyOutcome, RequestProxy};
use crate::registry::EndpointRegistry;
use crate::stats_collector::StatsCollector;
use crate::workflow_manager::WorkflowManager;

#[derive(Clone)]
pub struct ApiState {
    pub config: RouterConfig,
    pub proxy: Arc<RequestProxy>,
    pub registry: Arc<EndpointRegistry>,
    pub stats: Arc<StatsCollector>,
    pub workflow_manager: Arc<WorkflowManager>,
    pub message_bus: Arc<MessageBus>,
}

pub async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let ready = state.registry.is_ready();
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(HealthBody {
            status: if ready { "ok" } else { "not_ready" },
            backend_count: state.registry.list().len(),
            discovery_degraded: state.registry.is_discovery_degraded(),
            active_workflows: state.workflow_manager.active_workflow_count(),
            policy: state.proxy.policy_name(),
        }),
    )
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    backend_count: usize,
    discovery_degraded: bool,
    active_workflows: usize,
    policy: &'static str,
}

pub async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let backends = state
        .stats
        .all()
        .into_iter()
        .map(|(url, stats)| serde_json::json!({ "url": url, "stats": stats }))
        .collect::<Vec<_>>();
    Json(serde_json::json!({
        "active_workflows": state.workflow_manager.active_workflow_count(),
        "backends": backends,
    }))
}

pub async fn list_models(State(state): State<ApiState>) -> impl IntoResponse {
    let mut seen = std::collections::HashSet::new();
    let data = state
        .registry
        .list()
        .into_iter()
        .flat_map(|e| e.models)
        .filter(|m| seen.insert(m.clone()))
        .map(|id| ModelInfo {
            id,
            object: "model".to_string(),
            owned_by: "fleet-router".to_string(),
        })
        .collect();
    Json(ModelsResponse {
        object: "list".to_string(),
        data,
    })
}

pub async fn chat_completions(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let session_key = headers
        .get(&state.config.session_header)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| request.user.clone());

    let workflow = request
        .workflow_metadata
        .as_ref()
        .map(|w| crate::models::WorkflowFingerprint {
            workflow_id: w.workflow_id.clone(),
            agent_id: w.agent_id.clone(),
        });

    if let Some(w) = &request.workflow_metadata {
        if let Err(e) = state
            .workflow_manager
            .register(&w.workflow_id, &w.agent_id, w.workflow_priority, w.context_sharing_strategy)
            .await
        {
            return error_response(e);
        }
    }

    let fingerprint = state.proxy.fingerprint(&request.model, &request.prompt_text(), session_key, workflow);

    let body = match serde_json::to_value(&request) {
        Ok(v) => v,
        Err(e) => return error_response(RouterError::Serialization(e)),
    };

    match state.proxy.dispatch(&fingerprint, &body, request.stream).await {
        Ok(ProxyOutcome::Buffered { endpoint_url, body, cache_hit, workflow_id }) => {
            match serde_json::from_slice::<ChatCompletionResponse>(&body) {
                Ok(parsed) => {
                    record_stats(&state, &endpoint_url, &parsed.usage, workflow_id, cache_hit);
                    Json(parsed).into_response()
                }
                Err(_) => {
                    // Upstream returned a shape we couldn't parse as a
                    // chat completion; pass the raw body through rather
                    // than synthesizing one, with no token counts to record.
                    record_stats(&state, &endpoint_url, &Usage::default(), workflow_id, cache_hit);
                    Response::builder()
                        .status(StatusCode::OK)
                        .header("content-type", "application/json")
                        .body(Body::from(body))
                        .unwrap_or_else(|_| fallback_response(&request.model))
                }
            }
        }
        Ok(ProxyOutcome::Stream { body, .. }) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/event-stream")
            .header("cache-control", "no-cache")
            .body(Body::wrap_stream(body))
            .unwrap_or_else(|_| fallback_response(&request.model)),
        Err(e) => error_response(e),
    }
}

/// Feeds the engine's own reported token usage into `RequestStats` and, for
/// workflow-tagged requests, the Workflow Manager's cache-hit counter. The
/// streaming path does the equivalent via `CountingStream` since no `usage`
/// field is available until long after the response has started.
fn record_stats(state: &ApiState, endpoint_url: &str, usage: &Usage, workflow_id: Option<String>, cache_hit: bool) {
    state
        .stats
        .record_completed_request(endpoint_url, chrono::Utc::now(), usage.prompt_tokens, usage.completion_tokens);
    if let Some(workflow_id) = workflow_id {
        let workflow_manager = state.workflow_manager.clone();
        tokio::spawn(async move {
            workflow_manager.record_request(&workflow_id, cache_hit).await;
        });
    }
}

fn fallback_response(model: &str) -> Response {
    let response = ChatCompletionResponse {
        id: generate_completion_id(),
        object: "chat.completion".to_string(),
        created: current_timestamp(),
        model: model.to_string(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatMessage {
                role: super::types::ChatRole::Assistant,
                content: String::new(),
                name: None,
            },
            finish_reason: Some("error".to_string()),
        }],
        usage: Usage::default(),
        system_fingerprint: None,
    };
    (StatusCode::BAD_GATEWAY, Json(response)).into_response()
}

fn error_response(error: RouterError) -> Response {
    error!(kind = error.kind(), error = %error, "request failed");
    let status = match error {
        RouterError::NoBackendForModel { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RouterError::AllBackendsUnhealthy { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RouterError::UpstreamTransient { .. } => StatusCode::BAD_GATEWAY,
        RouterError::UpstreamPermanent { status, .. } => {
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST)
        }
        RouterError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
        RouterError::UnknownWorkflow(_) | RouterError::UnknownAgent { .. } => StatusCode::NOT_FOUND,
        RouterError::MisconfiguredRoute(_) => StatusCode::NOT_IMPLEMENTED,
        RouterError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        RouterError::DiscoveryDegraded(_) => StatusCode::SERVICE_UNAVAILABLE,
        RouterError::Http(_) | RouterError::Serialization(_) => StatusCode::BAD_GATEWAY,
        RouterError::Configuration(_) | RouterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body: ErrorResponse = create_error_response(error.to_string(), error.kind());
    (status, Json(body)).into_response()
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(create_error_response("not found", "not_found_error")),
    )
}
