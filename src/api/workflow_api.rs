//! `/v1/workflows/*` — the agent-messaging and workflow-introspection
//! surface multi-agent callers use alongside the OpenAI-compatible routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::handlers::ApiState;
use super::types::create_error_response;
use crate::error::RouterError;
use crate::models::AgentMessage;

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub source_agent_id: String,
    pub target_agent_id: String,
    pub message_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

pub async fn send_message(
    State(state): State<ApiState>,
    Path(workflow_id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> Response {
    let message = AgentMessage {
        id: uuid::Uuid::new_v4(),
        workflow_id: workflow_id.clone(),
        source_agent_id: body.source_agent_id,
        target_agent_id: body.target_agent_id,
        message_type: body.message_type,
        payload: body.payload,
        created_at: chrono::Utc::now(),
        ttl_seconds: body.ttl_seconds,
    };

    match state.message_bus.send(message.clone()).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(serde_json::json!({ "id": message.id }))).into_response(),
        Err(e) => workflow_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReceiveQuery {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Long-poll timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_max_messages() -> usize {
    32
}

fn default_timeout() -> u64 {
    20
}

#[derive(Debug, Serialize)]
pub struct ReceiveResponse {
    pub messages: Vec<AgentMessage>,
}

pub async fn receive_messages(
    State(state): State<ApiState>,
    Path((workflow_id, agent_id)): Path<(String, String)>,
    Query(query): Query<ReceiveQuery>,
) -> Response {
    let messages = state
        .message_bus
        .receive(&workflow_id, &agent_id, query.max_messages, Duration::from_secs(query.timeout))
        .await;
    Json(ReceiveResponse { messages }).into_response()
}

pub async fn workflow_status(State(state): State<ApiState>, Path(workflow_id): Path<String>) -> Response {
    match state.workflow_manager.snapshot(&workflow_id).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => workflow_error_response(RouterError::UnknownWorkflow(workflow_id)),
    }
}

pub async fn fleet_stats(State(state): State<ApiState>) -> Response {
    let backends = state
        .stats
        .all()
        .into_iter()
        .map(|(url, stats)| serde_json::json!({ "url": url, "stats": stats }))
        .collect::<Vec<_>>();
    Json(serde_json::json!({
        "backends": backends,
        "active_workflows": state.workflow_manager.active_workflow_count(),
        "policy": state.proxy.policy_name(),
    }))
    .into_response()
}

fn workflow_error_response(error: RouterError) -> Response {
    let status = match error {
        RouterError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
        RouterError::UnknownWorkflow(_) | RouterError::UnknownAgent { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(create_error_response(error.to_string(), error.kind()))).into_response()
}
