//! HTTP surface: the OpenAI-compatible completion routes plus the
//! `/v1/workflows/*` agent-messaging routes, assembled into one
//! `axum::Router`.

pub mod handlers;
pub mod types;
pub mod workflow_api;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use handlers::ApiState;

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .route("/v1/workflows/:workflow_id/messages", post(workflow_api::send_message))
        .route(
            "/v1/workflows/:workflow_id/agents/:agent_id/messages",
            get(workflow_api::receive_messages),
        )
        .route("/v1/workflows/:workflow_id", get(workflow_api::workflow_status))
        .route("/v1/workflows/stats", get(workflow_api::fleet_stats))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
