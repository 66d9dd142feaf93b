//! HTTP trigger surface for the inbound mail webhook.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::pipeline::processor::MessageProcessor;
use crate::pipeline::types::InboundEmail;

/// State shared by the trigger routes.
#[derive(Clone)]
pub struct ServerState {
    pub processor: Arc<MessageProcessor>,
}

/// Build the Axum router for the webhook.
pub fn inbound_routes(state: ServerState) -> Router {
    Router::new()
        .route("/inbound", post(inbound))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "finmail-worker"
    }))
}

// ── Inbound ─────────────────────────────────────────────────────────

/// Webhook target for the mail delivery provider.
///
/// Providers retry on non-2xx, and a malformed bank email will not get
/// better on retry, so every processed message answers 200 and reports
/// its outcome in the body.
async fn inbound(
    State(state): State<ServerState>,
    Json(email): Json<InboundEmail>,
) -> impl IntoResponse {
    let outcome = state.processor.process(email).await;
    Json(serde_json::json!({ "status": outcome.label() }))
}
