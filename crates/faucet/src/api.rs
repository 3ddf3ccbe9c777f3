//! HTTP ingress for chat events

use crate::dispatcher::Dispatcher;
use crate::error::{FaucetError, FaucetResult};
use crate::notify::ChatContext;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Chat message delivered by the chat gateway
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageEvent {
    #[serde(flatten)]
    pub context: ChatContext,
    pub content: String,
}

/// Shared handler state
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub bot_token: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/messages", post(message_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn authorize(headers: &HeaderMap, token: &str) -> FaucetResult<()> {
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("Bot ")))
        .ok_or(FaucetError::Unauthorized)?;

    if presented.trim() != token {
        return Err(FaucetError::Unauthorized);
    }
    Ok(())
}

/// Message handler
pub async fn message_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(event): Json<MessageEvent>,
) -> FaucetResult<impl IntoResponse> {
    authorize(&headers, &state.bot_token)?;

    debug!(
        "Message {} from {} in {}",
        event.context.message_id, event.context.author_id, event.context.channel_id
    );
    state
        .dispatcher
        .handle_message(&event.context, &event.content)
        .await;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "accepted",
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    ))
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Root handler with info
pub async fn root_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "Trickle Faucet",
        "version": env!("CARGO_PKG_VERSION"),
        "chains": state.dispatcher.prefixes(),
        "endpoints": {
            "POST /api/messages": "Deliver a chat message",
            "GET /health": "Health check"
        }
    }))
}
