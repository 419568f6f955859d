//! WebSocket upgrade endpoint for the chat hub.

pub mod pump;

use std::sync::Arc;

use adminhub_shared::ChatMessage;
use axum::{
    extract::{ws::WebSocket, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::auth::{bearer_token, AuthError, Identity};
use crate::hub::{ChatHub, DEFAULT_ROOM};
use crate::routes::ApiError;
use crate::state::AppState;

pub const WS_PATH: &str = "/api/v1/chats/ws";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    pub token: Option<String>,
    pub room_id: Option<String>,
}

/// WebSocket upgrade handler
///
/// The token comes from the `token` query parameter (browsers cannot set headers on a socket),
/// falling back to `Authorization: Bearer`.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| rejected(AuthError::MissingToken))?;

    let identity = state.auth.verify(&token).await.map_err(|e| {
        tracing::warn!("WebSocket auth failed: {}", e);
        rejected(e)
    })?;

    let room_id = params
        .room_id
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_ROOM.to_string());

    tracing::info!(
        user_id = identity.user_id,
        room_id = %room_id,
        "WebSocket connection authenticated"
    );

    let max_size = state.hub.config().max_frame_size;
    let hub = state.hub.clone();
    Ok(ws
        .max_message_size(max_size)
        .max_frame_size(max_size)
        .on_failed_upgrade(|e| tracing::error!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| handle_socket(socket, hub, identity, room_id)))
}

fn rejected(e: AuthError) -> ApiError {
    let ApiError(problem) = e.into();
    ApiError(problem.with_instance(WS_PATH))
}

/// Handle an authenticated WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Arc<ChatHub>, identity: Identity, room_id: String) {
    let (client, rx) = hub.new_client(identity.user_id, identity.username, room_id);
    hub.register(client.clone()).await;

    let join = ChatMessage::join(client.user_id, &client.username, &client.room_id);
    if let Err(e) = hub.dispatch(&join).await {
        tracing::error!("Failed to announce join: {}", e);
    }

    pump::run_connection(socket, hub.clone(), client.clone(), rx).await;

    // A newer connection in the same room replaced this one, so the user never left it.
    if hub.room_of(client.user_id).await.as_deref() == Some(client.room_id.as_str()) {
        return;
    }
    let leave = ChatMessage::leave(client.user_id, &client.username, &client.room_id);
    if let Err(e) = hub.dispatch(&leave).await {
        tracing::error!("Failed to announce leave: {}", e);
    }
}
