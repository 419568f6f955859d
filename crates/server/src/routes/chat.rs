//! Chat routes: hand messages produced by business logic to the hub.

use adminhub_shared::{
    ChatMessage, DeliveryResponse, OnlineUsersResponse, SendChatMessageRequest,
    SendChatMessageResponse, SendNotificationRequest, TaskProgressRequest,
};
use axum::{extract::State, Json};

use crate::middleware::bearer::AuthUser;
use crate::routes::ApiError;
use crate::state::AppState;

/// Persist a chat message, then push it to whoever is connected
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<SendChatMessageRequest>,
) -> Result<Json<SendChatMessageResponse>, ApiError> {
    if payload.content.trim().is_empty() {
        return Err(ApiError::bad_request("Message content must not be empty"));
    }

    let msg = ChatMessage::chat(user.user_id, &user.username, payload.content)
        .to(payload.to_id)
        .in_room(payload.room_id);

    let message_id = state.chat_store.save(&msg).await.map_err(|e| {
        tracing::error!("Failed to save chat message: {}", e);
        ApiError::internal(format!("Failed to save message: {e}"))
    })?;
    let msg = msg.with_id(message_id);

    // Delivery is best-effort from here on; the message is already stored.
    let delivered = if payload.member_ids.is_empty() {
        state.hub.dispatch(&msg).await?
    } else {
        let mut members = payload.member_ids;
        members.push(user.user_id);
        members.sort_unstable();
        members.dedup();
        state.hub.dispatch_to_members(&msg, &members).await?
    };

    tracing::debug!(
        message_id,
        from_id = user.user_id,
        delivered,
        "Chat message sent"
    );
    Ok(Json(SendChatMessageResponse {
        message_id,
        delivered,
    }))
}

/// Push a notification toast
pub async fn send_notification(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<SendNotificationRequest>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    if payload.title.trim().is_empty() && payload.content.trim().is_empty() {
        return Err(ApiError::bad_request("Notification needs a title or content"));
    }

    let msg = ChatMessage::notification(payload.title, payload.content, payload.level)
        .sent_by(user.user_id, user.username)
        .to(payload.to_id)
        .in_room(payload.room_id);
    let delivered = state.hub.dispatch(&msg).await?;
    Ok(Json(DeliveryResponse { delivered }))
}

/// Push a task progress update
pub async fn send_task_progress(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<TaskProgressRequest>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    if payload.task_id.trim().is_empty() {
        return Err(ApiError::bad_request("taskId must not be empty"));
    }

    let msg = ChatMessage::task_progress(
        payload.task_id,
        payload.task_name,
        percent(payload.progress),
        payload.status,
    )
    .sent_by(user.user_id, user.username)
    .to(payload.to_id)
    .in_room(payload.room_id);
    let delivered = state.hub.dispatch(&msg).await?;
    Ok(Json(DeliveryResponse { delivered }))
}

fn percent(progress: i64) -> u8 {
    progress.clamp(0, 100) as u8
}

/// List the users currently connected to the hub
pub async fn online_users(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
) -> Json<OnlineUsersResponse> {
    let user_ids = state.hub.online_users().await;
    Json(OnlineUsersResponse {
        count: user_ids.len(),
        user_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_clamped_to_a_percentage() {
        assert_eq!(percent(-5), 0);
        assert_eq!(percent(0), 0);
        assert_eq!(percent(42), 42);
        assert_eq!(percent(100), 100);
        assert_eq!(percent(300), 100);
        assert_eq!(percent(i64::MAX), 100);
    }

    #[test]
    fn task_progress_body_accepts_any_integer() {
        for (raw, expected) in [(300, 300), (-5, -5), (250, 250)] {
            let body = format!(r#"{{"taskId":"t","taskName":"n","progress":{raw}}}"#);
            let req: TaskProgressRequest = serde_json::from_str(&body).unwrap();
            assert_eq!(req.progress, expected);
        }
    }
}
