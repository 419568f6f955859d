//! REST payloads and records exchanged around the chat hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::NotificationLevel;

/// One live WebSocket connection as mirrored into durable storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub connection_id: String,
    pub user_id: u64,
    pub username: String,
    pub room_id: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUsersResponse {
    pub count: usize,
    pub user_ids: Vec<u64>,
}

/// Body of `POST /api/v1/chats/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChatMessageRequest {
    pub content: String,
    #[serde(default)]
    pub to_id: u64,
    #[serde(default)]
    pub room_id: String,
    /// Conversation members; when set, delivery goes to exactly these users plus the sender.
    #[serde(default)]
    pub member_ids: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendChatMessageResponse {
    pub message_id: u64,
    pub delivered: usize,
}

/// Body of `POST /api/v1/chats/notifications`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub level: NotificationLevel,
    #[serde(default)]
    pub to_id: u64,
    #[serde(default)]
    pub room_id: String,
}

/// Body of `POST /api/v1/chats/tasks/progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgressRequest {
    pub task_id: String,
    pub task_name: String,
    /// Percent complete. Out-of-range values are clamped to `0..=100` on receipt.
    pub progress: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub to_id: u64,
    #[serde(default)]
    pub room_id: String,
}

/// Outcome of routing a message that did not need persisting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    pub delivered: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub online: usize,
}
