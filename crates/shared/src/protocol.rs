//! Chat hub wire protocol.
//!
//! Every WebSocket text frame carries one JSON object (or several, newline separated, when the
//! writer coalesces a burst). The `type` field selects the variant; the remaining common fields
//! are always present so clients can read them without matching on the type first.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// Notification severity shown by the admin frontend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// Variant-specific part of a [`ChatMessage`], tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Payload {
    Chat,
    Join,
    Leave,
    System,
    Notification {
        #[serde(default)]
        title: String,
        #[serde(default)]
        level: NotificationLevel,
    },
    TaskProgress {
        #[serde(default)]
        task_id: String,
        #[serde(default)]
        task_name: String,
        /// Percentage, 0..=100.
        #[serde(default)]
        progress: u8,
        #[serde(default)]
        status: String,
    },
    Error,
}

impl Payload {
    /// Wire name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Chat => "chat",
            Payload::Join => "join",
            Payload::Leave => "leave",
            Payload::System => "system",
            Payload::Notification { .. } => "notification",
            Payload::TaskProgress { .. } => "task_progress",
            Payload::Error => "error",
        }
    }
}

/// A message routed through the hub.
///
/// `to_id > 0` makes it a direct message; otherwise a non-empty `room_id` scopes it to a room,
/// and an empty room means every connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(default)]
    pub from_id: u64,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub to_id: u64,
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_id: u64,
    #[serde(default)]
    pub created_at: String,
}

impl ChatMessage {
    pub fn new(payload: Payload, content: impl Into<String>) -> Self {
        Self {
            payload,
            from_id: 0,
            from_name: String::new(),
            to_id: 0,
            room_id: String::new(),
            content: content.into(),
            message_id: 0,
            created_at: timestamp_now(),
        }
    }

    pub fn chat(from_id: u64, from_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Payload::Chat, content).sent_by(from_id, from_name)
    }

    /// Announcement that `username` entered `room_id`.
    pub fn join(user_id: u64, username: &str, room_id: &str) -> Self {
        Self::new(Payload::Join, format!("{username} joined the room"))
            .sent_by(user_id, username)
            .in_room(room_id)
    }

    /// Announcement that `username` left `room_id`.
    pub fn leave(user_id: u64, username: &str, room_id: &str) -> Self {
        Self::new(Payload::Leave, format!("{username} left the room"))
            .sent_by(user_id, username)
            .in_room(room_id)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Payload::System, content)
    }

    pub fn notification(
        title: impl Into<String>,
        content: impl Into<String>,
        level: NotificationLevel,
    ) -> Self {
        Self::new(
            Payload::Notification {
                title: title.into(),
                level,
            },
            content,
        )
    }

    /// Progress update for a long-running task. `progress` is clamped to 100.
    pub fn task_progress(
        task_id: impl Into<String>,
        task_name: impl Into<String>,
        progress: u8,
        status: impl Into<String>,
    ) -> Self {
        Self::new(
            Payload::TaskProgress {
                task_id: task_id.into(),
                task_name: task_name.into(),
                progress: progress.min(100),
                status: status.into(),
            },
            "",
        )
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(Payload::Error, content)
    }

    pub fn sent_by(mut self, user_id: u64, username: impl Into<String>) -> Self {
        self.from_id = user_id;
        self.from_name = username.into();
        self
    }

    pub fn to(mut self, user_id: u64) -> Self {
        self.to_id = user_id;
        self
    }

    pub fn in_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = room_id.into();
        self
    }

    pub fn with_id(mut self, message_id: u64) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Encode to the JSON text carried by one frame.
    pub fn encode(&self) -> Result<String, HubError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Current time in the `createdAt` format (RFC 3339, UTC, second precision).
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
