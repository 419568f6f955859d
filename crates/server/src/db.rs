//! Database initialization and the chat message store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use adminhub_shared::ChatMessage;
use async_trait::async_trait;
use aurora_db::{Aurora, FieldType};

use crate::presence::ONLINE_USERS_COLLECTION;

pub const CHAT_MESSAGES_COLLECTION: &str = "chat_messages";

/// Open the Aurora database at `path` and make sure the hub's collections exist.
pub fn init_database(path: &str) -> anyhow::Result<Aurora> {
    let db = Aurora::open(path).map_err(|e| anyhow::anyhow!("open database at {path}: {e}"))?;

    // Presence mirror - one row per live WebSocket connection
    let _ = db.new_collection(
        ONLINE_USERS_COLLECTION,
        vec![
            ("connection_id", FieldType::String, true),
            ("user_id", FieldType::String, false),
            ("username", FieldType::String, false),
            ("room_id", FieldType::String, false),
            ("connected_at", FieldType::String, false),
        ],
    );

    let _ = db.new_collection(
        CHAT_MESSAGES_COLLECTION,
        vec![
            ("id", FieldType::String, true),
            ("from_id", FieldType::String, false),
            ("to_id", FieldType::String, false),
            ("room_id", FieldType::String, false),
            ("content", FieldType::String, false),
            ("created_at", FieldType::String, false),
        ],
    );

    Ok(db)
}

/// Durable storage for chat content. The hub only delivers; this keeps history.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist a message and return the id it was stored under.
    async fn save(&self, msg: &ChatMessage) -> Result<u64, String>;
}

/// Monotonic message ids, seeded from the wall clock so they keep increasing across restarts.
pub struct MessageIds(AtomicU64);

impl MessageIds {
    pub fn new() -> Self {
        let seed = chrono::Utc::now().timestamp_millis().max(0) as u64 * 1000;
        Self(AtomicU64::new(seed))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for MessageIds {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AuroraChatStore {
    db: Arc<Aurora>,
    ids: MessageIds,
}

impl AuroraChatStore {
    pub fn new(db: Arc<Aurora>) -> Self {
        Self {
            db,
            ids: MessageIds::new(),
        }
    }
}

#[async_trait]
impl ChatStore for AuroraChatStore {
    async fn save(&self, msg: &ChatMessage) -> Result<u64, String> {
        let id = self.ids.next();
        self.db
            .insert_into(
                CHAT_MESSAGES_COLLECTION,
                vec![
                    ("id", id.to_string().into()),
                    ("from_id", msg.from_id.to_string().into()),
                    ("to_id", msg.to_id.to_string().into()),
                    ("room_id", msg.room_id.clone().into()),
                    ("content", msg.content.clone().into()),
                    ("created_at", msg.created_at.clone().into()),
                ],
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(id)
    }
}
