//! Best-effort mirror of hub connections into durable storage.
//!
//! The hub, not this record, decides who is online. Notifications are fired from spawned tasks
//! and may land out of order (a very short connection can be deleted before it is inserted), so
//! rows are reconciled by [`sweep_once`] on a timer rather than trusted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use adminhub_shared::OnlineUser;
use async_trait::async_trait;
use aurora_db::Aurora;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::hub::ChatHub;

pub const ONLINE_USERS_COLLECTION: &str = "chat_online_users";

#[async_trait]
pub trait PresenceRecorder: Send + Sync {
    async fn connection_opened(&self, user: OnlineUser) -> Result<(), String>;

    async fn connection_closed(&self, connection_id: &str) -> Result<(), String>;

    /// Delete rows whose connection is not in `live` and that were opened before `cutoff`.
    /// Returns how many rows were removed.
    async fn sweep(&self, live: &HashSet<String>, cutoff: DateTime<Utc>)
        -> Result<usize, String>;
}

/// Records nothing.
pub struct DisabledPresenceRecorder;

#[async_trait]
impl PresenceRecorder for DisabledPresenceRecorder {
    async fn connection_opened(&self, _user: OnlineUser) -> Result<(), String> {
        Ok(())
    }

    async fn connection_closed(&self, _connection_id: &str) -> Result<(), String> {
        Ok(())
    }

    async fn sweep(&self, _live: &HashSet<String>, _cutoff: DateTime<Utc>) -> Result<usize, String> {
        Ok(0)
    }
}

/// In-process presence table keyed by connection id.
#[derive(Default)]
pub struct MemoryPresenceRecorder {
    rows: RwLock<HashMap<String, OnlineUser>>,
}

impl MemoryPresenceRecorder {
    pub async fn contains(&self, connection_id: &str) -> bool {
        self.rows.read().await.contains_key(connection_id)
    }

    pub async fn snapshot(&self) -> Vec<OnlineUser> {
        let mut rows: Vec<_> = self.rows.read().await.values().cloned().collect();
        rows.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        rows
    }
}

#[async_trait]
impl PresenceRecorder for MemoryPresenceRecorder {
    async fn connection_opened(&self, user: OnlineUser) -> Result<(), String> {
        self.rows
            .write()
            .await
            .insert(user.connection_id.clone(), user);
        Ok(())
    }

    async fn connection_closed(&self, connection_id: &str) -> Result<(), String> {
        self.rows.write().await.remove(connection_id);
        Ok(())
    }

    async fn sweep(&self, live: &HashSet<String>, cutoff: DateTime<Utc>) -> Result<usize, String> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|id, row| live.contains(id) || row.connected_at >= cutoff);
        Ok(before - rows.len())
    }
}

/// Presence rows stored in the `chat_online_users` collection.
pub struct AuroraPresenceRecorder {
    db: Arc<Aurora>,
}

impl AuroraPresenceRecorder {
    pub fn new(db: Arc<Aurora>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PresenceRecorder for AuroraPresenceRecorder {
    async fn connection_opened(&self, user: OnlineUser) -> Result<(), String> {
        self.db
            .insert_into(
                ONLINE_USERS_COLLECTION,
                vec![
                    ("connection_id", user.connection_id.into()),
                    ("user_id", user.user_id.to_string().into()),
                    ("username", user.username.into()),
                    ("room_id", user.room_id.into()),
                    ("connected_at", user.connected_at.to_rfc3339().into()),
                ],
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn connection_closed(&self, connection_id: &str) -> Result<(), String> {
        let rows = self
            .db
            .query(ONLINE_USERS_COLLECTION)
            .filter(|f| f.eq("connection_id", connection_id.to_string()))
            .collect()
            .await
            .map_err(|e| e.to_string())?;

        for row in rows {
            self.db
                .delete(&format!("{}:{}", ONLINE_USERS_COLLECTION, row.id))
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    async fn sweep(&self, live: &HashSet<String>, cutoff: DateTime<Utc>) -> Result<usize, String> {
        let rows = self
            .db
            .query(ONLINE_USERS_COLLECTION)
            .collect()
            .await
            .map_err(|e| e.to_string())?;

        let mut removed = 0;
        for row in rows {
            let connection_id = row
                .data
                .get("connection_id")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if live.contains(connection_id) {
                continue;
            }
            // Rows with an unreadable timestamp are treated as stale.
            let opened_recently = row
                .data
                .get("connected_at")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .is_some_and(|at| at.with_timezone(&Utc) >= cutoff);
            if opened_recently {
                continue;
            }
            self.db
                .delete(&format!("{}:{}", ONLINE_USERS_COLLECTION, row.id))
                .await
                .map_err(|e| e.to_string())?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Reconcile the presence mirror with the hub once: rows for connections the hub no longer
/// holds are deleted after they are `ttl` old.
pub async fn sweep_once(hub: &ChatHub, ttl: Duration) -> Result<usize, String> {
    let live = hub.connection_ids().await;
    let ttl = chrono::Duration::from_std(ttl).map_err(|e| e.to_string())?;
    hub.presence().sweep(&live, Utc::now() - ttl).await
}

/// Run [`sweep_once`] every `every` for the life of the process.
pub fn spawn_sweeper(hub: Arc<ChatHub>, every: Duration, ttl: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // Skip the first immediate tick
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sweep_once(&hub, ttl).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Swept stale presence rows"),
                Err(e) => tracing::error!("Presence sweep failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;

    fn row(connection_id: &str, connected_at: DateTime<Utc>) -> OnlineUser {
        OnlineUser {
            connection_id: connection_id.to_string(),
            user_id: 1,
            username: "ghost".to_string(),
            room_id: "default".to_string(),
            connected_at,
        }
    }

    #[tokio::test]
    async fn memory_recorder_tracks_open_and_close() {
        let recorder = MemoryPresenceRecorder::default();
        recorder.connection_opened(row("c1", Utc::now())).await.unwrap();
        assert!(recorder.contains("c1").await);

        recorder.connection_closed("c1").await.unwrap();
        recorder.connection_closed("c1").await.unwrap();
        assert!(recorder.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn sweep_removes_only_old_orphans() {
        let presence = Arc::new(MemoryPresenceRecorder::default());
        let hub = ChatHub::new(HubConfig::default(), presence.clone());

        let (live, _rx) = hub.new_client(2, "alice", "default");
        hub.register(live.clone()).await;
        presence.connection_opened(live.online_record()).await.unwrap();

        let old = Utc::now() - chrono::Duration::hours(2);
        presence.connection_opened(row("orphan", old)).await.unwrap();
        presence.connection_opened(row("fresh", Utc::now())).await.unwrap();

        let removed = sweep_once(&hub, Duration::from_secs(600)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!presence.contains("orphan").await);
        assert!(presence.contains("fresh").await);
        assert!(presence.contains(&live.connection_id).await);
    }
}
