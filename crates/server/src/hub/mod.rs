//! Connection hub: tracks which users and rooms are connected and fans frames out to them.
//!
//! All map access, reads and writes alike, goes through the single `RwLock` owned by
//! [`ChatHub`]. Pushes never block: a client whose outbound buffer is full is treated as dead
//! and evicted, so one stalled socket cannot hold up delivery to anyone else.

pub mod client;
pub mod router;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::config::HubConfig;
use crate::presence::PresenceRecorder;

pub use client::{Client, ClientState, Frame, PushError};
pub use router::{route, Route};

/// Room used when a client does not ask for one.
pub const DEFAULT_ROOM: &str = "default";

#[derive(Default)]
struct Registry {
    clients: HashMap<u64, Arc<Client>>,
    rooms: HashMap<String, HashSet<u64>>,
}

impl Registry {
    /// Drop `client` from its room set, removing the room once empty.
    fn leave_room(&mut self, client: &Client) {
        if client.room_id.is_empty() {
            return;
        }
        if let Some(members) = self.rooms.get_mut(&client.room_id) {
            members.remove(&client.user_id);
            if members.is_empty() {
                self.rooms.remove(&client.room_id);
            }
        }
    }

    /// Remove `client` only if it is still the registered connection for its user.
    fn remove_if_current(&mut self, client: &Arc<Client>) -> bool {
        let is_current = self
            .clients
            .get(&client.user_id)
            .is_some_and(|current| Arc::ptr_eq(current, client));
        if is_current {
            self.clients.remove(&client.user_id);
            self.leave_room(client);
        }
        is_current
    }
}

/// Push `frame` to every target, collecting the clients whose push failed.
fn push_all<'a>(
    targets: impl Iterator<Item = &'a Arc<Client>>,
    frame: &Frame,
    dead: &mut Vec<(Arc<Client>, PushError)>,
) -> usize {
    let mut delivered = 0;
    for client in targets {
        match client.try_push(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => dead.push((client.clone(), e)),
        }
    }
    delivered
}

pub struct ChatHub {
    registry: RwLock<Registry>,
    presence: Arc<dyn PresenceRecorder>,
    config: HubConfig,
}

impl ChatHub {
    pub fn new(config: HubConfig, presence: Arc<dyn PresenceRecorder>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            presence,
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn presence(&self) -> &Arc<dyn PresenceRecorder> {
        &self.presence
    }

    /// Build a client sized by this hub's outbound buffer capacity. It is not registered yet.
    pub fn new_client(
        &self,
        user_id: u64,
        username: impl Into<String>,
        room_id: impl Into<String>,
    ) -> (Arc<Client>, mpsc::Receiver<Frame>) {
        Client::new(user_id, username, room_id, self.config.send_buffer)
    }

    /// Admit a client. A connection already registered for the same user is evicted and its
    /// buffer closed first, so its pumps wind down instead of leaking.
    pub async fn register(&self, client: Arc<Client>) {
        let replaced = {
            let mut registry = self.registry.write().await;
            let replaced = registry
                .clients
                .insert(client.user_id, client.clone())
                .filter(|previous| !Arc::ptr_eq(previous, &client));
            if let Some(previous) = &replaced {
                registry.leave_room(previous);
                previous.close();
            }
            if !client.room_id.is_empty() {
                registry
                    .rooms
                    .entry(client.room_id.clone())
                    .or_default()
                    .insert(client.user_id);
            }
            replaced
        };

        if let Some(previous) = replaced {
            tracing::info!(
                user_id = previous.user_id,
                connection_id = %previous.connection_id,
                replaced_by = %client.connection_id,
                "Evicted previous connection for user"
            );
            self.record_closed(&previous);
        }

        tracing::info!(
            user_id = client.user_id,
            username = %client.username,
            room_id = %client.room_id,
            connection_id = %client.connection_id,
            "Client registered"
        );
        self.record_opened(&client);
    }

    /// Remove a client and close its buffer. Safe to call any number of times from any task;
    /// only the call that finds the client still registered returns `true`.
    pub async fn unregister(&self, client: &Arc<Client>) -> bool {
        let removed = {
            let mut registry = self.registry.write().await;
            let removed = registry.remove_if_current(client);
            client.close();
            removed
        };

        if removed {
            tracing::info!(
                user_id = client.user_id,
                username = %client.username,
                connection_id = %client.connection_id,
                "Client unregistered"
            );
            self.record_closed(client);
        }
        removed
    }

    /// Queue a frame for one user. Returns `false` when the user is offline or was evicted
    /// because its buffer could not take the frame.
    pub async fn send_to_user(&self, user_id: u64, frame: Frame) -> bool {
        let failed = {
            let registry = self.registry.read().await;
            let Some(client) = registry.clients.get(&user_id) else {
                return false;
            };
            match client.try_push(frame) {
                Ok(()) => return true,
                Err(e) => (client.clone(), e),
            }
        };
        self.evict(vec![failed]).await;
        false
    }

    /// Queue a frame for each listed user that is online. Returns how many buffers took it.
    pub async fn send_to_users(&self, user_ids: &[u64], frame: Frame) -> usize {
        let mut dead = Vec::new();
        let delivered = {
            let registry = self.registry.read().await;
            let targets = user_ids
                .iter()
                .collect::<HashSet<_>>()
                .into_iter()
                .filter_map(|id| registry.clients.get(id));
            push_all(targets, &frame, &mut dead)
        };
        self.evict(dead).await;
        delivered
    }

    /// Queue a frame for every member of `room_id`.
    pub async fn broadcast_to_room(&self, room_id: &str, frame: Frame) -> usize {
        let mut dead = Vec::new();
        let delivered = {
            let registry = self.registry.read().await;
            let Some(members) = registry.rooms.get(room_id) else {
                return 0;
            };
            let targets = members.iter().filter_map(|id| registry.clients.get(id));
            push_all(targets, &frame, &mut dead)
        };
        self.evict(dead).await;
        delivered
    }

    /// Queue a frame for every registered client.
    pub async fn broadcast(&self, frame: Frame) -> usize {
        let mut dead = Vec::new();
        let delivered = {
            let registry = self.registry.read().await;
            push_all(registry.clients.values(), &frame, &mut dead)
        };
        self.evict(dead).await;
        delivered
    }

    /// Snapshot of online user ids, ascending.
    pub async fn online_users(&self) -> Vec<u64> {
        let registry = self.registry.read().await;
        let mut ids: Vec<u64> = registry.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn is_user_online(&self, user_id: u64) -> bool {
        self.registry.read().await.clients.contains_key(&user_id)
    }

    /// Room of the user's registered connection, `None` when offline.
    pub async fn room_of(&self, user_id: u64) -> Option<String> {
        self.registry
            .read()
            .await
            .clients
            .get(&user_id)
            .map(|client| client.room_id.clone())
    }

    pub async fn online_count(&self) -> usize {
        self.registry.read().await.clients.len()
    }

    /// Snapshot of the user ids in a room, ascending.
    pub async fn room_members(&self, room_id: &str) -> Vec<u64> {
        let registry = self.registry.read().await;
        let mut ids: Vec<u64> = registry
            .rooms
            .get(room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Connection ids of every registered client.
    pub async fn connection_ids(&self) -> HashSet<String> {
        let registry = self.registry.read().await;
        registry
            .clients
            .values()
            .map(|client| client.connection_id.clone())
            .collect()
    }

    async fn evict(&self, dead: Vec<(Arc<Client>, PushError)>) {
        for (client, reason) in dead {
            if self.unregister(&client).await {
                tracing::warn!(
                    user_id = client.user_id,
                    connection_id = %client.connection_id,
                    %reason,
                    "Evicted unresponsive client"
                );
            }
        }
    }

    fn record_opened(&self, client: &Client) {
        let presence = self.presence.clone();
        let record = client.online_record();
        tokio::spawn(async move {
            if let Err(e) = presence.connection_opened(record).await {
                tracing::error!("Failed to record connection opened: {}", e);
            }
        });
    }

    fn record_closed(&self, client: &Client) {
        let presence = self.presence.clone();
        let connection_id = client.connection_id.clone();
        tokio::spawn(async move {
            if let Err(e) = presence.connection_closed(&connection_id).await {
                tracing::error!(
                    connection_id = %connection_id,
                    "Failed to record connection closed: {}",
                    e
                );
            }
        });
    }

    /// Panics if a room references a user that is not registered, or a registered client's
    /// room does not list it.
    #[cfg(test)]
    pub(crate) async fn assert_consistent(&self) {
        let registry = self.registry.read().await;
        for (room, members) in &registry.rooms {
            assert!(!members.is_empty(), "empty room {room} left behind");
            for id in members {
                let client = registry
                    .clients
                    .get(id)
                    .unwrap_or_else(|| panic!("room {room} references missing user {id}"));
                assert_eq!(&client.room_id, room);
            }
        }
        for (id, client) in &registry.clients {
            assert_eq!(*id, client.user_id);
            assert!(!client.is_closed(), "registered client {id} is closed");
            if !client.room_id.is_empty() {
                assert!(registry.rooms[&client.room_id].contains(id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::MemoryPresenceRecorder;
    use adminhub_shared::{ChatMessage, OnlineUser};
    use std::time::Duration;

    fn hub_with(capacity: usize) -> (Arc<ChatHub>, Arc<MemoryPresenceRecorder>) {
        let presence = Arc::new(MemoryPresenceRecorder::default());
        let config = HubConfig {
            send_buffer: capacity,
            ..HubConfig::default()
        };
        (Arc::new(ChatHub::new(config, presence.clone())), presence)
    }

    fn frame(text: &str) -> Frame {
        Frame::from(text.to_string())
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame.as_str().to_string());
        }
        out
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn register_and_unregister_toggle_presence() {
        let (hub, presence) = hub_with(8);
        let (client, _rx) = hub.new_client(7, "alice", "ops");

        hub.register(client.clone()).await;
        assert!(hub.is_user_online(7).await);
        assert_eq!(hub.online_users().await, vec![7]);
        assert_eq!(hub.room_members("ops").await, vec![7]);

        let id = client.connection_id.clone();
        wait_for(|| {
            let presence = presence.clone();
            let id = id.clone();
            async move { presence.contains(&id).await }
        })
        .await;

        assert!(hub.unregister(&client).await);
        assert!(!hub.is_user_online(7).await);
        assert!(hub.online_users().await.is_empty());
        assert!(hub.room_members("ops").await.is_empty());
        assert!(client.is_closed());

        wait_for(|| {
            let presence = presence.clone();
            let id = id.clone();
            async move { !presence.contains(&id).await }
        })
        .await;
        hub.assert_consistent().await;
    }

    #[tokio::test]
    async fn double_unregister_is_a_no_op() {
        let (hub, _) = hub_with(8);
        let (client, _rx) = hub.new_client(7, "alice", "ops");
        hub.register(client.clone()).await;

        assert!(hub.unregister(&client).await);
        assert!(!hub.unregister(&client).await);
        assert!(!client.close());
        hub.assert_consistent().await;
    }

    #[tokio::test]
    async fn send_to_unknown_user_changes_nothing() {
        let (hub, _) = hub_with(8);
        let (client, mut rx) = hub.new_client(1, "alice", "ops");
        hub.register(client.clone()).await;

        assert!(!hub.send_to_user(99, frame("hello")).await);
        assert_eq!(hub.online_users().await, vec![1]);
        assert!(drain(&mut rx).is_empty());
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn full_buffer_evicts_the_client() {
        let (hub, _) = hub_with(256);
        let (client, mut rx) = hub.new_client(3, "slow", "ops");
        hub.register(client.clone()).await;

        for i in 0..256 {
            assert!(hub.send_to_user(3, frame(&i.to_string())).await);
        }
        assert!(!hub.send_to_user(3, frame("overflow")).await);

        assert!(!hub.is_user_online(3).await);
        assert!(hub.room_members("ops").await.is_empty());
        assert_eq!(client.state(), ClientState::Closed);
        assert!(!client.close(), "buffer must only be closed once");

        let queued = drain(&mut rx);
        assert_eq!(queued.len(), 256);
        assert_eq!(queued.last().map(String::as_str), Some("255"));
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        hub.assert_consistent().await;
    }

    #[tokio::test]
    async fn room_broadcast_evicts_only_the_stalled_member() {
        let (hub, _) = hub_with(1);
        let (fast, mut fast_rx) = hub.new_client(1, "fast", "ops");
        let (slow, _slow_rx) = hub.new_client(2, "slow", "ops");
        hub.register(fast.clone()).await;
        hub.register(slow.clone()).await;

        assert_eq!(hub.broadcast_to_room("ops", frame("one")).await, 2);
        assert_eq!(drain(&mut fast_rx), vec!["one"]);

        assert_eq!(hub.broadcast_to_room("ops", frame("two")).await, 1);
        assert_eq!(drain(&mut fast_rx), vec!["two"]);
        assert!(hub.is_user_online(1).await);
        assert!(!hub.is_user_online(2).await);
        assert!(slow.is_closed());
        assert_eq!(hub.room_members("ops").await, vec![1]);
        hub.assert_consistent().await;
    }

    #[tokio::test]
    async fn broadcast_reaches_every_client() {
        let (hub, _) = hub_with(8);
        let mut receivers = Vec::new();
        for (id, room) in [(1, "a"), (2, "b"), (3, "")] {
            let (client, rx) = hub.new_client(id, format!("user{id}"), room);
            hub.register(client).await;
            receivers.push(rx);
        }

        assert_eq!(hub.broadcast(frame("all")).await, 3);
        for rx in &mut receivers {
            assert_eq!(drain(rx), vec!["all"]);
        }
    }

    #[tokio::test]
    async fn send_to_users_skips_offline_and_duplicates() {
        let (hub, _) = hub_with(8);
        let (a, mut a_rx) = hub.new_client(1, "a", "x");
        let (b, mut b_rx) = hub.new_client(2, "b", "y");
        hub.register(a).await;
        hub.register(b).await;

        assert_eq!(hub.send_to_users(&[1, 2, 2, 42], frame("hi")).await, 2);
        assert_eq!(drain(&mut a_rx), vec!["hi"]);
        assert_eq!(drain(&mut b_rx), vec!["hi"]);
    }

    #[tokio::test]
    async fn duplicate_registration_replaces_the_first_connection() {
        let (hub, presence) = hub_with(8);
        let (first, mut first_rx) = hub.new_client(5, "bob", "ops");
        let (second, mut second_rx) = hub.new_client(5, "bob", "support");
        hub.register(first.clone()).await;
        hub.register(second.clone()).await;

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(hub.online_users().await, vec![5]);
        assert!(hub.room_members("ops").await.is_empty());
        assert_eq!(hub.room_members("support").await, vec![5]);

        // The old connection's own teardown must not remove the new one.
        assert!(!hub.unregister(&first).await);
        assert!(hub.is_user_online(5).await);

        assert!(hub.send_to_user(5, frame("ping")).await);
        assert_eq!(drain(&mut second_rx), vec!["ping"]);
        assert!(matches!(
            first_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        let second_id = second.connection_id.clone();
        let first_id = first.connection_id.clone();
        wait_for(|| {
            let presence = presence.clone();
            let (first_id, second_id) = (first_id.clone(), second_id.clone());
            async move { presence.contains(&second_id).await && !presence.contains(&first_id).await }
        })
        .await;
        hub.assert_consistent().await;
    }

    #[tokio::test]
    async fn room_of_follows_the_current_connection() {
        let (hub, _) = hub_with(8);
        assert_eq!(hub.room_of(5).await, None);

        let (first, _first_rx) = hub.new_client(5, "bob", "ops");
        hub.register(first).await;
        assert_eq!(hub.room_of(5).await.as_deref(), Some("ops"));

        let (second, _second_rx) = hub.new_client(5, "bob", "support");
        hub.register(second.clone()).await;
        assert_eq!(hub.room_of(5).await.as_deref(), Some("support"));

        hub.unregister(&second).await;
        assert_eq!(hub.room_of(5).await, None);
    }

    #[tokio::test]
    async fn same_room_duplicate_keeps_room_membership() {
        let (hub, _) = hub_with(8);
        let (first, _first_rx) = hub.new_client(5, "bob", "ops");
        let (second, _second_rx) = hub.new_client(5, "bob", "ops");
        hub.register(first.clone()).await;
        hub.register(second.clone()).await;
        hub.unregister(&first).await;

        assert_eq!(hub.room_members("ops").await, vec![5]);
        hub.assert_consistent().await;
    }

    struct BrokenPresence;

    #[async_trait::async_trait]
    impl PresenceRecorder for BrokenPresence {
        async fn connection_opened(&self, _user: OnlineUser) -> Result<(), String> {
            Err("presence store unavailable".to_string())
        }

        async fn connection_closed(&self, _connection_id: &str) -> Result<(), String> {
            Err("presence store unavailable".to_string())
        }

        async fn sweep(
            &self,
            _live: &HashSet<String>,
            _cutoff: chrono::DateTime<chrono::Utc>,
        ) -> Result<usize, String> {
            Err("presence store unavailable".to_string())
        }
    }

    #[tokio::test]
    async fn presence_failures_do_not_affect_delivery() {
        let hub = Arc::new(ChatHub::new(HubConfig::default(), Arc::new(BrokenPresence)));
        let (alice, mut alice_rx) = hub.new_client(1, "alice", "ops");
        let (bob, mut bob_rx) = hub.new_client(2, "bob", "ops");
        hub.register(alice.clone()).await;
        hub.register(bob.clone()).await;
        assert_eq!(hub.online_users().await, vec![1, 2]);

        let join = ChatMessage::join(1, "alice", "ops");
        assert_eq!(hub.dispatch(&join).await.unwrap(), 2);
        let direct = ChatMessage::chat(1, "alice", "hi").to(2);
        assert_eq!(hub.dispatch(&direct).await.unwrap(), 2);
        assert_eq!(drain(&mut alice_rx).len(), 2);
        assert_eq!(drain(&mut bob_rx).len(), 2);

        // Let the spawned presence notifications fail before carrying on.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(crate::presence::sweep_once(&hub, Duration::ZERO).await.is_err());
        assert!(hub.is_user_online(1).await);
        assert!(hub.send_to_user(2, frame("still up")).await);
        assert_eq!(drain(&mut bob_rx), vec!["still up"]);

        assert!(hub.unregister(&alice).await);
        assert!(!hub.is_user_online(1).await);
        assert!(alice.is_closed());
        assert_eq!(hub.room_members("ops").await, vec![2]);
        hub.assert_consistent().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_churn_keeps_maps_consistent() {
        let (hub, _) = hub_with(4);
        let rooms = ["r0", "r1", "r2"];

        let mut tasks = Vec::new();
        for worker in 0..16u64 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                for round in 0..200u64 {
                    let user_id = (worker * 7 + round) % 24;
                    let room = rooms[(round % 3) as usize];
                    let (client, rx) = hub.new_client(user_id, "u", room);
                    hub.register(client.clone()).await;
                    hub.broadcast(frame("all")).await;
                    hub.broadcast_to_room(room, frame("room")).await;
                    hub.send_to_user((user_id + 1) % 24, frame("direct")).await;
                    if round % 3 == 0 {
                        drop(rx);
                    }
                    if round % 2 == 0 {
                        hub.unregister(&client).await;
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        hub.assert_consistent().await;
    }
}
