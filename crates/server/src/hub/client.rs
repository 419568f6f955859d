//! Per-connection state shared by a connection's pumps and the hub.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use adminhub_shared::OnlineUser;
use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// One encoded message waiting in a client's outbound buffer.
pub type Frame = Utf8Bytes;

const CONNECTED: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle of a client's outbound buffer. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("outbound buffer is full")]
    Full,
    #[error("outbound buffer is closed")]
    Closed,
}

pub struct Client {
    pub user_id: u64,
    pub username: String,
    pub room_id: String,
    pub connection_id: String,
    pub connected_at: DateTime<Utc>,
    /// Dropping the sender is what closes the buffer; `None` once closed.
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    state: AtomicU8,
}

impl Client {
    /// Create a client and the receiving end of its outbound buffer, which belongs to the
    /// writer pump.
    pub fn new(
        user_id: u64,
        username: impl Into<String>,
        room_id: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let client = Arc::new(Self {
            user_id,
            username: username.into(),
            room_id: room_id.into(),
            connection_id: Uuid::new_v4().to_string(),
            connected_at: Utc::now(),
            outbound: Mutex::new(Some(tx)),
            state: AtomicU8::new(CONNECTED),
        });
        (client, rx)
    }

    /// Queue a frame without waiting.
    pub fn try_push(&self, frame: Frame) -> Result<(), PushError> {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = outbound.as_ref() else {
            return Err(PushError::Closed);
        };
        tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => PushError::Full,
            TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Close the outbound buffer. Returns `true` only for the call that actually closed it;
    /// every later call is a no-op returning `false`.
    pub fn close(&self) -> bool {
        if self
            .state
            .compare_exchange(CONNECTED, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let sender = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);
        self.state.store(CLOSED, Ordering::Release);
        true
    }

    pub fn state(&self) -> ClientState {
        match self.state.load(Ordering::Acquire) {
            CONNECTED => ClientState::Connected,
            CLOSING => ClientState::Closing,
            _ => ClientState::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() != ClientState::Connected
    }

    /// Presence record for this connection.
    pub fn online_record(&self) -> OnlineUser {
        OnlineUser {
            connection_id: self.connection_id.clone(),
            user_id: self.user_id,
            username: self.username.clone(),
            room_id: self.room_id.clone(),
            connected_at: self.connected_at,
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("room_id", &self.room_id)
            .field("connection_id", &self.connection_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        Frame::from(text.to_string())
    }

    #[test]
    fn push_fails_fast_when_full() {
        let (client, mut rx) = Client::new(1, "alice", "default", 2);
        assert_eq!(client.try_push(frame("a")), Ok(()));
        assert_eq!(client.try_push(frame("b")), Ok(()));
        assert_eq!(client.try_push(frame("c")), Err(PushError::Full));

        assert_eq!(rx.try_recv().unwrap().as_str(), "a");
        assert_eq!(client.try_push(frame("d")), Ok(()));
    }

    #[test]
    fn close_happens_exactly_once() {
        let (client, mut rx) = Client::new(1, "alice", "default", 4);
        client.try_push(frame("queued")).unwrap();

        assert!(client.close());
        assert!(!client.close());
        assert_eq!(client.state(), ClientState::Closed);
        assert_eq!(client.try_push(frame("late")), Err(PushError::Closed));

        // Frames queued before the close are still drained, then the buffer reports closed.
        assert_eq!(rx.try_recv().unwrap().as_str(), "queued");
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let (client, rx) = Client::new(1, "alice", "default", 4);
        drop(rx);
        assert_eq!(client.try_push(frame("x")), Err(PushError::Closed));
        assert!(!client.is_closed());
    }

    #[test]
    fn connection_ids_are_unique() {
        let (a, _ra) = Client::new(1, "alice", "default", 1);
        let (b, _rb) = Client::new(1, "alice", "default", 1);
        assert_ne!(a.connection_id, b.connection_id);
        assert_eq!(a.online_record().user_id, 1);
    }
}
