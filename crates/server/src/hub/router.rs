//! Delivery target selection for [`ChatMessage`]s.

use adminhub_shared::{ChatMessage, HubError};

use super::{ChatHub, Frame};

/// Where a message goes. Exactly one applies to any message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Private message: the recipient, then the sender's own copy when distinct.
    Direct(Vec<u64>),
    Room(String),
    Global,
}

/// Pick the delivery targets for a message.
///
/// `to_id > 0` wins over `room_id`, and a non-empty `room_id` wins over a global broadcast.
pub fn route(msg: &ChatMessage) -> Route {
    if msg.to_id > 0 {
        let mut recipients = vec![msg.to_id];
        if msg.from_id > 0 && msg.from_id != msg.to_id {
            recipients.push(msg.from_id);
        }
        Route::Direct(recipients)
    } else if !msg.room_id.is_empty() {
        Route::Room(msg.room_id.clone())
    } else {
        Route::Global
    }
}

impl ChatHub {
    /// Encode a message and queue it for its route. Fire-and-forget: offline targets are
    /// skipped. Returns how many client buffers took the frame.
    pub async fn dispatch(&self, msg: &ChatMessage) -> Result<usize, HubError> {
        let frame = Frame::from(msg.encode()?);
        let target = route(msg);
        let delivered = match &target {
            Route::Direct(recipients) => {
                let mut delivered = 0;
                for &user_id in recipients {
                    if self.send_to_user(user_id, frame.clone()).await {
                        delivered += 1;
                    }
                }
                delivered
            }
            Route::Room(room_id) => self.broadcast_to_room(room_id, frame).await,
            Route::Global => self.broadcast(frame).await,
        };

        tracing::debug!(
            kind = msg.kind(),
            from_id = msg.from_id,
            route = ?target,
            delivered,
            "Message dispatched"
        );
        Ok(delivered)
    }

    /// Encode a message and queue it for an explicit member list (a conversation), ignoring
    /// its `to_id` and `room_id`.
    pub async fn dispatch_to_members(
        &self,
        msg: &ChatMessage,
        members: &[u64],
    ) -> Result<usize, HubError> {
        let frame = Frame::from(msg.encode()?);
        let delivered = self.send_to_users(members, frame).await;
        tracing::debug!(
            kind = msg.kind(),
            from_id = msg.from_id,
            members = members.len(),
            delivered,
            "Message dispatched to members"
        );
        Ok(delivered)
    }
}
