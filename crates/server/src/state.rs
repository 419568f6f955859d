//! Application state shared across request handlers.

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::db::ChatStore;
use crate::hub::ChatHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The process's one connection hub
    pub hub: Arc<ChatHub>,
    /// Access-token checks for sockets and REST callers
    pub auth: Arc<dyn TokenVerifier>,
    /// Durable chat history
    pub chat_store: Arc<dyn ChatStore>,
}

impl AppState {
    pub fn new(
        hub: Arc<ChatHub>,
        auth: Arc<dyn TokenVerifier>,
        chat_store: Arc<dyn ChatStore>,
    ) -> Self {
        Self {
            hub,
            auth,
            chat_store,
        }
    }
}
