//! Client → Server messages

use serde::{Deserialize, Serialize};

use crate::types::SessionTarget;

/// History size used when `getChatMessages` omits `limit`
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

fn default_history_limit() -> u32 {
    DEFAULT_HISTORY_LIMIT
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    InitializeWhatsApp {
        #[serde(flatten)]
        target: SessionTarget,
    },
    SendMessage {
        /// Older dashboards send `phoneNumber` instead of `to`.
        #[serde(alias = "phoneNumber")]
        to: String,
        message: String,
        #[serde(flatten)]
        target: SessionTarget,
    },
    GetContacts {
        #[serde(flatten)]
        target: SessionTarget,
    },
    GetChats {
        #[serde(flatten)]
        target: SessionTarget,
    },
    GetChatMessages {
        chat_id: String,
        #[serde(default = "default_history_limit")]
        limit: u32,
        #[serde(flatten)]
        target: SessionTarget,
    },
    Logout {
        #[serde(flatten)]
        target: SessionTarget,
    },
}

impl ClientMessage {
    /// The session this request addresses
    pub fn target(&self) -> &SessionTarget {
        match self {
            ClientMessage::InitializeWhatsApp { target }
            | ClientMessage::SendMessage { target, .. }
            | ClientMessage::GetContacts { target }
            | ClientMessage::GetChats { target }
            | ClientMessage::GetChatMessages { target, .. }
            | ClientMessage::Logout { target } => target,
        }
    }

    /// Wire name of the event, for logs
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::InitializeWhatsApp { .. } => "initializeWhatsApp",
            ClientMessage::SendMessage { .. } => "sendMessage",
            ClientMessage::GetContacts { .. } => "getContacts",
            ClientMessage::GetChats { .. } => "getChats",
            ClientMessage::GetChatMessages { .. } => "getChatMessages",
            ClientMessage::Logout { .. } => "logout",
        }
    }
}
