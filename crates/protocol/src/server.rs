//! Server → Client messages

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    // Lifecycle
    QrCode {
        /// `data:` URL of the rendered pairing challenge
        qr_code: String,
    },
    Authenticated {
        message: String,
    },
    Ready {
        user: String,
        name: String,
        platform: String,
    },
    AuthFailed {
        message: String,
    },
    Disconnected {
        reason: String,
    },
    LoggedOut {
        message: String,
    },

    // Messages
    NewMessage(Message),
    MessageSent(SentMessage),

    // Replies to queries
    ContactsReceived {
        contacts: Vec<Contact>,
    },
    ChatsReceived {
        chats: Vec<ChatSummary>,
    },
    ChatMessagesReceived {
        chat_id: String,
        messages: Vec<Message>,
    },

    // Errors
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ServerMessage {
    pub fn ready(info: &SessionInfo) -> Self {
        ServerMessage::Ready {
            user: info.user.clone(),
            name: info.name.clone(),
            platform: info.platform.clone(),
        }
    }

    /// Wire name of the event, for logs
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::QrCode { .. } => "qrCode",
            ServerMessage::Authenticated { .. } => "authenticated",
            ServerMessage::Ready { .. } => "ready",
            ServerMessage::AuthFailed { .. } => "authFailed",
            ServerMessage::Disconnected { .. } => "disconnected",
            ServerMessage::LoggedOut { .. } => "loggedOut",
            ServerMessage::NewMessage(_) => "newMessage",
            ServerMessage::MessageSent(_) => "messageSent",
            ServerMessage::ContactsReceived { .. } => "contactsReceived",
            ServerMessage::ChatsReceived { .. } => "chatsReceived",
            ServerMessage::ChatMessagesReceived { .. } => "chatMessagesReceived",
            ServerMessage::Error { .. } => "error",
        }
    }
}
