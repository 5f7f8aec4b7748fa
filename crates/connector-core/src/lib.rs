//! wabridge connector core
//!
//! The contract between the relay and whatever drives the messaging
//! network. A connector builds one automation client per session; the client
//! exposes imperative operations and pushes lifecycle events through an
//! ordered channel handed out alongside it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub use wabridge_protocol::SessionInfo;

/// Errors that can occur in connectors
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Failed to start automation client: {0}")]
    Startup(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Client is not initialized")]
    NotInitialized,

    #[error("{0}")]
    Remote(String),
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Lifecycle and message events emitted by an automation client, in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Pairing challenge that must be shown to the user
    Qr(String),

    /// Pairing accepted by the remote network
    Authenticated,

    /// Pairing rejected
    AuthFailure(String),

    /// Session usable; `AutomationClient::session_info` is populated
    Ready,

    /// Session lost
    Disconnected(String),

    /// Inbound message
    Message(RawMessage),
}

/// A message as reported by the automation driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessage {
    pub id: String,
    pub body: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub timestamp: Option<i64>,
    pub from_me: bool,
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    pub has_media: bool,
    pub is_group_msg: bool,
}

/// A contact as reported by the automation driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawContact {
    pub id: String,
    pub name: Option<String>,
    pub pushname: Option<String>,
    pub number: Option<String>,
    pub profile_pic_url: Option<String>,
    pub is_my_contact: bool,
    pub is_user: bool,
    pub is_group: bool,
    pub last_seen: Option<i64>,
}

/// A chat as reported by the automation driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawChat {
    pub id: String,
    pub name: Option<String>,
    pub is_group: bool,
    pub unread_count: Option<u32>,
    pub timestamp: Option<i64>,
    pub last_message: Option<RawMessage>,
}

/// Acknowledgement of an outbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub id: String,
    pub timestamp: i64,
}

/// One authenticated session with the messaging network.
#[async_trait]
pub trait AutomationClient: Send + Sync {
    /// Start the session. Lifecycle events (QR, authenticated, ready) may be
    /// emitted before this resolves.
    async fn initialize(&self) -> ConnectorResult<()>;

    /// Account details; `Some` once the session is ready.
    fn session_info(&self) -> Option<SessionInfo>;

    async fn send_message(&self, to: &str, body: &str) -> ConnectorResult<SendReceipt>;

    async fn contacts(&self) -> ConnectorResult<Vec<RawContact>>;

    async fn chats(&self) -> ConnectorResult<Vec<RawChat>>;

    async fn chat_messages(&self, chat_id: &str, limit: u32) -> ConnectorResult<Vec<RawMessage>>;

    async fn logout(&self) -> ConnectorResult<()>;

    /// Tear down the client and release its resources.
    async fn destroy(&self) -> ConnectorResult<()>;
}

/// A freshly built client and the receiver for its events
pub struct ClientConnection {
    pub client: Arc<dyn AutomationClient>,
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Builds automation clients. Construction must be cheap; network work
/// belongs in `AutomationClient::initialize`.
pub trait AutomationConnector: Send + Sync {
    fn connect(&self, session_key: &str) -> ConnectorResult<ClientConnection>;
}
