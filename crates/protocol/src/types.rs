//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// User id assumed when a request does not name one
pub const DEFAULT_USER_ID: &str = "default";

/// Session id assumed when a request does not name one
pub const DEFAULT_SESSION_ID: &str = "main";

/// Lifecycle status of a messaging session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Initializing,
    QrReady,
    Authenticated,
    Ready,
    AuthFailed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Initializing => "initializing",
            SessionStatus::QrReady => "qr_ready",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Ready => "ready",
            SessionStatus::AuthFailed => "auth_failed",
        }
    }
}

/// Which session a request is aimed at.
///
/// Both fields are optional on the wire; older front ends send neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Longest accepted `userId` / `sessionId`
pub const MAX_ID_LEN: usize = 64;

impl SessionTarget {
    /// Registry key for this target: `"{userId}/{sessionId}"`.
    ///
    /// `None` when either id is not a valid session id, so two targets
    /// never share a key.
    pub fn session_key(&self) -> Option<String> {
        let user = self.user_id.as_deref().map(str::trim).unwrap_or("");
        let session = self.session_id.as_deref().map(str::trim).unwrap_or("");
        if !(user.is_empty() || is_valid_id(user)) || !(session.is_empty() || is_valid_id(session))
        {
            return None;
        }
        Some(session_key(user, session))
    }
}

/// Ids are ASCII letters, digits, `-` and `_`; never the `/` separator.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Build a registry key from a user id and session id. Callers validate the
/// ids first; blank parts fall back to the defaults.
pub fn session_key(user_id: &str, session_id: &str) -> String {
    let user = user_id.trim();
    let session = session_id.trim();
    format!(
        "{}/{}",
        if user.is_empty() { DEFAULT_USER_ID } else { user },
        if session.is_empty() {
            DEFAULT_SESSION_ID
        } else {
            session
        }
    )
}

/// Split a registry key back into `(userId, sessionId)`
pub fn split_session_key(key: &str) -> Option<(&str, &str)> {
    let (user, session) = key.split_once('/')?;
    if is_valid_id(user) && is_valid_id(session) {
        Some((user, session))
    } else {
        None
    }
}

/// The key every connection is subscribed to on open
pub fn default_session_key() -> String {
    session_key(DEFAULT_USER_ID, DEFAULT_SESSION_ID)
}

/// Account details reported by the automation client once ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub user: String,
    pub name: String,
    pub platform: String,
}

/// A message relayed to front ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub body: String,
    pub from: String,
    pub to: String,
    /// Seconds since the unix epoch
    pub timestamp: i64,
    pub from_me: bool,
    #[serde(rename = "type")]
    pub message_type: String,
    pub has_media: bool,
    pub is_group_msg: bool,
}

/// Confirmation echo for an outbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub id: String,
    pub to: String,
    pub body: String,
    pub timestamp: i64,
}

/// An address book entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_pic_url: Option<String>,
    pub is_my_contact: bool,
    pub is_user: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

/// Preview of the newest message in a chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub body: String,
    pub timestamp: i64,
    pub from_me: bool,
}

/// A one-to-one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub name: String,
    pub last_message: Option<LastMessage>,
    pub unread_count: u32,
    pub timestamp: i64,
}

/// Session metadata for `/api/sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_key: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub subscribers: usize,
    pub started_at: Option<String>,
    pub last_activity_at: Option<String>,
}
