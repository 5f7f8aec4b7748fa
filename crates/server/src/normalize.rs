//! Turn raw automation-client records into wire types.

use wabridge_connector_core::{RawChat, RawContact, RawMessage};
use wabridge_protocol::{ChatSummary, Contact, LastMessage, Message};

/// Suffix of an individual account address
pub const CONTACT_SUFFIX: &str = "@c.us";
const GROUP_SUFFIX: &str = "@g.us";

pub const MAX_CONTACTS: usize = 50;
pub const MAX_CHATS: usize = 30;

/// Canonical address for a phone number: digits only, `@c.us` appended.
/// An input that already carries the suffix comes out unchanged. Returns
/// `None` when the input holds no digits at all.
pub fn contact_address(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    Some(format!("{digits}{CONTACT_SUFFIX}"))
}

fn is_group_id(id: &str) -> bool {
    id.ends_with(GROUP_SUFFIX)
}

pub fn message(raw: RawMessage) -> Message {
    let is_group_msg = raw.is_group_msg
        || raw.from.as_deref().is_some_and(is_group_id)
        || raw.to.as_deref().is_some_and(is_group_id);
    Message {
        id: raw.id,
        body: raw.body.unwrap_or_default(),
        from: raw.from.unwrap_or_default(),
        to: raw.to.unwrap_or_default(),
        timestamp: raw.timestamp.unwrap_or_default(),
        from_me: raw.from_me,
        message_type: raw.message_type.unwrap_or_else(|| "chat".to_string()),
        has_media: raw.has_media,
        is_group_msg,
    }
}

pub fn messages(raw: Vec<RawMessage>) -> Vec<Message> {
    raw.into_iter().map(message).collect()
}

/// Saved, individual contacts only, capped at `MAX_CONTACTS`.
pub fn contacts(raw: Vec<RawContact>) -> Vec<Contact> {
    raw.into_iter()
        .filter(|c| c.is_my_contact && !c.is_group && !is_group_id(&c.id))
        .take(MAX_CONTACTS)
        .map(|c| {
            let number = c.number.unwrap_or_default();
            let name = non_empty(c.name)
                .or_else(|| non_empty(c.pushname))
                .unwrap_or_else(|| number.clone());
            Contact {
                id: c.id,
                name,
                number,
                profile_pic_url: c.profile_pic_url,
                is_my_contact: c.is_my_contact,
                is_user: c.is_user,
                last_seen: c.last_seen,
            }
        })
        .collect()
}

/// One-to-one chats only, capped at `MAX_CHATS`.
pub fn chats(raw: Vec<RawChat>) -> Vec<ChatSummary> {
    raw.into_iter()
        .filter(|c| !c.is_group && !is_group_id(&c.id))
        .take(MAX_CHATS)
        .map(|c| ChatSummary {
            name: non_empty(c.name).unwrap_or_else(|| c.id.clone()),
            id: c.id,
            last_message: c.last_message.map(|m| LastMessage {
                body: m.body.unwrap_or_default(),
                timestamp: m.timestamp.unwrap_or_default(),
                from_me: m.from_me,
            }),
            unread_count: c.unread_count.unwrap_or_default(),
            timestamp: c.timestamp.unwrap_or_default(),
        })
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
