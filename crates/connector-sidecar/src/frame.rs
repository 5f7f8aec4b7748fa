//! Sidecar wire frames.
//!
//! Requests: `{"id":7,"method":"sendMessage","params":{...}}`
//! Responses: `{"id":7,"result":...}` or `{"id":7,"error":"..."}`
//! Events: `{"event":"qr","data":"<token>"}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use wabridge_connector_core::{ClientEvent, ConnectorError, RawMessage, SessionInfo};

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

pub(crate) fn encode_request(id: u64, method: &str, params: Value) -> Result<String, ConnectorError> {
    Ok(serde_json::to_string(&Request { id, method, params })?)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFrame {
    Response {
        id: u64,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

/// A decoded inbound frame
#[derive(Debug, PartialEq)]
pub(crate) enum Inbound {
    Response {
        id: u64,
        outcome: Result<Value, String>,
    },
    /// `info` is only present on `ready`
    Event {
        event: ClientEvent,
        info: Option<SessionInfo>,
    },
    /// Event name this connector does not know; ignored
    Unknown(String),
}

pub(crate) fn decode(text: &str) -> Result<Inbound, ConnectorError> {
    match serde_json::from_str::<RawFrame>(text)? {
        RawFrame::Response { id, result, error } => Ok(Inbound::Response {
            id,
            outcome: match error {
                Some(message) => Err(message),
                None => Ok(result),
            },
        }),
        RawFrame::Event { event, data } => decode_event(&event, data),
    }
}

fn decode_event(name: &str, data: Value) -> Result<Inbound, ConnectorError> {
    let event = match name {
        "qr" => ClientEvent::Qr(text_payload(&data, "qr")),
        "authenticated" => ClientEvent::Authenticated,
        "auth_failure" => ClientEvent::AuthFailure(text_payload(&data, "message")),
        "disconnected" => ClientEvent::Disconnected(text_payload(&data, "reason")),
        "message" => ClientEvent::Message(serde_json::from_value::<RawMessage>(data)?),
        "ready" => {
            let info = if data.is_null() {
                None
            } else {
                Some(serde_json::from_value::<SessionInfo>(data)?)
            };
            return Ok(Inbound::Event {
                event: ClientEvent::Ready,
                info,
            });
        }
        other => return Ok(Inbound::Unknown(other.to_string())),
    };
    Ok(Inbound::Event { event, info: None })
}

/// Accept either a bare string or `{"<field>": "..."}`.
fn text_payload(data: &Value, field: &str) -> String {
    match data {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_success_response() {
        let inbound = decode(r#"{"id":3,"result":{"id":"m1","timestamp":5}}"#).expect("decode");
        assert_eq!(
            inbound,
            Inbound::Response {
                id: 3,
                outcome: Ok(json!({"id":"m1","timestamp":5})),
            }
        );
    }

    #[test]
    fn decodes_error_response() {
        let inbound = decode(r#"{"id":4,"error":"chat not found"}"#).expect("decode");
        assert_eq!(
            inbound,
            Inbound::Response {
                id: 4,
                outcome: Err("chat not found".to_string()),
            }
        );
    }

    #[test]
    fn decodes_qr_from_string_or_object() {
        let bare = decode(r#"{"event":"qr","data":"2@abc"}"#).expect("decode");
        let wrapped = decode(r#"{"event":"qr","data":{"qr":"2@abc"}}"#).expect("decode");
        let expected = Inbound::Event {
            event: ClientEvent::Qr("2@abc".to_string()),
            info: None,
        };
        assert_eq!(bare, expected);
        assert_eq!(wrapped, expected);
    }

    #[test]
    fn ready_carries_session_info() {
        let inbound = decode(
            r#"{"event":"ready","data":{"user":"15550001111","name":"Ana","platform":"android"}}"#,
        )
        .expect("decode");
        match inbound {
            Inbound::Event {
                event: ClientEvent::Ready,
                info: Some(info),
            } => {
                assert_eq!(info.user, "15550001111");
                assert_eq!(info.platform, "android");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn unknown_events_are_not_errors() {
        let inbound = decode(r#"{"event":"change_battery","data":{"battery":40}}"#).expect("decode");
        assert_eq!(inbound, Inbound::Unknown("change_battery".to_string()));
    }

    #[test]
    fn request_encoding_includes_method_and_params() {
        let text = encode_request(9, "fetchMessages", json!({"chatId":"x","limit":5}))
            .expect("encode");
        let value: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["id"], 9);
        assert_eq!(value["method"], "fetchMessages");
        assert_eq!(value["params"]["limit"], 5);
    }
}
