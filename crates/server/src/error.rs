//! Relay error taxonomy.
//!
//! Every failure a front end can observe maps to one of these, and each
//! carries a stable wire `code` next to its human-readable message.

use thiserror::Error;
use wabridge_protocol::ServerMessage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("WhatsApp client is not ready. Please wait for authentication.")]
    NotReady,

    #[error("Failed to initialize WhatsApp client")]
    Construction { cause: String },

    #[error("Failed to {action}")]
    Operation { action: &'static str, cause: String },

    #[error("No active session found")]
    NoActiveSession,

    #[error("Timed out while trying to {action}")]
    Timeout { action: &'static str },

    #[error("Session was reset before the request finished")]
    Cancelled,

    #[error("Failed to generate QR code")]
    QrEncode { cause: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Could not parse message: {0}")]
    Parse(String),

    #[error("Subscriber lagged, skipped {skipped} messages")]
    Lagged { skipped: u64 },
}

impl RelayError {
    /// Stable wire code
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::NotReady => "not_ready",
            RelayError::Construction { .. } => "construction_failure",
            RelayError::Operation { .. } => "operation_failure",
            RelayError::NoActiveSession => "no_active_session",
            RelayError::Timeout { .. } => "timeout",
            RelayError::Cancelled => "cancelled",
            RelayError::QrEncode { .. } => "qr_encode_failure",
            RelayError::InvalidRequest(_) => "invalid_request",
            RelayError::Parse(_) => "parse_error",
            RelayError::Lagged { .. } => "lagged",
        }
    }

    /// Underlying cause, when there is one worth showing
    pub fn cause(&self) -> Option<String> {
        match self {
            RelayError::Construction { cause }
            | RelayError::Operation { cause, .. }
            | RelayError::QrEncode { cause } => Some(cause.clone()),
            _ => None,
        }
    }

    pub fn to_server_message(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code().to_string(),
            message: self.to_string(),
            error: self.cause(),
        }
    }
}

impl From<RelayError> for ServerMessage {
    fn from(err: RelayError) -> Self {
        err.to_server_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_error_keeps_cause_on_the_wire() {
        let err = RelayError::Operation {
            action: "send message",
            cause: "number not registered".to_string(),
        };
        match err.to_server_message() {
            ServerMessage::Error {
                code,
                message,
                error,
            } => {
                assert_eq!(code, "operation_failure");
                assert_eq!(message, "Failed to send message");
                assert_eq!(error.as_deref(), Some("number not registered"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn not_ready_has_no_cause() {
        let err = RelayError::NotReady;
        assert_eq!(err.code(), "not_ready");
        assert!(err.cause().is_none());
    }

    #[test]
    fn timeout_is_distinct_from_operation_failure() {
        let err = RelayError::Timeout {
            action: "get contacts",
        };
        assert_eq!(err.code(), "timeout");
        assert_eq!(err.to_string(), "Timed out while trying to get contacts");
    }
}
