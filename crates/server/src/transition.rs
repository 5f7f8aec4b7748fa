//! Pure state transition function
//!
//! Session lifecycle rules live here as a pure, synchronous function:
//! `transition(state, input, now) -> (state, effects)`. The session actor
//! feeds it inputs and executes the returned effects.

use wabridge_protocol::{Message, ServerMessage, SessionInfo, SessionStatus};

use crate::error::RelayError;

// ---------------------------------------------------------------------------
// TransitionState: the lifecycle fields of a session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionState {
    pub key: String,
    pub status: SessionStatus,
    pub initializing: bool,
    pub info: Option<SessionInfo>,
    pub last_activity_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Input: client lifecycle events plus relay decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Input {
    /// Construction guard passed; a client is being built
    StartRequested,
    /// Client construction or startup failed
    StartFailed { error: String },
    Qr { token: String },
    Authenticated,
    AuthFailure { reason: String },
    Ready { info: Option<SessionInfo> },
    Disconnected { reason: String },
    MessageReceived(Message),
    /// Logout and teardown completed
    LoggedOut,
    /// A startup or operation deadline elapsed
    TimedOut { action: &'static str },
}

// ---------------------------------------------------------------------------
// Effect: IO for the actor to perform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Broadcast to every subscriber of the session
    Emit(Box<ServerMessage>),
    /// Encode the pairing token and broadcast the image
    RenderQr(String),
    /// Drop the active client; `destroy` also tears it down
    ReleaseClient { destroy: bool },
}

// ---------------------------------------------------------------------------
// transition()
// ---------------------------------------------------------------------------

/// Given the current state and an input event, returns the new state
/// and a list of effects (broadcasts, client teardown) to execute.
pub fn transition(
    mut state: TransitionState,
    input: Input,
    now: &str,
) -> (TransitionState, Vec<Effect>) {
    let mut effects: Vec<Effect> = Vec::new();
    state.last_activity_at = Some(now.to_string());

    match input {
        Input::StartRequested => {
            state.status = SessionStatus::Initializing;
            state.initializing = true;
            state.info = None;
        }

        Input::StartFailed { error } => {
            state.status = SessionStatus::Disconnected;
            state.initializing = false;
            state.info = None;
            effects.push(emit(
                RelayError::Construction { cause: error }.to_server_message(),
            ));
            effects.push(Effect::ReleaseClient { destroy: true });
        }

        Input::Qr { token } => {
            state.status = SessionStatus::QrReady;
            effects.push(Effect::RenderQr(token));
        }

        Input::Authenticated => {
            state.status = SessionStatus::Authenticated;
            effects.push(emit(ServerMessage::Authenticated {
                message: "WhatsApp authenticated successfully".to_string(),
            }));
        }

        Input::AuthFailure { reason: _ } => {
            state.status = SessionStatus::AuthFailed;
            state.initializing = false;
            state.info = None;
            effects.push(emit(ServerMessage::AuthFailed {
                message: "Authentication failed".to_string(),
            }));
            effects.push(Effect::ReleaseClient { destroy: true });
        }

        Input::Ready { info } => {
            state.status = SessionStatus::Ready;
            state.initializing = false;
            let info = info.unwrap_or_else(|| SessionInfo {
                user: String::new(),
                name: String::new(),
                platform: String::new(),
            });
            effects.push(emit(ServerMessage::ready(&info)));
            state.info = Some(info);
        }

        Input::Disconnected { reason } => {
            state.status = SessionStatus::Disconnected;
            state.initializing = false;
            state.info = None;
            effects.push(emit(ServerMessage::Disconnected { reason }));
            effects.push(Effect::ReleaseClient { destroy: true });
        }

        Input::MessageReceived(message) => {
            effects.push(emit(ServerMessage::NewMessage(message)));
        }

        Input::LoggedOut => {
            state.status = SessionStatus::Disconnected;
            state.initializing = false;
            state.info = None;
            effects.push(Effect::ReleaseClient { destroy: false });
            effects.push(emit(ServerMessage::LoggedOut {
                message: "Successfully logged out".to_string(),
            }));
        }

        Input::TimedOut { action } => {
            state.status = SessionStatus::Disconnected;
            state.initializing = false;
            state.info = None;
            effects.push(emit(ServerMessage::Disconnected {
                reason: format!("timed out while trying to {action}"),
            }));
            effects.push(Effect::ReleaseClient { destroy: true });
        }
    }

    (state, effects)
}

fn emit(msg: ServerMessage) -> Effect {
    Effect::Emit(Box::new(msg))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> TransitionState {
        TransitionState {
            key: "default/main".to_string(),
            status: SessionStatus::Disconnected,
            initializing: false,
            info: None,
            last_activity_at: None,
        }
    }

    fn info() -> SessionInfo {
        SessionInfo {
            user: "15550001111".to_string(),
            name: "Ana".to_string(),
            platform: "android".to_string(),
        }
    }

    fn releases(effects: &[Effect]) -> bool {
        effects
            .iter()
            .any(|e| matches!(e, Effect::ReleaseClient { .. }))
    }

    const NOW: &str = "1000Z";

    #[test]
    fn start_requested_enters_initializing() {
        let (state, effects) = transition(test_state(), Input::StartRequested, NOW);
        assert_eq!(state.status, SessionStatus::Initializing);
        assert!(state.initializing);
        assert!(effects.is_empty());
        assert_eq!(state.last_activity_at.as_deref(), Some(NOW));
    }

    #[test]
    fn qr_requests_render_without_clearing_initializing() {
        let (state, _) = transition(test_state(), Input::StartRequested, NOW);
        let (state, effects) = transition(
            state,
            Input::Qr {
                token: "2@abc".to_string(),
            },
            NOW,
        );
        assert_eq!(state.status, SessionStatus::QrReady);
        assert!(state.initializing);
        assert_eq!(effects, vec![Effect::RenderQr("2@abc".to_string())]);
    }

    #[test]
    fn full_pairing_sequence_reaches_ready() {
        let mut state = test_state();
        let inputs = vec![
            Input::StartRequested,
            Input::Qr {
                token: "2@abc".to_string(),
            },
            Input::Authenticated,
            Input::Ready { info: Some(info()) },
        ];
        let mut emitted = Vec::new();
        for input in inputs {
            let (next, effects) = transition(state, input, NOW);
            state = next;
            for effect in effects {
                if let Effect::Emit(msg) = effect {
                    emitted.push(msg.event_name());
                }
            }
        }
        assert_eq!(state.status, SessionStatus::Ready);
        assert!(!state.initializing);
        assert_eq!(state.info, Some(info()));
        assert_eq!(emitted, vec!["authenticated", "ready"]);
    }

    #[test]
    fn ready_broadcasts_session_info() {
        let (_, effects) = transition(test_state(), Input::Ready { info: Some(info()) }, NOW);
        match &effects[0] {
            Effect::Emit(msg) => match msg.as_ref() {
                ServerMessage::Ready {
                    user,
                    name,
                    platform,
                } => {
                    assert_eq!(user, "15550001111");
                    assert_eq!(name, "Ana");
                    assert_eq!(platform, "android");
                }
                other => panic!("expected ready, got {:?}", other),
            },
            other => panic!("expected emit, got {:?}", other),
        }
    }

    #[test]
    fn auth_failure_clears_session() {
        let (state, _) = transition(test_state(), Input::StartRequested, NOW);
        let (state, effects) = transition(
            state,
            Input::AuthFailure {
                reason: "bad pairing".to_string(),
            },
            NOW,
        );
        assert_eq!(state.status, SessionStatus::AuthFailed);
        assert!(!state.initializing);
        assert!(releases(&effects));
        assert!(matches!(
            effects[0],
            Effect::Emit(ref msg) if matches!(**msg, ServerMessage::AuthFailed { .. })
        ));
    }

    #[test]
    fn disconnect_from_ready_clears_session() {
        let (state, _) = transition(test_state(), Input::Ready { info: Some(info()) }, NOW);
        let (state, effects) = transition(
            state,
            Input::Disconnected {
                reason: "NAVIGATION".to_string(),
            },
            NOW,
        );
        assert_eq!(state.status, SessionStatus::Disconnected);
        assert!(state.info.is_none());
        assert!(effects.contains(&Effect::ReleaseClient { destroy: true }));
    }

    #[test]
    fn start_failure_reports_construction_error() {
        let (state, _) = transition(test_state(), Input::StartRequested, NOW);
        let (state, effects) = transition(
            state,
            Input::StartFailed {
                error: "browser crashed".to_string(),
            },
            NOW,
        );
        assert!(!state.initializing);
        match &effects[0] {
            Effect::Emit(msg) => match msg.as_ref() {
                ServerMessage::Error { code, error, .. } => {
                    assert_eq!(code, "construction_failure");
                    assert_eq!(error.as_deref(), Some("browser crashed"));
                }
                other => panic!("expected error, got {:?}", other),
            },
            other => panic!("expected emit, got {:?}", other),
        }
        assert!(releases(&effects));
    }

    #[test]
    fn message_passes_through_without_status_change() {
        let (state, _) = transition(test_state(), Input::Ready { info: Some(info()) }, NOW);
        let message = Message {
            id: "m1".to_string(),
            body: "hello".to_string(),
            from: "1555@c.us".to_string(),
            to: "1999@c.us".to_string(),
            timestamp: 10,
            from_me: false,
            message_type: "chat".to_string(),
            has_media: false,
            is_group_msg: false,
        };
        let (state, effects) = transition(state, Input::MessageReceived(message), NOW);
        assert_eq!(state.status, SessionStatus::Ready);
        assert_eq!(effects.len(), 1);
        assert!(matches!(
            effects[0],
            Effect::Emit(ref msg) if matches!(**msg, ServerMessage::NewMessage(_))
        ));
    }

    #[test]
    fn logout_releases_without_destroying_twice() {
        let (state, _) = transition(test_state(), Input::Ready { info: Some(info()) }, NOW);
        let (state, effects) = transition(state, Input::LoggedOut, NOW);
        assert_eq!(state.status, SessionStatus::Disconnected);
        assert_eq!(effects[0], Effect::ReleaseClient { destroy: false });
        assert!(matches!(
            effects[1],
            Effect::Emit(ref msg) if matches!(**msg, ServerMessage::LoggedOut { .. })
        ));
    }

    #[test]
    fn timeout_disconnects_and_destroys() {
        let (state, _) = transition(test_state(), Input::StartRequested, NOW);
        let (state, effects) = transition(
            state,
            Input::TimedOut {
                action: "start the WhatsApp client",
            },
            NOW,
        );
        assert_eq!(state.status, SessionStatus::Disconnected);
        assert!(!state.initializing);
        assert!(effects.contains(&Effect::ReleaseClient { destroy: true }));
    }
}
