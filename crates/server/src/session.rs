//! Session management

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use wabridge_connector_core::AutomationClient;
use wabridge_protocol::{ServerMessage, SessionInfo, SessionStatus, SessionSummary};

use crate::clock::chrono_now;
use crate::transition::TransitionState;

/// Capacity of each session's broadcast channel
const BROADCAST_CAPACITY: usize = 256;

/// Read-only view of a session, published after every mutation
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub key: String,
    pub status: SessionStatus,
    pub initializing: bool,
    pub has_client: bool,
    pub generation: u64,
    pub info: Option<SessionInfo>,
    pub started_at: Option<String>,
    pub last_activity_at: Option<String>,
}

/// State of one session key. Owned by its session actor.
pub struct SessionHandle {
    key: String,
    status: SessionStatus,
    initializing: bool,
    client: Option<Arc<dyn AutomationClient>>,
    generation: u64,
    cancel: CancellationToken,
    info: Option<SessionInfo>,
    started_at: Option<String>,
    last_activity_at: Option<String>,
    broadcast_tx: broadcast::Sender<ServerMessage>,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
}

impl SessionHandle {
    pub fn new(key: String) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let snapshot = Arc::new(ArcSwap::from_pointee(SessionSnapshot {
            key: key.clone(),
            status: SessionStatus::Disconnected,
            initializing: false,
            has_client: false,
            generation: 0,
            info: None,
            started_at: None,
            last_activity_at: None,
        }));
        Self {
            key,
            status: SessionStatus::Disconnected,
            initializing: false,
            client: None,
            generation: 0,
            cancel: CancellationToken::new(),
            info: None,
            started_at: None,
            last_activity_at: None,
            broadcast_tx,
            snapshot,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    /// The sole construction guard: succeeds only when there is no client
    /// and no construction already in flight.
    pub fn try_begin_initialization(&mut self) -> bool {
        if self.client.is_some() || self.initializing {
            return false;
        }
        self.initializing = true;
        true
    }

    /// Start a new client generation with a fresh cancellation token.
    pub fn next_generation(&mut self) -> (u64, CancellationToken) {
        self.generation += 1;
        self.cancel = CancellationToken::new();
        (self.generation, self.cancel.clone())
    }

    /// Store the freshly constructed client. `initializing` stays set until
    /// the first terminal lifecycle event.
    pub fn set_active_client(&mut self, client: Arc<dyn AutomationClient>) {
        let now = chrono_now();
        self.client = Some(client);
        self.started_at = Some(now.clone());
        self.last_activity_at = Some(now);
    }

    /// Drop the client, clear the guard and cancel everything in flight for
    /// the current generation. Returns the client so the caller can decide
    /// whether to tear it down.
    pub fn clear_session(&mut self) -> Option<Arc<dyn AutomationClient>> {
        self.initializing = false;
        self.info = None;
        self.cancel.cancel();
        self.client.take()
    }

    /// Client and account details when the session is ready for operations.
    pub fn ready_client(&self) -> Option<(Arc<dyn AutomationClient>, SessionInfo)> {
        if self.status != SessionStatus::Ready {
            return None;
        }
        let client = self.client.as_ref()?;
        let info = self.info.clone().or_else(|| client.session_info())?;
        Some((client.clone(), info))
    }

    /// Any active client, ready or not (logout accepts either).
    pub fn active_client(&self) -> Option<(Arc<dyn AutomationClient>, u64, CancellationToken)> {
        self.client
            .as_ref()
            .map(|c| (c.clone(), self.generation, self.cancel.clone()))
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Session info reported by the client, if it has reported any
    pub fn client_info(&self) -> Option<SessionInfo> {
        self.client.as_ref().and_then(|c| c.session_info())
    }

    // -- transition support --------------------------------------------------

    pub fn extract_state(&self) -> TransitionState {
        TransitionState {
            key: self.key.clone(),
            status: self.status,
            initializing: self.initializing,
            info: self.info.clone(),
            last_activity_at: self.last_activity_at.clone(),
        }
    }

    pub fn apply_state(&mut self, state: TransitionState) {
        self.status = state.status;
        self.initializing = state.initializing;
        self.info = state.info;
        self.last_activity_at = state.last_activity_at;
    }

    // -- fan-out -------------------------------------------------------------

    /// Send to every subscriber of this session. No subscribers is fine.
    pub fn broadcast(&self, msg: ServerMessage) {
        let _ = self.broadcast_tx.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.broadcast_tx.subscribe()
    }

    pub fn broadcast_sender(&self) -> broadcast::Sender<ServerMessage> {
        self.broadcast_tx.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcast_tx.receiver_count()
    }

    // -- snapshots -----------------------------------------------------------

    pub fn snapshot_arc(&self) -> Arc<ArcSwap<SessionSnapshot>> {
        self.snapshot.clone()
    }

    pub fn refresh_snapshot(&self) {
        self.snapshot.store(Arc::new(SessionSnapshot {
            key: self.key.clone(),
            status: self.status,
            initializing: self.initializing,
            has_client: self.client.is_some(),
            generation: self.generation,
            info: self.info.clone(),
            started_at: self.started_at.clone(),
            last_activity_at: self.last_activity_at.clone(),
        }));
    }
}

/// Build the `/api/sessions` row for a snapshot.
pub fn summary_from(snap: &SessionSnapshot, subscribers: usize) -> SessionSummary {
    SessionSummary {
        session_key: snap.key.clone(),
        status: snap.status,
        user: snap.info.as_ref().map(|i| i.user.clone()),
        name: snap.info.as_ref().map(|i| i.name.clone()),
        platform: snap.info.as_ref().map(|i| i.platform.clone()),
        subscribers,
        started_at: snap.started_at.clone(),
        last_activity_at: snap.last_activity_at.clone(),
    }
}
