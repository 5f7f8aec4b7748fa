//! Application state
//!
//! Sessions keyed by session key, each behind its own actor, plus the set
//! of open front-end connections and what each one is subscribed to.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{info, warn};
use wabridge_connector_core::AutomationConnector;
use wabridge_protocol::{default_session_key, ServerMessage, SessionSummary};

use crate::error::RelayError;
use crate::session::SessionHandle;
use crate::session_actor::{SessionActorHandle, Timeouts};

/// Per-connection bookkeeping
#[derive(Debug, Default)]
struct ConnectionEntry {
    subscriptions: HashSet<String>,
}

/// Sessions allowed at once unless configured otherwise
pub const DEFAULT_SESSION_LIMIT: usize = 256;

/// Shared application state, passed to handlers as `Arc<SessionRegistry>`
pub struct SessionRegistry {
    sessions: DashMap<String, SessionActorHandle>,
    connections: DashMap<u64, ConnectionEntry>,
    connector: Arc<dyn AutomationConnector>,
    timeouts: Timeouts,
    session_limit: usize,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn AutomationConnector>, timeouts: Timeouts) -> Self {
        Self {
            sessions: DashMap::new(),
            connections: DashMap::new(),
            connector,
            timeouts,
            session_limit: DEFAULT_SESSION_LIMIT,
        }
    }

    pub fn with_session_limit(mut self, limit: usize) -> Self {
        self.session_limit = limit.max(1);
        self
    }

    // -- connections ---------------------------------------------------------

    /// Track a newly opened connection. Registering twice is a no-op.
    pub fn register_connection(&self, conn_id: u64) {
        self.connections.entry(conn_id).or_default();
    }

    /// Forget a closed connection and drop sessions nobody needs any more.
    /// No-op if absent.
    pub fn unregister_connection(&self, conn_id: u64) {
        if self.connections.remove(&conn_id).is_some() {
            self.prune_idle_sessions();
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Subscribe `conn_id` to `key`. Returns a receiver the first time only;
    /// later calls for the same pair return `None` so a connection never
    /// receives a broadcast twice. Unknown connections get nothing.
    pub fn subscribe(
        &self,
        conn_id: u64,
        key: &str,
    ) -> Option<broadcast::Receiver<ServerMessage>> {
        let mut entry = self.connections.get_mut(&conn_id)?;
        if !entry.subscriptions.insert(key.to_string()) {
            return None;
        }
        drop(entry);
        Some(self.session(key).subscribe())
    }

    /// Keys `conn_id` is subscribed to
    pub fn subscriptions(&self, conn_id: u64) -> Vec<String> {
        let mut keys: Vec<String> = self
            .connections
            .get(&conn_id)
            .map(|entry| entry.subscriptions.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    // -- sessions ------------------------------------------------------------

    /// Get the actor for `key`, spawning it on first use.
    pub fn session(&self, key: &str) -> SessionActorHandle {
        if let Some(actor) = self.sessions.get(key) {
            return actor.clone();
        }
        self.sessions
            .entry(key.to_string())
            .or_insert_with(|| {
                info!(
                    component = "state",
                    event = "session.spawned",
                    session_key = %key,
                    "Spawning session actor"
                );
                SessionActorHandle::spawn(
                    SessionHandle::new(key.to_string()),
                    self.connector.clone(),
                    self.timeouts,
                )
            })
            .clone()
    }

    /// The actor for `key` if the session exists. Never spawns.
    pub fn existing_session(&self, key: &str) -> Option<SessionActorHandle> {
        self.sessions.get(key).map(|actor| actor.clone())
    }

    /// Make room for a session start on `key`: existing keys always pass,
    /// new ones only while under the session limit.
    pub fn reserve_session(&self, key: &str) -> Result<(), RelayError> {
        if self.sessions.contains_key(key) {
            return Ok(());
        }
        if self.sessions.len() >= self.session_limit {
            self.prune_idle_sessions();
        }
        if self.sessions.len() >= self.session_limit {
            warn!(
                component = "state",
                event = "session.limit_reached",
                session_key = %key,
                limit = self.session_limit,
                "Session limit reached"
            );
            return Err(RelayError::InvalidRequest(
                "too many sessions, try again later".to_string(),
            ));
        }
        Ok(())
    }

    fn is_subscribed(&self, key: &str) -> bool {
        self.connections
            .iter()
            .any(|entry| entry.subscriptions.contains(key))
    }

    /// Remove sessions with no client, no startup in flight and no
    /// subscribed connection. The default session is kept.
    pub fn prune_idle_sessions(&self) -> usize {
        let default_key = default_session_key();
        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                let snapshot = entry.value().snapshot();
                entry.key() != &default_key && !snapshot.has_client && !snapshot.initializing
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in candidates {
            let pruned = self.sessions.remove_if(&key, |_, actor| {
                let snapshot = actor.snapshot();
                !snapshot.has_client && !snapshot.initializing && !self.is_subscribed(&key)
            });
            if let Some((key, actor)) = pruned {
                info!(
                    component = "state",
                    event = "session.pruned",
                    session_key = %key,
                    "Removed idle session"
                );
                tokio::spawn(async move { actor.shutdown().await });
                removed += 1;
            }
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Summaries of every known session, sorted by key
    pub fn session_summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| entry.value().summary())
            .collect();
        summaries.sort_by(|a, b| a.session_key.cmp(&b.session_key));
        summaries
    }

    /// Destroy every session's client and stop the actors.
    pub async fn shutdown(&self) {
        let actors: Vec<SessionActorHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        info!(
            component = "state",
            event = "registry.shutdown",
            sessions = actors.len(),
            "Shutting down sessions"
        );
        futures::future::join_all(actors.iter().map(|actor| actor.shutdown())).await;
    }
}
