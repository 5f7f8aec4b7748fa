//! Session actor: owns a SessionHandle and processes commands sequentially.
//!
//! Each session key runs as an independent tokio task. Callers talk to it
//! through `SessionActorHandle`, which sends `SessionCommand` messages over
//! an mpsc channel. Lock-free reads go through `ArcSwap`.
//!
//! Long client calls never run inside the actor: startup runs in a spawned
//! task and operations run in the caller, both under a deadline and the
//! generation's cancellation token.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wabridge_connector_core::{AutomationClient, AutomationConnector, ClientEvent};
use wabridge_protocol::{ServerMessage, SessionSummary};

use crate::clock::chrono_now;
use crate::error::RelayError;
use crate::normalize;
use crate::qr;
use crate::session::{summary_from, SessionHandle, SessionSnapshot};
use crate::session_command::{ClientLease, SessionCommand, StartFailure, StartOutcome};
use crate::transition::{transition, Effect, Input};

/// Action name used for startup deadlines
pub const STARTUP_ACTION: &str = "start the WhatsApp client";

/// Deadlines applied to automation client calls
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub startup: Duration,
    pub operation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            startup: Duration::from_secs(60),
            operation: Duration::from_secs(30),
        }
    }
}

/// Handle to a running session actor (cheap to Clone).
#[derive(Clone)]
pub struct SessionActorHandle {
    pub key: String,
    command_tx: mpsc::Sender<SessionCommand>,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
    broadcast_tx: broadcast::Sender<ServerMessage>,
    timeouts: Timeouts,
}

impl SessionActorHandle {
    /// Spawn the actor for `handle`, returning a handle to it.
    pub fn spawn(
        handle: SessionHandle,
        connector: Arc<dyn AutomationConnector>,
        timeouts: Timeouts,
    ) -> SessionActorHandle {
        let (command_tx, command_rx) = mpsc::channel(256);
        let key = handle.key().to_string();
        let snapshot = handle.snapshot_arc();
        let broadcast_tx = handle.broadcast_sender();
        handle.refresh_snapshot();

        let actor = SessionActor {
            handle,
            connector,
            timeouts,
            self_tx: command_tx.downgrade(),
            logout: None,
        };
        tokio::spawn(actor.run(command_rx));

        SessionActorHandle {
            key,
            command_tx,
            snapshot,
            broadcast_tx,
            timeouts,
        }
    }

    /// Send a command to the actor (fire-and-forget).
    pub async fn send(&self, cmd: SessionCommand) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!(
                component = "session_actor",
                session_key = %self.key,
                "Actor channel closed, command dropped"
            );
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await;
        rx.await.ok()
    }

    pub async fn start(&self) -> StartOutcome {
        self.request(|reply| SessionCommand::Start { reply })
            .await
            .unwrap_or(StartOutcome::Failed(RelayError::Cancelled))
    }

    /// Borrow the client of a ready session.
    pub async fn lease(&self) -> Result<ClientLease, RelayError> {
        self.request(|reply| SessionCommand::Lease { reply })
            .await
            .unwrap_or(Err(RelayError::NotReady))
    }

    /// Borrow any active client, ready or not.
    pub async fn logout_lease(&self) -> Result<ClientLease, RelayError> {
        self.request(|reply| SessionCommand::LogoutLease { reply })
            .await
            .unwrap_or(Err(RelayError::NoActiveSession))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.broadcast_tx.subscribe()
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot.load_full()
    }

    /// Lock-free summary for `/api/sessions`.
    pub fn summary(&self) -> SessionSummary {
        summary_from(&self.snapshot.load(), self.broadcast_tx.receiver_count())
    }

    pub fn operation_timeout(&self) -> Duration {
        self.timeouts.operation
    }

    /// Destroy the client and stop the actor.
    pub async fn shutdown(&self) {
        let _ = self
            .request(|reply| SessionCommand::Shutdown { reply })
            .await;
    }
}

/// A logout handed out by `LogoutLease` that has not reported back yet.
/// While it runs, the logout path owns teardown of its client.
struct PendingLogout {
    generation: u64,
    /// Client released by a disconnect or timeout meanwhile, destroyed only
    /// if the logout fails
    released: Option<Arc<dyn AutomationClient>>,
}

struct SessionActor {
    handle: SessionHandle,
    connector: Arc<dyn AutomationConnector>,
    timeouts: Timeouts,
    self_tx: mpsc::WeakSender<SessionCommand>,
    logout: Option<PendingLogout>,
}

impl SessionActor {
    async fn run(mut self, mut command_rx: mpsc::Receiver<SessionCommand>) {
        while let Some(cmd) = command_rx.recv().await {
            match cmd {
                SessionCommand::Start { reply } => {
                    let outcome = self.start();
                    let _ = reply.send(outcome);
                }

                SessionCommand::Lease { reply } => {
                    let lease = match self.handle.ready_client() {
                        Some((client, _)) => Ok(ClientLease {
                            client,
                            generation: self.handle.generation(),
                            cancel: self.handle.cancel_token(),
                        }),
                        None => Err(RelayError::NotReady),
                    };
                    let _ = reply.send(lease);
                }

                SessionCommand::LogoutLease { reply } => {
                    let lease = self
                        .handle
                        .active_client()
                        .map(|(client, generation, cancel)| ClientLease {
                            client,
                            generation,
                            cancel,
                        })
                        .ok_or(RelayError::NoActiveSession);
                    if let Ok(lease) = &lease {
                        self.begin_logout(lease.generation);
                    }
                    let _ = reply.send(lease);
                }

                SessionCommand::LogoutFinished { generation } => {
                    // The logout path destroyed the client itself
                    let _ = self.take_logout(generation);
                    self.logout_finished(generation);
                }

                SessionCommand::LogoutFailed { generation } => {
                    if let Some(client) = self.take_logout(generation) {
                        self.spawn_destroy(client);
                    }
                }

                SessionCommand::OperationTimedOut { generation, action } => {
                    if self.is_current(generation) {
                        warn!(
                            component = "session_actor",
                            event = "session.operation.timed_out",
                            session_key = %self.handle.key(),
                            generation,
                            action,
                            "Operation timed out, resetting session"
                        );
                        self.apply(Input::TimedOut { action });
                    }
                }

                SessionCommand::ClientEvent { generation, event } => {
                    self.client_event(generation, event);
                }

                SessionCommand::StartFinished { generation, result } => {
                    self.start_finished(generation, result);
                }

                SessionCommand::Shutdown { reply } => {
                    let deferred = self.logout.take().and_then(|pending| pending.released);
                    if let Some(client) = deferred {
                        destroy_client(client, self.timeouts.operation, self.handle.key()).await;
                    }
                    if let Some(client) = self.handle.clear_session() {
                        destroy_client(client, self.timeouts.operation, self.handle.key()).await;
                    }
                    self.handle.refresh_snapshot();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        debug!(
            component = "session_actor",
            session_key = %self.handle.key(),
            "Session actor stopped"
        );
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.handle.generation() && self.handle.has_client()
    }

    fn start(&mut self) -> StartOutcome {
        if let Some((_, info)) = self.handle.ready_client() {
            return StartOutcome::AlreadyReady(info);
        }
        if !self.handle.try_begin_initialization() {
            return StartOutcome::AlreadyInitializing;
        }
        let Some(self_tx) = self.self_tx.upgrade() else {
            return StartOutcome::Failed(RelayError::Cancelled);
        };

        let (generation, cancel) = self.handle.next_generation();
        self.apply(Input::StartRequested);

        let connection = match self.connector.connect(self.handle.key()) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(
                    component = "session_actor",
                    event = "session.client.construct_failed",
                    session_key = %self.handle.key(),
                    error = %e,
                    "Failed to construct automation client"
                );
                let cause = e.to_string();
                self.apply(Input::StartFailed {
                    error: cause.clone(),
                });
                return StartOutcome::Failed(RelayError::Construction { cause });
            }
        };

        info!(
            component = "session_actor",
            event = "session.client.constructed",
            session_key = %self.handle.key(),
            generation,
            "Automation client constructed"
        );

        self.handle.set_active_client(connection.client.clone());
        self.handle.refresh_snapshot();

        tokio::spawn(forward_events(
            generation,
            cancel.clone(),
            connection.events,
            self_tx.clone(),
        ));
        tokio::spawn(run_startup(
            generation,
            cancel,
            connection.client,
            self.timeouts.startup,
            self_tx,
        ));

        StartOutcome::Started { generation }
    }

    fn client_event(&mut self, generation: u64, event: ClientEvent) {
        if !self.is_current(generation) {
            debug!(
                component = "session_actor",
                session_key = %self.handle.key(),
                generation,
                current = self.handle.generation(),
                "Dropping event from stale client"
            );
            return;
        }

        let input = match event {
            ClientEvent::Qr(token) => Input::Qr { token },
            ClientEvent::Authenticated => Input::Authenticated,
            ClientEvent::AuthFailure(reason) => Input::AuthFailure { reason },
            ClientEvent::Ready => Input::Ready {
                info: self.handle.client_info(),
            },
            ClientEvent::Disconnected(reason) => Input::Disconnected { reason },
            ClientEvent::Message(raw) => Input::MessageReceived(normalize::message(raw)),
        };
        debug!(
            component = "session_actor",
            event = "session.client.event",
            session_key = %self.handle.key(),
            input = ?input,
            "Client event"
        );
        self.apply(input);
    }

    fn start_finished(&mut self, generation: u64, result: Result<(), StartFailure>) {
        if !self.is_current(generation) {
            return;
        }
        match result {
            Ok(()) => {
                debug!(
                    component = "session_actor",
                    event = "session.client.started",
                    session_key = %self.handle.key(),
                    generation,
                    "Automation client startup completed"
                );
            }
            Err(StartFailure::Error(error)) => {
                warn!(
                    component = "session_actor",
                    event = "session.client.start_failed",
                    session_key = %self.handle.key(),
                    generation,
                    error = %error,
                    "Automation client startup failed"
                );
                self.apply(Input::StartFailed { error });
            }
            Err(StartFailure::TimedOut) => {
                warn!(
                    component = "session_actor",
                    event = "session.client.start_timed_out",
                    session_key = %self.handle.key(),
                    generation,
                    "Automation client startup timed out"
                );
                self.handle.broadcast(
                    RelayError::Timeout {
                        action: STARTUP_ACTION,
                    }
                    .to_server_message(),
                );
                self.apply(Input::TimedOut {
                    action: STARTUP_ACTION,
                });
            }
        }
    }

    fn begin_logout(&mut self, generation: u64) {
        let previous = self.logout.replace(PendingLogout {
            generation,
            released: None,
        });
        if let Some(client) = previous.and_then(|pending| pending.released) {
            self.spawn_destroy(client);
        }
    }

    /// End the pending logout for `generation`, returning any client whose
    /// teardown was deferred to it.
    fn take_logout(&mut self, generation: u64) -> Option<Arc<dyn AutomationClient>> {
        if !self.logout_pending_for(generation) {
            return None;
        }
        self.logout.take().and_then(|pending| pending.released)
    }

    fn logout_pending_for(&self, generation: u64) -> bool {
        matches!(&self.logout, Some(pending) if pending.generation == generation)
    }

    fn spawn_destroy(&self, client: Arc<dyn AutomationClient>) {
        let deadline = self.timeouts.operation;
        let key = self.handle.key().to_string();
        tokio::spawn(async move {
            destroy_client(client, deadline, &key).await;
        });
    }

    fn logout_finished(&mut self, generation: u64) {
        if self.is_current(generation) {
            self.apply(Input::LoggedOut);
            return;
        }
        if self.handle.has_client() {
            // A newer client replaced the one that was logged out
            debug!(
                component = "session_actor",
                session_key = %self.handle.key(),
                generation,
                "Logout finished for a replaced client"
            );
            return;
        }
        // Session already cleared while logout ran (the client usually
        // reports a disconnect on logout); still confirm it.
        self.handle.broadcast(ServerMessage::LoggedOut {
            message: "Successfully logged out".to_string(),
        });
    }

    /// Run an input through the transition function and execute its effects.
    /// Client releases settle before any subscriber hears about the change.
    fn apply(&mut self, input: Input) {
        let now = chrono_now();
        let (state, effects) = transition(self.handle.extract_state(), input, &now);
        self.handle.apply_state(state);

        let (releases, broadcasts): (Vec<_>, Vec<_>) = effects
            .into_iter()
            .partition(|e| matches!(e, Effect::ReleaseClient { .. }));
        for effect in releases {
            self.execute(effect);
        }
        self.handle.refresh_snapshot();
        for effect in broadcasts {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Emit(msg) => self.handle.broadcast(*msg),
            Effect::RenderQr(token) => match qr::encode_data_url(&token) {
                Ok(qr_code) => self.handle.broadcast(ServerMessage::QrCode { qr_code }),
                Err(e) => {
                    warn!(
                        component = "session_actor",
                        event = "session.qr.encode_failed",
                        session_key = %self.handle.key(),
                        error = %e,
                        "Failed to encode pairing QR code"
                    );
                    self.handle.broadcast(
                        RelayError::QrEncode {
                            cause: e.to_string(),
                        }
                        .to_server_message(),
                    );
                }
            },
            Effect::ReleaseClient { destroy } => {
                let generation = self.handle.generation();
                let Some(client) = self.handle.clear_session() else {
                    return;
                };
                if !destroy {
                    return;
                }
                if !self.logout_pending_for(generation) {
                    self.spawn_destroy(client);
                    return;
                }
                debug!(
                    component = "session_actor",
                    event = "session.client.destroy_deferred",
                    session_key = %self.handle.key(),
                    generation,
                    "Logout in progress tears the client down"
                );
                if let Some(pending) = self.logout.as_mut() {
                    pending.released = Some(client);
                }
            }
        }
    }
}

/// Pump client events into the actor, tagged with their generation.
async fn forward_events(
    generation: u64,
    cancel: CancellationToken,
    mut events: mpsc::Receiver<ClientEvent>,
    actor_tx: mpsc::Sender<SessionCommand>,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else { break };
        if actor_tx
            .send(SessionCommand::ClientEvent { generation, event })
            .await
            .is_err()
        {
            break;
        }
    }
}

async fn run_startup(
    generation: u64,
    cancel: CancellationToken,
    client: Arc<dyn AutomationClient>,
    deadline: Duration,
    actor_tx: mpsc::Sender<SessionCommand>,
) {
    let result = tokio::select! {
        _ = cancel.cancelled() => return,
        outcome = tokio::time::timeout(deadline, client.initialize()) => match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StartFailure::Error(e.to_string())),
            Err(_) => Err(StartFailure::TimedOut),
        },
    };
    let _ = actor_tx
        .send(SessionCommand::StartFinished { generation, result })
        .await;
}

async fn destroy_client(client: Arc<dyn AutomationClient>, deadline: Duration, key: &str) {
    match tokio::time::timeout(deadline, client.destroy()).await {
        Ok(Ok(())) => {
            debug!(
                component = "session_actor",
                event = "session.client.destroyed",
                session_key = %key,
                "Automation client destroyed"
            );
        }
        Ok(Err(e)) => {
            warn!(
                component = "session_actor",
                event = "session.client.destroy_failed",
                session_key = %key,
                error = %e,
                "Failed to destroy automation client"
            );
        }
        Err(_) => {
            warn!(
                component = "session_actor",
                event = "session.client.destroy_timed_out",
                session_key = %key,
                "Timed out destroying automation client"
            );
        }
    }
}
