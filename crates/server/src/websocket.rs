//! WebSocket handling

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wabridge_connector_core::ConnectorResult;
use wabridge_protocol::{default_session_key, ClientMessage, SentMessage, ServerMessage};

use crate::error::RelayError;
use crate::normalize;
use crate::session_actor::SessionActorHandle;
use crate::session_command::{ClientLease, SessionCommand, StartOutcome};
use crate::state::SessionRegistry;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Messages that can be sent through the WebSocket
enum OutboundMessage {
    /// JSON-serialized ServerMessage
    Json(ServerMessage),
    /// Raw pong response
    Pong(Bytes),
}

/// One open front-end connection
struct Connection {
    id: u64,
    outbound: mpsc::Sender<OutboundMessage>,
    /// Cancelled when the socket closes; stops the broadcast forwarders
    closed: CancellationToken,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<SessionRegistry>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<SessionRegistry>) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        "WebSocket connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(100);

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let result = match msg {
                OutboundMessage::Json(server_msg) => match serde_json::to_string(&server_msg) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!(
                            component = "websocket",
                            event = "ws.send.serialize_failed",
                            connection_id = conn_id,
                            error = %e,
                            "Failed to serialize server message"
                        );
                        continue;
                    }
                },
                OutboundMessage::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            };

            if result.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    let conn = Connection {
        id: conn_id,
        outbound: outbound_tx,
        closed: CancellationToken::new(),
    };

    state.register_connection(conn.id);
    subscribe_connection(&state, &conn, &default_session_key());

    // Handle incoming messages
    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = conn.outbound.send(OutboundMessage::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        let client_msg = match decode_client_message(&msg) {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.message.parse_failed",
                    connection_id = conn_id,
                    error = %e,
                    payload_bytes = msg.len(),
                    payload_preview = %truncate_for_log(&msg, 240),
                    "Failed to parse client message"
                );
                send_error(&conn, e).await;
                continue;
            }
        };

        Box::pin(handle_client_message(client_msg, &conn, &state)).await;
    }

    state.unregister_connection(conn.id);
    conn.closed.cancel();
    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        connections = state.connection_count(),
        "WebSocket connection closed"
    );
    send_task.abort();
}

fn decode_client_message(text: &str) -> Result<ClientMessage, RelayError> {
    serde_json::from_str(text).map_err(|e| RelayError::Parse(e.to_string()))
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Send a ServerMessage through the outbound channel
async fn send_json(conn: &Connection, msg: ServerMessage) {
    let _ = conn.outbound.send(OutboundMessage::Json(msg)).await;
}

async fn send_error(conn: &Connection, err: RelayError) {
    send_json(conn, err.to_server_message()).await;
}

/// Subscribe `conn` to `key` unless it already is.
fn subscribe_connection(state: &SessionRegistry, conn: &Connection, key: &str) {
    if let Some(rx) = state.subscribe(conn.id, key) {
        debug!(
            component = "websocket",
            event = "ws.subscription.added",
            connection_id = conn.id,
            session_key = %key,
            "Connection subscribed to session"
        );
        spawn_broadcast_forwarder(
            rx,
            conn.outbound.clone(),
            key.to_string(),
            conn.closed.clone(),
        );
    }
}

/// Spawn a task that drains a broadcast receiver and forwards messages to an
/// outbound channel, until the connection closes.
///
/// A subscriber that lags behind the broadcast buffer is sent a `lagged`
/// error and keeps receiving from the oldest retained message.
fn spawn_broadcast_forwarder(
    mut rx: broadcast::Receiver<ServerMessage>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    session_key: String,
    closed: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = closed.cancelled() => break,
                received = rx.recv() => received,
            };
            match received {
                Ok(msg) => {
                    if outbound_tx.send(OutboundMessage::Json(msg)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        component = "websocket",
                        event = "ws.broadcast.lagged",
                        session_key = %session_key,
                        skipped = n,
                        "Broadcast subscriber lagged, skipped {n} messages"
                    );
                    let lagged = RelayError::Lagged { skipped: n }.to_server_message();
                    if outbound_tx.send(OutboundMessage::Json(lagged)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn handle_client_message(msg: ClientMessage, conn: &Connection, state: &Arc<SessionRegistry>) {
    debug!(
        component = "websocket",
        event = "ws.message.received",
        connection_id = conn.id,
        message = ?msg,
        "Received client message"
    );

    let Some(key) = msg.target().session_key() else {
        send_error(
            conn,
            RelayError::InvalidRequest(
                "userId and sessionId may only contain letters, digits, '-' and '_'".to_string(),
            ),
        )
        .await;
        return;
    };

    // Only a start creates a session; everything else needs one already
    let actor = if matches!(msg, ClientMessage::InitializeWhatsApp { .. }) {
        if let Err(e) = state.reserve_session(&key) {
            send_error(conn, e).await;
            return;
        }
        subscribe_connection(state, conn, &key);
        state.session(&key)
    } else {
        match state.existing_session(&key) {
            Some(actor) => {
                subscribe_connection(state, conn, &key);
                actor
            }
            None => {
                let missing = match msg {
                    ClientMessage::Logout { .. } => RelayError::NoActiveSession,
                    _ => RelayError::NotReady,
                };
                send_error(conn, missing).await;
                return;
            }
        }
    };

    match msg {
        ClientMessage::InitializeWhatsApp { .. } => match actor.start().await {
            StartOutcome::AlreadyReady(info) => {
                // Catch-up for a late joiner; nobody else needs it again
                send_json(
                    conn,
                    ServerMessage::Authenticated {
                        message: "WhatsApp already authenticated".to_string(),
                    },
                )
                .await;
                send_json(conn, ServerMessage::ready(&info)).await;
            }
            StartOutcome::Started { generation } => {
                info!(
                    component = "websocket",
                    event = "ws.session.start_requested",
                    connection_id = conn.id,
                    session_key = %key,
                    generation,
                    "Starting WhatsApp client"
                );
            }
            StartOutcome::AlreadyInitializing => {
                debug!(
                    component = "websocket",
                    event = "ws.session.already_initializing",
                    connection_id = conn.id,
                    session_key = %key,
                    "Client already initializing"
                );
            }
            // Construction failures were already broadcast to subscribers
            StartOutcome::Failed(RelayError::Construction { .. }) => {}
            StartOutcome::Failed(e) => send_error(conn, e).await,
        },

        ClientMessage::SendMessage { to, message, .. } => {
            let Some(lease) = ready_lease(&actor, conn).await else {
                return;
            };
            let Some(address) = normalize::contact_address(&to) else {
                send_error(
                    conn,
                    RelayError::InvalidRequest("recipient must contain a phone number".to_string()),
                )
                .await;
                return;
            };

            let sent = run_operation(
                &actor,
                &lease,
                "send message",
                lease.client.send_message(&address, &message),
            )
            .await;
            match sent {
                Ok(receipt) => {
                    info!(
                        component = "websocket",
                        event = "ws.message.sent",
                        connection_id = conn.id,
                        session_key = %key,
                        message_id = %receipt.id,
                        "Message sent"
                    );
                    send_json(
                        conn,
                        ServerMessage::MessageSent(SentMessage {
                            id: receipt.id,
                            to: address,
                            body: message,
                            timestamp: receipt.timestamp,
                        }),
                    )
                    .await;
                }
                Err(e) => send_error(conn, e).await,
            }
        }

        ClientMessage::GetContacts { .. } => {
            let Some(lease) = ready_lease(&actor, conn).await else {
                return;
            };
            match run_operation(&actor, &lease, "get contacts", lease.client.contacts()).await {
                Ok(raw) => {
                    let contacts = normalize::contacts(raw);
                    send_json(conn, ServerMessage::ContactsReceived { contacts }).await;
                }
                Err(e) => send_error(conn, e).await,
            }
        }

        ClientMessage::GetChats { .. } => {
            let Some(lease) = ready_lease(&actor, conn).await else {
                return;
            };
            match run_operation(&actor, &lease, "get chats", lease.client.chats()).await {
                Ok(raw) => {
                    let chats = normalize::chats(raw);
                    send_json(conn, ServerMessage::ChatsReceived { chats }).await;
                }
                Err(e) => send_error(conn, e).await,
            }
        }

        ClientMessage::GetChatMessages { chat_id, limit, .. } => {
            let Some(lease) = ready_lease(&actor, conn).await else {
                return;
            };
            if chat_id.trim().is_empty() {
                send_error(
                    conn,
                    RelayError::InvalidRequest("chatId is required".to_string()),
                )
                .await;
                return;
            }

            let fetched = run_operation(
                &actor,
                &lease,
                "get chat messages",
                lease.client.chat_messages(&chat_id, limit),
            )
            .await;
            match fetched {
                Ok(raw) => {
                    let messages = normalize::messages(raw);
                    send_json(conn, ServerMessage::ChatMessagesReceived { chat_id, messages })
                        .await;
                }
                Err(e) => send_error(conn, e).await,
            }
        }

        ClientMessage::Logout { .. } => {
            let lease = match actor.logout_lease().await {
                Ok(lease) => lease,
                Err(e) => {
                    send_error(conn, e).await;
                    return;
                }
            };

            // Not cancellable: the client usually reports a disconnect while
            // logging out, which clears the session under us. The actor leaves
            // teardown to this path until it reports back.
            let client = lease.client.clone();
            let teardown_key = key.clone();
            let logged_out = run_with_deadline(&actor, &lease, "logout", async move {
                client.logout().await?;
                if let Err(e) = client.destroy().await {
                    warn!(
                        component = "websocket",
                        event = "ws.session.teardown_failed",
                        session_key = %teardown_key,
                        error = %e,
                        "Client teardown after logout failed"
                    );
                }
                Ok(())
            })
            .await;

            match logged_out {
                Ok(()) => {
                    info!(
                        component = "websocket",
                        event = "ws.session.logged_out",
                        connection_id = conn.id,
                        session_key = %key,
                        "Session logged out"
                    );
                    actor
                        .send(SessionCommand::LogoutFinished {
                            generation: lease.generation,
                        })
                        .await;
                }
                Err(e) => {
                    actor
                        .send(SessionCommand::LogoutFailed {
                            generation: lease.generation,
                        })
                        .await;
                    send_error(conn, e).await;
                }
            }
        }
    }
}

/// Lease the client of a ready session, replying `not_ready` otherwise.
async fn ready_lease(actor: &SessionActorHandle, conn: &Connection) -> Option<ClientLease> {
    match actor.lease().await {
        Ok(lease) => Some(lease),
        Err(e) => {
            debug!(
                component = "websocket",
                event = "ws.session.not_ready",
                connection_id = conn.id,
                session_key = %actor.key,
                "Operation requested before session was ready"
            );
            send_error(conn, e).await;
            None
        }
    }
}

/// Run a client operation under the operation deadline, abandoning it if the
/// session is reset meanwhile.
async fn run_operation<T>(
    actor: &SessionActorHandle,
    lease: &ClientLease,
    action: &'static str,
    op: impl Future<Output = ConnectorResult<T>>,
) -> Result<T, RelayError> {
    tokio::select! {
        biased;
        result = run_with_deadline(actor, lease, action, op) => result,
        _ = lease.cancel.cancelled() => Err(RelayError::Cancelled),
    }
}

/// Run a client operation under the operation deadline. On expiry the
/// session is told to reset.
async fn run_with_deadline<T>(
    actor: &SessionActorHandle,
    lease: &ClientLease,
    action: &'static str,
    op: impl Future<Output = ConnectorResult<T>>,
) -> Result<T, RelayError> {
    match tokio::time::timeout(actor.operation_timeout(), op).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(
                component = "websocket",
                event = "ws.operation.failed",
                session_key = %actor.key,
                action,
                error = %e,
                "Automation client operation failed"
            );
            Err(RelayError::Operation {
                action,
                cause: e.to_string(),
            })
        }
        Err(_) => {
            actor
                .send(SessionCommand::OperationTimedOut {
                    generation: lease.generation,
                    action,
                })
                .await;
            Err(RelayError::Timeout { action })
        }
    }
}
