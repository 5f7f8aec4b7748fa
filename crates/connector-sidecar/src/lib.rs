//! Sidecar connector
//!
//! Talks to an external automation driver over a WebSocket. The driver owns
//! the browser session with the messaging network; this crate only frames
//! requests, correlates responses by id and turns pushed events into
//! `ClientEvent`s.

mod frame;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, OnceCell};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use wabridge_connector_core::{
    AutomationClient, AutomationConnector, ClientConnection, ClientEvent, ConnectorError,
    ConnectorResult, RawChat, RawContact, RawMessage, SendReceipt, SessionInfo,
};

use crate::frame::Inbound;

const EVENT_BUFFER: usize = 256;
const OUTBOUND_BUFFER: usize = 64;

/// Builds `SidecarClient`s pointed at one driver URL
#[derive(Debug, Clone)]
pub struct SidecarConnector {
    url: String,
    client_id: String,
}

impl SidecarConnector {
    pub fn new(url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
        }
    }

    /// Auth-state id the driver stores credentials under. The default
    /// session keeps the configured id; other sessions append the user id
    /// length-prefixed, then the session id, so distinct keys never share
    /// a credential store.
    fn client_id_for(&self, session_key: &str) -> String {
        if session_key == wabridge_protocol::default_session_key() {
            return self.client_id.clone();
        }
        match wabridge_protocol::split_session_key(session_key) {
            Some((user, session)) => {
                format!("{}-{}-{}-{}", self.client_id, user.len(), user, session)
            }
            None => format!(
                "{}-{}-{}",
                self.client_id,
                session_key.len(),
                session_key.replace('/', "_")
            ),
        }
    }
}

impl AutomationConnector for SidecarConnector {
    fn connect(&self, session_key: &str) -> ConnectorResult<ClientConnection> {
        let (event_tx, events) = mpsc::channel(EVENT_BUFFER);
        let client = SidecarClient {
            url: self.url.clone(),
            client_id: self.client_id_for(session_key),
            shared: Arc::new(Shared {
                event_tx,
                pending: DashMap::new(),
                info: RwLock::new(None),
                closing: AtomicBool::new(false),
            }),
            next_id: AtomicU64::new(1),
            outbound: Mutex::new(None),
            destroyed: OnceCell::new(),
        };
        Ok(ClientConnection {
            client: Arc::new(client),
            events,
        })
    }
}

type PendingReply = oneshot::Sender<Result<Value, String>>;

/// State shared with the reader task
struct Shared {
    event_tx: mpsc::Sender<ClientEvent>,
    pending: DashMap<u64, PendingReply>,
    info: RwLock<Option<SessionInfo>>,
    closing: AtomicBool,
}

impl Shared {
    fn set_info(&self, info: Option<SessionInfo>) {
        if let Ok(mut guard) = self.info.write() {
            *guard = info;
        }
    }

    fn fail_pending(&self, reason: &str) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, reply)) = self.pending.remove(&id) {
                let _ = reply.send(Err(reason.to_string()));
            }
        }
    }
}

/// One driver session
pub struct SidecarClient {
    url: String,
    client_id: String,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    /// Set once teardown ran; later `destroy` calls wait on it and succeed
    destroyed: OnceCell<()>,
}

impl SidecarClient {
    fn outbound(&self) -> ConnectorResult<mpsc::Sender<String>> {
        self.outbound
            .lock()
            .map_err(|_| ConnectorError::ChannelClosed)?
            .clone()
            .ok_or(ConnectorError::NotInitialized)
    }

    async fn request(&self, method: &str, params: Value) -> ConnectorResult<Value> {
        let outbound = self.outbound()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = frame::encode_request(id, method, params)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.pending.insert(id, reply_tx);

        if outbound.send(text).await.is_err() {
            self.shared.pending.remove(&id);
            return Err(ConnectorError::ChannelClosed);
        }

        debug!(
            component = "sidecar",
            event = "sidecar.request.sent",
            request_id = id,
            method = method,
            "Sent sidecar request"
        );

        match reply_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(ConnectorError::Remote(message)),
            Err(_) => Err(ConnectorError::ChannelClosed),
        }
    }

    async fn request_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> ConnectorResult<T> {
        let value = self.request(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn teardown(&self) -> ConnectorResult<()> {
        let result = match self.outbound() {
            Ok(_) => self.request("destroy", Value::Null).await.map(|_| ()),
            Err(ConnectorError::NotInitialized) => Ok(()),
            Err(e) => Err(e),
        };
        self.close_transport();
        self.shared.set_info(None);
        self.shared.fail_pending("client destroyed");
        result
    }

    fn close_transport(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.outbound.lock() {
            guard.take();
        }
    }
}

#[async_trait]
impl AutomationClient for SidecarClient {
    async fn initialize(&self) -> ConnectorResult<()> {
        {
            let guard = self
                .outbound
                .lock()
                .map_err(|_| ConnectorError::ChannelClosed)?;
            if guard.is_some() {
                return Err(ConnectorError::Startup("client already initialized".into()));
            }
        }

        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ConnectorError::Startup(format!("connect to {}: {e}", self.url)))?;
        let (mut sink, stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        if let Ok(mut guard) = self.outbound.lock() {
            *guard = Some(outbound_tx);
        }

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });
        tokio::spawn(read_loop(stream, self.shared.clone()));

        info!(
            component = "sidecar",
            event = "sidecar.connected",
            url = %self.url,
            client_id = %self.client_id,
            "Connected to automation sidecar"
        );

        self.request("initialize", json!({ "clientId": self.client_id }))
            .await
            .map_err(|e| match e {
                ConnectorError::Remote(message) => ConnectorError::Startup(message),
                other => other,
            })?;
        Ok(())
    }

    fn session_info(&self) -> Option<SessionInfo> {
        self.shared.info.read().ok().and_then(|guard| guard.clone())
    }

    async fn send_message(&self, to: &str, body: &str) -> ConnectorResult<SendReceipt> {
        self.request_as("sendMessage", json!({ "to": to, "body": body }))
            .await
    }

    async fn contacts(&self) -> ConnectorResult<Vec<RawContact>> {
        self.request_as("getContacts", Value::Null).await
    }

    async fn chats(&self) -> ConnectorResult<Vec<RawChat>> {
        self.request_as("getChats", Value::Null).await
    }

    async fn chat_messages(&self, chat_id: &str, limit: u32) -> ConnectorResult<Vec<RawMessage>> {
        self.request_as(
            "fetchMessages",
            json!({ "chatId": chat_id, "limit": limit }),
        )
        .await
    }

    async fn logout(&self) -> ConnectorResult<()> {
        self.request("logout", Value::Null).await?;
        self.shared.set_info(None);
        Ok(())
    }

    async fn destroy(&self) -> ConnectorResult<()> {
        let mut result = Ok(());
        let outcome = &mut result;
        self.destroyed
            .get_or_init(|| async move {
                *outcome = self.teardown().await;
            })
            .await;
        result
    }
}

/// Pump inbound frames until the driver goes away. Losing the transport
/// without a local `destroy` is reported as a disconnect.
async fn read_loop<S>(mut stream: S, shared: Arc<Shared>)
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut reason = "sidecar connection closed".to_string();

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                reason = format!("sidecar connection error: {e}");
                break;
            }
        };

        match frame::decode(text.as_str()) {
            Ok(Inbound::Response { id, outcome }) => match shared.pending.remove(&id) {
                Some((_, reply)) => {
                    let _ = reply.send(outcome);
                }
                None => debug!(
                    component = "sidecar",
                    event = "sidecar.response.unmatched",
                    request_id = id,
                    "Response for unknown request"
                ),
            },
            Ok(Inbound::Event { event, info }) => {
                if info.is_some() {
                    shared.set_info(info);
                }
                if shared.event_tx.send(event).await.is_err() {
                    break;
                }
            }
            Ok(Inbound::Unknown(name)) => debug!(
                component = "sidecar",
                event = "sidecar.event.ignored",
                name = %name,
                "Ignoring unknown sidecar event"
            ),
            Err(e) => warn!(
                component = "sidecar",
                event = "sidecar.frame.decode_failed",
                error = %e,
                payload_bytes = text.len(),
                "Failed to decode sidecar frame"
            ),
        }
    }

    shared.fail_pending(&reason);
    if !shared.closing.load(Ordering::SeqCst) {
        shared.set_info(None);
        let _ = shared.event_tx.send(ClientEvent::Disconnected(reason)).await;
    }
}
