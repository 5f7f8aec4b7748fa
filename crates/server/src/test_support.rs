//! Scripted automation client for tests.
//!
//! `FakeClient` records every call and, on `initialize`, replays a scripted
//! event sequence through the channel its `FakeConnector` handed out.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use wabridge_connector_core::{
    AutomationClient, AutomationConnector, ClientConnection, ClientEvent, ConnectorError,
    ConnectorResult, RawChat, RawContact, RawMessage, SendReceipt, SessionInfo,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Initialize,
    SendMessage { to: String, body: String },
    Contacts,
    Chats,
    ChatMessages { chat_id: String, limit: u32 },
    Logout,
    Destroy,
}

#[derive(Debug, Clone, Default)]
enum Behavior {
    #[default]
    Succeed,
    Fail(String),
    Hang,
}

#[derive(Default)]
struct FakeState {
    calls: Mutex<Vec<Call>>,
    info: Mutex<Option<SessionInfo>>,
    events_tx: Mutex<Option<mpsc::Sender<ClientEvent>>>,
    script: Mutex<Vec<ClientEvent>>,
    init: Mutex<Behavior>,
    ops: Mutex<Behavior>,
    contacts: Mutex<Vec<RawContact>>,
    chats: Mutex<Vec<RawChat>>,
    history: Mutex<Vec<RawMessage>>,
    disconnect_on_logout: AtomicBool,
}

#[derive(Clone, Default)]
pub struct FakeClient {
    state: Arc<FakeState>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn test_info() -> SessionInfo {
    SessionInfo {
        user: "15550001111".to_string(),
        name: "Ana".to_string(),
        platform: "android".to_string(),
    }
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client that pairs and becomes ready as soon as it is initialized.
    pub fn pairing() -> Self {
        let fake = Self::new();
        fake.set_info(Some(test_info()));
        fake.script(vec![
            ClientEvent::Qr("2@pairing-token".to_string()),
            ClientEvent::Authenticated,
            ClientEvent::Ready,
        ]);
        fake
    }

    pub fn into_client(self) -> Arc<dyn AutomationClient> {
        Arc::new(self)
    }

    pub fn set_info(&self, info: Option<SessionInfo>) {
        *lock(&self.state.info) = info;
    }

    pub fn script(&self, events: Vec<ClientEvent>) {
        *lock(&self.state.script) = events;
    }

    pub fn fail_initialize(&self, error: &str) {
        *lock(&self.state.init) = Behavior::Fail(error.to_string());
    }

    pub fn hang_initialize(&self) {
        *lock(&self.state.init) = Behavior::Hang;
    }

    pub fn fail_operations(&self, error: &str) {
        *lock(&self.state.ops) = Behavior::Fail(error.to_string());
    }

    pub fn hang_operations(&self) {
        *lock(&self.state.ops) = Behavior::Hang;
    }

    /// Report a disconnect while logging out, the way the network does.
    pub fn disconnect_on_logout(&self) {
        self.state.disconnect_on_logout.store(true, Ordering::SeqCst);
    }

    pub fn set_contacts(&self, contacts: Vec<RawContact>) {
        *lock(&self.state.contacts) = contacts;
    }

    pub fn set_chats(&self, chats: Vec<RawChat>) {
        *lock(&self.state.chats) = chats;
    }

    pub fn set_history(&self, history: Vec<RawMessage>) {
        *lock(&self.state.history) = history;
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.state.calls).clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        lock(&self.state.calls).iter().filter(|c| pred(c)).count()
    }

    /// Push an event as if the remote network had produced it.
    pub async fn emit(&self, event: ClientEvent) {
        let tx = lock(&self.state.events_tx).clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    fn record(&self, call: Call) {
        lock(&self.state.calls).push(call);
    }

    async fn run_op<T>(&self, value: impl FnOnce() -> T) -> ConnectorResult<T> {
        let behavior = lock(&self.state.ops).clone();
        match behavior {
            Behavior::Succeed => Ok(value()),
            Behavior::Fail(e) => Err(ConnectorError::Remote(e)),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl AutomationClient for FakeClient {
    async fn initialize(&self) -> ConnectorResult<()> {
        self.record(Call::Initialize);
        let behavior = lock(&self.state.init).clone();
        match behavior {
            Behavior::Succeed => {}
            Behavior::Fail(e) => return Err(ConnectorError::Startup(e)),
            Behavior::Hang => std::future::pending::<()>().await,
        }
        let script = lock(&self.state.script).clone();
        for event in script {
            self.emit(event).await;
        }
        Ok(())
    }

    fn session_info(&self) -> Option<SessionInfo> {
        lock(&self.state.info).clone()
    }

    async fn send_message(&self, to: &str, body: &str) -> ConnectorResult<SendReceipt> {
        self.record(Call::SendMessage {
            to: to.to_string(),
            body: body.to_string(),
        });
        self.run_op(|| SendReceipt {
            id: "true_15551234567@c.us_3EB0".to_string(),
            timestamp: 1_700_000_000,
        })
        .await
    }

    async fn contacts(&self) -> ConnectorResult<Vec<RawContact>> {
        self.record(Call::Contacts);
        let contacts = lock(&self.state.contacts).clone();
        self.run_op(|| contacts).await
    }

    async fn chats(&self) -> ConnectorResult<Vec<RawChat>> {
        self.record(Call::Chats);
        let chats = lock(&self.state.chats).clone();
        self.run_op(|| chats).await
    }

    async fn chat_messages(&self, chat_id: &str, limit: u32) -> ConnectorResult<Vec<RawMessage>> {
        self.record(Call::ChatMessages {
            chat_id: chat_id.to_string(),
            limit,
        });
        let history = lock(&self.state.history).clone();
        self.run_op(|| history).await
    }

    async fn logout(&self) -> ConnectorResult<()> {
        self.record(Call::Logout);
        if self.state.disconnect_on_logout.load(Ordering::SeqCst) {
            self.emit(ClientEvent::Disconnected("LOGOUT".to_string()))
                .await;
            // Give the session time to handle the disconnect first
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.run_op(|| ()).await
    }

    async fn destroy(&self) -> ConnectorResult<()> {
        self.record(Call::Destroy);
        Ok(())
    }
}

/// Hands out the same `FakeClient` for every construction and counts them.
#[derive(Clone, Default)]
pub struct FakeConnector {
    pub client: FakeClient,
    connects: Arc<AtomicUsize>,
    fail_connect: Arc<Mutex<Option<String>>>,
}

impl FakeConnector {
    pub fn new(client: FakeClient) -> Self {
        Self {
            client,
            ..Default::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_connect(&self, error: &str) {
        *lock(&self.fail_connect) = Some(error.to_string());
    }
}

impl AutomationConnector for FakeConnector {
    fn connect(&self, _session_key: &str) -> ConnectorResult<ClientConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = lock(&self.fail_connect).clone() {
            return Err(ConnectorError::Startup(e));
        }
        let (tx, rx) = mpsc::channel(64);
        *lock(&self.client.state.events_tx) = Some(tx);
        Ok(ClientConnection {
            client: Arc::new(self.client.clone()),
            events: rx,
        })
    }
}
