//! Fakes shared by the unit tests.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use courier_core::{
    ConnectOptions, ConnectionError, Credential, CredentialStore, EventSink, InboundMessage,
    MessageHandler, ProtocolClient, ProtocolConnector, SendError, SessionRecord, StorageError,
};
use serde_json::json;
use tokio::sync::{Notify, mpsc};

use crate::storage::MemoryStorage;

/// Client that records sends.
#[derive(Default)]
pub struct FakeClient {
    sent: Mutex<Vec<(String, String)>>,
    reject: AtomicBool,
    disconnected: AtomicBool,
}

impl FakeClient {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn reject_sends(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
    async fn send(&self, recipient: &str, body: &str) -> Result<(), SendError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(SendError::Rejected("payload refused".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), body.to_string()));
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// One call to `connect`, handed to the test to drive.
pub struct Attempt {
    pub sink: EventSink,
    pub client: Arc<FakeClient>,
    pub credential: Credential,
    pub options: ConnectOptions,
}

/// Connector whose clients are driven by the test through [`Attempt`]s.
pub struct FakeConnector {
    connects: AtomicUsize,
    issued: AtomicUsize,
    refuse: AtomicBool,
    refused: Mutex<Option<EventSink>>,
    hold: AtomicBool,
    release: Notify,
    attempts_tx: mpsc::UnboundedSender<Attempt>,
    attempts_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Attempt>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
        Self {
            connects: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            refused: Mutex::new(None),
            hold: AtomicBool::new(false),
            release: Notify::new(),
            attempts_tx,
            attempts_rx: tokio::sync::Mutex::new(attempts_rx),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn credentials_issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Wait for the next successful `connect` call.
    pub async fn next_attempt(&self) -> Attempt {
        self.attempts_rx
            .lock()
            .await
            .recv()
            .await
            .expect("connector dropped")
    }

    /// Keep each `connect` call pending until [`Self::release_connection`].
    pub fn hold_connections(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    pub fn release_connection(&self) {
        self.release.notify_one();
    }

    /// Sink handed to the most recent refused `connect` call.
    pub fn take_refused_sink(&self) -> Option<EventSink> {
        self.refused.lock().unwrap().take()
    }
}

#[async_trait]
impl ProtocolConnector for FakeConnector {
    fn init_credential(&self) -> Credential {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        Credential::new(json!({
            "noiseKey": format!("noise-{n}"),
            "registrationId": 1000 + n,
        }))
    }

    async fn connect(
        &self,
        credential: Credential,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Arc<dyn ProtocolClient>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            *self.refused.lock().unwrap() = Some(events);
            return Err(ConnectionError::Refused("connection reset by peer".into()));
        }

        let client = Arc::new(FakeClient::default());
        let _ = self.attempts_tx.send(Attempt {
            sink: events,
            client: Arc::clone(&client),
            credential,
            options: options.clone(),
        });
        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        Ok(client)
    }
}

/// Memory store that can be switched off.
pub struct FlakyStore {
    inner: MemoryStorage,
    available: AtomicBool,
}

impl FlakyStore {
    pub fn unavailable() -> Self {
        Self {
            inner: MemoryStorage::new(),
            available: AtomicBool::new(false),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("connection refused".into()))
        }
    }
}

#[async_trait]
impl CredentialStore for FlakyStore {
    async fn read_record(&self, session_key: &str) -> Result<Option<SessionRecord>, StorageError> {
        self.check()?;
        self.inner.read_record(session_key).await
    }

    async fn write_record(&self, record: SessionRecord) -> Result<(), StorageError> {
        self.check()?;
        self.inner.write_record(record).await
    }

    async fn delete(&self, session_key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.inner.delete(session_key).await
    }
}

/// Memory store that remembers every write in order.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStorage,
    writes: Mutex<Vec<SessionRecord>>,
}

impl RecordingStore {
    pub fn writes(&self) -> Vec<Credential> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|record| record.decode().unwrap())
            .collect()
    }
}

#[async_trait]
impl CredentialStore for RecordingStore {
    async fn read_record(&self, session_key: &str) -> Result<Option<SessionRecord>, StorageError> {
        self.inner.read_record(session_key).await
    }

    async fn write_record(&self, record: SessionRecord) -> Result<(), StorageError> {
        self.writes.lock().unwrap().push(record.clone());
        self.inner.write_record(record).await
    }

    async fn delete(&self, session_key: &str) -> Result<(), StorageError> {
        self.inner.delete(session_key).await
    }
}

/// Handler that forwards every message to a channel.
pub struct ChannelHandler(pub mpsc::UnboundedSender<InboundMessage>);

impl ChannelHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self(tx)), rx)
    }
}

#[async_trait]
impl MessageHandler for ChannelHandler {
    async fn on_message(&self, message: InboundMessage) {
        let _ = self.0.send(message);
    }
}
