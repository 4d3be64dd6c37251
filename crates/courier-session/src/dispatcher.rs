//! Inbound message dispatch and outbound sends.

use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex, PoisonError},
};

use courier_core::{ConnectionStatus, InboundMessage, MessageHandler, ProtocolClient, SendError};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc, watch};

/// Dispatcher error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("An inbound handler is already registered")]
    HandlerAlreadyRegistered,
}

/// Bounded set of recently seen message ids.
struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(1024)),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns false if the id was already seen.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }

    /// Drop an id so a redelivery counts as fresh.
    fn forget(&mut self, id: &str) {
        if self.ids.remove(id) {
            self.order.retain(|seen| seen != id);
        }
    }
}

type HandlerSlot = Option<Arc<dyn MessageHandler>>;

struct Inner {
    handler: watch::Sender<HandlerSlot>,
    client: RwLock<Option<Arc<dyn ProtocolClient>>>,
    status: watch::Receiver<ConnectionStatus>,
    seen: Mutex<SeenIds>,
    queue: mpsc::Sender<InboundMessage>,
}

/// Delivers each distinct inbound message to the single registered handler
/// and forwards sends to whichever client is currently attached.
///
/// The handler belongs to the dispatcher, not to a client, so swapping
/// clients across reconnects never loses or duplicates it. Handler calls run
/// one at a time on a worker task; messages that arrive before a handler is
/// registered wait in a queue holding at most `dedupe_window` of them.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<Inner>,
}

impl EventDispatcher {
    /// Create a dispatcher and spawn its worker.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(status: watch::Receiver<ConnectionStatus>, dedupe_window: usize) -> Self {
        let (handler, handler_rx) = watch::channel(None);
        let (queue, queue_rx) = mpsc::channel(dedupe_window.max(1));

        tokio::spawn(run_worker(queue_rx, handler_rx));

        Self {
            inner: Arc::new(Inner {
                handler,
                client: RwLock::new(None),
                status,
                seen: Mutex::new(SeenIds::new(dedupe_window)),
                queue,
            }),
        }
    }

    /// Register the application handler.
    ///
    /// # Errors
    /// Returns `DispatchError::HandlerAlreadyRegistered` on a second call.
    pub fn on_inbound(&self, handler: Arc<dyn MessageHandler>) -> Result<(), DispatchError> {
        let mut registered = false;
        self.inner.handler.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(handler);
            registered = true;
            true
        });

        if registered {
            tracing::debug!("Inbound handler registered");
            Ok(())
        } else {
            Err(DispatchError::HandlerAlreadyRegistered)
        }
    }

    /// Whether an application handler has been registered.
    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.inner.handler.borrow().is_some()
    }

    /// Queue a message for the handler unless it is an echo or a duplicate.
    ///
    /// Returns whether the message was queued.
    pub fn dispatch(&self, message: InboundMessage) -> bool {
        if message.is_from_self() {
            tracing::trace!(id = %message.id, "Skipping own message echo");
            return false;
        }

        let fresh = self
            .inner
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(&message.id);
        if !fresh {
            tracing::debug!(id = %message.id, "Skipping duplicate message");
            return false;
        }

        match self.inner.queue.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                tracing::warn!(id = %message.id, "Inbound queue full, dropping message");
                self.inner
                    .seen
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .forget(&message.id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Send a text message through the active client.
    ///
    /// # Errors
    /// - `SendError::NotConnected` unless the session is connected.
    /// - `SendError::Rejected` if the remote refuses the payload.
    pub async fn send(&self, recipient: &str, body: &str) -> Result<(), SendError> {
        let connected = self.inner.status.borrow().is_connected();
        if !connected {
            return Err(SendError::NotConnected);
        }

        let client = self
            .inner
            .client
            .read()
            .await
            .clone()
            .ok_or(SendError::NotConnected)?;

        client.send(recipient, body).await.inspect_err(|e| {
            tracing::warn!(recipient, error = %e, "Send failed");
        })
    }

    /// Route sends to a newly connected client.
    pub(crate) async fn attach(&self, client: Arc<dyn ProtocolClient>) {
        *self.inner.client.write().await = Some(client);
    }

    /// Stop routing sends; returns the client that was attached.
    pub(crate) async fn detach(&self) -> Option<Arc<dyn ProtocolClient>> {
        self.inner.client.write().await.take()
    }
}

async fn run_worker(
    mut queue: mpsc::Receiver<InboundMessage>,
    mut handler_rx: watch::Receiver<HandlerSlot>,
) {
    // Nothing leaves the queue until a handler exists.
    let handler = match handler_rx.wait_for(Option::is_some).await {
        Ok(slot) => slot.clone(),
        Err(_) => return,
    };
    let Some(handler) = handler else { return };

    while let Some(message) = queue.recv().await {
        let handler = Arc::clone(&handler);
        let id = message.id.clone();
        // A panicking handler must not take the worker down with it.
        let call = tokio::spawn(async move { handler.on_message(message).await });
        if let Err(e) = call.await {
            tracing::error!(id = %id, error = %e, "Inbound handler failed");
        }
    }
    tracing::debug!("Dispatcher worker stopped");
}
