//! Events reported by a protocol client to its supervisor.
//!
//! Clients run on their own I/O tasks. Everything they observe is pushed
//! through an [`EventSink`] into the supervisor's queue, where it is handled
//! one event at a time.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{Credential, InboundMessage, traits::StorageError};

/// Why the underlying transport closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum CloseReason {
    /// The remote side logged this device out.
    LoggedOut,
    /// The remote side revoked this device's access.
    Revoked,
    /// The pending login handshake (QR) timed out.
    HandshakeExpired,
    /// Connection dropped (network loss, idle timeout).
    ConnectionLost,
    /// Connection closed by the remote side without further detail.
    ConnectionClosed,
    /// Another client took over this session.
    ConnectionReplaced,
    /// Server asked for a reconnect.
    RestartRequired,
    /// Server could not use the presented session.
    BadSession,
    /// Too many requests.
    RateLimited,
    /// Remote service temporarily unavailable.
    ServiceUnavailable,
    /// Anything else.
    Other(String),
}

impl CloseReason {
    /// Map a protocol disconnect status code.
    #[must_use]
    pub fn from_status_code(code: u16) -> Self {
        match code {
            401 => Self::LoggedOut,
            403 => Self::Revoked,
            408 => Self::ConnectionLost,
            428 => Self::ConnectionClosed,
            429 => Self::RateLimited,
            440 => Self::ConnectionReplaced,
            500 => Self::BadSession,
            503 => Self::ServiceUnavailable,
            515 => Self::RestartRequired,
            other => Self::Other(format!("status {other}")),
        }
    }

    /// The session was invalidated remotely; reconnecting cannot succeed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut | Self::Revoked)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::Revoked => f.write_str("revoked"),
            Self::HandshakeExpired => f.write_str("handshake expired"),
            Self::ConnectionLost => f.write_str("connection lost"),
            Self::ConnectionClosed => f.write_str("connection closed"),
            Self::ConnectionReplaced => f.write_str("connection replaced"),
            Self::RestartRequired => f.write_str("restart required"),
            Self::BadSession => f.write_str("bad session"),
            Self::RateLimited => f.write_str("rate limited"),
            Self::ServiceUnavailable => f.write_str("service unavailable"),
            Self::Other(detail) => write!(f, "other: {detail}"),
        }
    }
}

/// Supervisor went away; the client should shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Supervisor event queue closed")]
pub struct SinkClosed;

/// Credential snapshot was not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaveError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The client reporting the update is no longer the active one.
    #[error("Client has been superseded by a newer connection")]
    Superseded,
    #[error(transparent)]
    Closed(#[from] SinkClosed),
}

/// A lifecycle signal from a protocol client.
#[derive(Debug)]
pub enum ClientEvent {
    /// A login handshake payload to present to the operator.
    Qr(String),
    /// The session is fully open.
    Open,
    /// The transport closed.
    Close(CloseReason),
    /// Session state changed; `ack` resolves once the snapshot is stored.
    CredentialUpdate {
        snapshot: Credential,
        ack: oneshot::Sender<Result<(), SaveError>>,
    },
    /// Inbound messages in arrival order.
    Messages(Vec<InboundMessage>),
}

/// An event tagged with the connection attempt it belongs to.
#[derive(Debug)]
pub struct Envelope {
    pub generation: u64,
    pub event: ClientEvent,
}

/// Handle a protocol client uses to report events.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<Envelope>,
}

impl EventSink {
    /// Create a sink for one connection attempt.
    #[must_use]
    pub const fn new(generation: u64, tx: mpsc::Sender<Envelope>) -> Self {
        Self { generation, tx }
    }

    /// Connection attempt this sink belongs to.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Report a login handshake payload.
    ///
    /// # Errors
    /// Returns `SinkClosed` if the supervisor has shut down.
    pub async fn qr(&self, payload: impl Into<String>) -> Result<(), SinkClosed> {
        self.emit(ClientEvent::Qr(payload.into())).await
    }

    /// Report that the session is open.
    ///
    /// # Errors
    /// Returns `SinkClosed` if the supervisor has shut down.
    pub async fn open(&self) -> Result<(), SinkClosed> {
        self.emit(ClientEvent::Open).await
    }

    /// Report that the transport closed.
    ///
    /// # Errors
    /// Returns `SinkClosed` if the supervisor has shut down.
    pub async fn close(&self, reason: CloseReason) -> Result<(), SinkClosed> {
        self.emit(ClientEvent::Close(reason)).await
    }

    /// Report a batch of inbound messages.
    ///
    /// # Errors
    /// Returns `SinkClosed` if the supervisor has shut down.
    pub async fn messages(&self, messages: Vec<InboundMessage>) -> Result<(), SinkClosed> {
        self.emit(ClientEvent::Messages(messages)).await
    }

    /// Hand over the full session snapshot after any key change.
    ///
    /// Returns only once the snapshot has been written (or the write has
    /// definitively failed). The client must not consume the next single-use
    /// key before this resolves.
    ///
    /// # Errors
    /// Returns the storage failure, `Superseded` for a stale client, or
    /// `Closed` if the supervisor has shut down.
    pub async fn credentials_updated(&self, snapshot: Credential) -> Result<(), SaveError> {
        let (ack, done) = oneshot::channel();
        self.emit(ClientEvent::CredentialUpdate { snapshot, ack }).await?;
        done.await.map_err(|_| SaveError::Closed(SinkClosed))?
    }

    async fn emit(&self, event: ClientEvent) -> Result<(), SinkClosed> {
        self.tx
            .send(Envelope {
                generation: self.generation,
                event,
            })
            .await
            .map_err(|_| SinkClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(CloseReason::from_status_code(401), CloseReason::LoggedOut);
        assert!(CloseReason::from_status_code(401).is_terminal());
        assert!(CloseReason::from_status_code(403).is_terminal());
        assert!(!CloseReason::from_status_code(408).is_terminal());
        assert!(!CloseReason::from_status_code(515).is_terminal());
        assert_eq!(
            CloseReason::from_status_code(999),
            CloseReason::Other("status 999".into())
        );
    }

    #[tokio::test]
    async fn test_credentials_updated_waits_for_ack() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventSink::new(7, tx);

        let waiter = tokio::spawn(async move {
            sink.credentials_updated(Credential::default()).await
        });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.generation, 7);
        let ClientEvent::CredentialUpdate { ack, .. } = envelope.event else {
            panic!("expected credential update");
        };
        assert!(!waiter.is_finished());

        ack.send(Ok(())).unwrap();
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_dropped_ack_reports_closed() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventSink::new(1, tx);

        let waiter = tokio::spawn(async move {
            sink.credentials_updated(Credential::default()).await
        });
        drop(rx.recv().await.unwrap());

        assert_eq!(waiter.await.unwrap(), Err(SaveError::Closed(SinkClosed)));
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = EventSink::new(1, tx);
        assert_eq!(sink.open().await, Err(SinkClosed));
    }
}
