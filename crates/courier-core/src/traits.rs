//! Core traits for credential storage and the protocol client boundary.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    Credential, SessionRecord,
    error::{ConnectionError, SendError},
    events::EventSink,
    message::InboundMessage,
};

/// Storage error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("Stored session '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Trait for credential storage backends.
///
/// Backends only move whole [`SessionRecord`]s; encoding lives in the
/// provided `read`/`write` methods so every backend agrees on the format.
/// Writes are full-record upserts, last writer wins.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the raw record for a session key.
    async fn read_record(&self, session_key: &str) -> Result<Option<SessionRecord>, StorageError>;

    /// Insert or replace the record under `record.session_key`.
    async fn write_record(&self, record: SessionRecord) -> Result<(), StorageError>;

    /// Remove the record for a session key. Removing a missing record is not an error.
    async fn delete(&self, session_key: &str) -> Result<(), StorageError>;

    /// Read and decode the credential for a session key.
    ///
    /// A record that exists but cannot be decoded is reported as
    /// `StorageError::Corrupt`, never as absent.
    async fn read(&self, session_key: &str) -> Result<Option<Credential>, StorageError> {
        self.read_record(session_key)
            .await?
            .map(|record| record.decode())
            .transpose()
    }

    /// Encode and store the full credential under a session key.
    async fn write(&self, session_key: &str, credential: &Credential) -> Result<(), StorageError> {
        let record = SessionRecord::encode(session_key, credential)?;
        self.write_record(record).await
    }
}

/// Parameters handed to the connector for each connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Identity being connected.
    pub session_key: String,
    /// Client name announced to the remote side.
    pub client_name: String,
    /// Client version announced to the remote side.
    pub client_version: String,
}

/// A live protocol client bound to one connection attempt.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Send a text message to a protocol-level recipient id.
    async fn send(&self, recipient: &str, body: &str) -> Result<(), SendError>;

    /// Tear the connection down. Must be safe to call more than once.
    async fn disconnect(&self);
}

/// Factory for protocol clients.
///
/// The protocol library itself (wire format, encryption, handshake) lives
/// behind this trait.
#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    /// Generate identity material for a device that has never been linked.
    fn init_credential(&self) -> Credential;

    /// Open a client bound to `credential`.
    ///
    /// Lifecycle signals, rotated credentials and inbound messages must be
    /// reported through `events`. Events are processed while this future is
    /// still pending, so it may await credential acknowledgements.
    async fn connect(
        &self,
        credential: Credential,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Arc<dyn ProtocolClient>, ConnectionError>;
}

/// Application logic for inbound messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one inbound message. Called at most once per message id.
    async fn on_message(&self, message: InboundMessage);
}
