//! Core abstractions for protocol session management.
//!
//! This crate provides the fundamental building blocks:
//! - `Credential` / `SessionRecord` - Resumable session material and its persisted form
//! - `ConnectionStatus` - Health snapshot published by the supervisor
//! - `EventSink` - Queue the protocol client reports lifecycle events through
//! - Storage, connector and handler traits

pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod message;
pub mod status;
pub mod traits;

pub use config::{ConfigError, StorageConfig, SupervisorConfig};
pub use credential::{Credential, SessionRecord};
pub use error::{AuthError, ConnectionError, SendError};
pub use events::{ClientEvent, CloseReason, Envelope, EventSink, SaveError, SinkClosed};
pub use message::{Direction, InboundMessage};
pub use status::{ConnectionState, ConnectionStatus, SupervisorPhase};
pub use traits::{
    ConnectOptions, CredentialStore, MessageHandler, ProtocolClient, ProtocolConnector,
    StorageError,
};
