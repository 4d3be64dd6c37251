//! Error taxonomy for session loading, connections and sends.

use thiserror::Error;

use crate::{events::CloseReason, traits::StorageError};

/// Failure to produce a usable session state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// A stored record exists but cannot be decoded. Not retryable.
    #[error("Session '{key}' is corrupt and needs operator attention: {reason}")]
    CorruptSession { key: String, reason: String },
    /// No record exists and bootstrapping a new identity is disabled.
    #[error("Session '{0}' is not registered")]
    Unregistered(String),
    #[error(transparent)]
    Storage(StorageError),
}

impl AuthError {
    /// Whether retrying the load can possibly succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::CorruptSession { .. })
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Corrupt { key, reason } => Self::CorruptSession { key, reason },
            other @ StorageError::Unavailable(_) => Self::Storage(other),
        }
    }
}

/// Connection lifecycle error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Transport closed: {0}")]
    TransportClosed(CloseReason),
    #[error("Login handshake expired before it was completed")]
    HandshakeExpired,
    #[error("Connection refused: {0}")]
    Refused(String),
}

/// Outbound send error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("Not connected")]
    NotConnected,
    #[error("Rejected by remote: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_storage_maps_to_corrupt_session() {
        let err = AuthError::from(StorageError::Corrupt {
            key: "bot".into(),
            reason: "eof".into(),
        });
        assert!(matches!(err, AuthError::CorruptSession { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unavailable_storage_is_retryable() {
        let err = AuthError::from(StorageError::Unavailable("timeout".into()));
        assert!(matches!(err, AuthError::Storage(StorageError::Unavailable(_))));
        assert!(err.is_retryable());
        assert!(AuthError::Unregistered("bot".into()).is_retryable());
    }
}
