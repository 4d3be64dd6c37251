//! Bridge between the credential store and the protocol client's session state.

use std::sync::Arc;

use courier_core::{AuthError, Credential, CredentialStore, ProtocolConnector, StorageError};

/// Session state handed to a new protocol client.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSessionState {
    pub credential: Credential,
    /// No record existed; the identity was generated by this load.
    pub bootstrapped: bool,
}

/// Loads session state for one identity and persists every rotation.
///
/// The adapter is owned by the supervisor task, so calls never overlap.
pub struct AuthStateAdapter {
    store: Arc<dyn CredentialStore>,
    session_key: String,
    allow_bootstrap: bool,
    /// Latest snapshot handed out or persisted.
    current: Option<Credential>,
    /// A bootstrapped identity that has not reached the store yet.
    pending_first_write: bool,
}

impl AuthStateAdapter {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, session_key: impl Into<String>, allow_bootstrap: bool) -> Self {
        Self {
            store,
            session_key: session_key.into(),
            allow_bootstrap,
            current: None,
            pending_first_write: false,
        }
    }

    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Load the stored session, or bootstrap a new identity if none exists.
    ///
    /// # Errors
    /// - `AuthError::CorruptSession` if the stored record cannot be decoded;
    ///   a replacement identity is never fabricated in that case.
    /// - `AuthError::Unregistered` if nothing is stored and bootstrap is disabled.
    /// - `AuthError::Storage` if the backend is unreachable.
    pub async fn load(&mut self, connector: &dyn ProtocolConnector) -> Result<LiveSessionState, AuthError> {
        match self.store.read(&self.session_key).await? {
            Some(credential) => {
                tracing::debug!(
                    session_key = %self.session_key,
                    registered = credential.registered,
                    "Loaded stored session"
                );
                self.current = Some(credential.clone());
                self.pending_first_write = false;
                Ok(LiveSessionState {
                    credential,
                    bootstrapped: false,
                })
            }
            None if self.allow_bootstrap => {
                tracing::info!(session_key = %self.session_key, "No stored session, generating a new identity");
                let credential = connector.init_credential();
                self.current = Some(credential.clone());
                self.pending_first_write = true;
                Ok(LiveSessionState {
                    credential,
                    bootstrapped: true,
                })
            }
            None => Err(AuthError::Unregistered(self.session_key.clone())),
        }
    }

    /// Persist a full snapshot. Completes only after the store has it.
    ///
    /// # Errors
    /// Returns the storage failure; the snapshot is kept as the latest
    /// known state either way.
    pub async fn persist(&mut self, snapshot: &Credential) -> Result<(), StorageError> {
        self.current = Some(snapshot.clone());
        self.store.write(&self.session_key, snapshot).await?;
        self.pending_first_write = false;
        Ok(())
    }

    /// Write a bootstrapped identity that no rotation has persisted yet.
    ///
    /// # Errors
    /// Returns the storage failure.
    pub async fn flush_pending(&mut self) -> Result<(), StorageError> {
        if !self.pending_first_write {
            return Ok(());
        }
        if let Some(snapshot) = self.current.clone() {
            self.persist(&snapshot).await?;
        }
        Ok(())
    }

    /// Drop the stored record, e.g. after the remote side logged us out.
    ///
    /// # Errors
    /// Returns the storage failure.
    pub async fn clear(&mut self) -> Result<(), StorageError> {
        self.current = None;
        self.pending_first_write = false;
        self.store.delete(&self.session_key).await
    }

    #[must_use]
    pub const fn needs_first_write(&self) -> bool {
        self.pending_first_write
    }

    /// Latest snapshot loaded or persisted.
    #[must_use]
    pub const fn current(&self) -> Option<&Credential> {
        self.current.as_ref()
    }
}
