//! In-memory credential storage.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use courier_core::{CredentialStore, SessionRecord, StorageError};

/// In-memory storage implementation.
///
/// Useful for development, tests and single-process deployments.
/// Credentials are lost on restart, which forces a new device link.
pub struct MemoryStorage {
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryStorage {
    async fn read_record(&self, session_key: &str) -> Result<Option<SessionRecord>, StorageError> {
        Ok(self
            .records
            .read()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?
            .get(session_key)
            .cloned())
    }

    async fn write_record(&self, record: SessionRecord) -> Result<(), StorageError> {
        self.records
            .write()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?
            .insert(record.session_key.clone(), record);

        Ok(())
    }

    async fn delete(&self, session_key: &str) -> Result<(), StorageError> {
        self.records
            .write()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?
            .remove(session_key);

        Ok(())
    }
}
