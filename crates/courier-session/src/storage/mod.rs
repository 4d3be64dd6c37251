//! Credential storage implementations.

use std::sync::Arc;

use courier_core::{CredentialStore, StorageConfig, StorageError};

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "file")]
pub use file::FileStorage;

#[cfg(feature = "memory")]
pub use memory::MemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

/// Build the configured backend.
///
/// # Errors
/// Returns `StorageError::Unavailable` if the backend cannot be opened or
/// was not compiled in.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn CredentialStore>, StorageError> {
    match config {
        #[cfg(feature = "memory")]
        StorageConfig::Memory => Ok(Arc::new(MemoryStorage::new())),

        #[cfg(feature = "file")]
        StorageConfig::File { dir } => {
            let dir = dir.clone().unwrap_or_else(FileStorage::default_dir);
            Ok(Arc::new(FileStorage::open(dir).await?))
        }

        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { url } => Ok(Arc::new(SqliteStorage::new(url).await?)),

        #[allow(unreachable_patterns)]
        other => Err(StorageError::Unavailable(format!(
            "storage backend {other:?} is not compiled in"
        ))),
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory() {
        let store = open_store(&StorageConfig::Memory).await.unwrap();
        assert_eq!(store.read("bot").await.unwrap(), None);
    }

    #[cfg(not(feature = "sqlite"))]
    #[tokio::test]
    async fn test_missing_backend_is_unavailable() {
        let result = open_store(&StorageConfig::Sqlite {
            url: "sqlite::memory:".into(),
        })
        .await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
    }
}
