//! Filesystem credential storage.
//!
//! Each session key maps to one JSON document holding the full
//! [`SessionRecord`]. Writes land in a uniquely named temporary file that is
//! renamed over the target, so readers never see a half-written record and
//! concurrent writers for the same key resolve to last-writer-wins. A write
//! returns only after the file and the directory entry are synced, and record
//! files are readable by the owner alone.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use courier_core::{CredentialStore, SessionRecord, StorageError};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Directory-backed storage implementation.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory.
    ///
    /// # Errors
    /// Returns `StorageError::Unavailable` if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| unavailable(&dir, &e))?;
        tracing::debug!(dir = %dir.display(), "Opened file credential storage");
        Ok(Self { dir })
    }

    /// Platform default: `<data dir>/courier/sessions`.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("courier")
            .join("sessions")
    }

    /// Storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, session_key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(session_key)))
    }
}

/// Map a session key onto a safe file stem.
///
/// Alphanumerics, `-` and `_` pass through; every other byte is hex-escaped
/// as `%XX`, which keeps distinct keys distinct.
fn file_stem(session_key: &str) -> String {
    let mut stem = String::with_capacity(session_key.len());
    for byte in session_key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}

/// Write `bytes` to a fresh owner-only file and flush it to disk.
async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Persist the rename itself.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn unavailable(path: &Path, err: &std::io::Error) -> StorageError {
    StorageError::Unavailable(format!("{}: {err}", path.display()))
}

#[async_trait]
impl CredentialStore for FileStorage {
    async fn read_record(&self, session_key: &str) -> Result<Option<SessionRecord>, StorageError> {
        let path = self.record_path(session_key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(&path, &e)),
        };

        let record: SessionRecord =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                key: session_key.to_string(),
                reason: e.to_string(),
            })?;

        if record.session_key != session_key {
            return Err(StorageError::Corrupt {
                key: session_key.to_string(),
                reason: format!("file holds session '{}'", record.session_key),
            });
        }

        Ok(Some(record))
    }

    async fn write_record(&self, record: SessionRecord) -> Result<(), StorageError> {
        let path = self.record_path(&record.session_key);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", file_stem(&record.session_key), Uuid::new_v4()));

        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| StorageError::Corrupt {
            key: record.session_key.clone(),
            reason: e.to_string(),
        })?;

        if let Err(e) = write_synced(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(unavailable(&tmp, &e));
        }

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(unavailable(&path, &e));
        }

        sync_dir(&self.dir)
            .await
            .map_err(|e| unavailable(&self.dir, &e))?;

        Ok(())
    }

    async fn delete(&self, session_key: &str) -> Result<(), StorageError> {
        let path = self.record_path(session_key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(&path, &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use courier_core::Credential;
    use serde_json::json;

    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("courier-file-store-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_file_stem_escapes_separators() {
        assert_eq!(file_stem("bot-1_main"), "bot-1_main");
        assert_eq!(file_stem("../etc"), "%2E%2E%2Fetc");
        assert_ne!(file_stem("a/b"), file_stem("a_b"));
    }

    #[tokio::test]
    async fn test_roundtrip_survives_reopen() {
        let dir = scratch_dir();
        let cred = Credential::new(json!({ "registrationId": 99, "signedPreKey": { "keyId": 1 } }));

        let store = FileStorage::open(&dir).await.unwrap();
        store.write("6287736854912", &cred).await.unwrap();
        let written = store.read_record("6287736854912").await.unwrap().unwrap();
        drop(store);

        let reopened = FileStorage::open(&dir).await.unwrap();
        let read = reopened.read_record("6287736854912").await.unwrap().unwrap();
        assert_eq!(read, written);
        assert_eq!(read.decode().unwrap(), cred);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_missing_is_absent_and_garbage_is_corrupt() {
        let dir = scratch_dir();
        let store = FileStorage::open(&dir).await.unwrap();
        assert_eq!(store.read("bot").await.unwrap(), None);

        tokio::fs::write(store.record_path("bot"), b"{\"session_key\":")
            .await
            .unwrap();
        assert!(matches!(
            store.read("bot").await,
            Err(StorageError::Corrupt { .. })
        ));

        store.delete("bot").await.unwrap();
        assert_eq!(store.read("bot").await.unwrap(), None);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_record_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = scratch_dir();
        let store = FileStorage::open(&dir).await.unwrap();
        store
            .write("bot", &Credential::new(json!({ "noiseKey": "secret" })))
            .await
            .unwrap();

        let meta = tokio::fs::metadata(store.record_path("bot")).await.unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_write_into_vanished_dir_is_unavailable() {
        let dir = scratch_dir();
        let store = FileStorage::open(&dir).await.unwrap();
        tokio::fs::remove_dir_all(&dir).await.unwrap();

        let result = store
            .write("bot", &Credential::new(json!({ "noiseKey": "secret" })))
            .await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert!(tokio::fs::metadata(&dir).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_writers_leave_one_complete_record() {
        let dir = scratch_dir();
        let store = Arc::new(FileStorage::open(&dir).await.unwrap());

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let cred = Credential::new(json!({ "writer": i }));
                    store.write("bot", &cred).await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let cred = store.read("bot").await.unwrap().unwrap();
        assert!(cred.creds["writer"].as_u64().unwrap() < 8);

        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        let mut files = 0;
        while let Some(_entry) = entries.next_entry().await.unwrap() {
            files += 1;
        }
        assert_eq!(files, 1, "temporary files must not be left behind");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
