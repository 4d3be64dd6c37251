//! SQLite credential storage (feature-gated).

use async_trait::async_trait;
use courier_core::{CredentialStore, SessionRecord, StorageError};
use sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS courier_sessions (
    session_key TEXT PRIMARY KEY NOT NULL,
    payload BLOB NOT NULL,
    updated_at INTEGER NOT NULL
)";

/// SQLite storage implementation.
///
/// One row per session key; writes are upserts.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Connect and ensure the schema exists.
    ///
    /// # Errors
    /// Returns `StorageError::Unavailable` if the database cannot be opened.
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let mut options = SqlitePoolOptions::new().max_connections(4);
        if database_url.contains(":memory:") {
            // An in-memory database lives and dies with its connection.
            options = options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = options
            .connect(database_url)
            .await
            .map_err(unavailable)?;

        Self::with_pool(pool).await
    }

    /// Use an existing pool.
    ///
    /// # Errors
    /// Returns `StorageError::Unavailable` if the schema cannot be created.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(unavailable)?;
        Ok(Self { pool })
    }
}

#[allow(clippy::needless_pass_by_value)]
fn unavailable(err: sqlx::Error) -> StorageError {
    StorageError::Unavailable(err.to_string())
}

#[async_trait]
impl CredentialStore for SqliteStorage {
    async fn read_record(&self, session_key: &str) -> Result<Option<SessionRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT session_key, payload, updated_at FROM courier_sessions WHERE session_key = ?",
        )
        .bind(session_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(|row| -> Result<SessionRecord, StorageError> {
            Ok(SessionRecord {
                session_key: row.try_get("session_key").map_err(unavailable)?,
                payload: row.try_get("payload").map_err(unavailable)?,
                updated_at: row.try_get("updated_at").map_err(unavailable)?,
            })
        })
        .transpose()
    }

    async fn write_record(&self, record: SessionRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO courier_sessions (session_key, payload, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(session_key) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at",
        )
        .bind(record.session_key.as_str())
        .bind(record.payload.as_slice())
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn delete(&self, session_key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM courier_sessions WHERE session_key = ?")
            .bind(session_key)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(())
    }
}
