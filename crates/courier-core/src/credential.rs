//! Session credential material and its persisted form.

use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::traits::StorageError;

/// Resumable session material for one identity.
///
/// The contents are defined by the protocol client; the core never looks
/// inside `creds` or `keys`. Every persisted update replaces the whole record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Identity keys, registration ids and account metadata.
    pub creds: Value,

    /// Rotating key material grouped by category (pre-keys, sessions, ...).
    #[serde(default)]
    pub keys: BTreeMap<String, BTreeMap<String, Value>>,

    /// Whether the device link handshake has completed for this identity.
    #[serde(default)]
    pub registered: bool,
}

impl Credential {
    /// Create an unregistered credential around protocol-generated creds.
    #[must_use]
    pub fn new(creds: Value) -> Self {
        Self {
            creds,
            keys: BTreeMap::new(),
            registered: false,
        }
    }

    /// Look up a key by category and id.
    #[must_use]
    pub fn key(&self, category: &str, id: &str) -> Option<&Value> {
        self.keys.get(category)?.get(id)
    }

    /// Set or remove (`None`) a key.
    pub fn set_key(&mut self, category: impl Into<String>, id: impl Into<String>, value: Option<Value>) {
        let category: String = category.into();
        let id: String = id.into();
        match value {
            Some(value) => {
                self.keys.entry(category).or_default().insert(id, value);
            }
            None => {
                if let Some(bucket) = self.keys.get_mut(&category) {
                    bucket.remove(&id);
                    if bucket.is_empty() {
                        self.keys.remove(&category);
                    }
                }
            }
        }
    }
}

/// Persisted form of a credential.
///
/// `payload` is the canonical JSON encoding of the [`Credential`]. Object keys
/// are ordered, so encoding the same credential twice yields the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Stable identifier of the session (bot identity).
    pub session_key: String,
    /// Encoded credential.
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
    /// Last write (Unix epoch seconds).
    pub updated_at: i64,
}

impl SessionRecord {
    /// Encode a credential into a record stamped with the current time.
    ///
    /// # Errors
    /// Returns `StorageError::Corrupt` if the credential cannot be encoded.
    pub fn encode(session_key: &str, credential: &Credential) -> Result<Self, StorageError> {
        let payload = serde_json::to_vec(credential).map_err(|e| StorageError::Corrupt {
            key: session_key.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            session_key: session_key.to_string(),
            payload,
            updated_at: now(),
        })
    }

    /// Decode the stored credential.
    ///
    /// # Errors
    /// Returns `StorageError::Corrupt` if the payload is not a valid credential.
    pub fn decode(&self) -> Result<Credential, StorageError> {
        serde_json::from_slice(&self.payload).map_err(|e| StorageError::Corrupt {
            key: self.session_key.clone(),
            reason: e.to_string(),
        })
    }
}

/// Current Unix time in seconds.
#[must_use]
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

mod payload_base64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
