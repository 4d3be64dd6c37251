//! Supervisor configuration.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Credential storage backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Process-local; lost on restart.
    #[default]
    Memory,
    /// One JSON document per session key. `None` uses the platform data dir.
    File {
        #[serde(default)]
        dir: Option<PathBuf>,
    },
    /// SQLite database, e.g. `sqlite://courier.db?mode=rwc`.
    Sqlite { url: String },
}

/// Everything one supervised identity needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Stable identifier of the bot identity; the storage key.
    pub session_key: String,
    pub storage: StorageConfig,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for any retry delay.
    pub max_backoff_seconds: u64,
    pub backoff_multiplier: f64,
    /// Generate a fresh identity when no stored session exists.
    pub allow_bootstrap: bool,
    /// Delete stored credentials once the remote side logs the device out.
    pub clear_on_logout: bool,
    /// How many recent message ids are remembered for dedupe.
    pub dedupe_window: usize,
    pub client_name: String,
    pub client_version: String,
    /// Domain appended to bare phone numbers when sending.
    pub recipient_domain: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            session_key: "default".to_string(),
            storage: StorageConfig::default(),
            initial_backoff_ms: 1_000,
            max_backoff_seconds: 60,
            backoff_multiplier: 2.0,
            allow_bootstrap: true,
            clear_on_logout: false,
            dedupe_window: 4096,
            client_name: "Courier".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            recipient_domain: "s.whatsapp.net".to_string(),
        }
    }
}

impl SupervisorConfig {
    /// Defaults for a given session key.
    #[must_use]
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON file. A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = match fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse from a JSON string.
    ///
    /// # Errors
    /// Returns error if the JSON is malformed.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Override fields from `COURIER_*` variables resolved by `lookup`.
    ///
    /// # Errors
    /// Returns error if a numeric variable does not parse.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("COURIER_SESSION_KEY") {
            self.session_key = key;
        }
        if let Some(backend) = lookup("COURIER_STORAGE") {
            self.storage = match backend.as_str() {
                "memory" => StorageConfig::Memory,
                "file" => StorageConfig::File {
                    dir: lookup("COURIER_STORAGE_DIR").map(PathBuf::from),
                },
                "sqlite" => StorageConfig::Sqlite {
                    url: lookup("COURIER_SQLITE_URL")
                        .unwrap_or_else(|| "sqlite://courier.db?mode=rwc".to_string()),
                },
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "unknown storage backend '{other}'"
                    )));
                }
            };
        }
        if let Some(value) = lookup("COURIER_MAX_BACKOFF_SECONDS") {
            self.max_backoff_seconds = parse_env("COURIER_MAX_BACKOFF_SECONDS", &value)?;
        }
        if let Some(value) = lookup("COURIER_BACKOFF_MULTIPLIER") {
            self.backoff_multiplier = parse_env("COURIER_BACKOFF_MULTIPLIER", &value)?;
        }
        Ok(self)
    }

    /// Override fields from the process environment.
    ///
    /// # Errors
    /// Returns error if a numeric variable does not parse.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Check invariants the supervisor relies on.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_key.trim().is_empty() {
            return Err(ConfigError::Invalid("session_key must not be empty".into()));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff_multiplier must be at least 1.0".into(),
            ));
        }
        if self.initial_backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "initial_backoff_ms must be positive".into(),
            ));
        }
        if self.max_backoff_seconds == 0 {
            return Err(ConfigError::Invalid(
                "max_backoff_seconds must be positive".into(),
            ));
        }
        if self.dedupe_window == 0 {
            return Err(ConfigError::Invalid("dedupe_window must be positive".into()));
        }
        Ok(())
    }

    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_seconds)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{name} has invalid value '{value}'")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SupervisorConfig::from_json(
            r#"{ "session_key": "support-bot", "storage": { "backend": "file", "dir": "/var/lib/courier" } }"#,
        )
        .unwrap();

        assert_eq!(config.session_key, "support-bot");
        assert_eq!(
            config.storage,
            StorageConfig::File {
                dir: Some(PathBuf::from("/var/lib/courier"))
            }
        );
        assert_eq!(config.max_backoff_seconds, 60);
        assert!(config.allow_bootstrap);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SupervisorConfig::new("  ");
        assert_err!(config.validate());

        config.session_key = "bot".into();
        config.backoff_multiplier = 0.5;
        assert_err!(config.validate());

        config.backoff_multiplier = 1.5;
        config.max_backoff_seconds = 0;
        assert_err!(config.validate());

        config.max_backoff_seconds = 60;
        config.initial_backoff_ms = 0;
        assert_err!(config.validate());

        config.initial_backoff_ms = 1;
        assert_ok!(config.validate());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("courier-missing-{}.json", uuid::Uuid::new_v4()));
        let config = SupervisorConfig::load(&path).unwrap();
        assert_eq!(config, SupervisorConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("COURIER_SESSION_KEY", "ops-bot"),
            ("COURIER_STORAGE", "sqlite"),
            ("COURIER_SQLITE_URL", "sqlite::memory:"),
            ("COURIER_MAX_BACKOFF_SECONDS", "120"),
        ]
        .into_iter()
        .collect();

        let config = SupervisorConfig::default()
            .apply_env_with(|name| vars.get(name).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.session_key, "ops-bot");
        assert_eq!(
            config.storage,
            StorageConfig::Sqlite {
                url: "sqlite::memory:".into()
            }
        );
        assert_eq!(config.max_backoff_seconds, 120);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let result = SupervisorConfig::default().apply_env_with(|name| {
            (name == "COURIER_BACKOFF_MULTIPLIER").then(|| "fast".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
