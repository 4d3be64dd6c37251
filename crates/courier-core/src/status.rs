//! Connection status published by the supervisor.

use serde::{Deserialize, Serialize};

/// Coarse connection state for external readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingScan,
    Connected,
}

/// Supervisor state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorPhase {
    /// Not running; only `start()` leaves this phase.
    Idle,
    /// Loading credentials and opening a client.
    Starting,
    /// Waiting for the operator to complete the login handshake.
    AwaitingScan,
    /// Session open.
    Connected,
    /// Transport closed; deciding whether to retry.
    Closing,
    /// Waiting before the next attempt.
    Backoff,
}

impl SupervisorPhase {
    /// Map the phase onto the externally visible state.
    #[must_use]
    pub const fn connection_state(self) -> ConnectionState {
        match self {
            Self::Idle | Self::Closing | Self::Backoff => ConnectionState::Disconnected,
            Self::Starting => ConnectionState::Connecting,
            Self::AwaitingScan => ConnectionState::AwaitingScan,
            Self::Connected => ConnectionState::Connected,
        }
    }
}

/// Snapshot of the supervisor's view of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub phase: SupervisorPhase,
    /// Login handshake payload; only present while awaiting a scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Consecutive failed attempts since the last successful connection.
    pub retry_attempt: u32,
}

impl ConnectionStatus {
    /// Status of a supervisor that has not been started.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            phase: SupervisorPhase::Idle,
            qr_payload: None,
            last_error: None,
            retry_attempt: 0,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_mapping() {
        assert_eq!(
            SupervisorPhase::Backoff.connection_state(),
            ConnectionState::Disconnected
        );
        assert_eq!(
            SupervisorPhase::Starting.connection_state(),
            ConnectionState::Connecting
        );
        assert_eq!(
            SupervisorPhase::Connected.connection_state(),
            ConnectionState::Connected
        );
    }

    #[test]
    fn test_idle_serialization_omits_empty_fields() {
        let json = serde_json::to_value(ConnectionStatus::idle()).unwrap();
        assert_eq!(json["state"], "disconnected");
        assert_eq!(json["phase"], "idle");
        assert!(json.get("qr_payload").is_none());
        assert!(json.get("last_error").is_none());
    }
}
