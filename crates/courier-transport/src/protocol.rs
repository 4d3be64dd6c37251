//! Wire types for the HTTP surface.

use courier_core::ConnectionStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body of `GET /status` and of each status event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub session_key: String,
    #[serde(flatten)]
    pub status: ConnectionStatus,
}

impl StatusResponse {
    #[must_use]
    pub fn new(session_key: &str, status: ConnectionStatus) -> Self {
        Self {
            session_key: session_key.to_string(),
            status,
        }
    }
}

/// Body of `POST /send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    /// Phone number or fully qualified recipient id.
    pub number: String,
    pub message: String,
}

/// Successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    /// Recipient id the message was sent to.
    pub recipient: String,
}

/// Error body shared by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Recipient could not be turned into a protocol id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecipientError {
    #[error("Recipient is empty")]
    Empty,
    #[error("Invalid recipient '{0}'")]
    Invalid(String),
}

/// Turn user input into a protocol recipient id.
///
/// Ids that already carry a domain (`local@domain`) pass through. Phone
/// numbers may contain `+`, spaces and dashes, which are stripped before the
/// digits are joined with `domain`.
///
/// # Errors
/// Returns `RecipientError` if the input is empty or not a phone number.
pub fn normalize_recipient(input: &str, domain: &str) -> Result<String, RecipientError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(RecipientError::Empty);
    }

    if let Some((local, host)) = input.split_once('@') {
        if local.is_empty() || host.is_empty() || host.contains('@') {
            return Err(RecipientError::Invalid(input.to_string()));
        }
        return Ok(input.to_string());
    }

    let digits: String = input
        .chars()
        .filter(|c| !matches!(c, '+' | '-') && !c.is_whitespace())
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(RecipientError::Invalid(input.to_string()));
    }

    Ok(format!("{digits}@{domain}"))
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;

    const DOMAIN: &str = "s.whatsapp.net";

    #[test]
    fn test_phone_number_gets_domain() {
        assert_eq!(
            normalize_recipient("6281234567890", DOMAIN).unwrap(),
            "6281234567890@s.whatsapp.net"
        );
        assert_eq!(
            normalize_recipient(" +62 812-3456-7890 ", DOMAIN).unwrap(),
            "6281234567890@s.whatsapp.net"
        );
    }

    #[test]
    fn test_qualified_id_passes_through() {
        let id = assert_ok!(normalize_recipient("120363025246125486@g.us", DOMAIN));
        assert_eq!(id, "120363025246125486@g.us");
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(normalize_recipient("   ", DOMAIN), Err(RecipientError::Empty));
        assert!(matches!(
            normalize_recipient("call me", DOMAIN),
            Err(RecipientError::Invalid(_))
        ));
        assert!(matches!(
            normalize_recipient("+-", DOMAIN),
            Err(RecipientError::Invalid(_))
        ));
        assert!(matches!(
            normalize_recipient("@s.whatsapp.net", DOMAIN),
            Err(RecipientError::Invalid(_))
        ));
    }

    #[test]
    fn test_status_response_is_flat() {
        let body = StatusResponse::new("bot", ConnectionStatus::idle());
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["session_key"], "bot");
        assert_eq!(json["phase"], "idle");
        assert_eq!(json["retry_attempt"], 0);
    }
}
