//! Transport layer for operators and local integrations.
//!
//! Provides:
//! - Wire types and recipient normalisation
//! - HTTP routes for status, QR login, sends and start/stop (feature: http)

pub mod protocol;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{ApiError, HttpState, router};
pub use protocol::{
    ErrorResponse, RecipientError, SendRequest, SendResponse, StatusResponse, normalize_recipient,
};
