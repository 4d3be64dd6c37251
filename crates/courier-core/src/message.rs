//! Inbound message envelope.

use serde::{Deserialize, Serialize};

/// Which side produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    /// Echo of a message this device sent.
    Outgoing,
}

/// A message delivered by the protocol client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Protocol message id; unique per message.
    pub id: String,
    /// Protocol-level id of the chat the message came from.
    pub sender: String,
    /// Unix epoch seconds.
    pub timestamp: i64,
    pub body: String,
    pub direction: Direction,
}

impl InboundMessage {
    /// Create an incoming message.
    #[must_use]
    pub fn incoming(
        id: impl Into<String>,
        sender: impl Into<String>,
        timestamp: i64,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            timestamp,
            body: body.into(),
            direction: Direction::Incoming,
        }
    }

    /// Whether this is an echo of our own outbound message.
    #[must_use]
    pub fn is_from_self(&self) -> bool {
        self.direction == Direction::Outgoing
    }
}
