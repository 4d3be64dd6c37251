//! Session supervision for a messaging client.
//!
//! Provides:
//! - `ConnectionSupervisor` - Keep one session connected, with backoff
//! - `AuthStateAdapter` - Load and persist session credentials
//! - `EventDispatcher` - Deduplicated inbound delivery and outbound sends
//! - Storage implementations (memory, file, SQLite)

pub mod auth;
pub mod backoff;
pub mod dispatcher;
pub mod storage;
pub mod supervisor;

#[cfg(test)]
mod test_support;

pub use auth::{AuthStateAdapter, LiveSessionState};
pub use backoff::{BackoffPolicy, RetryState};
pub use dispatcher::{DispatchError, EventDispatcher};
pub use storage::open_store;
pub use supervisor::{ConnectionSupervisor, SupervisorError, SupervisorHandle};
