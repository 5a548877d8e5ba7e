//! collab-relay library: exposes the relay's components for testing.
//!
//! The relay is a thin message router: it admits WebSocket clients into
//! vaults and forwards their wire messages to the other members. Document
//! state never lives here.

pub mod config;
pub mod connection;
pub mod rate_limit;
pub mod registry;
pub mod server;
pub mod validate;

// Re-export key types for convenience
pub use config::RelayConfig;
pub use connection::{ClientConnection, ConnectionEvent, IncomingMessage};
pub use rate_limit::{RateLimitCategory, RateLimiter};
pub use registry::{ServerSession, ServerSessionRegistry, VaultRole, SESSION_TIMEOUT};
pub use server::{ConnectParams, GateRejection, RelayServer};
