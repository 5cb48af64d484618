//! Data models
//!
//! Shared between loyalty-server and API clients.
//! DB row types use `#[cfg_attr(feature = "db", derive(sqlx::FromRow))]`.
//! Timestamps are Unix milliseconds, rendered as RFC 3339 on the wire.

pub mod balance;
pub mod order;
pub mod user;

// Re-exports
pub use balance::*;
pub use order::*;
pub use user::*;
