//! Shared types for the loyalty ledger
//!
//! Vocabulary used by the server and by API clients: order/ledger status
//! enums, wire models, fixed-point point arithmetic, Luhn validation and
//! the unified error system.

pub mod error;
pub mod luhn;
pub mod models;
pub mod money;
pub mod util;

// Re-exports
pub use axum::Json;
pub use http;
pub use serde::{Deserialize, Serialize};

pub use error::{ApiResponse, AppError, AppResult, ErrorCode};
pub use models::{AccrualStatus, OrderStatus};
pub use money::Points;
