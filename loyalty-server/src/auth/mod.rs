//! Authentication
//!
//! - [`JwtService`] - token issuance and validation
//! - [`CurrentUser`] - caller identity, available as a handler extractor

pub mod extractor;
pub mod jwt;

pub use jwt::{Claims, CurrentUser, JwtConfig, JwtError, JwtService};
