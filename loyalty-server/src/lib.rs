//! loyalty-server: loyalty-point accrual ledger
//!
//! - Ledger store on PostgreSQL, every operation a transactional unit of
//!   work run by the retry executor ([`db`])
//! - Accrual pipeline polling the external oracle ([`accrual`])
//! - Gophermart-style HTTP API with JWT auth ([`api`], [`auth`])

pub mod accrual;
pub mod api;
pub mod auth;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod state;
pub mod utils;

pub use config::{AccrualConfig, Config};
pub use error::LedgerError;
pub use state::AppState;
