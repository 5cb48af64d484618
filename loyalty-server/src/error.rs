//! Ledger-layer error type
//!
//! `LedgerError` is what every unit of work and the retry executor return.
//! Domain outcomes (`NotFound`, `InsufficientFunds`, ...) pass through to the
//! API as typed `AppError`s; `Database` is the only variant that can be
//! transient, and [`LedgerError::is_transient`] is the single place that
//! decides it.

use shared::error::{AppError, ErrorCode};
use std::io::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0} already exists")]
    Conflict(&'static str),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("order belongs to another user")]
    OwnershipConflict { owner: String },

    #[error("amount must be positive")]
    InvalidAmount,

    /// The shared lifetime ended while the retry executor was waiting
    #[error("operation cancelled by shutdown")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    /// Connection/dial failures only; everything else aborts the retry loop
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Database(sqlx::Error::Io(e)) => matches!(
                e.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::TimedOut
                    | ErrorKind::BrokenPipe
                    | ErrorKind::AddrNotAvailable
            ),
            LedgerError::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }

    /// Map a unique-key violation onto `Conflict`
    pub(crate) fn on_unique(what: &'static str) -> impl FnOnce(sqlx::Error) -> LedgerError {
        move |e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => LedgerError::Conflict(what),
            e => LedgerError::Database(e),
        }
    }

    pub(crate) fn corrupt(msg: String) -> LedgerError {
        LedgerError::Database(sqlx::Error::Decode(msg.into()))
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        let transient = e.is_transient();
        match e {
            LedgerError::NotFound(what) => AppError::not_found(what),
            LedgerError::Conflict(what) => {
                AppError::with_message(ErrorCode::AlreadyExists, format!("{what} already exists"))
            }
            LedgerError::InsufficientFunds => AppError::new(ErrorCode::InsufficientFunds),
            LedgerError::OwnershipConflict { .. } => {
                AppError::new(ErrorCode::OrderOwnedByAnotherUser)
            }
            LedgerError::InvalidAmount => AppError::new(ErrorCode::InvalidAmount),
            LedgerError::Cancelled => AppError::unavailable("Server is shutting down"),
            LedgerError::Database(db) => {
                tracing::error!(error = %db, transient, "Ledger database error");
                if transient {
                    AppError::unavailable("Database is unreachable")
                } else {
                    AppError::new(ErrorCode::DatabaseError)
                }
            }
        }
    }
}
