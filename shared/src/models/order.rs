//! Order and Accrual Models

use crate::money::Points;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger status of an order
///
/// `NEW -> PROCESSING -> {PROCESSED, INVALID}`; `WITHDRAWN` marks a spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
    Withdrawn,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::New,
        OrderStatus::Processing,
        OrderStatus::Invalid,
        OrderStatus::Processed,
        OrderStatus::Withdrawn,
    ];

    /// Column value in the `ledger.status` column
    pub const fn as_db(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Withdrawn => "WITHDRAWN",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_db() == value)
    }

    /// Terminal orders are never polled again
    pub const fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }

    /// Statuses the collector keeps polling
    pub const fn needs_refresh(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::Processing)
    }

    /// Progress along the accrual state machine; higher is more advanced
    pub const fn rank(&self) -> u8 {
        match self {
            OrderStatus::New => 0,
            OrderStatus::Processing => 1,
            OrderStatus::Invalid | OrderStatus::Processed => 2,
            OrderStatus::Withdrawn => 3,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db())
    }
}

/// Status vocabulary of the accrual oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl From<AccrualStatus> for OrderStatus {
    fn from(status: AccrualStatus) -> Self {
        match status {
            AccrualStatus::Registered => OrderStatus::New,
            AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
        }
    }
}

/// Oracle response body for `GET /api/orders/{number}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualRecord {
    pub order: String,
    pub status: AccrualStatus,
    /// Present only once the order is `PROCESSED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Points>,
}

/// One ledger write produced by the accrual pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub order: String,
    pub status: OrderStatus,
    pub accrual: Points,
    pub at: i64,
}

impl StatusUpdate {
    pub fn from_record(record: AccrualRecord, at: i64) -> Self {
        Self {
            order: record.order,
            status: record.status.into(),
            accrual: record.accrual.unwrap_or_default(),
            at,
        }
    }
}

/// Order row as listed to its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderView {
    pub number: String,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Points>,
    #[serde(with = "crate::util::rfc3339_millis")]
    pub uploaded_at: i64,
}
