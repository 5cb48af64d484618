//! Balance and Withdrawal Models

use crate::money::Points;
use serde::{Deserialize, Serialize};

/// Derived balance of a user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// PROCESSED accruals minus withdrawals
    pub current: Points,
    pub withdrawn: Points,
}

/// Withdraw request payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    pub sum: Points,
}

/// One withdrawal as listed to its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub order: String,
    pub sum: Points,
    #[serde(with = "crate::util::rfc3339_millis")]
    pub processed_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_withdraw_request_decoding() {
        let req: WithdrawRequest =
            serde_json::from_str(r#"{"order":"2377225624","sum":751}"#).unwrap();
        assert_eq!(req.order, "2377225624");
        assert_eq!(req.sum, Points::from(751));
    }

    #[test]
    fn test_balance_json() {
        let balance = Balance {
            current: Points::from_minor(500_500),
            withdrawn: Points::from(42),
        };
        let json = serde_json::to_value(balance).unwrap();
        assert_eq!(json["current"], 500.5);
        assert_eq!(json["withdrawn"], 42.0);
    }
}
