//! Fixed-point loyalty points
//!
//! Points travel over the wire as JSON numbers (`729.98`) but are stored and
//! summed as integer minor units (thousandths of a point). Every arithmetic
//! step happens on the integer, so ledger sums never drift.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};
use thiserror::Error;

/// Decimal places kept in storage
pub const SCALE: u32 = 3;

/// Minor units per whole point
pub const MINOR_PER_POINT: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("amount {0} does not fit in the ledger")]
    Overflow(Decimal),
}

/// A point amount held as integer thousandths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Points(i64);

impl Points {
    pub const ZERO: Points = Points(0);

    /// Wrap a raw minor-unit value as read from the ledger
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Raw minor-unit value to store in the ledger
    pub const fn minor(self) -> i64 {
        self.0
    }

    /// Convert a decimal amount, rounding half away from zero to three places
    pub fn from_decimal(value: Decimal) -> Result<Self, MoneyError> {
        let mut rounded = value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(SCALE);
        i64::try_from(rounded.mantissa())
            .map(Self)
            .map_err(|_| MoneyError::Overflow(value))
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, SCALE).normalize()
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl Add for Points {
    type Output = Points;

    fn add(self, rhs: Points) -> Points {
        Points(self.0 + rhs.0)
    }
}

impl Sub for Points {
    type Output = Points;

    fn sub(self, rhs: Points) -> Points {
        Points(self.0 - rhs.0)
    }
}

impl Sum for Points {
    fn sum<I: Iterator<Item = Points>>(iter: I) -> Points {
        iter.fold(Points::ZERO, |acc, p| acc + p)
    }
}

impl From<i64> for Points {
    /// Whole points
    fn from(points: i64) -> Self {
        Points(points * MINOR_PER_POINT)
    }
}

impl TryFrom<Decimal> for Points {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Points::from_decimal(value)
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl Serialize for Points {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        rust_decimal::serde::float::serialize(&self.to_decimal(), serializer)
    }
}

impl<'de> Deserialize<'de> for Points {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = rust_decimal::serde::float::deserialize(deserializer)?;
        Points::from_decimal(value).map_err(serde::de::Error::custom)
    }
}
