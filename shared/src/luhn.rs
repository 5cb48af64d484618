//! Luhn (mod 10) validation for order numbers

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LuhnError {
    #[error("order number is empty")]
    Empty,
    #[error("order number must contain only digits")]
    NonDigit,
    #[error("order number fails the checksum")]
    Checksum,
}

/// Validate an order number: non-empty, ASCII digits only, Luhn checksum ok
pub fn validate(number: &str) -> Result<(), LuhnError> {
    if number.is_empty() {
        return Err(LuhnError::Empty);
    }
    if !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LuhnError::NonDigit);
    }
    if checksum(number.bytes().rev().map(|b| b - b'0')) % 10 != 0 {
        return Err(LuhnError::Checksum);
    }
    Ok(())
}

pub fn is_valid(number: &str) -> bool {
    validate(number).is_ok()
}

/// Check digit to append to `payload`, `None` if payload is not all digits
pub fn check_digit(payload: &str) -> Option<u8> {
    if payload.is_empty() || !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // The appended digit takes position 0, so the payload starts doubled.
    let sum = checksum(std::iter::once(0).chain(payload.bytes().rev().map(|b| b - b'0')));
    Some(((10 - sum % 10) % 10) as u8)
}

/// Digits are given right to left
fn checksum(digits: impl Iterator<Item = u8>) -> u32 {
    digits
        .enumerate()
        .map(|(i, d)| {
            let d = u32::from(d);
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum()
}
