//! Integer accounting helpers
//!
//! All balances are unsigned integer base units of the pooled asset. Every
//! division floors, so rounding loss always stays with the pool and never
//! with the party being paid.

use crate::error::{LedgerError, LedgerResult};

/// Base units of the pooled asset.
pub type Amount = u128;

/// 10_000 bp = 100%.
pub const BPS_DENOMINATOR: u32 = 10_000;

pub const SECONDS_PER_DAY: i64 = 86_400;
pub const SECONDS_PER_YEAR: i64 = 365 * SECONDS_PER_DAY;

/// `floor(a * b / denominator)` with overflow and zero-denominator checks.
#[inline]
pub fn mul_div(a: Amount, b: Amount, denominator: Amount) -> LedgerResult<Amount> {
    if denominator == 0 {
        return Err(LedgerError::DivisionByZero);
    }
    a.checked_mul(b)
        .map(|product| product / denominator)
        .ok_or(LedgerError::AmountOverflow)
}

/// `floor(amount * bp / 10_000)`.
#[inline]
pub fn bp_of(amount: Amount, bp: u32) -> LedgerResult<Amount> {
    mul_div(amount, Amount::from(bp), Amount::from(BPS_DENOMINATOR))
}

#[inline]
pub fn checked_add(a: Amount, b: Amount) -> LedgerResult<Amount> {
    a.checked_add(b).ok_or(LedgerError::AmountOverflow)
}

#[inline]
pub fn checked_sub(a: Amount, b: Amount) -> LedgerResult<Amount> {
    a.checked_sub(b).ok_or(LedgerError::AmountOverflow)
}
