//! Fixed-point money types.
//!
//! `Credits` is the gateway's internal unit of account (12 decimals, §3/GLOSSARY).
//! `AtomicUnits` is the stablecoin's on-chain unit (6 decimals, GLOSSARY). Both are
//! backed by `u128` so that `price-per-10-GiB * byte-count` and `credits * bps / 10_000`
//! style products never overflow a `u64` intermediate the way the teacher's plain `u64`
//! balance arithmetic can (`BalanceError::Overflow` in the teacher is exactly this class
//! of bug; we widen the backing integer instead of only detecting the overflow after it
//! happens).

use std::{
    fmt,
    iter::Sum,
    ops::{Add, Sub},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decimal places of a [`Credits`] value.
pub const CREDITS_DECIMALS: u32 = 12;
/// Decimal places of an [`AtomicUnits`] value (stablecoin on-chain unit).
pub const ATOMIC_UNITS_DECIMALS: u32 = 6;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MoneyError {
    #[error("arithmetic overflow")]
    Overflow,
    #[error("insufficient balance: need {need}, have {have}")]
    Insufficient { need: u128, have: u128 },
}

/// The gateway's 12-decimal internal unit of account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Credits(pub u128);

impl Credits {
    pub const ZERO: Credits = Credits(0);

    pub const fn from_base_units(units: u128) -> Self {
        Credits(units)
    }

    pub fn checked_add(self, other: Credits) -> Result<Credits, MoneyError> {
        self.0.checked_add(other.0).map(Credits).ok_or(MoneyError::Overflow)
    }

    pub fn checked_sub(self, other: Credits) -> Result<Credits, MoneyError> {
        self.0
            .checked_sub(other.0)
            .map(Credits)
            .ok_or(MoneyError::Insufficient { need: other.0, have: self.0 })
    }

    /// Multiply by `bps` (basis points out of 10_000) and divide down, for fee application.
    pub fn mul_bps(self, bps: u32) -> Result<Credits, MoneyError> {
        self.0
            .checked_mul(bps as u128)
            .map(|v| Credits(v / 10_000))
            .ok_or(MoneyError::Overflow)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for Credits {
    type Output = Credits;
    fn add(self, rhs: Credits) -> Credits {
        Credits(self.0 + rhs.0)
    }
}

impl Sub for Credits {
    type Output = Credits;
    fn sub(self, rhs: Credits) -> Credits {
        Credits(self.0 - rhs.0)
    }
}

impl Sum for Credits {
    fn sum<I: Iterator<Item = Credits>>(iter: I) -> Self {
        iter.fold(Credits::ZERO, |a, b| Credits(a.0 + b.0))
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}c", self.0)
    }
}

/// The stablecoin's 6-decimal on-chain unit (GLOSSARY "Atomic units").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct AtomicUnits(pub u128);

impl AtomicUnits {
    pub const ZERO: AtomicUnits = AtomicUnits(0);

    pub const fn from_base_units(units: u128) -> Self {
        AtomicUnits(units)
    }
}

impl fmt::Display for AtomicUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}au", self.0)
    }
}

/// Converts between `Credits` (12dp) and `AtomicUnits` (6dp) given a credits-per-stablecoin-unit
/// exchange rate expressed as `credits` per whole stablecoin unit (i.e. per 10^6 atomic units).
pub fn atomic_units_to_credits(amount: AtomicUnits, credits_per_stablecoin: Credits) -> Result<Credits, MoneyError> {
    // credits = amount_atomic * credits_per_stablecoin / 10^ATOMIC_UNITS_DECIMALS
    let scaled = amount
        .0
        .checked_mul(credits_per_stablecoin.0)
        .ok_or(MoneyError::Overflow)?;
    Ok(Credits(scaled / 10u128.pow(ATOMIC_UNITS_DECIMALS)))
}

/// Inverse of [`atomic_units_to_credits`], flooring per §4.1 `stablecoin_for_credits`.
pub fn credits_to_atomic_units(amount: Credits, credits_per_stablecoin: Credits) -> Result<AtomicUnits, MoneyError> {
    if credits_per_stablecoin.is_zero() {
        return Err(MoneyError::Overflow);
    }
    let scaled = amount
        .0
        .checked_mul(10u128.pow(ATOMIC_UNITS_DECIMALS))
        .ok_or(MoneyError::Overflow)?;
    Ok(AtomicUnits(scaled / credits_per_stablecoin.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_sub_reports_insufficient() {
        let err = Credits(5).checked_sub(Credits(10)).unwrap_err();
        assert_eq!(err, MoneyError::Insufficient { need: 10, have: 5 });
    }

    #[test]
    fn mul_bps_applies_infra_fee() {
        // 15% inclusive fee on 1000 credits gross leaves 850 net.
        let gross = Credits(1000);
        let fee = gross.mul_bps(1500).unwrap();
        assert_eq!(fee, Credits(150));
        assert_eq!(gross.checked_sub(fee).unwrap(), Credits(850));
    }

    #[test]
    fn atomic_units_round_trip_is_lossy_but_monotonic() {
        let rate = Credits(2_000_000_000_000); // 2 credits-equivalent per stablecoin unit, in base units
        let credits = atomic_units_to_credits(AtomicUnits(5_000_000), rate).unwrap();
        let back = credits_to_atomic_units(credits, rate).unwrap();
        assert!(back.0 <= 5_000_000);
    }
}
