//! Pricing & conversion (§4.1): translate byte counts, fiat, crypto, and stablecoin
//! amounts into `Credits` and back. Oracle calls are owned by [`oracle::OracleCache`];
//! this module is the pure conversion math layered on top.

pub mod oracle;

use gateway_common::config::{
    DEFAULT_INFRA_FEE_BPS, STABLECOIN_MIN_ATOMIC_UNITS, STABLECOIN_VOLATILITY_BUFFER_BPS,
};
use gateway_common::money::{credits_to_atomic_units, AtomicUnits, Credits, MoneyError};

pub use oracle::{OracleCache, OracleError, PriceOracle};

/// One non-fee, client-visible adjustment applied to a quote (promo codes,
/// subsidies) — always applied before the inclusive infra fee, per §4.1.
#[derive(Debug, Clone)]
pub struct Adjustment {
    pub reason: String,
    pub credits_delta: i128,
}

/// Result of any `credits_for_*` conversion.
#[derive(Debug, Clone)]
pub struct Quote {
    /// What the payer actually owes after all adjustments (what gets charged).
    pub net: Credits,
    /// The unadjusted linear price before promos and the infra fee.
    pub gross: Credits,
    pub adjustments: Vec<Adjustment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoFeeMode {
    /// Native tokens that pass through at cost.
    None,
    /// Fee added to the credits granted (name-system purchases).
    Add,
    /// Fee deducted from the credits granted (default).
    Subtract,
}

/// `credits_for_bytes(n, payer?)`: gross is a linear function of the oracle's
/// sampled "price per 10 GiB", prorated, with the infra fee applied inclusively.
pub fn credits_for_bytes(
    byte_count: u64,
    price_per_10_gib: Credits,
    exclusive_adjustments: Vec<Adjustment>,
) -> Result<Quote, MoneyError> {
    const TEN_GIB: u128 = 10 * 1024 * 1024 * 1024;
    let gross_units = price_per_10_gib
        .0
        .checked_mul(byte_count as u128)
        .ok_or(MoneyError::Overflow)?
        / TEN_GIB;
    let gross = Credits(gross_units);

    let mut adjusted = gross;
    for adjustment in &exclusive_adjustments {
        adjusted = apply_signed(adjusted, adjustment.credits_delta)?;
    }

    let infra_fee = adjusted.mul_bps(DEFAULT_INFRA_FEE_BPS)?;
    // "inclusive" means the fee is carved out of the reported price, not added on top.
    let net = adjusted.checked_sub(infra_fee).unwrap_or(Credits::ZERO);

    Ok(Quote { net, gross, adjustments: exclusive_adjustments })
}

/// `credits_for_fiat`: fiat → USD (oracle) → native token (oracle) → credits,
/// promos (exclusive) then the infra fee (inclusive).
pub fn credits_for_fiat(
    usd_amount: Credits,
    native_token_credits_per_usd: Credits,
    promos: Vec<Adjustment>,
) -> Result<Quote, MoneyError> {
    let gross = atomic_mul_div(usd_amount, native_token_credits_per_usd)?;
    let mut adjusted = gross;
    for promo in &promos {
        adjusted = apply_signed(adjusted, promo.credits_delta)?;
    }
    let infra_fee = adjusted.mul_bps(DEFAULT_INFRA_FEE_BPS)?;
    let net = adjusted.checked_sub(infra_fee).unwrap_or(Credits::ZERO);
    Ok(Quote { net, gross, adjustments: promos })
}

/// `credits_for_crypto`: a straight unit conversion with a configurable fee mode.
pub fn credits_for_crypto(
    native_amount: Credits,
    fee_mode: CryptoFeeMode,
) -> Result<Quote, MoneyError> {
    let fee = native_amount.mul_bps(DEFAULT_INFRA_FEE_BPS)?;
    let net = match fee_mode {
        CryptoFeeMode::None => native_amount,
        CryptoFeeMode::Add => native_amount.checked_add(fee)?,
        CryptoFeeMode::Subtract => native_amount.checked_sub(fee).unwrap_or(Credits::ZERO),
    };
    Ok(Quote { net, gross: native_amount, adjustments: vec![] })
}

/// `stablecoin_for_credits`: credits → stablecoin atomic units, +10% volatility
/// buffer, floored at 1000 atomic units (§4.1).
pub fn stablecoin_for_credits(
    credits: Credits,
    credits_per_stablecoin: Credits,
) -> Result<AtomicUnits, MoneyError> {
    let base = credits_to_atomic_units(credits, credits_per_stablecoin)?;
    let buffer = base
        .0
        .checked_mul(STABLECOIN_VOLATILITY_BUFFER_BPS as u128)
        .map(|v| v / 10_000)
        .ok_or(MoneyError::Overflow)?;
    let buffered = base.0.checked_add(buffer).ok_or(MoneyError::Overflow)?;
    Ok(AtomicUnits(buffered.max(STABLECOIN_MIN_ATOMIC_UNITS)))
}

fn apply_signed(base: Credits, delta: i128) -> Result<Credits, MoneyError> {
    if delta >= 0 {
        base.checked_add(Credits(delta as u128))
    } else {
        base.checked_sub(Credits((-delta) as u128))
    }
}

/// `amount * rate / 10^CREDITS_DECIMALS`, used when both operands are already
/// expressed in `Credits` base units (e.g. a USD-denominated amount times a
/// credits-per-USD rate, both fixed-point at 12dp).
fn atomic_mul_div(amount: Credits, rate: Credits) -> Result<Credits, MoneyError> {
    let scaled = amount.0.checked_mul(rate.0).ok_or(MoneyError::Overflow)?;
    Ok(Credits(scaled / 10u128.pow(gateway_common::money::CREDITS_DECIMALS)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credits_for_bytes_applies_infra_fee_inclusively() {
        let price_per_10_gib = Credits(10 * 1024 * 1024 * 1024); // 1 credit/byte for easy math
        let quote = credits_for_bytes(1000, price_per_10_gib, vec![]).unwrap();
        assert_eq!(quote.gross, Credits(1000));
        assert_eq!(quote.net, Credits(850));
    }

    #[test]
    fn credits_for_bytes_applies_exclusive_promo_before_fee() {
        let price_per_10_gib = Credits(10 * 1024 * 1024 * 1024);
        let promo = Adjustment { reason: "launch-promo".into(), credits_delta: -200 };
        let quote = credits_for_bytes(1000, price_per_10_gib, vec![promo]).unwrap();
        // (1000 - 200) * 0.85 = 680
        assert_eq!(quote.net, Credits(680));
    }

    #[test]
    fn stablecoin_for_credits_floors_at_minimum() {
        let tiny = stablecoin_for_credits(Credits(1), Credits(1_000_000_000_000)).unwrap();
        assert_eq!(tiny.0, STABLECOIN_MIN_ATOMIC_UNITS);
    }

    #[test]
    fn crypto_fee_mode_none_passes_through_at_cost() {
        let quote = credits_for_crypto(Credits(500), CryptoFeeMode::None).unwrap();
        assert_eq!(quote.net, Credits(500));
    }
}
