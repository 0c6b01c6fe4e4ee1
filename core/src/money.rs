//! Decimal money helpers.
//!
//! RULE: all monetary arithmetic stays at full `Decimal` precision;
//! rounding happens exactly once, at the point a value is persisted
//! or handed to a payment channel.

use rust_decimal::{Decimal, RoundingStrategy};

/// Minor-unit scale for a currency code. Everything not listed uses 2.
pub fn minor_units(currency: &str) -> u32 {
    match currency {
        "JPY" | "KRW" | "VND" => 0,
        "BHD" | "KWD" | "OMR" => 3,
        _ => 2,
    }
}

/// Round half-up (midpoint away from zero) to the currency minor unit.
pub fn round_minor(amount: Decimal, currency: &str) -> Decimal {
    amount.round_dp_with_strategy(minor_units(currency), RoundingStrategy::MidpointAwayFromZero)
}

/// Clamp a rounded amount at zero. Valid rule configurations never
/// produce negative payouts, but the guard keeps the invariant local.
pub fn non_negative(amount: Decimal) -> Decimal {
    if amount.is_sign_negative() {
        Decimal::ZERO
    } else {
        amount
    }
}
