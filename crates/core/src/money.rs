//! Decimal helpers for quantities and currency amounts.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{DomainError, DomainResult};

/// Currency precision (two decimal places).
pub const CURRENCY_SCALE: u32 = 2;

/// Round to currency precision, half-up (midpoint away from zero).
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `quantity * unit_cost`, unrounded. Fails instead of overflowing.
pub fn checked_amount(quantity: Decimal, unit_cost: Decimal) -> DomainResult<Decimal> {
    quantity.checked_mul(unit_cost).ok_or_else(|| {
        DomainError::validation(format!("amount {quantity} x {unit_cost} is out of range"))
    })
}

/// Sum of amounts. Fails instead of overflowing.
pub fn checked_total(amounts: impl IntoIterator<Item = Decimal>) -> DomainResult<Decimal> {
    amounts.into_iter().try_fold(Decimal::ZERO, |total, amount| {
        total
            .checked_add(amount)
            .ok_or_else(|| DomainError::validation("total amount is out of range"))
    })
}
