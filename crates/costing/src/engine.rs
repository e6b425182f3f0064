use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult, checked_amount, checked_total, round2};

/// Stock balance and average cost after a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostResult {
    pub new_stock: Decimal,
    pub new_avg_cost: Decimal,
}

/// Balance and average cost after receiving `incoming_qty` units at `incoming_unit_cost`.
///
/// The new average is `(stock * avg + qty * cost) / (stock + qty)`, rounded
/// half-up to currency precision. A zero resulting balance keeps the previous
/// average instead of dividing by zero.
pub fn weighted_average(
    current_stock: Decimal,
    current_avg_cost: Decimal,
    incoming_qty: Decimal,
    incoming_unit_cost: Decimal,
) -> DomainResult<CostResult> {
    if incoming_qty <= Decimal::ZERO {
        return Err(DomainError::validation("incoming quantity must be positive"));
    }
    if incoming_unit_cost < Decimal::ZERO {
        return Err(DomainError::validation("unit cost cannot be negative"));
    }

    let new_stock = current_stock
        .checked_add(incoming_qty)
        .ok_or_else(|| DomainError::validation("resulting stock is out of range"))?;
    if new_stock.is_zero() {
        return Ok(CostResult {
            new_stock: Decimal::ZERO,
            new_avg_cost: current_avg_cost,
        });
    }

    let total_value = checked_total([
        checked_amount(current_stock, current_avg_cost)?,
        checked_amount(incoming_qty, incoming_unit_cost)?,
    ])?;
    let new_avg_cost = total_value
        .checked_div(new_stock)
        .ok_or_else(|| DomainError::validation("average cost is out of range"))?;
    Ok(CostResult {
        new_stock,
        new_avg_cost: round2(new_avg_cost),
    })
}

/// Balance after issuing `issue_qty` units. Issues never change the average cost.
pub fn after_issue(
    current_stock: Decimal,
    issue_qty: Decimal,
    current_avg_cost: Decimal,
) -> DomainResult<CostResult> {
    if issue_qty <= Decimal::ZERO || issue_qty > current_stock {
        return Err(DomainError::insufficient_stock(issue_qty, current_stock));
    }

    Ok(CostResult {
        new_stock: current_stock - issue_qty,
        new_avg_cost: current_avg_cost,
    })
}

/// `true` when stock is at or below the configured minimum.
pub fn is_low_stock(current_stock: Decimal, min_stock: Decimal) -> bool {
    current_stock <= min_stock
}

/// Value of `stock` units held at `avg_cost`, at currency precision.
pub fn stock_value(stock: Decimal, avg_cost: Decimal) -> DomainResult<Decimal> {
    checked_amount(stock, avg_cost).map(round2)
}
