use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockflow_core::{AggregateRoot, CompanyId, DomainError, DomainResult, aggregate_id};
use stockflow_costing::{CostResult, after_issue, is_low_stock, weighted_average};

use crate::movement::{MovementDirection, MovementType};

aggregate_id!(
    /// Product identifier (company-scoped via `company_id` on the aggregate).
    ProductId
);

aggregate_id!(
    /// Warehouse identifier. Warehouses are managed externally.
    WarehouseId
);

/// Input for registering a product's stock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub company_id: CompanyId,
    pub sku: String,
    pub name: String,
    pub min_stock: Option<Decimal>,
    pub max_stock: Option<Decimal>,
}

/// Aggregate root: the current stock state of one product.
///
/// `current_stock`, `average_cost` and `version` only change through
/// [`ProductStock::apply`], which the stock ledger calls after a posting has
/// been decided; every applied posting bumps the version by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStock {
    id: ProductId,
    company_id: CompanyId,
    sku: String,
    name: String,
    current_stock: Decimal,
    average_cost: Decimal,
    min_stock: Option<Decimal>,
    max_stock: Option<Decimal>,
    version: u64,
}

/// A decided (not yet persisted) change to a product's stock and cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub movement_type: MovementType,
    pub quantity: Decimal,
    /// Cost of incoming goods; zero for outbound postings.
    pub unit_cost: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub average_cost_before: Decimal,
    pub average_cost_after: Decimal,
}

impl ProductStock {
    pub fn new(id: ProductId, input: NewProduct) -> DomainResult<Self> {
        if input.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if input.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        for threshold in [input.min_stock, input.max_stock].into_iter().flatten() {
            if threshold < Decimal::ZERO {
                return Err(DomainError::validation("stock thresholds cannot be negative"));
            }
        }
        if let (Some(min), Some(max)) = (input.min_stock, input.max_stock) {
            if min > max {
                return Err(DomainError::validation("min_stock cannot exceed max_stock"));
            }
        }

        Ok(Self {
            id,
            company_id: input.company_id,
            sku: input.sku.trim().to_string(),
            name: input.name,
            current_stock: Decimal::ZERO,
            average_cost: Decimal::ZERO,
            min_stock: input.min_stock,
            max_stock: input.max_stock,
            version: 0,
        })
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_stock(&self) -> Decimal {
        self.current_stock
    }

    pub fn average_cost(&self) -> Decimal {
        self.average_cost
    }

    pub fn min_stock(&self) -> Option<Decimal> {
        self.min_stock
    }

    pub fn max_stock(&self) -> Option<Decimal> {
        self.max_stock
    }

    /// `true` when a minimum is configured and stock is at or below it.
    pub fn is_low_stock(&self) -> bool {
        self.min_stock
            .is_some_and(|min| is_low_stock(self.current_stock, min))
    }

    /// Decide the effect of a movement without mutating state.
    ///
    /// Inbound movements recompute the weighted average at `unit_cost`;
    /// outbound movements consume at the current average and ignore
    /// `unit_cost`.
    pub fn decide(
        &self,
        movement_type: MovementType,
        quantity: Decimal,
        unit_cost: Decimal,
    ) -> DomainResult<Posting> {
        let CostResult {
            new_stock,
            new_avg_cost,
        } = match movement_type.direction() {
            MovementDirection::Inbound => {
                weighted_average(self.current_stock, self.average_cost, quantity, unit_cost)?
            }
            MovementDirection::Outbound => {
                after_issue(self.current_stock, quantity, self.average_cost)?
            }
        };

        Ok(Posting {
            movement_type,
            quantity,
            unit_cost: match movement_type.direction() {
                MovementDirection::Inbound => unit_cost,
                MovementDirection::Outbound => Decimal::ZERO,
            },
            balance_before: self.current_stock,
            balance_after: new_stock,
            average_cost_before: self.average_cost,
            average_cost_after: new_avg_cost,
        })
    }

    /// Evolve state from a decided posting.
    ///
    /// The posting must have been decided against the current state; a posting
    /// decided against a different balance is rejected.
    pub fn apply(&mut self, posting: &Posting) -> DomainResult<()> {
        if posting.balance_before != self.current_stock
            || posting.average_cost_before != self.average_cost
        {
            return Err(DomainError::invariant(
                "posting was decided against a different stock state",
            ));
        }
        if posting.balance_after < Decimal::ZERO {
            return Err(DomainError::invariant("stock cannot go negative"));
        }

        self.current_stock = posting.balance_after;
        self.average_cost = posting.average_cost_after;
        self.version += 1;
        Ok(())
    }
}

impl AggregateRoot for ProductStock {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_product() -> ProductStock {
        ProductStock::new(
            ProductId::generate(),
            NewProduct {
                company_id: CompanyId::new(),
                sku: "SKU-001".to_string(),
                name: "Widget".to_string(),
                min_stock: Some(dec!(10)),
                max_stock: Some(dec!(500)),
            },
        )
        .unwrap()
    }

    fn post(product: &mut ProductStock, ty: MovementType, qty: Decimal, cost: Decimal) -> Posting {
        let posting = product.decide(ty, qty, cost).unwrap();
        product.apply(&posting).unwrap();
        posting
    }

    #[test]
    fn new_product_starts_empty_at_version_zero() {
        let p = test_product();
        assert_eq!(p.current_stock(), dec!(0));
        assert_eq!(p.average_cost(), dec!(0));
        assert_eq!(p.version(), 0);
        assert!(p.is_low_stock());
    }

    #[test]
    fn rejects_blank_sku_and_inverted_thresholds() {
        let base = NewProduct {
            company_id: CompanyId::new(),
            sku: " ".to_string(),
            name: "Widget".to_string(),
            min_stock: None,
            max_stock: None,
        };
        assert!(matches!(
            ProductStock::new(ProductId::generate(), base.clone()),
            Err(DomainError::Validation(_))
        ));

        let inverted = NewProduct {
            sku: "SKU".to_string(),
            min_stock: Some(dec!(10)),
            max_stock: Some(dec!(5)),
            ..base
        };
        assert!(matches!(
            ProductStock::new(ProductId::generate(), inverted),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn receipts_then_issue_follow_moving_average() {
        let mut p = test_product();

        post(&mut p, MovementType::Receipt, dec!(100), dec!(10));
        assert_eq!((p.current_stock(), p.average_cost()), (dec!(100), dec!(10.00)));

        post(&mut p, MovementType::Receipt, dec!(50), dec!(16));
        assert_eq!((p.current_stock(), p.average_cost()), (dec!(150), dec!(12.00)));

        let issue = post(&mut p, MovementType::Issue, dec!(30), dec!(99));
        assert_eq!(issue.balance_before, dec!(150));
        assert_eq!(issue.balance_after, dec!(120));
        assert_eq!(issue.unit_cost, dec!(0));
        assert_eq!(p.average_cost(), dec!(12.00));
        assert_eq!(p.version(), 3);
    }

    #[test]
    fn decide_does_not_mutate_state() {
        let mut p = test_product();
        post(&mut p, MovementType::AdjustmentIn, dec!(5), dec!(2));
        let before = p.clone();

        let _ = p.decide(MovementType::Issue, dec!(3), dec!(0)).unwrap();
        let _ = p.decide(MovementType::Issue, dec!(300), dec!(0)).unwrap_err();

        assert_eq!(p, before);
    }

    #[test]
    fn over_issue_fails_and_leaves_state_unchanged() {
        let mut p = test_product();
        post(&mut p, MovementType::Receipt, dec!(120), dec!(12));
        let before = p.clone();

        let err = p.decide(MovementType::Issue, dec!(500), dec!(0)).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { .. }));
        assert_eq!(p, before);
    }

    #[test]
    fn stale_posting_is_rejected_by_apply() {
        let mut p = test_product();
        let stale = p.decide(MovementType::Receipt, dec!(1), dec!(1)).unwrap();
        post(&mut p, MovementType::Receipt, dec!(2), dec!(2));

        assert!(matches!(
            p.apply(&stale),
            Err(DomainError::InvariantViolation(_))
        ));
        assert_eq!(p.version(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any sequence of movements keeps stock non-negative and every
        /// accepted posting continues from the previous balance.
        #[test]
        fn balances_stay_non_negative_and_continuous(
            ops in prop::collection::vec((any::<bool>(), 1u32..500, 0u32..10_000), 1..40)
        ) {
            let mut p = test_product();
            let mut last_after = Decimal::ZERO;

            for (inbound, qty, cents) in ops {
                let ty = if inbound { MovementType::Receipt } else { MovementType::Issue };
                let qty = Decimal::from(qty);
                let cost = Decimal::new(i64::from(cents), 2);
                let before = p.clone();

                match p.decide(ty, qty, cost) {
                    Ok(posting) => {
                        prop_assert_eq!(posting.balance_before, last_after);
                        p.apply(&posting).unwrap();
                        last_after = posting.balance_after;
                        if !inbound {
                            prop_assert_eq!(p.average_cost(), before.average_cost());
                        }
                    }
                    Err(DomainError::InsufficientStock { .. }) => {
                        prop_assert!(!inbound);
                        prop_assert_eq!(&p, &before);
                    }
                    Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                }

                prop_assert!(p.current_stock() >= Decimal::ZERO);
                prop_assert_eq!(p.current_stock(), last_after);
            }
        }
    }
}
