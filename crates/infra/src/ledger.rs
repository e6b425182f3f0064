//! Stock ledger: the single writer of product stock, average cost and movements.
//!
//! ```text
//! MovementRequest → load product (version v) → CostingEngine → StockMovement
//!                 → commit { product @ v → v+n, movements, documents } → publish
//! ```
//!
//! Callers that need several movements (and possibly a document transition) to
//! land together stage them on a [`LedgerBatch`] and hand it to
//! [`StockLedger::commit`]. Staging several movements for the same product
//! chains them on the staged state, so the balances stay continuous.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use stockflow_core::{
    AggregateId, AggregateRoot, CompanyId, ExpectedVersion, UserId, checked_total,
};
use stockflow_costing::stock_value;
use stockflow_events::EventBus;
use stockflow_inventory::{
    MovementDirection, MovementId, MovementReference, MovementType, ProductId, ProductStock,
    ReferenceType, StockMovement, WarehouseId,
};

use crate::error::{LedgerError, LedgerResult};
use crate::events::{StockflowEnvelope, movement_envelope, publish_all};
use crate::store::{Commit, DocumentWrite, InventoryStore, ProductWrite};

/// A request to move stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    /// Cost of incoming goods. Required for RECEIPT; other inbound types fall
    /// back to the current average cost; outbound types ignore it.
    pub unit_cost: Option<Decimal>,
    pub reference: MovementReference,
    pub actor: UserId,
    pub notes: Option<String>,
}

impl MovementRequest {
    pub fn new(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        movement_type: MovementType,
        quantity: Decimal,
        reference: MovementReference,
        actor: UserId,
    ) -> Self {
        Self {
            product_id,
            warehouse_id,
            movement_type,
            quantity,
            unit_cost: None,
            reference,
            actor,
            notes: None,
        }
    }

    pub fn with_unit_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[derive(Debug)]
struct StagedProduct {
    read_version: u64,
    current: ProductStock,
}

/// Movements staged against a consistent snapshot of the products they touch.
///
/// Nothing is visible to other callers until the batch is committed. Dropping
/// a batch discards it.
#[derive(Debug)]
pub struct LedgerBatch<'a, S> {
    store: &'a S,
    company_id: CompanyId,
    occurred_at: DateTime<Utc>,
    products: HashMap<ProductId, StagedProduct>,
    product_order: Vec<ProductId>,
    movements: Vec<StockMovement>,
    reversed: HashSet<MovementId>,
}

impl<'a, S> LedgerBatch<'a, S>
where
    S: InventoryStore,
{
    fn new(store: &'a S, company_id: CompanyId) -> Self {
        Self {
            store,
            company_id,
            occurred_at: Utc::now(),
            products: HashMap::new(),
            product_order: Vec::new(),
            movements: Vec::new(),
            reversed: HashSet::new(),
        }
    }

    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    pub fn movements(&self) -> &[StockMovement] {
        &self.movements
    }

    pub fn is_empty(&self) -> bool {
        self.movements.is_empty()
    }

    /// Product state as staged so far (loaded from the store on first use).
    pub fn product(&mut self, product_id: ProductId) -> LedgerResult<&ProductStock> {
        Ok(&self.staged(product_id)?.current)
    }

    fn staged(&mut self, product_id: ProductId) -> LedgerResult<&mut StagedProduct> {
        if !self.products.contains_key(&product_id) {
            let product = self
                .store
                .load_product(self.company_id, product_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("product {product_id}")))?;
            self.product_order.push(product_id);
            self.products.insert(
                product_id,
                StagedProduct {
                    read_version: product.version(),
                    current: product,
                },
            );
        }
        self.products
            .get_mut(&product_id)
            .ok_or_else(|| {
                LedgerError::InvariantViolation(format!("product {product_id} not staged"))
            })
    }

    /// Stage one movement. On error the batch is unchanged.
    pub fn stage(&mut self, request: MovementRequest) -> LedgerResult<StockMovement> {
        if request.reference.is_reversal() {
            return Err(LedgerError::Validation(
                "reversal movements can only be created by reversing a movement".into(),
            ));
        }
        if request.quantity <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "movement quantity must be positive, got {}",
                request.quantity
            )));
        }
        if let Some(cost) = request.unit_cost {
            if cost < Decimal::ZERO {
                return Err(LedgerError::Validation("unit cost cannot be negative".into()));
            }
        }

        let company_id = self.company_id;
        let occurred_at = self.occurred_at;
        let staged = self.staged(request.product_id)?;
        let unit_cost = match (request.movement_type, request.unit_cost) {
            (MovementType::Receipt, None) => {
                return Err(LedgerError::Validation("RECEIPT requires a unit cost".into()));
            }
            (ty, Some(cost)) if ty.is_inbound() => cost,
            (ty, None) if ty.is_inbound() => staged.current.average_cost(),
            _ => Decimal::ZERO,
        };

        let posting = staged
            .current
            .decide(request.movement_type, request.quantity, unit_cost)
            .map_err(|e| LedgerError::from(e).for_product(request.product_id))?;
        staged.current.apply(&posting)?;

        let movement = StockMovement::completed(
            company_id,
            request.product_id,
            request.warehouse_id,
            &posting,
            request.reference,
            staged.current.version(),
            request.actor,
            occurred_at,
        )
        .with_notes(request.notes);

        debug!(
            product_id = %movement.product_id,
            movement_type = %movement.movement_type,
            quantity = %movement.quantity,
            balance_after = %movement.balance_after,
            "staged movement"
        );
        self.movements.push(movement.clone());
        Ok(movement)
    }

    /// Stage the reversal of a committed movement.
    ///
    /// The reversal has the mirrored type and the same quantity. Reversing an
    /// outbound movement re-receives at the cost it was issued at. Transfer
    /// legs are refused: undoing one leg alone would create or destroy goods.
    pub fn stage_reversal(
        &mut self,
        movement_id: MovementId,
        reason: &str,
        actor: UserId,
    ) -> LedgerResult<StockMovement> {
        if reason.trim().is_empty() {
            return Err(LedgerError::Validation("a reversal reason is required".into()));
        }
        let original = self
            .store
            .load_movement(self.company_id, movement_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("movement {movement_id}")))?;
        if original.reference.is_reversal() {
            return Err(LedgerError::InvalidState(format!(
                "movement {movement_id} is itself a reversal"
            )));
        }
        if original.reference.reference_type == ReferenceType::Transfer {
            return Err(LedgerError::InvalidState(format!(
                "movement {movement_id} is one leg of a transfer; transfer the goods back instead"
            )));
        }
        if self.reversed.contains(&movement_id)
            || self.store.reversal_of(self.company_id, movement_id)?.is_some()
        {
            return Err(LedgerError::InvalidState(format!(
                "movement {movement_id} has already been reversed"
            )));
        }

        let movement_type = original.movement_type.mirror();
        let unit_cost = match original.movement_type.direction() {
            MovementDirection::Outbound => original.average_cost_before,
            MovementDirection::Inbound => Decimal::ZERO,
        };

        let company_id = self.company_id;
        let occurred_at = self.occurred_at;
        let staged = self.staged(original.product_id)?;
        let posting = staged
            .current
            .decide(movement_type, original.quantity, unit_cost)
            .map_err(|e| LedgerError::from(e).for_product(original.product_id))?;
        staged.current.apply(&posting)?;

        let movement = StockMovement::completed(
            company_id,
            original.product_id,
            original.warehouse_id,
            &posting,
            MovementReference::reversal_of(movement_id),
            staged.current.version(),
            actor,
            occurred_at,
        )
        .with_notes(Some(reason.to_string()));

        debug!(%movement_id, reversal_id = %movement.id, "staged reversal");
        self.reversed.insert(movement_id);
        self.movements.push(movement.clone());
        Ok(movement)
    }

    fn into_commit(mut self, documents: Vec<DocumentWrite>) -> (Commit, Vec<StockMovement>) {
        let products = self
            .product_order
            .iter()
            .filter_map(|id| self.products.remove(id))
            // Products that were only read still pin their version, so a
            // decision based on them cannot land on a moved product.
            .map(|staged| ProductWrite {
                expected_version: ExpectedVersion::Exact(staged.read_version),
                product: staged.current,
            })
            .collect();
        let movements = self.movements;
        (
            Commit {
                products,
                movements: movements.clone(),
                documents,
            },
            movements,
        )
    }
}

/// Filter for [`StockLedger::movement_history`]. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    pub movement_type: Option<MovementType>,
    pub reference_type: Option<ReferenceType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl MovementFilter {
    pub fn product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, movement: &StockMovement) -> bool {
        self.product_id.is_none_or(|p| movement.product_id == p)
            && self.warehouse_id.is_none_or(|w| movement.warehouse_id == w)
            && self.movement_type.is_none_or(|t| movement.movement_type == t)
            && self
                .reference_type
                .is_none_or(|r| movement.reference.reference_type == r)
            && self.from.is_none_or(|from| movement.created_at >= from)
            && self.to.is_none_or(|to| movement.created_at < to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationLine {
    pub product_id: ProductId,
    pub sku: String,
    pub current_stock: Decimal,
    pub average_cost: Decimal,
    pub value: Decimal,
}

/// Stock value per product at average cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationSummary {
    pub company_id: CompanyId,
    pub lines: Vec<ValuationLine>,
    pub total_value: Decimal,
}

/// The stock ledger service.
#[derive(Debug)]
pub struct StockLedger<S, B> {
    store: S,
    bus: B,
}

impl<S, B> StockLedger<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> StockLedger<S, B>
where
    S: InventoryStore,
    B: EventBus<StockflowEnvelope>,
{
    /// Start staging movements for `company_id`.
    pub fn begin(&self, company_id: CompanyId) -> LedgerBatch<'_, S> {
        LedgerBatch::new(&self.store, company_id)
    }

    /// Commit a batch together with any document writes, then publish one
    /// `MovementRecorded` per movement.
    ///
    /// A product changed since it was staged fails the whole commit with
    /// [`LedgerError::ConcurrentModification`].
    pub fn commit(
        &self,
        batch: LedgerBatch<'_, S>,
        documents: Vec<DocumentWrite>,
    ) -> LedgerResult<Vec<StockMovement>> {
        let company_id = batch.company_id;
        let (commit, movements) = batch.into_commit(documents);
        if let Err(err) = self.store.commit(commit) {
            let err = LedgerError::from(err);
            if err.is_retryable() {
                warn!(%company_id, error = %err, "ledger commit lost a version race");
            }
            return Err(err);
        }

        for m in &movements {
            info!(
                %company_id,
                movement_id = %m.id,
                product_id = %m.product_id,
                movement_type = %m.movement_type,
                quantity = %m.quantity,
                balance_after = %m.balance_after,
                average_cost_after = %m.average_cost_after,
                product_version = m.product_version,
                "movement recorded"
            );
        }
        publish_all(&self.bus, movements.iter().map(movement_envelope).collect());
        Ok(movements)
    }

    /// Apply a single movement atomically.
    #[instrument(
        skip(self, request),
        fields(product_id = %request.product_id, movement_type = %request.movement_type)
    )]
    pub fn apply_movement(
        &self,
        company_id: CompanyId,
        request: MovementRequest,
    ) -> LedgerResult<StockMovement> {
        let mut batch = self.begin(company_id);
        batch.stage(request)?;
        self.single(self.commit(batch, Vec::new())?)
    }

    /// Reverse a committed movement with a new movement of the mirrored type.
    #[instrument(skip(self, reason))]
    pub fn reverse(
        &self,
        company_id: CompanyId,
        movement_id: MovementId,
        reason: &str,
        actor: UserId,
    ) -> LedgerResult<StockMovement> {
        let mut batch = self.begin(company_id);
        batch.stage_reversal(movement_id, reason, actor)?;
        self.single(self.commit(batch, Vec::new())?)
    }

    /// Move stock between warehouses as one TRANSFER_OUT / TRANSFER_IN pair.
    /// Product totals and average cost are unchanged.
    #[instrument(skip(self))]
    pub fn transfer(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
        from_warehouse: WarehouseId,
        to_warehouse: WarehouseId,
        quantity: Decimal,
        actor: UserId,
    ) -> LedgerResult<(StockMovement, StockMovement)> {
        if from_warehouse == to_warehouse {
            return Err(LedgerError::Validation(
                "transfer source and destination must differ".into(),
            ));
        }
        let reference = MovementReference::new(ReferenceType::Transfer, AggregateId::new());

        let mut batch = self.begin(company_id);
        let out = batch.stage(MovementRequest::new(
            product_id,
            from_warehouse,
            MovementType::TransferOut,
            quantity,
            reference,
            actor,
        ))?;
        batch.stage(
            MovementRequest::new(
                product_id,
                to_warehouse,
                MovementType::TransferIn,
                quantity,
                reference,
                actor,
            )
            .with_unit_cost(out.average_cost_before),
        )?;

        let mut committed = self.commit(batch, Vec::new())?.into_iter();
        match (committed.next(), committed.next()) {
            (Some(out), Some(inbound)) => Ok((out, inbound)),
            _ => Err(LedgerError::InvariantViolation(
                "transfer committed without both legs".into(),
            )),
        }
    }

    fn single(&self, movements: Vec<StockMovement>) -> LedgerResult<StockMovement> {
        movements.into_iter().next().ok_or_else(|| {
            LedgerError::InvariantViolation("commit returned no movement".into())
        })
    }

    /// Current stock record of a product.
    pub fn current_stock(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
    ) -> LedgerResult<ProductStock> {
        self.store
            .load_product(company_id, product_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("product {product_id}")))
    }

    pub fn movement_history(
        &self,
        company_id: CompanyId,
        filter: &MovementFilter,
    ) -> LedgerResult<Vec<StockMovement>> {
        Ok(self
            .store
            .list_movements(company_id, filter.product_id)?
            .into_iter()
            .filter(|m| filter.matches(m))
            .collect())
    }

    /// Quantity of a product attributed to one warehouse by its movements.
    pub fn warehouse_balance(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> LedgerResult<Decimal> {
        Ok(self
            .store
            .list_movements(company_id, Some(product_id))?
            .iter()
            .filter(|m| m.warehouse_id == warehouse_id)
            .map(StockMovement::signed_quantity)
            .sum())
    }

    pub fn valuation_summary(&self, company_id: CompanyId) -> LedgerResult<ValuationSummary> {
        let lines = self
            .store
            .list_products(company_id)?
            .into_iter()
            .map(|p| -> LedgerResult<ValuationLine> {
                Ok(ValuationLine {
                    product_id: p.id_typed(),
                    sku: p.sku().to_string(),
                    current_stock: p.current_stock(),
                    average_cost: p.average_cost(),
                    value: stock_value(p.current_stock(), p.average_cost())?,
                })
            })
            .collect::<LedgerResult<Vec<_>>>()?;
        let total_value = checked_total(lines.iter().map(|l| l.value))?;
        Ok(ValuationSummary {
            company_id,
            lines,
            total_value,
        })
    }
}
