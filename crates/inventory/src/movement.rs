use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockflow_core::{
    AggregateId, CompanyId, DomainResult, UserId, aggregate_id, checked_amount, round2,
};
use stockflow_events::Event;

use crate::product::{Posting, ProductId, WarehouseId};

aggregate_id!(
    /// Stock movement identifier.
    MovementId
);

/// Whether a movement adds to or removes from stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementDirection {
    Inbound,
    Outbound,
}

/// Kind of ledger movement. The quantity is always positive; direction is
/// implied by the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Receipt,
    Issue,
    AdjustmentIn,
    AdjustmentOut,
    TransferIn,
    TransferOut,
}

impl MovementType {
    pub fn direction(self) -> MovementDirection {
        match self {
            MovementType::Receipt | MovementType::AdjustmentIn | MovementType::TransferIn => {
                MovementDirection::Inbound
            }
            MovementType::Issue | MovementType::AdjustmentOut | MovementType::TransferOut => {
                MovementDirection::Outbound
            }
        }
    }

    pub fn is_inbound(self) -> bool {
        self.direction() == MovementDirection::Inbound
    }

    /// The type that undoes this one.
    pub fn mirror(self) -> MovementType {
        match self {
            MovementType::Receipt => MovementType::Issue,
            MovementType::Issue => MovementType::Receipt,
            MovementType::AdjustmentIn => MovementType::AdjustmentOut,
            MovementType::AdjustmentOut => MovementType::AdjustmentIn,
            MovementType::TransferIn => MovementType::TransferOut,
            MovementType::TransferOut => MovementType::TransferIn,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Receipt => "RECEIPT",
            MovementType::Issue => "ISSUE",
            MovementType::AdjustmentIn => "ADJUSTMENT_IN",
            MovementType::AdjustmentOut => "ADJUSTMENT_OUT",
            MovementType::TransferIn => "TRANSFER_IN",
            MovementType::TransferOut => "TRANSFER_OUT",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger row status. The ledger only ever writes `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementStatus {
    Pending,
    Completed,
    Cancelled,
}

/// What produced a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    GoodsReceipt,
    GoodsIssue,
    StockAdjustment,
    Transfer,
    Reversal,
    Manual,
}

/// Link from a movement back to its originating document (or, for
/// reversals, to the reversed movement).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementReference {
    pub reference_type: ReferenceType,
    pub reference_id: AggregateId,
}

impl MovementReference {
    pub fn new(reference_type: ReferenceType, reference_id: AggregateId) -> Self {
        Self {
            reference_type,
            reference_id,
        }
    }

    pub fn reversal_of(movement_id: MovementId) -> Self {
        Self::new(ReferenceType::Reversal, movement_id.0)
    }

    pub fn is_reversal(&self) -> bool {
        self.reference_type == ReferenceType::Reversal
    }
}

/// Immutable ledger entry.
///
/// For a given product, `product_version` orders movements totally and
/// `balance_after` of one movement equals `balance_before` of the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub unit_cost: Decimal,
    pub average_cost_before: Decimal,
    pub average_cost_after: Decimal,
    pub status: MovementStatus,
    pub reference: MovementReference,
    /// Product version produced by this movement.
    pub product_version: u64,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl StockMovement {
    /// Build a completed ledger row from a decided posting.
    #[allow(clippy::too_many_arguments)]
    pub fn completed(
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        posting: &Posting,
        reference: MovementReference,
        product_version: u64,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::generate(),
            company_id,
            product_id,
            warehouse_id,
            movement_type: posting.movement_type,
            quantity: posting.quantity,
            balance_before: posting.balance_before,
            balance_after: posting.balance_after,
            unit_cost: posting.unit_cost,
            average_cost_before: posting.average_cost_before,
            average_cost_after: posting.average_cost_after,
            status: MovementStatus::Completed,
            reference,
            product_version,
            notes: None,
            created_by: actor,
            created_at: occurred_at,
            approved_by: Some(actor),
            approved_at: Some(occurred_at),
        }
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    /// Signed quantity (+ inbound, - outbound).
    pub fn signed_quantity(&self) -> Decimal {
        match self.movement_type.direction() {
            MovementDirection::Inbound => self.quantity,
            MovementDirection::Outbound => -self.quantity,
        }
    }

    /// Value moved by this row: incoming cost for inbound rows, the average
    /// cost consumed for outbound rows. Signed like [`Self::signed_quantity`].
    pub fn value(&self) -> DomainResult<Decimal> {
        let cost = match self.movement_type.direction() {
            MovementDirection::Inbound => self.unit_cost,
            MovementDirection::Outbound => self.average_cost_before,
        };
        checked_amount(self.signed_quantity(), cost).map(round2)
    }
}

/// Event: MovementRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub movement: StockMovement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    MovementRecorded(MovementRecorded),
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::MovementRecorded(_) => "inventory.movement.recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::MovementRecorded(e) => e.movement.created_at,
        }
    }
}
