//! Inventory domain module: product stock state and the stock movement ledger rows.
//!
//! This crate contains business rules for stock balances, implemented purely as
//! deterministic domain logic (no IO, no storage). Persisting a decision is the
//! stock ledger's job in `stockflow-infra`.

pub mod movement;
pub mod product;

pub use movement::{
    InventoryEvent, MovementDirection, MovementId, MovementRecorded, MovementReference,
    MovementStatus, MovementType, ReferenceType, StockMovement,
};
pub use product::{NewProduct, Posting, ProductId, ProductStock, WarehouseId};
