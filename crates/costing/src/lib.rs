//! Costing engine (moving weighted-average method).
//!
//! Pure calculation only: no IO, no clocks, no shared state. The stock ledger
//! calls into this crate for every movement it applies.

pub mod engine;

pub use engine::{CostResult, after_issue, is_low_stock, stock_value, weighted_average};
