//! Infrastructure layer: inventory store, stock ledger, document workflow and
//! the services around them (retry, alerts, configuration, event publication).

pub mod alerts;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod ledger;
pub mod store;
pub mod workflow;

pub use alerts::{AlertKind, LowStockScanner, StockAlert};
pub use config::{LedgerConfig, LogFormat};
pub use error::{LedgerError, LedgerResult};
pub use events::{StockflowEnvelope, StockflowEvent};
pub use guard::{RetryPolicy, with_retry};
pub use ledger::{
    LedgerBatch, MovementFilter, MovementRequest, StockLedger, ValuationLine, ValuationSummary,
};
pub use store::{
    Commit, DocumentWrite, InMemoryInventoryStore, InventoryStore, ProductWrite, StoreError,
};
pub use workflow::{DocumentFilter, DocumentWorkflow};
