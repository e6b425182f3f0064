//! Stock documents: goods receipts, goods issues and stock adjustments.
//!
//! All three kinds share one aggregate and one explicit approval state machine
//! (DRAFT → PENDING → APPROVED, DRAFT/PENDING → CANCELLED). Documents never
//! touch product stock; approval hands their items to the stock ledger.

pub mod document;
pub mod number;

pub use document::{
    AppliedLine, AuditStamp, Cancellation, Document, DocumentEvent, DocumentId, DocumentItem,
    DocumentKind, DocumentMetadata, DocumentStatus, DocumentTransition, Reversal,
};
pub use number::DocumentNumber;
