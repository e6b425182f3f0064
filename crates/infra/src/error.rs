//! Service-level error returned by the ledger, workflow and read views.

use rust_decimal::Decimal;
use thiserror::Error;

use stockflow_core::DomainError;
use stockflow_inventory::ProductId;

use crate::store::StoreError;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Option<ProductId>,
        requested: Decimal,
        available: Decimal,
    },

    /// A version check failed; the caller may retry from a fresh read.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Fatal persistence failure. Nothing was written.
    #[error("store failure: {0}")]
    Store(#[source] StoreError),
}

impl LedgerError {
    /// Only optimistic-concurrency conflicts are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrentModification(_))
    }

    /// HTTP status an API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            LedgerError::NotFound(_) => 404,
            LedgerError::Validation(_) | LedgerError::InvalidId(_) => 400,
            LedgerError::Unauthorized(_) => 403,
            LedgerError::InvalidState(_) | LedgerError::ConcurrentModification(_) => 409,
            LedgerError::Store(StoreError::Duplicate(_)) => 409,
            LedgerError::InsufficientStock { .. } => 422,
            LedgerError::InvariantViolation(_) | LedgerError::Store(_) => 500,
        }
    }

    /// Attach the product an insufficient-stock failure belongs to.
    pub(crate) fn for_product(self, id: ProductId) -> Self {
        match self {
            LedgerError::InsufficientStock {
                requested,
                available,
                ..
            } => LedgerError::InsufficientStock {
                product_id: Some(id),
                requested,
                available,
            },
            other => other,
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => LedgerError::Validation(msg),
            DomainError::InvalidState(msg) => LedgerError::InvalidState(msg),
            DomainError::InsufficientStock {
                requested,
                available,
            } => LedgerError::InsufficientStock {
                product_id: None,
                requested,
                available,
            },
            DomainError::ConcurrentModification(msg) => LedgerError::ConcurrentModification(msg),
            DomainError::InvariantViolation(msg) => LedgerError::InvariantViolation(msg),
            DomainError::InvalidId(msg) => LedgerError::InvalidId(msg),
            DomainError::NotFound(msg) => LedgerError::NotFound(msg),
            DomainError::Unauthorized(msg) => LedgerError::Unauthorized(msg),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => LedgerError::ConcurrentModification(msg),
            StoreError::NotFound(msg) => LedgerError::NotFound(msg),
            other => LedgerError::Store(other),
        }
    }
}
