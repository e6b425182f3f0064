//! Inventory persistence boundary.
//!
//! The store keeps the current state of products and documents plus the
//! append-only movement ledger. Every write goes through [`InventoryStore::commit`],
//! which applies a [`Commit`] as one unit: either every product write, movement
//! and document write lands, or none of them does.
//!
//! ```text
//! StockLedger / DocumentWorkflow → Commit → InventoryStore (CAS on versions) → EventBus
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use stockflow_core::{AggregateRoot, CompanyId, ExpectedVersion};
use stockflow_documents::{Document, DocumentId, DocumentNumber};
use stockflow_inventory::{MovementId, ProductId, ProductStock, StockMovement};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A version condition did not hold or a unique constraint was hit by a
    /// concurrent writer.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An insert collided with an existing key.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// A write referenced a row that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal lock poisoning.
    #[error("store lock poisoned")]
    Poisoned,

    /// Backend failure (IO, driver, ...).
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Product state to persist, conditioned on the version it was loaded at.
///
/// Only the stock ledger can build one, which keeps it the single writer of
/// stock and cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductWrite {
    pub(crate) product: ProductStock,
    pub(crate) expected_version: ExpectedVersion,
}

impl ProductWrite {
    pub fn product(&self) -> &ProductStock {
        &self.product
    }

    pub fn expected_version(&self) -> ExpectedVersion {
        self.expected_version
    }
}

/// Document change to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentWrite {
    Insert(Document),
    Update {
        document: Document,
        expected_version: ExpectedVersion,
    },
    Delete {
        company_id: CompanyId,
        document_id: DocumentId,
        expected_version: ExpectedVersion,
    },
}

impl DocumentWrite {
    pub fn update(document: Document, read_version: u64) -> Self {
        DocumentWrite::Update {
            document,
            expected_version: ExpectedVersion::Exact(read_version),
        }
    }
}

/// One atomic unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Commit {
    pub(crate) products: Vec<ProductWrite>,
    pub(crate) movements: Vec<StockMovement>,
    pub(crate) documents: Vec<DocumentWrite>,
}

impl Commit {
    pub(crate) fn documents(documents: Vec<DocumentWrite>) -> Self {
        Self {
            documents,
            ..Self::default()
        }
    }

    pub fn product_writes(&self) -> &[ProductWrite] {
        &self.products
    }

    pub fn movements(&self) -> &[StockMovement] {
        &self.movements
    }

    pub fn document_writes(&self) -> &[DocumentWrite] {
        &self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty() && self.movements.is_empty() && self.documents.is_empty()
    }
}

/// Persistence contract for stock state, the movement ledger and documents.
///
/// Every read is company scoped; a row owned by another company is reported as
/// absent.
pub trait InventoryStore: Send + Sync {
    /// Register a product (product management lives outside the ledger).
    /// SKUs are unique per company.
    fn insert_product(&self, product: ProductStock) -> Result<(), StoreError>;

    fn load_product(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
    ) -> Result<Option<ProductStock>, StoreError>;

    fn list_products(&self, company_id: CompanyId) -> Result<Vec<ProductStock>, StoreError>;

    fn load_movement(
        &self,
        company_id: CompanyId,
        movement_id: MovementId,
    ) -> Result<Option<StockMovement>, StoreError>;

    /// Movements in commit order, optionally restricted to one product. For a
    /// single product this is ascending `product_version`.
    fn list_movements(
        &self,
        company_id: CompanyId,
        product_id: Option<ProductId>,
    ) -> Result<Vec<StockMovement>, StoreError>;

    /// The movement that reversed `movement_id`, if any.
    fn reversal_of(
        &self,
        company_id: CompanyId,
        movement_id: MovementId,
    ) -> Result<Option<MovementId>, StoreError>;

    fn load_document(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
    ) -> Result<Option<Document>, StoreError>;

    fn list_documents(&self, company_id: CompanyId) -> Result<Vec<Document>, StoreError>;

    /// Next sequence for `(company, prefix, year)`, starting at 1. Allocation is
    /// serialised per key; concurrent callers never receive the same value.
    fn allocate_document_number(
        &self,
        company_id: CompanyId,
        prefix: &str,
        year: i32,
    ) -> Result<u32, StoreError>;

    /// Apply all writes atomically.
    ///
    /// Fails with [`StoreError::Conflict`] when any product or document version
    /// condition does not hold, or when a movement would reverse an
    /// already-reversed movement. Nothing is written on failure.
    fn commit(&self, commit: Commit) -> Result<(), StoreError>;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    fn insert_product(&self, product: ProductStock) -> Result<(), StoreError> {
        (**self).insert_product(product)
    }

    fn load_product(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
    ) -> Result<Option<ProductStock>, StoreError> {
        (**self).load_product(company_id, product_id)
    }

    fn list_products(&self, company_id: CompanyId) -> Result<Vec<ProductStock>, StoreError> {
        (**self).list_products(company_id)
    }

    fn load_movement(
        &self,
        company_id: CompanyId,
        movement_id: MovementId,
    ) -> Result<Option<StockMovement>, StoreError> {
        (**self).load_movement(company_id, movement_id)
    }

    fn list_movements(
        &self,
        company_id: CompanyId,
        product_id: Option<ProductId>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).list_movements(company_id, product_id)
    }

    fn reversal_of(
        &self,
        company_id: CompanyId,
        movement_id: MovementId,
    ) -> Result<Option<MovementId>, StoreError> {
        (**self).reversal_of(company_id, movement_id)
    }

    fn load_document(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
    ) -> Result<Option<Document>, StoreError> {
        (**self).load_document(company_id, document_id)
    }

    fn list_documents(&self, company_id: CompanyId) -> Result<Vec<Document>, StoreError> {
        (**self).list_documents(company_id)
    }

    fn allocate_document_number(
        &self,
        company_id: CompanyId,
        prefix: &str,
        year: i32,
    ) -> Result<u32, StoreError> {
        (**self).allocate_document_number(company_id, prefix, year)
    }

    fn commit(&self, commit: Commit) -> Result<(), StoreError> {
        (**self).commit(commit)
    }
}

#[derive(Debug, Default)]
struct State {
    products: HashMap<(CompanyId, ProductId), ProductStock>,
    movements: Vec<StockMovement>,
    movement_index: HashMap<(CompanyId, MovementId), usize>,
    /// original movement → reversing movement
    reversals: HashMap<(CompanyId, MovementId), MovementId>,
    documents: HashMap<(CompanyId, DocumentId), Document>,
    document_numbers: HashSet<(CompanyId, DocumentNumber)>,
    sequences: HashMap<(CompanyId, String, i32), u32>,
}

/// In-memory inventory store.
///
/// Intended for tests/dev. A single `RwLock` guards all state, so a commit is
/// one critical section and readers never observe half of it.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    state: RwLock<State>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate(state: &State, commit: &Commit) -> Result<(), StoreError> {
        let mut touched = HashSet::new();
        for write in &commit.products {
            let product = &write.product;
            let key = (product.company_id(), product.id_typed());
            if !touched.insert(key) {
                return Err(StoreError::Conflict(format!(
                    "product {} written twice in one commit",
                    product.id_typed()
                )));
            }
            let stored = state
                .products
                .get(&key)
                .ok_or_else(|| StoreError::NotFound(format!("product {}", product.id_typed())))?;
            if !write.expected_version.matches(stored.version()) {
                return Err(StoreError::Conflict(format!(
                    "product {} is at version {}, expected {:?}",
                    product.id_typed(),
                    stored.version(),
                    write.expected_version
                )));
            }
        }

        let mut reversed_here = HashSet::new();
        for movement in &commit.movements {
            let key = (movement.company_id, movement.id);
            if state.movement_index.contains_key(&key) {
                return Err(StoreError::Duplicate(format!("movement {}", movement.id)));
            }
            if !touched.contains(&(movement.company_id, movement.product_id)) {
                return Err(StoreError::Conflict(format!(
                    "movement {} has no matching product write",
                    movement.id
                )));
            }
            if movement.reference.is_reversal() {
                let original = MovementId(movement.reference.reference_id);
                let original_key = (movement.company_id, original);
                if state.reversals.contains_key(&original_key)
                    || !reversed_here.insert(original_key)
                {
                    return Err(StoreError::Conflict(format!(
                        "movement {original} has already been reversed"
                    )));
                }
            }
        }

        let mut numbers_here = HashSet::new();
        for write in &commit.documents {
            match write {
                DocumentWrite::Insert(doc) => {
                    let key = (doc.company_id(), doc.id_typed());
                    if state.documents.contains_key(&key) {
                        return Err(StoreError::Duplicate(format!("document {}", doc.id_typed())));
                    }
                    let number_key = (doc.company_id(), doc.number().clone());
                    if state.document_numbers.contains(&number_key)
                        || !numbers_here.insert(number_key)
                    {
                        return Err(StoreError::Duplicate(format!(
                            "document number {}",
                            doc.number()
                        )));
                    }
                }
                DocumentWrite::Update {
                    document,
                    expected_version,
                } => {
                    let key = (document.company_id(), document.id_typed());
                    Self::check_document_version(state, key, *expected_version)?;
                }
                DocumentWrite::Delete {
                    company_id,
                    document_id,
                    expected_version,
                } => {
                    let key = (*company_id, *document_id);
                    Self::check_document_version(state, key, *expected_version)?;
                }
            }
        }
        Ok(())
    }

    fn check_document_version(
        state: &State,
        key: (CompanyId, DocumentId),
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let stored = state
            .documents
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(format!("document {}", key.1)))?;
        if !expected.matches(stored.version()) {
            return Err(StoreError::Conflict(format!(
                "document {} is at version {}, expected {expected:?}",
                stored.number(),
                stored.version()
            )));
        }
        Ok(())
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn insert_product(&self, product: ProductStock) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let company_id = product.company_id();
        let key = (company_id, product.id_typed());
        if state.products.contains_key(&key) {
            return Err(StoreError::Duplicate(format!("product {}", product.id_typed())));
        }
        if state
            .products
            .values()
            .any(|p| p.company_id() == company_id && p.sku() == product.sku())
        {
            return Err(StoreError::Duplicate(format!("sku {}", product.sku())));
        }
        state.products.insert(key, product);
        Ok(())
    }

    fn load_product(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
    ) -> Result<Option<ProductStock>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.products.get(&(company_id, product_id)).cloned())
    }

    fn list_products(&self, company_id: CompanyId) -> Result<Vec<ProductStock>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        let mut out: Vec<_> = state
            .products
            .values()
            .filter(|p| p.company_id() == company_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.sku().cmp(b.sku()));
        Ok(out)
    }

    fn load_movement(
        &self,
        company_id: CompanyId,
        movement_id: MovementId,
    ) -> Result<Option<StockMovement>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .movement_index
            .get(&(company_id, movement_id))
            .map(|&idx| state.movements[idx].clone()))
    }

    fn list_movements(
        &self,
        company_id: CompanyId,
        product_id: Option<ProductId>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .movements
            .iter()
            .filter(|m| m.company_id == company_id)
            .filter(|m| product_id.is_none_or(|p| m.product_id == p))
            .cloned()
            .collect())
    }

    fn reversal_of(
        &self,
        company_id: CompanyId,
        movement_id: MovementId,
    ) -> Result<Option<MovementId>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.reversals.get(&(company_id, movement_id)).copied())
    }

    fn load_document(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
    ) -> Result<Option<Document>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.documents.get(&(company_id, document_id)).cloned())
    }

    fn list_documents(&self, company_id: CompanyId) -> Result<Vec<Document>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        let mut out: Vec<_> = state
            .documents
            .values()
            .filter(|d| d.company_id() == company_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.number().cmp(b.number()));
        Ok(out)
    }

    fn allocate_document_number(
        &self,
        company_id: CompanyId,
        prefix: &str,
        year: i32,
    ) -> Result<u32, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let next = state
            .sequences
            .entry((company_id, prefix.to_string(), year))
            .or_insert(0);
        *next += 1;
        Ok(*next)
    }

    fn commit(&self, commit: Commit) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;

        // Validate everything before touching state.
        Self::validate(&state, &commit)?;

        let Commit {
            products,
            movements,
            documents,
        } = commit;

        for write in products {
            let key = (write.product.company_id(), write.product.id_typed());
            state.products.insert(key, write.product);
        }

        for movement in movements {
            let key = (movement.company_id, movement.id);
            if movement.reference.is_reversal() {
                let original = MovementId(movement.reference.reference_id);
                state
                    .reversals
                    .insert((movement.company_id, original), movement.id);
            }
            let idx = state.movements.len();
            state.movements.push(movement);
            state.movement_index.insert(key, idx);
        }

        for write in documents {
            match write {
                DocumentWrite::Insert(doc) => {
                    let company_id = doc.company_id();
                    state
                        .document_numbers
                        .insert((company_id, doc.number().clone()));
                    state.documents.insert((company_id, doc.id_typed()), doc);
                }
                DocumentWrite::Update { document, .. } => {
                    state
                        .documents
                        .insert((document.company_id(), document.id_typed()), document);
                }
                DocumentWrite::Delete {
                    company_id,
                    document_id,
                    ..
                } => {
                    // The number stays reserved so it is never reissued.
                    state.documents.remove(&(company_id, document_id));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use stockflow_core::UserId;
    use stockflow_documents::{DocumentItem, DocumentKind, DocumentMetadata};
    use stockflow_inventory::{
        MovementReference, MovementType, NewProduct, ReferenceType, WarehouseId,
    };

    fn test_company() -> CompanyId {
        CompanyId::new()
    }

    fn test_product(company_id: CompanyId, sku: &str) -> ProductStock {
        ProductStock::new(
            ProductId::generate(),
            NewProduct {
                company_id,
                sku: sku.to_string(),
                name: format!("Product {sku}"),
                min_stock: None,
                max_stock: None,
            },
        )
        .unwrap()
    }

    fn receive(
        product: &ProductStock,
        qty: rust_decimal::Decimal,
    ) -> (ProductWrite, StockMovement) {
        let read_version = product.version();
        let mut next = product.clone();
        let posting = next.decide(MovementType::Receipt, qty, dec!(1)).unwrap();
        next.apply(&posting).unwrap();
        let movement = StockMovement::completed(
            next.company_id(),
            next.id_typed(),
            WarehouseId::generate(),
            &posting,
            MovementReference::new(ReferenceType::Manual, stockflow_core::AggregateId::new()),
            next.version(),
            UserId::new(),
            Utc::now(),
        );
        (
            ProductWrite {
                product: next,
                expected_version: ExpectedVersion::Exact(read_version),
            },
            movement,
        )
    }

    fn test_document(company_id: CompanyId, seq: u32) -> Document {
        Document::create(
            DocumentId::generate(),
            DocumentKind::GoodsIssue,
            DocumentNumber::new("GI", 2025, seq).unwrap(),
            DocumentMetadata::new(company_id, WarehouseId::generate()),
            vec![DocumentItem::new(ProductId::generate(), dec!(1))],
            UserId::new(),
            Utc::now(),
        )
        .unwrap()
        .0
    }

    #[test]
    fn sku_is_unique_per_company() {
        let store = InMemoryInventoryStore::new();
        let company = test_company();
        store.insert_product(test_product(company, "A")).unwrap();

        assert!(matches!(
            store.insert_product(test_product(company, "A")),
            Err(StoreError::Duplicate(_))
        ));
        store.insert_product(test_product(test_company(), "A")).unwrap();
    }

    #[test]
    fn reads_are_company_scoped() {
        let store = InMemoryInventoryStore::new();
        let company = test_company();
        let product = test_product(company, "A");
        let id = product.id_typed();
        store.insert_product(product).unwrap();

        assert!(store.load_product(company, id).unwrap().is_some());
        assert!(store.load_product(test_company(), id).unwrap().is_none());
    }

    #[test]
    fn commit_applies_product_and_movement_together() {
        let store = InMemoryInventoryStore::new();
        let company = test_company();
        let product = test_product(company, "A");
        store.insert_product(product.clone()).unwrap();

        let (write, movement) = receive(&product, dec!(5));
        store
            .commit(Commit {
                products: vec![write],
                movements: vec![movement.clone()],
                documents: vec![],
            })
            .unwrap();

        let stored = store.load_product(company, product.id_typed()).unwrap().unwrap();
        assert_eq!(stored.current_stock(), dec!(5));
        assert_eq!(stored.version(), 1);
        assert_eq!(
            store.load_movement(company, movement.id).unwrap(),
            Some(movement)
        );
    }

    #[test]
    fn stale_product_write_fails_the_whole_commit() {
        let store = InMemoryInventoryStore::new();
        let company = test_company();
        let a = test_product(company, "A");
        let b = test_product(company, "B");
        store.insert_product(a.clone()).unwrap();
        store.insert_product(b.clone()).unwrap();

        // Move A forward so a second write based on version 0 is stale.
        let (first, m1) = receive(&a, dec!(1));
        store
            .commit(Commit {
                products: vec![first],
                movements: vec![m1],
                documents: vec![],
            })
            .unwrap();

        let (stale_a, m2) = receive(&a, dec!(1));
        let (fresh_b, m3) = receive(&b, dec!(1));
        let doc = test_document(company, 1);
        let err = store
            .commit(Commit {
                products: vec![fresh_b, stale_a],
                movements: vec![m3, m2],
                documents: vec![DocumentWrite::Insert(doc.clone())],
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        let stored_b = store.load_product(company, b.id_typed()).unwrap().unwrap();
        assert_eq!(stored_b.current_stock(), dec!(0));
        assert_eq!(store.list_movements(company, None).unwrap().len(), 1);
        assert!(store.load_document(company, doc.id_typed()).unwrap().is_none());
    }

    #[test]
    fn document_update_is_version_checked() {
        let store = InMemoryInventoryStore::new();
        let company = test_company();
        let doc = test_document(company, 1);
        store
            .commit(Commit::documents(vec![DocumentWrite::Insert(doc.clone())]))
            .unwrap();

        let mut submitted = doc.clone();
        submitted.submit(UserId::new(), Utc::now()).unwrap();
        let write = DocumentWrite::update(submitted.clone(), doc.version());
        store.commit(Commit::documents(vec![write])).unwrap();

        let err = store
            .commit(Commit::documents(vec![DocumentWrite::update(submitted, doc.version())]))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn duplicate_document_number_is_rejected() {
        let store = InMemoryInventoryStore::new();
        let company = test_company();
        store
            .commit(Commit::documents(vec![DocumentWrite::Insert(test_document(company, 1))]))
            .unwrap();

        assert!(matches!(
            store.commit(Commit::documents(vec![DocumentWrite::Insert(test_document(company, 1))])),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn sequences_are_per_company_prefix_and_year() {
        let store = InMemoryInventoryStore::new();
        let company = test_company();

        assert_eq!(store.allocate_document_number(company, "GR", 2025).unwrap(), 1);
        assert_eq!(store.allocate_document_number(company, "GR", 2025).unwrap(), 2);
        assert_eq!(store.allocate_document_number(company, "GI", 2025).unwrap(), 1);
        assert_eq!(store.allocate_document_number(company, "GR", 2026).unwrap(), 1);
        assert_eq!(store.allocate_document_number(test_company(), "GR", 2025).unwrap(), 1);
    }

    #[test]
    fn concurrent_allocation_hands_out_distinct_numbers() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let company = test_company();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| store.allocate_document_number(company, "SA", 2025).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (1..=200).collect::<Vec<_>>());
    }
}
