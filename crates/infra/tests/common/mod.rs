//! Shared harness for the infra integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use stockflow_core::{AggregateId, CompanyId, UserId};
use stockflow_documents::{Document, DocumentItem, DocumentKind, DocumentMetadata};
use stockflow_events::InMemoryEventBus;
use stockflow_infra::{
    DocumentWorkflow, InMemoryInventoryStore, InventoryStore, LedgerConfig, LedgerResult,
    MovementRequest, StockLedger, StockflowEnvelope,
};
use stockflow_inventory::{
    MovementReference, MovementType, NewProduct, ProductId, ProductStock, ReferenceType,
    StockMovement, WarehouseId,
};

pub type Store = Arc<InMemoryInventoryStore>;
pub type Bus = Arc<InMemoryEventBus<StockflowEnvelope>>;
pub type Workflow = DocumentWorkflow<Store, Bus>;

pub fn march_2025() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap()
}

pub struct Harness {
    pub store: Store,
    pub bus: Bus,
    pub workflow: Arc<Workflow>,
    pub company: CompanyId,
    pub warehouse: WarehouseId,
    pub clerk: UserId,
    pub manager: UserId,
}

impl Harness {
    /// Harness configured the way a process would be: `.env`,
    /// `config/stockflow.toml` and `STOCKFLOW__*` overrides, with logs kept at
    /// `warn` unless `RUST_LOG` asks for more.
    pub fn new() -> Self {
        let mut config = LedgerConfig::load().expect("ledger configuration");
        config.logging.level = "warn".into();
        config.logging.init();
        Self::with_config(config)
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        let store: Store = Arc::new(InMemoryInventoryStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let ledger = StockLedger::new(store.clone(), bus.clone());
        let workflow = DocumentWorkflow::new(ledger, &config).with_clock(march_2025);
        Self {
            store,
            bus,
            workflow: Arc::new(workflow),
            company: CompanyId::new(),
            warehouse: WarehouseId::generate(),
            clerk: UserId::new(),
            manager: UserId::new(),
        }
    }

    pub fn ledger(&self) -> &StockLedger<Store, Bus> {
        self.workflow.ledger()
    }

    pub fn product(&self, sku: &str) -> ProductId {
        self.product_with_thresholds(sku, None, None)
    }

    pub fn product_with_thresholds(
        &self,
        sku: &str,
        min_stock: Option<Decimal>,
        max_stock: Option<Decimal>,
    ) -> ProductId {
        let product = ProductStock::new(
            ProductId::generate(),
            NewProduct {
                company_id: self.company,
                sku: sku.to_string(),
                name: format!("{sku} (test)"),
                min_stock,
                max_stock,
            },
        )
        .unwrap();
        let id = product.id_typed();
        self.store.insert_product(product).unwrap();
        id
    }

    pub fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata::new(self.company, self.warehouse)
    }

    pub fn receive(&self, product: ProductId, qty: Decimal, cost: Decimal) -> StockMovement {
        self.ledger()
            .apply_movement(
                self.company,
                self.request(product, MovementType::Receipt, qty).with_unit_cost(cost),
            )
            .unwrap()
    }

    pub fn request(&self, product: ProductId, ty: MovementType, qty: Decimal) -> MovementRequest {
        MovementRequest::new(
            product,
            self.warehouse,
            ty,
            qty,
            MovementReference::new(ReferenceType::Manual, AggregateId::new()),
            self.clerk,
        )
    }

    pub fn pending(&self, kind: DocumentKind, items: Vec<DocumentItem>) -> LedgerResult<Document> {
        let doc = self.workflow.create(kind, self.metadata(), items, self.clerk)?;
        self.workflow.submit(self.company, doc.id_typed(), self.clerk)
    }

    pub fn approved(&self, kind: DocumentKind, items: Vec<DocumentItem>) -> LedgerResult<Document> {
        let doc = self.pending(kind, items)?;
        self.workflow.approve(self.company, doc.id_typed(), self.manager)
    }

    pub fn stock(&self, product: ProductId) -> (Decimal, Decimal) {
        let p = self.ledger().current_stock(self.company, product).unwrap();
        (p.current_stock(), p.average_cost())
    }

    pub fn movements(&self, product: ProductId) -> Vec<StockMovement> {
        self.store.list_movements(self.company, Some(product)).unwrap()
    }
}

/// Assert the per-product ledger chain: versions 1..=n in order, each movement
/// starting where the previous one ended, and the product matching the tail.
pub fn assert_continuous(h: &Harness, product: ProductId) {
    let movements = h.movements(product);
    let mut balance = Decimal::ZERO;
    let mut avg = Decimal::ZERO;
    for (idx, m) in movements.iter().enumerate() {
        assert_eq!(m.product_version, idx as u64 + 1, "version gap at {idx}");
        assert_eq!(m.balance_before, balance, "balance gap at {idx}");
        assert_eq!(m.average_cost_before, avg, "cost gap at {idx}");
        assert!(m.balance_after >= Decimal::ZERO);
        balance = m.balance_after;
        avg = m.average_cost_after;
    }
    assert_eq!(h.stock(product), (balance, avg));
}
