//! Document workflow: lifecycle orchestration for receipts, issues and adjustments.
//!
//! ```text
//! load document (version v) → transition (pure) → [stage ledger movements]
//!   → commit { document @ v → v+1, products, movements } → publish
//! ```
//!
//! Approval and reversal are the only transitions that touch stock, and they do
//! it through the stock ledger in the same commit as the document write. If any
//! item fails, nothing is written.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stockflow_core::{AggregateRoot, CompanyId, DomainResult, ExpectedVersion, UserId};
use stockflow_documents::{
    AppliedLine, Document, DocumentEvent, DocumentId, DocumentItem, DocumentKind,
    DocumentMetadata, DocumentNumber, DocumentStatus,
};
use stockflow_events::EventBus;
use stockflow_inventory::{MovementReference, MovementType, StockMovement};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::events::{StockflowEnvelope, document_envelope, publish_all};
use crate::guard::{RetryPolicy, with_retry};
use crate::ledger::{LedgerBatch, MovementRequest, StockLedger};
use crate::store::{Commit, DocumentWrite, InventoryStore};

/// Filter for [`DocumentWorkflow::list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFilter {
    pub kind: Option<DocumentKind>,
    pub status: Option<DocumentStatus>,
}

impl DocumentFilter {
    pub fn matches(&self, document: &Document) -> bool {
        self.kind.is_none_or(|k| document.kind() == k)
            && self.status.is_none_or(|s| document.status() == s)
    }
}

#[derive(Debug)]
pub struct DocumentWorkflow<S, B> {
    ledger: StockLedger<S, B>,
    retry: RetryPolicy,
    require_distinct_approver: bool,
    clock: fn() -> DateTime<Utc>,
}

impl<S, B> DocumentWorkflow<S, B> {
    pub fn new(ledger: StockLedger<S, B>, config: &LedgerConfig) -> Self {
        Self {
            ledger,
            retry: config.retry_policy(),
            require_distinct_approver: config.workflow.require_distinct_approver,
            clock: Utc::now,
        }
    }

    /// Replace the wall clock (document dates and number years follow it).
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn ledger(&self) -> &StockLedger<S, B> {
        &self.ledger
    }
}

impl<S, B> DocumentWorkflow<S, B>
where
    S: InventoryStore,
    B: EventBus<StockflowEnvelope>,
{
    /// Create a DRAFT document and allocate its number.
    #[instrument(skip(self, metadata, items), fields(company_id = %metadata.company_id))]
    pub fn create(
        &self,
        kind: DocumentKind,
        metadata: DocumentMetadata,
        items: Vec<DocumentItem>,
        actor: UserId,
    ) -> LedgerResult<Document> {
        Document::validate_items(kind, &items)?;
        self.ensure_products_exist(metadata.company_id, &items)?;

        let now = self.now();
        let store = self.ledger.store();
        let sequence =
            store.allocate_document_number(metadata.company_id, kind.prefix(), now.year())?;
        let number = DocumentNumber::new(kind.prefix(), now.year(), sequence)?;

        let (document, event) = Document::create(
            DocumentId::generate(),
            kind,
            number,
            metadata,
            items,
            actor,
            now,
        )?;
        store.commit(Commit::documents(vec![DocumentWrite::Insert(document.clone())]))?;

        info!(number = %document.number(), "document created");
        self.publish(&document, event);
        Ok(document)
    }

    /// Replace the items of a DRAFT document.
    #[instrument(skip(self, items))]
    pub fn update_items(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
        items: Vec<DocumentItem>,
        actor: UserId,
    ) -> LedgerResult<Document> {
        self.ensure_products_exist(company_id, &items)?;
        self.transition(company_id, document_id, |doc| {
            doc.update_items(items, actor, self.now())
        })
    }

    /// DRAFT → PENDING.
    #[instrument(skip(self))]
    pub fn submit(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
        actor: UserId,
    ) -> LedgerResult<Document> {
        self.transition(company_id, document_id, |doc| doc.submit(actor, self.now()))
    }

    /// PENDING → APPROVED, applying every item to the ledger in one commit.
    #[instrument(skip(self))]
    pub fn approve(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
        actor: UserId,
    ) -> LedgerResult<Document> {
        with_retry(&self.retry, "approve", || {
            self.try_approve(company_id, document_id, actor)
        })
    }

    fn try_approve(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
        actor: UserId,
    ) -> LedgerResult<Document> {
        let mut document = self.load(company_id, document_id)?;
        document.ensure_can_approve(actor, self.require_distinct_approver)?;
        let read_version = document.version();

        let mut batch = self.ledger.begin(company_id);
        let reference =
            MovementReference::new(document.kind().reference_type(), document.id_typed().0);
        let mut applied = Vec::with_capacity(document.items().len());
        for (idx, item) in document.items().iter().enumerate() {
            let line_no = idx as u32 + 1;
            match stage_item(&mut batch, &document, item, line_no, reference, actor) {
                Ok(line) => applied.push(line),
                Err(err) => return Err(self.stale_or(&document, err)),
            }
        }

        let event = document.approve(actor, self.now(), applied)?;
        self.ledger
            .commit(batch, vec![DocumentWrite::update(document.clone(), read_version)])?;

        info!(
            number = %document.number(),
            total_amount = %document.total_amount(),
            "document approved"
        );
        self.publish(&document, event);
        Ok(document)
    }

    /// DRAFT/PENDING → CANCELLED.
    #[instrument(skip(self, reason))]
    pub fn cancel(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
        actor: UserId,
        reason: &str,
    ) -> LedgerResult<Document> {
        self.transition(company_id, document_id, |doc| doc.cancel(actor, self.now(), reason))
    }

    /// Hard-delete a DRAFT document.
    #[instrument(skip(self))]
    pub fn delete(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
        actor: UserId,
    ) -> LedgerResult<()> {
        let document = self.load(company_id, document_id)?;
        let event = document.ensure_deletable(actor, self.now())?;
        self.ledger.store().commit(Commit::documents(vec![DocumentWrite::Delete {
            company_id,
            document_id,
            expected_version: ExpectedVersion::Exact(document.version()),
        }]))?;

        info!(number = %document.number(), "document deleted");
        self.publish(&document, event);
        Ok(())
    }

    /// Undo the stock effect of an APPROVED document by reversing every
    /// movement it produced. The document stays APPROVED and is stamped as
    /// reversed.
    #[instrument(skip(self, reason))]
    pub fn reverse(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
        actor: UserId,
        reason: &str,
    ) -> LedgerResult<Document> {
        with_retry(&self.retry, "reverse", || {
            self.try_reverse(company_id, document_id, actor, reason)
        })
    }

    fn try_reverse(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
        actor: UserId,
        reason: &str,
    ) -> LedgerResult<Document> {
        let mut document = self.load(company_id, document_id)?;
        document.ensure_can_reverse()?;
        let read_version = document.version();

        let mut batch = self.ledger.begin(company_id);
        let mut reversal_ids = Vec::new();
        for movement_id in document.applied_movement_ids().into_iter().rev() {
            match batch.stage_reversal(movement_id, reason, actor) {
                Ok(movement) => reversal_ids.push(movement.id),
                Err(err) => return Err(self.stale_or(&document, err)),
            }
        }

        let event = document.record_reversal(actor, self.now(), reason, reversal_ids)?;
        self.ledger
            .commit(batch, vec![DocumentWrite::update(document.clone(), read_version)])?;

        info!(number = %document.number(), "document reversed");
        self.publish(&document, event);
        Ok(document)
    }

    pub fn get(&self, company_id: CompanyId, document_id: DocumentId) -> LedgerResult<Document> {
        self.load(company_id, document_id)
    }

    /// Documents of a company ordered by number.
    pub fn list(
        &self,
        company_id: CompanyId,
        filter: DocumentFilter,
    ) -> LedgerResult<Vec<Document>> {
        Ok(self
            .ledger
            .store()
            .list_documents(company_id)?
            .into_iter()
            .filter(|d| filter.matches(d))
            .collect())
    }

    fn load(&self, company_id: CompanyId, document_id: DocumentId) -> LedgerResult<Document> {
        self.ledger
            .store()
            .load_document(company_id, document_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("document {document_id}")))
    }

    /// A staging failure observed while another writer moved the document on
    /// is reported as a conflict, so a retry sees the document's new state.
    fn stale_or(&self, document: &Document, err: LedgerError) -> LedgerError {
        match self
            .ledger
            .store()
            .load_document(document.company_id(), document.id_typed())
        {
            Ok(Some(current)) if current.version() != document.version() => {
                LedgerError::ConcurrentModification(format!(
                    "{} changed while staging: {err}",
                    document.number()
                ))
            }
            _ => err,
        }
    }

    fn ensure_products_exist(
        &self,
        company_id: CompanyId,
        items: &[DocumentItem],
    ) -> LedgerResult<()> {
        for item in items {
            if self
                .ledger
                .store()
                .load_product(company_id, item.product_id)?
                .is_none()
            {
                return Err(LedgerError::NotFound(format!("product {}", item.product_id)));
            }
        }
        Ok(())
    }

    /// Load, apply a document-only transition and commit it conditioned on the
    /// version that was read.
    fn transition<F>(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
        f: F,
    ) -> LedgerResult<Document>
    where
        F: FnOnce(&mut Document) -> DomainResult<DocumentEvent>,
    {
        let mut document = self.load(company_id, document_id)?;
        let read_version = document.version();
        let event = f(&mut document)?;
        let write = DocumentWrite::update(document.clone(), read_version);
        self.ledger.store().commit(Commit::documents(vec![write]))?;

        info!(number = %document.number(), status = %document.status(), "document updated");
        self.publish(&document, event);
        Ok(document)
    }

    fn publish(&self, document: &Document, event: DocumentEvent) {
        publish_all(self.ledger.bus(), vec![document_envelope(document, event)]);
    }
}

/// Stage the ledger effect of one item and describe it as an applied line.
fn stage_item<S: InventoryStore>(
    batch: &mut LedgerBatch<'_, S>,
    document: &Document,
    item: &DocumentItem,
    line_no: u32,
    reference: MovementReference,
    actor: UserId,
) -> LedgerResult<AppliedLine> {
    let request = |movement_type: MovementType, quantity: Decimal| {
        let mut req = MovementRequest::new(
            item.product_id,
            document.warehouse_id(),
            movement_type,
            quantity,
            reference,
            actor,
        );
        req.unit_cost = item.unit_cost;
        req.notes = item.notes.clone();
        req
    };

    let staged = match document.kind() {
        DocumentKind::GoodsReceipt => batch.stage(request(MovementType::Receipt, item.quantity))?,
        DocumentKind::GoodsIssue => batch.stage(request(MovementType::Issue, item.quantity))?,
        DocumentKind::StockAdjustment => {
            let on_hand = batch.product(item.product_id)?.current_stock();
            let delta = item.quantity - on_hand;
            if delta > Decimal::ZERO {
                batch.stage(request(MovementType::AdjustmentIn, delta))?
            } else if delta < Decimal::ZERO {
                batch.stage(request(MovementType::AdjustmentOut, -delta))?
            } else {
                return Ok(AppliedLine {
                    line_no,
                    product_id: item.product_id,
                    movement_id: None,
                    movement_type: None,
                    quantity_before: on_hand,
                    quantity_after: on_hand,
                    value: Decimal::ZERO,
                });
            }
        }
    };
    applied_line(line_no, &staged)
}

fn applied_line(line_no: u32, movement: &StockMovement) -> LedgerResult<AppliedLine> {
    Ok(AppliedLine {
        line_no,
        product_id: movement.product_id,
        movement_id: Some(movement.id),
        movement_type: Some(movement.movement_type),
        quantity_before: movement.balance_before,
        quantity_after: movement.balance_after,
        value: movement.value()?,
    })
}
