use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockflow_core::{
    AggregateRoot, CompanyId, DomainError, DomainResult, UserId, aggregate_id, checked_amount,
    checked_total, round2,
};
use stockflow_events::Event;
use stockflow_inventory::{MovementId, MovementType, ProductId, ReferenceType, WarehouseId};

use crate::number::DocumentNumber;

aggregate_id!(
    /// Document identifier.
    DocumentId
);

/// The three document kinds sharing the approval workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    GoodsReceipt,
    GoodsIssue,
    StockAdjustment,
}

impl DocumentKind {
    /// Document number prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            DocumentKind::GoodsReceipt => "GR",
            DocumentKind::GoodsIssue => "GI",
            DocumentKind::StockAdjustment => "SA",
        }
    }

    /// Reference type stamped on ledger movements produced by this kind.
    pub fn reference_type(self) -> ReferenceType {
        match self {
            DocumentKind::GoodsReceipt => ReferenceType::GoodsReceipt,
            DocumentKind::GoodsIssue => ReferenceType::GoodsIssue,
            DocumentKind::StockAdjustment => ReferenceType::StockAdjustment,
        }
    }
}

/// Document lifecycle.
///
/// ```text
/// DRAFT ──submit──▶ PENDING ──approve──▶ APPROVED
///   │                  │
///   └──cancel──▶ CANCELLED ◀──cancel──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Draft,
    Pending,
    Approved,
    Cancelled,
}

impl DocumentStatus {
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (DocumentStatus::Draft, DocumentStatus::Pending)
                | (DocumentStatus::Pending, DocumentStatus::Approved)
                | (DocumentStatus::Draft, DocumentStatus::Cancelled)
                | (DocumentStatus::Pending, DocumentStatus::Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Approved | DocumentStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Approved => "APPROVED",
            DocumentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One document line.
///
/// For stock adjustments `quantity` is the counted (target) quantity; the
/// ledger movement is the difference from the stock on hand at approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentItem {
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub notes: Option<String>,
}

impl DocumentItem {
    pub fn new(product_id: ProductId, quantity: Decimal) -> Self {
        Self {
            product_id,
            quantity,
            unit_cost: None,
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

/// Header data supplied at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub company_id: CompanyId,
    pub warehouse_id: WarehouseId,
    /// External reference (supplier delivery note, work order, ...).
    pub reference: Option<String>,
    /// Supplier, customer or department name.
    pub counterparty: Option<String>,
    pub notes: Option<String>,
}

impl DocumentMetadata {
    pub fn new(company_id: CompanyId, warehouse_id: WarehouseId) -> Self {
        Self {
            company_id,
            warehouse_id,
            reference: None,
            counterparty: None,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub by: UserId,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub by: UserId,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Stock reversal recorded against an approved document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reversal {
    pub by: UserId,
    pub at: DateTime<Utc>,
    pub reason: String,
    pub movement_ids: Vec<MovementId>,
}

/// The ledger effect of one item, recorded at approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedLine {
    pub line_no: u32,
    pub product_id: ProductId,
    /// `None` when an adjustment's counted quantity matched the stock on hand.
    pub movement_id: Option<MovementId>,
    pub movement_type: Option<MovementType>,
    pub quantity_before: Decimal,
    pub quantity_after: Decimal,
    /// Signed value moved (+ inbound, - outbound).
    pub value: Decimal,
}

/// Aggregate root: Document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    id: DocumentId,
    kind: DocumentKind,
    number: DocumentNumber,
    metadata: DocumentMetadata,
    status: DocumentStatus,
    items: Vec<DocumentItem>,
    total_amount: Decimal,
    applied: Vec<AppliedLine>,
    created: AuditStamp,
    submitted: Option<AuditStamp>,
    approved: Option<AuditStamp>,
    cancelled: Option<Cancellation>,
    reversed: Option<Reversal>,
    version: u64,
}

/// Payload shared by every document event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTransition {
    pub company_id: CompanyId,
    pub document_id: DocumentId,
    pub kind: DocumentKind,
    pub number: DocumentNumber,
    pub status: DocumentStatus,
    pub actor: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentEvent {
    Created(DocumentTransition),
    ItemsUpdated(DocumentTransition),
    Submitted(DocumentTransition),
    Approved(DocumentTransition),
    Cancelled(DocumentTransition),
    Reversed(DocumentTransition),
    Deleted(DocumentTransition),
}

impl DocumentEvent {
    pub fn transition(&self) -> &DocumentTransition {
        match self {
            DocumentEvent::Created(t)
            | DocumentEvent::ItemsUpdated(t)
            | DocumentEvent::Submitted(t)
            | DocumentEvent::Approved(t)
            | DocumentEvent::Cancelled(t)
            | DocumentEvent::Reversed(t)
            | DocumentEvent::Deleted(t) => t,
        }
    }
}

impl Event for DocumentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DocumentEvent::Created(_) => "documents.document.created",
            DocumentEvent::ItemsUpdated(_) => "documents.document.items_updated",
            DocumentEvent::Submitted(_) => "documents.document.submitted",
            DocumentEvent::Approved(_) => "documents.document.approved",
            DocumentEvent::Cancelled(_) => "documents.document.cancelled",
            DocumentEvent::Reversed(_) => "documents.document.reversed",
            DocumentEvent::Deleted(_) => "documents.document.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.transition().occurred_at
    }
}

impl Document {
    /// Create a DRAFT document. Product existence is checked by the caller.
    pub fn create(
        id: DocumentId,
        kind: DocumentKind,
        number: DocumentNumber,
        metadata: DocumentMetadata,
        items: Vec<DocumentItem>,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> DomainResult<(Self, DocumentEvent)> {
        if number.prefix() != kind.prefix() {
            return Err(DomainError::invariant(format!(
                "document number {number} does not match kind prefix {}",
                kind.prefix()
            )));
        }
        validate_items(kind, &items)?;
        let total_amount = draft_total(&items)?;

        let doc = Self {
            id,
            kind,
            number,
            metadata,
            status: DocumentStatus::Draft,
            items,
            total_amount,
            applied: Vec::new(),
            created: AuditStamp { by: actor, at },
            submitted: None,
            approved: None,
            cancelled: None,
            reversed: None,
            version: 1,
        };
        let event = DocumentEvent::Created(doc.transition(actor, at, None));
        Ok((doc, event))
    }

    /// Validate lines for `kind` without building a document.
    pub fn validate_items(kind: DocumentKind, items: &[DocumentItem]) -> DomainResult<()> {
        validate_items(kind, items)?;
        draft_total(items).map(|_| ())
    }

    pub fn id_typed(&self) -> DocumentId {
        self.id
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn number(&self) -> &DocumentNumber {
        &self.number
    }

    pub fn company_id(&self) -> CompanyId {
        self.metadata.company_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.metadata.warehouse_id
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn items(&self) -> &[DocumentItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn applied(&self) -> &[AppliedLine] {
        &self.applied
    }

    pub fn created(&self) -> AuditStamp {
        self.created
    }

    pub fn submitted(&self) -> Option<AuditStamp> {
        self.submitted
    }

    pub fn approved(&self) -> Option<AuditStamp> {
        self.approved
    }

    pub fn cancelled(&self) -> Option<&Cancellation> {
        self.cancelled.as_ref()
    }

    pub fn reversed(&self) -> Option<&Reversal> {
        self.reversed.as_ref()
    }

    /// Replace all items (DRAFT only).
    pub fn update_items(
        &mut self,
        items: Vec<DocumentItem>,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> DomainResult<DocumentEvent> {
        self.ensure_status(DocumentStatus::Draft, "items can only be changed in DRAFT")?;
        validate_items(self.kind, &items)?;
        let total_amount = draft_total(&items)?;

        self.items = items;
        self.total_amount = total_amount;
        self.version += 1;
        Ok(DocumentEvent::ItemsUpdated(self.transition(actor, at, None)))
    }

    /// DRAFT → PENDING.
    pub fn submit(&mut self, actor: UserId, at: DateTime<Utc>) -> DomainResult<DocumentEvent> {
        self.ensure_status(DocumentStatus::Draft, "only DRAFT documents can be submitted")?;
        if self.items.is_empty() {
            return Err(DomainError::invalid_state(format!(
                "empty document: {} has no items",
                self.number
            )));
        }

        self.move_to(DocumentStatus::Pending)?;
        self.submitted = Some(AuditStamp { by: actor, at });
        Ok(DocumentEvent::Submitted(self.transition(actor, at, None)))
    }

    /// Checks run before the ledger is asked to stage anything.
    pub fn ensure_can_approve(
        &self,
        actor: UserId,
        require_distinct_approver: bool,
    ) -> DomainResult<()> {
        self.ensure_status(DocumentStatus::Pending, "only PENDING documents can be approved")?;
        if require_distinct_approver && actor == self.created.by {
            return Err(DomainError::unauthorized(
                "a document cannot be approved by its creator",
            ));
        }
        Ok(())
    }

    /// PENDING → APPROVED, recording the ledger effect of every item.
    pub fn approve(
        &mut self,
        actor: UserId,
        at: DateTime<Utc>,
        applied: Vec<AppliedLine>,
    ) -> DomainResult<DocumentEvent> {
        self.ensure_status(DocumentStatus::Pending, "only PENDING documents can be approved")?;
        if applied.len() != self.items.len() {
            return Err(DomainError::invariant(format!(
                "approval recorded {} lines for {} items",
                applied.len(),
                self.items.len()
            )));
        }

        let posted = checked_total(applied.iter().map(|l| l.value))?;

        self.move_to(DocumentStatus::Approved)?;
        self.total_amount = match self.kind {
            DocumentKind::GoodsReceipt | DocumentKind::StockAdjustment => posted,
            DocumentKind::GoodsIssue => -posted,
        };
        self.applied = applied;
        self.approved = Some(AuditStamp { by: actor, at });
        Ok(DocumentEvent::Approved(self.transition(actor, at, None)))
    }

    /// DRAFT/PENDING → CANCELLED. Approved documents are undone with
    /// [`Document::record_reversal`] instead.
    pub fn cancel(
        &mut self,
        actor: UserId,
        at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> DomainResult<DocumentEvent> {
        let reason = reason.into();
        match self.status {
            DocumentStatus::Approved => {
                return Err(DomainError::invalid_state(format!(
                    "{} is APPROVED; reverse its stock movements instead of cancelling",
                    self.number
                )));
            }
            DocumentStatus::Cancelled => {
                return Err(DomainError::invalid_state(format!(
                    "{} is already CANCELLED",
                    self.number
                )));
            }
            DocumentStatus::Draft | DocumentStatus::Pending => {}
        }
        if reason.trim().is_empty() {
            return Err(DomainError::validation("a cancellation reason is required"));
        }

        self.move_to(DocumentStatus::Cancelled)?;
        self.cancelled = Some(Cancellation {
            by: actor,
            at,
            reason: reason.clone(),
        });
        Ok(DocumentEvent::Cancelled(self.transition(actor, at, Some(reason))))
    }

    /// Checks run before the ledger is asked to reverse an approved document.
    pub fn ensure_can_reverse(&self) -> DomainResult<()> {
        self.ensure_status(DocumentStatus::Approved, "only APPROVED documents can be reversed")?;
        if self.reversed.is_some() {
            return Err(DomainError::invalid_state(format!(
                "{} has already been reversed",
                self.number
            )));
        }
        Ok(())
    }

    /// Movements produced at approval, in item order.
    pub fn applied_movement_ids(&self) -> Vec<MovementId> {
        self.applied.iter().filter_map(|l| l.movement_id).collect()
    }

    /// Record that the approved stock effect was reversed. Status stays APPROVED.
    pub fn record_reversal(
        &mut self,
        actor: UserId,
        at: DateTime<Utc>,
        reason: impl Into<String>,
        movement_ids: Vec<MovementId>,
    ) -> DomainResult<DocumentEvent> {
        self.ensure_can_reverse()?;
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::validation("a reversal reason is required"));
        }

        self.reversed = Some(Reversal {
            by: actor,
            at,
            reason: reason.clone(),
            movement_ids,
        });
        self.version += 1;
        Ok(DocumentEvent::Reversed(self.transition(actor, at, Some(reason))))
    }

    /// Hard delete is only allowed for drafts.
    pub fn ensure_deletable(
        &self,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> DomainResult<DocumentEvent> {
        self.ensure_status(DocumentStatus::Draft, "only DRAFT documents can be deleted")?;
        Ok(DocumentEvent::Deleted(self.transition(actor, at, None)))
    }

    fn ensure_status(&self, expected: DocumentStatus, msg: &str) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::invalid_state(format!(
                "{msg} ({} is {})",
                self.number, self.status
            )));
        }
        Ok(())
    }

    fn move_to(&mut self, next: DocumentStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_state(format!(
                "transition {} -> {next} is not allowed",
                self.status
            )));
        }
        self.status = next;
        self.version += 1;
        Ok(())
    }

    fn transition(
        &self,
        actor: UserId,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> DocumentTransition {
        DocumentTransition {
            company_id: self.metadata.company_id,
            document_id: self.id,
            kind: self.kind,
            number: self.number.clone(),
            status: self.status,
            actor,
            reason,
            occurred_at: at,
        }
    }
}

impl AggregateRoot for Document {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn validate_items(kind: DocumentKind, items: &[DocumentItem]) -> DomainResult<()> {
    let mut seen = HashSet::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let line = idx + 1;
        if !seen.insert(item.product_id) {
            return Err(DomainError::validation(format!(
                "line {line}: product {} appears more than once",
                item.product_id
            )));
        }

        match kind {
            DocumentKind::StockAdjustment => {
                if item.quantity < Decimal::ZERO {
                    return Err(DomainError::validation(format!(
                        "line {line}: counted quantity cannot be negative"
                    )));
                }
            }
            DocumentKind::GoodsReceipt | DocumentKind::GoodsIssue => {
                if item.quantity <= Decimal::ZERO {
                    return Err(DomainError::validation(format!(
                        "line {line}: quantity must be positive"
                    )));
                }
            }
        }

        match (kind, item.unit_cost) {
            (DocumentKind::GoodsReceipt, None) => {
                return Err(DomainError::validation(format!(
                    "line {line}: goods receipt lines require a unit cost"
                )));
            }
            (_, Some(cost)) if cost < Decimal::ZERO => {
                return Err(DomainError::validation(format!(
                    "line {line}: unit cost cannot be negative"
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

// Draft totals are an estimate from the item costs; approval replaces them
// with the values actually posted to the ledger.
fn draft_total(items: &[DocumentItem]) -> DomainResult<Decimal> {
    let amounts = items
        .iter()
        .map(|i| checked_amount(i.quantity, i.unit_cost.unwrap_or(Decimal::ZERO)))
        .collect::<DomainResult<Vec<_>>>()?;
    checked_total(amounts).map(round2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_user() -> UserId {
        UserId::new()
    }

    fn draft(kind: DocumentKind, items: Vec<DocumentItem>) -> (Document, UserId) {
        let creator = test_user();
        let number = DocumentNumber::new(kind.prefix(), 2025, 1).unwrap();
        let (doc, _) = Document::create(
            DocumentId::generate(),
            kind,
            number,
            DocumentMetadata::new(CompanyId::new(), WarehouseId::generate()),
            items,
            creator,
            test_time(),
        )
        .unwrap();
        (doc, creator)
    }

    fn receipt_line(qty: Decimal, cost: Decimal) -> DocumentItem {
        DocumentItem::new(ProductId::generate(), qty).with_unit_cost(cost)
    }

    fn applied_for(doc: &Document, value: Decimal) -> Vec<AppliedLine> {
        doc.items()
            .iter()
            .enumerate()
            .map(|(i, item)| AppliedLine {
                line_no: i as u32 + 1,
                product_id: item.product_id,
                movement_id: Some(MovementId::generate()),
                movement_type: Some(MovementType::Receipt),
                quantity_before: dec!(0),
                quantity_after: item.quantity,
                value,
            })
            .collect()
    }

    #[test]
    fn create_starts_in_draft_with_estimated_total() {
        let (doc, _) = draft(
            DocumentKind::GoodsReceipt,
            vec![receipt_line(dec!(100), dec!(10)), receipt_line(dec!(50), dec!(16))],
        );
        assert_eq!(doc.status(), DocumentStatus::Draft);
        assert_eq!(doc.total_amount(), dec!(1800.00));
        assert_eq!(doc.version(), 1);
        assert_eq!(doc.number().to_string(), "GR-2025-00001");
    }

    #[test]
    fn create_rejects_number_of_another_kind() {
        let err = Document::create(
            DocumentId::generate(),
            DocumentKind::GoodsIssue,
            DocumentNumber::new("GR", 2025, 1).unwrap(),
            DocumentMetadata::new(CompanyId::new(), WarehouseId::generate()),
            vec![],
            test_user(),
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn receipt_lines_require_non_negative_unit_cost() {
        let number = || DocumentNumber::new("GR", 2025, 1).unwrap();
        let meta = DocumentMetadata::new(CompanyId::new(), WarehouseId::generate());

        let missing = DocumentItem::new(ProductId::generate(), dec!(1));
        let negative = receipt_line(dec!(1), dec!(-0.01));

        for item in [missing, negative] {
            let err = Document::create(
                DocumentId::generate(),
                DocumentKind::GoodsReceipt,
                number(),
                meta.clone(),
                vec![item],
                test_user(),
                test_time(),
            )
            .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
    }

    #[test]
    fn issue_lines_require_positive_quantity() {
        let (mut doc, creator) = draft(DocumentKind::GoodsIssue, vec![]);
        let zero = DocumentItem::new(ProductId::generate(), dec!(0));
        let err = doc.update_items(vec![zero], creator, test_time()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("positive")));
    }

    #[test]
    fn adjustment_accepts_zero_count_but_not_negative() {
        let (mut doc, creator) = draft(DocumentKind::StockAdjustment, vec![]);
        let zero = DocumentItem::new(ProductId::generate(), dec!(0));
        doc.update_items(vec![zero], creator, test_time()).unwrap();
        let negative = DocumentItem::new(ProductId::generate(), dec!(-1));
        let err = doc.update_items(vec![negative], creator, test_time()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn duplicate_products_are_rejected() {
        let product_id = ProductId::generate();
        let (mut doc, creator) = draft(DocumentKind::GoodsIssue, vec![]);
        let err = doc
            .update_items(
                vec![
                    DocumentItem::new(product_id, dec!(1)),
                    DocumentItem::new(product_id, dec!(2)),
                ],
                creator,
                test_time(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("more than once")));
    }

    #[test]
    fn update_items_recomputes_total_and_bumps_version() {
        let (mut doc, creator) = draft(DocumentKind::GoodsReceipt, vec![]);
        doc.update_items(vec![receipt_line(dec!(3), dec!(1.335))], creator, test_time())
            .unwrap();
        assert_eq!(doc.total_amount(), dec!(4.01));
        assert_eq!(doc.version(), 2);
    }

    #[test]
    fn out_of_range_total_is_rejected_without_changing_items() {
        let (mut doc, creator) =
            draft(DocumentKind::GoodsReceipt, vec![receipt_line(dec!(1), dec!(1))]);
        let huge = Decimal::MAX / dec!(2);
        let err = doc
            .update_items(
                vec![receipt_line(huge, dec!(1)), receipt_line(huge, dec!(3))],
                creator,
                test_time(),
            )
            .unwrap_err();

        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(doc.items().len(), 1);
        assert_eq!(doc.total_amount(), dec!(1.00));
        assert_eq!(doc.version(), 1);
    }

    #[test]
    fn empty_document_cannot_be_submitted() {
        let (mut doc, creator) = draft(DocumentKind::GoodsReceipt, vec![]);
        let err = doc.submit(creator, test_time()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(msg) if msg.contains("empty document")));
        assert_eq!(doc.status(), DocumentStatus::Draft);
    }

    #[test]
    fn submit_then_approve_walks_the_happy_path() {
        let (mut doc, creator) =
            draft(DocumentKind::GoodsReceipt, vec![receipt_line(dec!(10), dec!(2))]);
        let approver = test_user();

        doc.submit(creator, test_time()).unwrap();
        assert_eq!(doc.status(), DocumentStatus::Pending);
        assert_eq!(doc.submitted().map(|s| s.by), Some(creator));

        doc.ensure_can_approve(approver, true).unwrap();
        let applied = applied_for(&doc, dec!(20.00));
        let event = doc.approve(approver, test_time(), applied).unwrap();

        assert!(matches!(event, DocumentEvent::Approved(_)));
        assert_eq!(doc.status(), DocumentStatus::Approved);
        assert_eq!(doc.approved().map(|s| s.by), Some(approver));
        assert_eq!(doc.total_amount(), dec!(20.00));
        assert_eq!(doc.version(), 3);
    }

    #[test]
    fn items_are_frozen_after_submit() {
        let (mut doc, creator) =
            draft(DocumentKind::GoodsReceipt, vec![receipt_line(dec!(1), dec!(1))]);
        doc.submit(creator, test_time()).unwrap();
        let err = doc
            .update_items(vec![receipt_line(dec!(2), dec!(1))], creator, test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn draft_cannot_be_approved() {
        let (doc, _) = draft(DocumentKind::GoodsReceipt, vec![receipt_line(dec!(1), dec!(1))]);
        let err = doc.ensure_can_approve(test_user(), true).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn creator_cannot_approve_when_distinct_approver_required() {
        let (mut doc, creator) =
            draft(DocumentKind::GoodsReceipt, vec![receipt_line(dec!(1), dec!(1))]);
        doc.submit(creator, test_time()).unwrap();

        assert!(matches!(
            doc.ensure_can_approve(creator, true),
            Err(DomainError::Unauthorized(_))
        ));
        assert!(doc.ensure_can_approve(creator, false).is_ok());
    }

    #[test]
    fn approval_must_account_for_every_item() {
        let (mut doc, creator) = draft(
            DocumentKind::GoodsReceipt,
            vec![receipt_line(dec!(1), dec!(1)), receipt_line(dec!(2), dec!(1))],
        );
        doc.submit(creator, test_time()).unwrap();
        let mut applied = applied_for(&doc, dec!(1));
        applied.pop();

        assert!(matches!(
            doc.approve(test_user(), test_time(), applied),
            Err(DomainError::InvariantViolation(_))
        ));
        assert_eq!(doc.status(), DocumentStatus::Pending);
    }

    #[test]
    fn issue_total_is_positive_value_consumed() {
        let (mut doc, creator) = draft(
            DocumentKind::GoodsIssue,
            vec![DocumentItem::new(ProductId::generate(), dec!(30))],
        );
        doc.submit(creator, test_time()).unwrap();
        doc.approve(test_user(), test_time(), applied_for(&doc, dec!(-360.00)))
            .unwrap();
        assert_eq!(doc.total_amount(), dec!(360.00));
    }

    #[test]
    fn cancel_from_draft_and_pending_only() {
        let (mut d, creator) = draft(DocumentKind::GoodsIssue, vec![]);
        d.cancel(creator, test_time(), "entered twice").unwrap();
        assert_eq!(d.status(), DocumentStatus::Cancelled);
        assert_eq!(d.cancelled().map(|c| c.reason.as_str()), Some("entered twice"));

        let err = d.cancel(creator, test_time(), "again").unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(msg) if msg.contains("already CANCELLED")));

        let (mut p, creator) =
            draft(DocumentKind::GoodsReceipt, vec![receipt_line(dec!(1), dec!(1))]);
        p.submit(creator, test_time()).unwrap();
        p.cancel(creator, test_time(), "supplier recalled").unwrap();
        assert_eq!(p.status(), DocumentStatus::Cancelled);
    }

    #[test]
    fn approved_document_cannot_be_cancelled() {
        let (mut doc, creator) =
            draft(DocumentKind::GoodsReceipt, vec![receipt_line(dec!(1), dec!(1))]);
        doc.submit(creator, test_time()).unwrap();
        doc.approve(test_user(), test_time(), applied_for(&doc, dec!(1))).unwrap();

        let err = doc.cancel(creator, test_time(), "oops").unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(msg) if msg.contains("reverse")));
        assert_eq!(doc.status(), DocumentStatus::Approved);
    }

    #[test]
    fn cancel_requires_reason() {
        let (mut doc, creator) = draft(DocumentKind::GoodsIssue, vec![]);
        assert!(matches!(
            doc.cancel(creator, test_time(), "  "),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn reversal_only_once_and_only_when_approved() {
        let (mut doc, creator) =
            draft(DocumentKind::GoodsReceipt, vec![receipt_line(dec!(1), dec!(1))]);
        assert!(doc.ensure_can_reverse().is_err());

        doc.submit(creator, test_time()).unwrap();
        doc.approve(test_user(), test_time(), applied_for(&doc, dec!(1))).unwrap();
        let ids = doc.applied_movement_ids();
        assert_eq!(ids.len(), 1);

        doc.record_reversal(creator, test_time(), "wrong supplier", vec![MovementId::generate()])
            .unwrap();
        assert_eq!(doc.status(), DocumentStatus::Approved);
        assert!(doc.reversed().is_some());

        assert!(matches!(
            doc.record_reversal(creator, test_time(), "again", vec![]),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn only_drafts_are_deletable() {
        let (mut doc, creator) =
            draft(DocumentKind::GoodsReceipt, vec![receipt_line(dec!(1), dec!(1))]);
        assert!(matches!(
            doc.ensure_deletable(creator, test_time()),
            Ok(DocumentEvent::Deleted(_))
        ));
        doc.submit(creator, test_time()).unwrap();
        assert!(matches!(
            doc.ensure_deletable(creator, test_time()),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn transition_table_is_closed() {
        use DocumentStatus::*;
        let all = [Draft, Pending, Approved, Cancelled];
        let allowed: Vec<_> = all
            .iter()
            .flat_map(|a| all.iter().map(move |b| (*a, *b)))
            .filter(|(a, b)| a.can_transition_to(*b))
            .collect();
        assert_eq!(
            allowed,
            vec![(Draft, Pending), (Draft, Cancelled), (Pending, Approved), (Pending, Cancelled)]
        );
        assert!(Approved.is_terminal() && Cancelled.is_terminal());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: the draft total is the rounded sum of quantity times cost.
        #[test]
        fn draft_total_is_rounded_line_sum(
            lines in prop::collection::vec((1u32..1_000, 0u32..100_000), 1..12)
        ) {
            let items: Vec<_> = lines
                .iter()
                .map(|(qty, mills)| {
                    receipt_line(Decimal::from(*qty), Decimal::new(i64::from(*mills), 3))
                })
                .collect();
            let expected = round2(items.iter().map(|i| i.quantity * i.unit_cost.unwrap()).sum());

            let (doc, _) = draft(DocumentKind::GoodsReceipt, items);
            prop_assert_eq!(doc.total_amount(), expected);
            prop_assert_eq!(doc.status(), DocumentStatus::Draft);
        }
    }
}
