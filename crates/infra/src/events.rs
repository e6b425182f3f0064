//! Domain events published after a successful commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use stockflow_core::AggregateRoot;
use stockflow_documents::{Document, DocumentEvent};
use stockflow_events::{Event, EventBus, EventEnvelope};
use stockflow_inventory::{InventoryEvent, MovementRecorded, StockMovement};

pub const PRODUCT_AGGREGATE: &str = "inventory.product";
pub const DOCUMENT_AGGREGATE: &str = "documents.document";

/// Everything the ledger and workflow publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockflowEvent {
    Inventory(InventoryEvent),
    Document(DocumentEvent),
}

impl Event for StockflowEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockflowEvent::Inventory(e) => e.event_type(),
            StockflowEvent::Document(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        match self {
            StockflowEvent::Inventory(e) => e.version(),
            StockflowEvent::Document(e) => e.version(),
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockflowEvent::Inventory(e) => e.occurred_at(),
            StockflowEvent::Document(e) => e.occurred_at(),
        }
    }
}

pub type StockflowEnvelope = EventEnvelope<StockflowEvent>;

pub(crate) fn movement_envelope(movement: &StockMovement) -> StockflowEnvelope {
    EventEnvelope::new(
        movement.company_id,
        movement.product_id.0,
        PRODUCT_AGGREGATE,
        movement.product_version,
        StockflowEvent::Inventory(InventoryEvent::MovementRecorded(MovementRecorded {
            movement: movement.clone(),
        })),
    )
}

pub(crate) fn document_envelope(document: &Document, event: DocumentEvent) -> StockflowEnvelope {
    EventEnvelope::new(
        document.company_id(),
        document.id_typed().0,
        DOCUMENT_AGGREGATE,
        document.version(),
        StockflowEvent::Document(event),
    )
}

/// Publish committed events. The commit already happened, so a failed publish
/// is logged and the remaining events are still attempted.
pub(crate) fn publish_all<B>(bus: &B, envelopes: Vec<StockflowEnvelope>)
where
    B: EventBus<StockflowEnvelope>,
{
    for envelope in envelopes {
        let event_type = envelope.payload().event_type();
        let event_id = envelope.event_id();
        if let Err(err) = bus.publish(envelope) {
            warn!(%event_id, event_type, error = ?err, "failed to publish committed event");
        }
    }
}
