use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{AggregateId, CompanyId};

/// Envelope for a committed event, carrying company + aggregate metadata.
///
/// `aggregate_version` is the version the aggregate reached with the commit
/// that produced this event, so consumers can detect gaps and duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    company_id: CompanyId,

    aggregate_id: AggregateId,
    aggregate_type: String,
    aggregate_version: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        company_id: CompanyId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        aggregate_version: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            company_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            aggregate_version,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_version(&self) -> u64 {
        self.aggregate_version
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
