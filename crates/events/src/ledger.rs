use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use forgecost_core::{AggregateId, TenantId};

use crate::event::Event;

/// Immutable ledger record: an event plus tenant and stream metadata.
///
/// `sequence_number` is assigned by the store and is strictly increasing per
/// `(tenant_id, aggregate_id)` stream, starting at 1. `recorded_at` is storage
/// time; business time lives on the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry<E> {
    entry_id: Uuid,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    event_type: String,
    event_version: u32,
    sequence_number: u64,
    recorded_at: DateTime<Utc>,
    payload: E,
}

impl<E: Event> LedgerEntry<E> {
    /// Wrap `payload` for the given tenant at a store-assigned position.
    pub fn record(
        tenant_id: TenantId,
        sequence_number: u64,
        recorded_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            entry_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id: payload.aggregate_id(),
            event_type: payload.event_type().to_string(),
            event_version: payload.version(),
            sequence_number,
            recorded_at,
            payload,
        }
    }
}

impl<E> LedgerEntry<E> {
    pub fn entry_id(&self) -> Uuid {
        self.entry_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
