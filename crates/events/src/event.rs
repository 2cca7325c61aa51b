use chrono::{DateTime, Utc};

use forgecost_core::AggregateId;

/// A recorded fact about an aggregate.
///
/// Events are immutable and versioned; the ledger only ever appends them.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "inventory.stock.movement_recorded").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Aggregate whose stream this event belongs to.
    fn aggregate_id(&self) -> AggregateId;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
