//! Inventory valuation domain module.
//!
//! Pure, deterministic costing logic (no IO, no storage): product valuation
//! snapshots, the four valuation strategies, batch-queue reconciliation, and
//! the stock transaction processor that ties them together.

pub mod movement;
pub mod processor;
pub mod product;
pub mod queue;
pub mod report;
pub mod valuation;

pub use movement::{Direction, ReferenceType, StockMovement, StockTransaction};
pub use processor::{
    BatchFailure, BatchOutcome, IrreversibleConversion, StockTransactionProcessor,
    TransactionResult,
};
pub use product::{Batch, ProductId, ProductValuation, StoredValuation, ValuationMethod};
pub use queue::{BatchQueueInvariant, QUEUE_TOLERANCE};
pub use report::{ValuationLine, ValuationReport, round_currency};
pub use valuation::{
    FifoStrategy, LifoStrategy, MovingAverageStrategy, OutgoingValuation, ValuationStrategy,
    WeightedAverageStrategy,
};
