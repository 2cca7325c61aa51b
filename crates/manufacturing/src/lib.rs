//! Multi-stage process costing.
//!
//! Manufacturing orders move through fixed production stages (10, 20, 30,
//! 40, 50). Each stage accumulates its own cost, hands its unit cost to the
//! next stage as transferred-in cost, and the last stage receives its output
//! into finished-goods inventory.

pub mod costing;
pub mod manager;
pub mod order;
pub mod stage;

pub use costing::{StageCostResult, calculate_stage_cost, labor_cost, overhead_cost};
pub use manager::{
    CompletionOutcome, OrderCostSummary, ProcessCostManager, StageCompletion, StageCostLine,
};
pub use order::ManufacturingOrderCosting;
pub use stage::{
    CostComponents, CostPosting, ManufacturingOrderId, ManufacturingStage, OverheadBasis,
    PostingKind, StageNo, StageStatus, WorkCenterId,
};
