use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgecost_core::{AggregateId, DomainError, DomainResult, ValueObject};

use crate::costing::StageCostResult;

/// Manufacturing order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManufacturingOrderId(pub AggregateId);

impl ManufacturingOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ManufacturingOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Work center identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkCenterId(pub AggregateId);

impl WorkCenterId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

/// Production stage number. Only 10, 20, 30, 40 and 50 exist.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct StageNo(u16);

impl StageNo {
    /// The only stage that accepts direct materials.
    pub const MATERIALS_ENTRY: StageNo = StageNo(10);
    /// Regrind / rework loop.
    pub const REGRIND: StageNo = StageNo(50);

    pub const DEFINED: [u16; 5] = [10, 20, 30, 40, 50];

    pub fn new(value: u16) -> DomainResult<Self> {
        if Self::DEFINED.contains(&value) {
            Ok(Self(value))
        } else {
            Err(DomainError::validation(format!(
                "unknown stage number {value} (expected one of 10, 20, 30, 40, 50)"
            )))
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn is_materials_entry(self) -> bool {
        self == Self::MATERIALS_ENTRY
    }
}

impl TryFrom<u16> for StageNo {
    type Error = DomainError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StageNo> for u16 {
    fn from(value: StageNo) -> Self {
        value.0
    }
}

impl core::fmt::Display for StageNo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stage lifecycle: `planning -> in_progress -> completed -> closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Planning,
    InProgress,
    Completed,
    Closed,
}

impl StageStatus {
    /// The only status this one may move to; `None` once closed.
    pub fn next(self) -> Option<StageStatus> {
        match self {
            StageStatus::Planning => Some(StageStatus::InProgress),
            StageStatus::InProgress => Some(StageStatus::Completed),
            StageStatus::Completed => Some(StageStatus::Closed),
            StageStatus::Closed => None,
        }
    }

    /// Cost postings are only accepted before completion.
    pub fn accepts_postings(self) -> bool {
        matches!(self, StageStatus::Planning | StageStatus::InProgress)
    }
}

/// Cost buckets accumulated on a stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostComponents {
    pub transferred_in: f64,
    pub direct_materials: f64,
    pub direct_labor: f64,
    pub manufacturing_overhead: f64,
    pub regrind_processing: f64,
    pub waste_credit: f64,
}

impl ValueObject for CostComponents {}

impl CostComponents {
    /// Cost added by the stage itself, excluding what was transferred in.
    pub fn added_cost(&self) -> f64 {
        self.direct_materials + self.direct_labor + self.manufacturing_overhead
            + self.regrind_processing
            - self.waste_credit
    }

    pub fn total(&self) -> f64 {
        self.transferred_in + self.added_cost()
    }
}

/// Basis an overhead rate is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverheadBasis {
    LaborHours,
    MachineHours,
    /// `base_quantity` is a labor amount and `rate` a fraction of it.
    LaborCost,
    UnitsProduced,
}

/// What a cost posting was for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostingKind {
    Labor { hours: f64, rate: f64 },
    Overhead { basis: OverheadBasis, base_quantity: f64, rate: f64 },
    Materials,
    Regrind,
    WasteCredit,
}

/// One additive posting onto a stage, kept for traceability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostPosting {
    pub kind: PostingKind,
    pub amount: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Cost record of one production stage of a manufacturing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManufacturingStage {
    mo_id: ManufacturingOrderId,
    stage_no: StageNo,
    work_center_id: WorkCenterId,
    good_qty: f64,
    scrap_qty: f64,
    rework_qty: f64,
    costs: CostComponents,
    total_cost: f64,
    unit_cost: f64,
    previous_stage_unit_cost: Option<f64>,
    status: StageStatus,
    postings: Vec<CostPosting>,
}

impl ManufacturingStage {
    pub fn planned(
        mo_id: ManufacturingOrderId,
        stage_no: StageNo,
        work_center_id: WorkCenterId,
    ) -> Self {
        Self {
            mo_id,
            stage_no,
            work_center_id,
            good_qty: 0.0,
            scrap_qty: 0.0,
            rework_qty: 0.0,
            costs: CostComponents::default(),
            total_cost: 0.0,
            unit_cost: 0.0,
            previous_stage_unit_cost: None,
            status: StageStatus::Planning,
            postings: Vec::new(),
        }
    }

    pub fn mo_id(&self) -> ManufacturingOrderId {
        self.mo_id
    }

    pub fn stage_no(&self) -> StageNo {
        self.stage_no
    }

    pub fn work_center_id(&self) -> WorkCenterId {
        self.work_center_id
    }

    pub fn good_qty(&self) -> f64 {
        self.good_qty
    }

    pub fn scrap_qty(&self) -> f64 {
        self.scrap_qty
    }

    pub fn rework_qty(&self) -> f64 {
        self.rework_qty
    }

    pub fn costs(&self) -> &CostComponents {
        &self.costs
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn unit_cost(&self) -> f64 {
        self.unit_cost
    }

    pub fn previous_stage_unit_cost(&self) -> Option<f64> {
        self.previous_stage_unit_cost
    }

    pub fn status(&self) -> StageStatus {
        self.status
    }

    pub fn postings(&self) -> &[CostPosting] {
        &self.postings
    }

    /// Move to `target`, which must be the next status in the lifecycle.
    pub(crate) fn transition(&self, target: StageStatus) -> DomainResult<Self> {
        if self.status.next() != Some(target) {
            return Err(DomainError::invalid_transition(format!(
                "stage {} of order {} cannot move from {:?} to {:?}",
                self.stage_no, self.mo_id, self.status, target
            )));
        }
        let mut next = self.clone();
        next.status = target;
        Ok(next)
    }

    pub(crate) fn ensure_accepts_postings(&self) -> DomainResult<()> {
        if !self.status.accepts_postings() {
            return Err(DomainError::invalid_transition(format!(
                "stage {} of order {} is {:?} and no longer accepts cost postings",
                self.stage_no, self.mo_id, self.status
            )));
        }
        Ok(())
    }

    pub(crate) fn with_posting(&self, costs: CostComponents, posting: CostPosting) -> Self {
        let mut next = self.clone();
        next.costs = costs;
        next.postings.push(posting);
        next
    }

    pub(crate) fn with_rework(&self, rework_qty: f64) -> Self {
        let mut next = self.clone();
        next.rework_qty += rework_qty;
        next
    }

    pub(crate) fn with_previous_stage_unit_cost(&self, unit_cost: f64) -> Self {
        let mut next = self.clone();
        next.previous_stage_unit_cost = Some(unit_cost);
        next
    }

    pub(crate) fn with_completion(&self, result: &StageCostResult) -> Self {
        let mut next = self.clone();
        next.good_qty = result.good_qty;
        next.scrap_qty = result.scrap_qty;
        next.costs = result.costs;
        next.total_cost = result.total_cost;
        next.unit_cost = result.unit_cost;
        next
    }
}
