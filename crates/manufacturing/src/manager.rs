//! Multi-stage process costing.
//!
//! `ProcessCostManager` accumulates cost on the stages of a manufacturing
//! order and moves it forward: a completed stage hands its unit cost to the
//! next stage as transferred-in cost, and the terminal stage receives its
//! good output into finished-goods inventory at that unit cost.
//!
//! Like the stock processor it is built per request for one tenant and only
//! returns new snapshots. Callers serialize writes per order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgecost_core::{DomainError, DomainResult, TenantId, ensure_non_negative};
use forgecost_inventory::{
    ProductId, ProductValuation, ReferenceType, StockTransaction, StockTransactionProcessor,
    TransactionResult,
};

use crate::costing::{StageCostResult, calculate_stage_cost};
use crate::order::ManufacturingOrderCosting;
use crate::stage::{
    CostComponents, CostPosting, ManufacturingOrderId, ManufacturingStage, OverheadBasis,
    PostingKind, StageNo, StageStatus, WorkCenterId,
};

/// Where a completed stage's cost went.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// Unit cost recorded as the next stage's previous-stage unit cost.
    TransferredToNextStage { next_stage_no: StageNo, unit_cost: f64 },
    /// Terminal stage output received into finished goods.
    PostedToFinishedGoods {
        finished_goods: ProductValuation,
        receipt: TransactionResult,
    },
}

/// Result of [`ProcessCostManager::process_stage_completion`].
#[derive(Debug, Clone, PartialEq)]
pub struct StageCompletion {
    pub order: ManufacturingOrderCosting,
    pub cost: StageCostResult,
    pub outcome: CompletionOutcome,
}

/// Per-stage line of an order cost summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCostLine {
    pub stage_no: StageNo,
    pub status: StageStatus,
    pub good_qty: f64,
    pub scrap_qty: f64,
    pub added_cost: f64,
    pub total_cost: f64,
    pub unit_cost: f64,
}

/// Cost roll-up of a manufacturing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCostSummary {
    pub mo_id: ManufacturingOrderId,
    pub stages: Vec<StageCostLine>,
    /// Cost added across all stages; transferred-in cost is not double counted.
    pub accumulated_cost: f64,
    /// Unit cost of the terminal stage once it has completed.
    pub finished_goods_unit_cost: Option<f64>,
}

/// Applies cost postings and stage completions to manufacturing orders of one tenant.
#[derive(Debug, Clone, Copy)]
pub struct ProcessCostManager {
    tenant_id: TenantId,
}

impl ProcessCostManager {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn ensure_tenant(&self, order: &ManufacturingOrderCosting) -> DomainResult<()> {
        if order.tenant_id() != self.tenant_id {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    /// Create the stage records of a new order, all in `planning`.
    ///
    /// Stage 10 must be part of the plan since it is where materials enter.
    pub fn start_order(
        &self,
        mo_id: ManufacturingOrderId,
        finished_goods_item: ProductId,
        plan: &[(StageNo, WorkCenterId)],
    ) -> DomainResult<ManufacturingOrderCosting> {
        if plan.is_empty() {
            return Err(DomainError::validation("stage plan cannot be empty"));
        }
        if !plan.iter().any(|(stage_no, _)| stage_no.is_materials_entry()) {
            return Err(DomainError::validation(format!(
                "stage plan must include materials stage {}",
                StageNo::MATERIALS_ENTRY
            )));
        }
        let mut seen: Vec<StageNo> = Vec::with_capacity(plan.len());
        for (stage_no, _) in plan {
            if seen.contains(stage_no) {
                return Err(DomainError::validation(format!(
                    "stage {stage_no} appears more than once in the plan"
                )));
            }
            seen.push(*stage_no);
        }

        let stages = plan
            .iter()
            .map(|(stage_no, work_center_id)| {
                ManufacturingStage::planned(mo_id, *stage_no, *work_center_id)
            })
            .collect();
        let order =
            ManufacturingOrderCosting::new(mo_id, self.tenant_id, finished_goods_item, stages);

        tracing::info!(
            mo_id = %mo_id,
            stages = plan.len(),
            terminal_stage = ?order.terminal_stage_no().map(StageNo::get),
            "manufacturing order costing started"
        );
        Ok(order)
    }

    /// `planning -> in_progress`.
    pub fn start_stage(
        &self,
        order: &ManufacturingOrderCosting,
        stage_no: StageNo,
    ) -> DomainResult<ManufacturingOrderCosting> {
        self.ensure_tenant(order)?;
        let stage = order.stage(stage_no)?.transition(StageStatus::InProgress)?;
        Ok(order.with_stages([stage]))
    }

    /// `completed -> closed`. Closed stages never reopen.
    pub fn close_stage(
        &self,
        order: &ManufacturingOrderCosting,
        stage_no: StageNo,
    ) -> DomainResult<ManufacturingOrderCosting> {
        self.ensure_tenant(order)?;
        let stage = order.stage(stage_no)?.transition(StageStatus::Closed)?;
        Ok(order.with_stages([stage]))
    }

    fn post(
        &self,
        order: &ManufacturingOrderCosting,
        stage_no: StageNo,
        kind: PostingKind,
        occurred_at: DateTime<Utc>,
        apply: impl FnOnce(&CostComponents) -> DomainResult<CostComponents>,
    ) -> DomainResult<ManufacturingOrderCosting> {
        self.ensure_tenant(order)?;
        let stage = order.stage(stage_no)?;
        stage.ensure_accepts_postings()?;

        let costs = apply(stage.costs())?;
        let amount = costs.added_cost() - stage.costs().added_cost();
        let posting = CostPosting {
            kind,
            amount: amount.abs(),
            occurred_at,
        };

        tracing::debug!(
            mo_id = %order.mo_id(),
            stage_no = stage_no.get(),
            posting = ?kind,
            amount = posting.amount,
            "stage cost posted"
        );
        Ok(order.with_stages([stage.with_posting(costs, posting)]))
    }

    /// Add `hours * rate` of direct labor to a stage.
    pub fn apply_labor_cost(
        &self,
        order: &ManufacturingOrderCosting,
        stage_no: StageNo,
        hours: f64,
        rate: f64,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<ManufacturingOrderCosting> {
        self.post(
            order,
            stage_no,
            PostingKind::Labor { hours, rate },
            occurred_at,
            |costs| costs.with_labor(hours, rate),
        )
    }

    /// Add `base_quantity * rate` of overhead absorbed on `basis`.
    pub fn apply_overhead_cost(
        &self,
        order: &ManufacturingOrderCosting,
        stage_no: StageNo,
        base_quantity: f64,
        rate: f64,
        basis: OverheadBasis,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<ManufacturingOrderCosting> {
        self.post(
            order,
            stage_no,
            PostingKind::Overhead {
                basis,
                base_quantity,
                rate,
            },
            occurred_at,
            |costs| costs.with_overhead(base_quantity, rate, basis),
        )
    }

    /// Add direct materials. Only stage 10 accepts them.
    pub fn apply_material_cost(
        &self,
        order: &ManufacturingOrderCosting,
        stage_no: StageNo,
        amount: f64,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<ManufacturingOrderCosting> {
        if !stage_no.is_materials_entry() {
            return Err(DomainError::invalid_transition(format!(
                "stage {stage_no} cannot receive direct materials; only stage {} can",
                StageNo::MATERIALS_ENTRY
            )));
        }
        self.post(order, stage_no, PostingKind::Materials, occurred_at, |costs| {
            costs.with_materials(amount)
        })
    }

    pub fn apply_regrind_cost(
        &self,
        order: &ManufacturingOrderCosting,
        stage_no: StageNo,
        amount: f64,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<ManufacturingOrderCosting> {
        self.post(order, stage_no, PostingKind::Regrind, occurred_at, |costs| {
            costs.with_regrind(amount)
        })
    }

    /// Credit recovered scrap value against a stage.
    pub fn apply_waste_credit(
        &self,
        order: &ManufacturingOrderCosting,
        stage_no: StageNo,
        amount: f64,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<ManufacturingOrderCosting> {
        self.post(order, stage_no, PostingKind::WasteCredit, occurred_at, |costs| {
            costs.with_waste_credit(amount)
        })
    }

    /// Record units sent back for rework. Informational; unit cost is unaffected.
    pub fn record_rework(
        &self,
        order: &ManufacturingOrderCosting,
        stage_no: StageNo,
        quantity: f64,
    ) -> DomainResult<ManufacturingOrderCosting> {
        self.ensure_tenant(order)?;
        ensure_non_negative("rework_qty", quantity)?;
        let stage = order.stage(stage_no)?;
        stage.ensure_accepts_postings()?;
        Ok(order.with_stages([stage.with_rework(quantity)]))
    }

    /// Cost a stage with its final quantities and mark it completed.
    ///
    /// For the terminal stage `finished_goods` must be the snapshot of the
    /// order's finished-goods item; its good output is received at the stage's
    /// unit cost. For other stages the unit cost is recorded on the next stage.
    pub fn process_stage_completion(
        &self,
        order: &ManufacturingOrderCosting,
        stage_no: StageNo,
        completed_qty: f64,
        scrap_qty: f64,
        finished_goods: Option<&ProductValuation>,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<StageCompletion> {
        self.ensure_tenant(order)?;
        let stage = order.stage(stage_no)?;
        if stage.status() != StageStatus::InProgress {
            return Err(DomainError::invalid_transition(format!(
                "stage {stage_no} of order {} is {:?}; only an in-progress stage can complete",
                order.mo_id(),
                stage.status()
            )));
        }
        if let Some(previous) = order.previous_stage_before(stage_no) {
            if !matches!(previous.status(), StageStatus::Completed | StageStatus::Closed) {
                return Err(DomainError::invalid_transition(format!(
                    "stage {stage_no} of order {} cannot complete while stage {} is {:?}",
                    order.mo_id(),
                    previous.stage_no(),
                    previous.status()
                )));
            }
        }

        let cost = calculate_stage_cost(
            stage_no,
            completed_qty,
            scrap_qty,
            stage.costs(),
            stage.previous_stage_unit_cost(),
        )?;
        let completed = stage.transition(StageStatus::Completed)?.with_completion(&cost);

        if order.is_terminal(stage_no) {
            let (finished_goods, receipt) =
                self.receive_finished_goods(order, finished_goods, &cost, occurred_at)?;
            tracing::info!(
                mo_id = %order.mo_id(),
                stage_no = stage_no.get(),
                good_qty = cost.good_qty,
                unit_cost = cost.unit_cost,
                finished_goods_item = %order.finished_goods_item(),
                "terminal stage completed; output received into finished goods"
            );
            return Ok(StageCompletion {
                order: order.with_stages([completed]),
                cost,
                outcome: CompletionOutcome::PostedToFinishedGoods {
                    finished_goods,
                    receipt,
                },
            });
        }

        let next = order
            .next_stage_after(stage_no)
            .ok_or_else(|| DomainError::invariant("non-terminal stage without a successor"))?;
        if !next.status().accepts_postings() {
            return Err(DomainError::invalid_transition(format!(
                "stage {} of order {} is {:?} and can no longer take transferred-in cost",
                next.stage_no(),
                order.mo_id(),
                next.status()
            )));
        }
        let next_stage_no = next.stage_no();
        let next = next.with_previous_stage_unit_cost(cost.unit_cost);

        tracing::info!(
            mo_id = %order.mo_id(),
            stage_no = stage_no.get(),
            next_stage_no = next_stage_no.get(),
            total_cost = cost.total_cost,
            unit_cost = cost.unit_cost,
            "stage completed; unit cost transferred"
        );
        Ok(StageCompletion {
            order: order.with_stages([completed, next]),
            cost,
            outcome: CompletionOutcome::TransferredToNextStage {
                next_stage_no,
                unit_cost: cost.unit_cost,
            },
        })
    }

    fn receive_finished_goods(
        &self,
        order: &ManufacturingOrderCosting,
        finished_goods: Option<&ProductValuation>,
        cost: &StageCostResult,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<(ProductValuation, TransactionResult)> {
        let finished_goods = finished_goods.ok_or_else(|| {
            DomainError::validation(format!(
                "terminal stage of order {} needs the finished-goods snapshot",
                order.mo_id()
            ))
        })?;
        if finished_goods.product_id() != order.finished_goods_item() {
            return Err(DomainError::validation(format!(
                "order {} produces {} but snapshot is {}",
                order.mo_id(),
                order.finished_goods_item(),
                finished_goods.product_id()
            )));
        }
        if cost.good_qty <= 0.0 {
            return Err(DomainError::validation(
                "terminal stage must complete a positive good quantity",
            ));
        }

        let receipt = StockTransaction::incoming(
            order.finished_goods_item(),
            cost.good_qty,
            cost.unit_cost,
            ReferenceType::ProductionReceipt,
            order.mo_id().to_string(),
            occurred_at,
        );
        StockTransactionProcessor::new(self.tenant_id).process(finished_goods, &receipt)
    }

    /// Roll up stage costs of an order.
    pub fn cost_summary(
        &self,
        order: &ManufacturingOrderCosting,
    ) -> DomainResult<OrderCostSummary> {
        self.ensure_tenant(order)?;
        let stages: Vec<StageCostLine> = order
            .stages()
            .iter()
            .map(|s| StageCostLine {
                stage_no: s.stage_no(),
                status: s.status(),
                good_qty: s.good_qty(),
                scrap_qty: s.scrap_qty(),
                added_cost: s.costs().added_cost(),
                total_cost: s.total_cost(),
                unit_cost: s.unit_cost(),
            })
            .collect();

        let finished_goods_unit_cost = order
            .terminal_stage_no()
            .and_then(|n| order.stage(n).ok())
            .filter(|s| matches!(s.status(), StageStatus::Completed | StageStatus::Closed))
            .map(ManufacturingStage::unit_cost);

        Ok(OrderCostSummary {
            mo_id: order.mo_id(),
            accumulated_cost: stages.iter().map(|l| l.added_cost).sum(),
            stages,
            finished_goods_unit_cost,
        })
    }
}
