use serde::{Deserialize, Serialize};

use forgecost_core::{AggregateRoot, DomainError, DomainResult, TenantId};
use forgecost_inventory::ProductId;

use crate::stage::{ManufacturingOrderId, ManufacturingStage, StageNo, StageStatus};

/// Costing snapshot of one manufacturing order: its stage records, in
/// ascending stage order, and the finished-goods item the terminal stage
/// feeds.
///
/// This is the unit of serialization: all postings against any
/// `(mo_id, stage_no)` of the order go through one versioned snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManufacturingOrderCosting {
    mo_id: ManufacturingOrderId,
    tenant_id: TenantId,
    finished_goods_item: ProductId,
    stages: Vec<ManufacturingStage>,
    version: u64,
}

impl ManufacturingOrderCosting {
    pub(crate) fn new(
        mo_id: ManufacturingOrderId,
        tenant_id: TenantId,
        finished_goods_item: ProductId,
        mut stages: Vec<ManufacturingStage>,
    ) -> Self {
        stages.sort_by_key(ManufacturingStage::stage_no);
        Self {
            mo_id,
            tenant_id,
            finished_goods_item,
            stages,
            version: 1,
        }
    }

    pub fn mo_id(&self) -> ManufacturingOrderId {
        self.mo_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn finished_goods_item(&self) -> ProductId {
        self.finished_goods_item
    }

    pub fn stages(&self) -> &[ManufacturingStage] {
        &self.stages
    }

    pub fn stage(&self, stage_no: StageNo) -> DomainResult<&ManufacturingStage> {
        self.stages
            .iter()
            .find(|s| s.stage_no() == stage_no)
            .ok_or_else(|| DomainError::stage_not_found(self.mo_id.0, stage_no.get()))
    }

    /// Highest stage of the order; its output goes to finished goods.
    pub fn terminal_stage_no(&self) -> Option<StageNo> {
        self.stages.last().map(ManufacturingStage::stage_no)
    }

    pub fn is_terminal(&self, stage_no: StageNo) -> bool {
        self.terminal_stage_no() == Some(stage_no)
    }

    /// The stage that receives `stage_no`'s output.
    pub fn next_stage_after(&self, stage_no: StageNo) -> Option<&ManufacturingStage> {
        self.stages.iter().find(|s| s.stage_no() > stage_no)
    }

    /// The stage whose output feeds `stage_no`.
    pub fn previous_stage_before(&self, stage_no: StageNo) -> Option<&ManufacturingStage> {
        self.stages.iter().rev().find(|s| s.stage_no() < stage_no)
    }

    pub fn is_finished(&self) -> bool {
        self.stages
            .iter()
            .all(|s| matches!(s.status(), StageStatus::Completed | StageStatus::Closed))
    }

    /// Replace stage records and bump the version.
    pub(crate) fn with_stages(
        &self,
        updated: impl IntoIterator<Item = ManufacturingStage>,
    ) -> Self {
        let mut next = self.clone();
        for stage in updated {
            if let Some(slot) = next.stages.iter_mut().find(|s| s.stage_no() == stage.stage_no()) {
                *slot = stage;
            }
        }
        next.version += 1;
        next
    }
}

impl AggregateRoot for ManufacturingOrderCosting {
    type Id = ManufacturingOrderId;

    fn id(&self) -> &Self::Id {
        &self.mo_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
