//! Costing service: loads snapshots, runs the engine, commits the results.
//!
//! ```text
//! request
//!   -> load snapshot(s) through the gateway (tenant-scoped)
//!   -> optional queue repair (config.auto_repair_queues)
//!   -> StockTransactionProcessor / ProcessCostManager (pure)
//!   -> commit one ChangeSet, version-checked against what was loaded
//!   -> on Concurrency: reload and run again, up to max_conflict_retries
//! ```
//!
//! Domain errors are deterministic and never retried.

use chrono::{DateTime, Utc};
use thiserror::Error;

use forgecost_core::{AggregateId, AggregateRoot, DomainError, TenantId};
use forgecost_events::LedgerEntry;
use forgecost_inventory::{
    BatchOutcome, BatchQueueInvariant, Direction, IrreversibleConversion, ProductId,
    ProductValuation, StockMovement, StockTransaction, StockTransactionProcessor,
    TransactionResult, ValuationMethod, ValuationReport,
};
use forgecost_manufacturing::{
    CompletionOutcome, ManufacturingOrderCosting, ManufacturingOrderId, OrderCostSummary,
    OverheadBasis, ProcessCostManager, StageCompletion, StageNo, WorkCenterId,
};

use crate::config::CostingConfig;
use crate::gateway::{ChangeSet, GatewayError, LedgerGateway};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("insufficient inventory for item {item_id}: required {required}, available {available}")]
    InsufficientInventory {
        item_id: AggregateId,
        required: f64,
        available: f64,
    },

    #[error("batch queue integrity violated: {0}")]
    QueueIntegrity(String),

    #[error("stage {stage_no} not found for manufacturing order {mo_id}")]
    StageNotFound { mo_id: AggregateId, stage_no: u16 },

    #[error("invalid stage transition: {0}")]
    InvalidStageTransition(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Stale snapshot; retried internally before it reaches the caller.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error(transparent)]
    Gateway(GatewayError),
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => ServiceError::Validation(msg),
            DomainError::InvalidId(msg) => ServiceError::Validation(msg),
            DomainError::InvariantViolation(msg) => ServiceError::InvariantViolation(msg),
            DomainError::InsufficientInventory {
                item_id,
                required,
                available,
            } => ServiceError::InsufficientInventory {
                item_id,
                required,
                available,
            },
            DomainError::QueueIntegrity(msg) => ServiceError::QueueIntegrity(msg),
            DomainError::StageNotFound { mo_id, stage_no } => {
                ServiceError::StageNotFound { mo_id, stage_no }
            }
            DomainError::InvalidStageTransition(msg) => ServiceError::InvalidStageTransition(msg),
            DomainError::NotFound => ServiceError::NotFound("snapshot".to_string()),
            DomainError::Conflict(msg) => ServiceError::Concurrency(msg),
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(value: GatewayError) -> Self {
        match value {
            GatewayError::Concurrency(msg) => ServiceError::Concurrency(msg),
            GatewayError::TenantIsolation(msg) => ServiceError::TenantIsolation(msg),
            other => ServiceError::Gateway(other),
        }
    }
}

/// A snapshot together with the version it was stored at.
#[derive(Debug, Clone)]
struct Loaded<T> {
    snapshot: T,
    stored_version: u64,
}

/// Application-level orchestration of the costing engine over a gateway.
#[derive(Debug)]
pub struct CostingService<G> {
    gateway: G,
    config: CostingConfig,
}

impl<G> CostingService<G> {
    pub fn new(gateway: G, config: CostingConfig) -> Self {
        Self { gateway, config }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn config(&self) -> &CostingConfig {
        &self.config
    }
}

impl<G: LedgerGateway> CostingService<G> {
    fn with_retries<T>(
        &self,
        operation: &'static str,
        mut attempt: impl FnMut() -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut retries = 0u32;
        loop {
            match attempt() {
                Err(ServiceError::Concurrency(msg))
                    if retries < self.config.max_conflict_retries =>
                {
                    retries += 1;
                    tracing::debug!(
                        operation,
                        retries,
                        conflict = %msg,
                        "reloading after conflict"
                    );
                }
                other => return other,
            }
        }
    }

    fn load_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Loaded<ProductValuation>, ServiceError> {
        let stored = self
            .gateway
            .load_product(tenant_id, product_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("product {product_id}")))?;
        if stored.tenant_id() != tenant_id {
            return Err(ServiceError::TenantIsolation(format!(
                "gateway returned product {product_id} of another tenant"
            )));
        }
        let stored_version = stored.version();

        if self.config.auto_repair_queues {
            if let Err(problem) = BatchQueueInvariant::check(&stored) {
                let repaired = BatchQueueInvariant::repair(&stored);
                tracing::warn!(
                    target: "data_integrity",
                    tenant_id = %tenant_id,
                    product_id = %product_id,
                    problem = %problem,
                    lots_discarded = stored.batch_queue().len(),
                    quantity = repaired.quantity(),
                    total_value = repaired.total_value(),
                    "batch queue repaired on load; lot history discarded"
                );
                return Ok(Loaded {
                    snapshot: repaired,
                    stored_version,
                });
            }
        }

        Ok(Loaded {
            snapshot: stored,
            stored_version,
        })
    }

    fn load_order(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
    ) -> Result<Loaded<ManufacturingOrderCosting>, ServiceError> {
        let stored = self
            .gateway
            .load_order(tenant_id, mo_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("manufacturing order {mo_id}")))?;
        if stored.tenant_id() != tenant_id {
            return Err(ServiceError::TenantIsolation(format!(
                "gateway returned order {mo_id} of another tenant"
            )));
        }
        Ok(Loaded {
            stored_version: stored.version(),
            snapshot: stored,
        })
    }

    // ---- inventory ----

    /// Register a product with no stock. `method` falls back to the configured default.
    pub fn register_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        method: Option<ValuationMethod>,
    ) -> Result<ProductValuation, ServiceError> {
        let method = method.unwrap_or(self.config.default_valuation_method);
        let product = ProductValuation::new(product_id, tenant_id, method);
        self.gateway
            .commit(tenant_id, ChangeSet::new().create_product(product.clone()))?;
        tracing::info!(
            tenant_id = %tenant_id,
            product_id = %product_id,
            method = %method,
            "product registered"
        );
        Ok(product)
    }

    pub fn product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<ProductValuation, ServiceError> {
        Ok(self.load_product(tenant_id, product_id)?.snapshot)
    }

    /// Apply one stock transaction and record its movement.
    pub fn apply_transaction(
        &self,
        tenant_id: TenantId,
        transaction: &StockTransaction,
    ) -> Result<TransactionResult, ServiceError> {
        let processor = StockTransactionProcessor::new(tenant_id);
        self.with_retries("apply_transaction", || {
            let loaded = self.load_product(tenant_id, transaction.product_id)?;
            let (next, result) = processor.process(&loaded.snapshot, transaction)?;
            self.gateway.commit(
                tenant_id,
                ChangeSet::new()
                    .update_product(next, loaded.stored_version)
                    .record_movements([result.movement()]),
            )?;
            Ok(result)
        })
    }

    /// Apply transactions for one product in order, stopping at the first failure.
    ///
    /// Everything before the failure is committed; the failure is reported in
    /// the outcome rather than as an error.
    pub fn process_transactions(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        transactions: &[StockTransaction],
    ) -> Result<BatchOutcome, ServiceError> {
        let processor = StockTransactionProcessor::new(tenant_id);
        self.with_retries("process_transactions", || {
            let loaded = self.load_product(tenant_id, product_id)?;
            let outcome = processor.process_batch(&loaded.snapshot, transactions);
            if !outcome.results.is_empty() {
                self.gateway.commit(
                    tenant_id,
                    ChangeSet::new()
                        .update_product(outcome.product.clone(), loaded.stored_version)
                        .record_movements(outcome.results.iter().map(TransactionResult::movement)),
                )?;
            }
            Ok(outcome)
        })
    }

    /// Change a product's valuation method. Lot history is discarded.
    pub fn convert_valuation_method(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        new_method: ValuationMethod,
    ) -> Result<IrreversibleConversion, ServiceError> {
        let processor = StockTransactionProcessor::new(tenant_id);
        self.with_retries("convert_valuation_method", || {
            let loaded = self.load_product(tenant_id, product_id)?;
            let conversion = processor.convert_valuation_method(&loaded.snapshot, new_method)?;
            self.gateway.commit(
                tenant_id,
                ChangeSet::new().update_product(conversion.product.clone(), loaded.stored_version),
            )?;
            Ok(conversion)
        })
    }

    /// Repair a product whose queue no longer reconciles; no-op when it does.
    pub fn repair_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<ProductValuation, ServiceError> {
        self.with_retries("repair_product", || {
            let stored = self
                .gateway
                .load_product(tenant_id, product_id)?
                .ok_or_else(|| ServiceError::NotFound(format!("product {product_id}")))?;
            if BatchQueueInvariant::validate(&stored) {
                return Ok(stored);
            }
            let repaired = BatchQueueInvariant::repair(&stored);
            self.gateway.commit(
                tenant_id,
                ChangeSet::new().update_product(repaired.clone(), stored.version()),
            )?;
            tracing::warn!(
                target: "data_integrity",
                tenant_id = %tenant_id,
                product_id = %product_id,
                lots_discarded = stored.batch_queue().len(),
                "batch queue repaired on request; lot history discarded"
            );
            Ok(repaired)
        })
    }

    pub fn movements(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Vec<LedgerEntry<StockMovement>>, ServiceError> {
        Ok(self.gateway.movements(tenant_id, product_id)?)
    }

    /// Valuation of every product of the tenant.
    pub fn valuation_report(&self, tenant_id: TenantId) -> Result<ValuationReport, ServiceError> {
        let products = self.gateway.list_products(tenant_id)?;
        Ok(ValuationReport::build(products.iter()))
    }

    // ---- manufacturing ----

    /// Create the costing record of an order. The finished-goods item must be registered.
    pub fn start_order(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
        finished_goods_item: ProductId,
        plan: &[(StageNo, WorkCenterId)],
    ) -> Result<ManufacturingOrderCosting, ServiceError> {
        self.load_product(tenant_id, finished_goods_item)?;
        let order =
            ProcessCostManager::new(tenant_id).start_order(mo_id, finished_goods_item, plan)?;
        self.gateway
            .commit(tenant_id, ChangeSet::new().create_order(order.clone()))?;
        Ok(order)
    }

    pub fn order(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
    ) -> Result<ManufacturingOrderCosting, ServiceError> {
        Ok(self.load_order(tenant_id, mo_id)?.snapshot)
    }

    fn update_order(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
        operation: &'static str,
        change: impl Fn(
            &ProcessCostManager,
            &ManufacturingOrderCosting,
        ) -> Result<ManufacturingOrderCosting, DomainError>,
    ) -> Result<ManufacturingOrderCosting, ServiceError> {
        let manager = ProcessCostManager::new(tenant_id);
        self.with_retries(operation, || {
            let loaded = self.load_order(tenant_id, mo_id)?;
            let next = change(&manager, &loaded.snapshot)?;
            self.gateway.commit(
                tenant_id,
                ChangeSet::new().update_order(next.clone(), loaded.stored_version),
            )?;
            Ok(next)
        })
    }

    pub fn start_stage(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
        stage_no: StageNo,
    ) -> Result<ManufacturingOrderCosting, ServiceError> {
        self.update_order(tenant_id, mo_id, "start_stage", |m, o| m.start_stage(o, stage_no))
    }

    pub fn close_stage(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
        stage_no: StageNo,
    ) -> Result<ManufacturingOrderCosting, ServiceError> {
        self.update_order(tenant_id, mo_id, "close_stage", |m, o| m.close_stage(o, stage_no))
    }

    pub fn apply_labor_cost(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
        stage_no: StageNo,
        hours: f64,
        rate: f64,
        occurred_at: DateTime<Utc>,
    ) -> Result<ManufacturingOrderCosting, ServiceError> {
        self.update_order(tenant_id, mo_id, "apply_labor_cost", |m, o| {
            m.apply_labor_cost(o, stage_no, hours, rate, occurred_at)
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn apply_overhead_cost(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
        stage_no: StageNo,
        base_quantity: f64,
        rate: f64,
        basis: OverheadBasis,
        occurred_at: DateTime<Utc>,
    ) -> Result<ManufacturingOrderCosting, ServiceError> {
        self.update_order(tenant_id, mo_id, "apply_overhead_cost", |m, o| {
            m.apply_overhead_cost(o, stage_no, base_quantity, rate, basis, occurred_at)
        })
    }

    /// Post a direct material amount that did not come from a stock issue.
    pub fn apply_material_cost(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
        stage_no: StageNo,
        amount: f64,
        occurred_at: DateTime<Utc>,
    ) -> Result<ManufacturingOrderCosting, ServiceError> {
        self.update_order(tenant_id, mo_id, "apply_material_cost", |m, o| {
            m.apply_material_cost(o, stage_no, amount, occurred_at)
        })
    }

    pub fn apply_regrind_cost(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
        stage_no: StageNo,
        amount: f64,
        occurred_at: DateTime<Utc>,
    ) -> Result<ManufacturingOrderCosting, ServiceError> {
        self.update_order(tenant_id, mo_id, "apply_regrind_cost", |m, o| {
            m.apply_regrind_cost(o, stage_no, amount, occurred_at)
        })
    }

    pub fn apply_waste_credit(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
        stage_no: StageNo,
        amount: f64,
        occurred_at: DateTime<Utc>,
    ) -> Result<ManufacturingOrderCosting, ServiceError> {
        self.update_order(tenant_id, mo_id, "apply_waste_credit", |m, o| {
            m.apply_waste_credit(o, stage_no, amount, occurred_at)
        })
    }

    pub fn record_rework(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
        stage_no: StageNo,
        quantity: f64,
    ) -> Result<ManufacturingOrderCosting, ServiceError> {
        self.update_order(tenant_id, mo_id, "record_rework", |m, o| {
            m.record_rework(o, stage_no, quantity)
        })
    }

    /// Issue raw material from stock into the order's materials stage.
    ///
    /// The stock issue and the direct-material posting (at the issue's cost
    /// of goods sold) are committed together.
    pub fn issue_materials(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
        transaction: &StockTransaction,
    ) -> Result<TransactionResult, ServiceError> {
        if transaction.direction != Direction::Out {
            return Err(ServiceError::Validation(
                "material issue must be an outgoing transaction".to_string(),
            ));
        }
        let processor = StockTransactionProcessor::new(tenant_id);
        let manager = ProcessCostManager::new(tenant_id);

        self.with_retries("issue_materials", || {
            let order = self.load_order(tenant_id, mo_id)?;
            let material = self.load_product(tenant_id, transaction.product_id)?;

            let (product, result) = processor.process(&material.snapshot, transaction)?;
            let next_order = manager.apply_material_cost(
                &order.snapshot,
                StageNo::MATERIALS_ENTRY,
                result.cost_of_goods_sold,
                transaction.occurred_at,
            )?;

            self.gateway.commit(
                tenant_id,
                ChangeSet::new()
                    .update_product(product, material.stored_version)
                    .update_order(next_order, order.stored_version)
                    .record_movements([result.movement()]),
            )?;
            Ok(result)
        })
    }

    /// Complete a stage. For the terminal stage the finished-goods receipt
    /// is committed in the same change set as the order.
    pub fn complete_stage(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
        stage_no: StageNo,
        completed_qty: f64,
        scrap_qty: f64,
        occurred_at: DateTime<Utc>,
    ) -> Result<StageCompletion, ServiceError> {
        let manager = ProcessCostManager::new(tenant_id);
        self.with_retries("complete_stage", || {
            let order = self.load_order(tenant_id, mo_id)?;
            let finished_goods = if order.snapshot.is_terminal(stage_no) {
                Some(self.load_product(tenant_id, order.snapshot.finished_goods_item())?)
            } else {
                None
            };

            let completion = manager.process_stage_completion(
                &order.snapshot,
                stage_no,
                completed_qty,
                scrap_qty,
                finished_goods.as_ref().map(|l| &l.snapshot),
                occurred_at,
            )?;

            let mut changes =
                ChangeSet::new().update_order(completion.order.clone(), order.stored_version);
            if let (
                CompletionOutcome::PostedToFinishedGoods {
                    finished_goods: product,
                    receipt,
                },
                Some(loaded),
            ) = (&completion.outcome, &finished_goods)
            {
                changes = changes
                    .update_product(product.clone(), loaded.stored_version)
                    .record_movements([receipt.movement()]);
            }
            self.gateway.commit(tenant_id, changes)?;
            Ok(completion)
        })
    }

    pub fn cost_summary(
        &self,
        tenant_id: TenantId,
        mo_id: ManufacturingOrderId,
    ) -> Result<OrderCostSummary, ServiceError> {
        let order = self.load_order(tenant_id, mo_id)?;
        Ok(ProcessCostManager::new(tenant_id).cost_summary(&order.snapshot)?)
    }
}
