use core::str::FromStr;

use serde::{Deserialize, Serialize};

use forgecost_core::{AggregateId, AggregateRoot, DomainError, TenantId, ValueObject};

use crate::valuation::{
    FifoStrategy, LifoStrategy, MovingAverageStrategy, ValuationStrategy, WeightedAverageStrategy,
};

/// Quantities at or below this are treated as exhausted float residue.
pub const QUANTITY_EPSILON: f64 = 1e-9;

/// Product identifier (tenant-scoped via `tenant_id` on the valuation snapshot).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Declared costing method of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuationMethod {
    Fifo,
    Lifo,
    WeightedAverage,
    MovingAverage,
}

impl ValuationMethod {
    pub const ALL: [ValuationMethod; 4] = [
        ValuationMethod::Fifo,
        ValuationMethod::Lifo,
        ValuationMethod::WeightedAverage,
        ValuationMethod::MovingAverage,
    ];

    /// Strategy table keyed by method.
    pub fn strategy(self) -> &'static dyn ValuationStrategy {
        match self {
            ValuationMethod::Fifo => &FifoStrategy,
            ValuationMethod::Lifo => &LifoStrategy,
            ValuationMethod::WeightedAverage => &WeightedAverageStrategy,
            ValuationMethod::MovingAverage => &MovingAverageStrategy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValuationMethod::Fifo => "fifo",
            ValuationMethod::Lifo => "lifo",
            ValuationMethod::WeightedAverage => "weighted_average",
            ValuationMethod::MovingAverage => "moving_average",
        }
    }

    /// Whether receipts collapse the queue into one synthetic batch.
    pub fn is_averaging(self) -> bool {
        matches!(
            self,
            ValuationMethod::WeightedAverage | ValuationMethod::MovingAverage
        )
    }
}

impl core::fmt::Display for ValuationMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValuationMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(ValuationMethod::Fifo),
            "lifo" => Ok(ValuationMethod::Lifo),
            "weighted_average" | "weighted" | "avco" => Ok(ValuationMethod::WeightedAverage),
            "moving_average" | "moving" => Ok(ValuationMethod::MovingAverage),
            other => Err(DomainError::validation(format!(
                "unknown valuation method '{other}'"
            ))),
        }
    }
}

/// One receipt lot. Never edited in place; consumption produces a smaller copy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    quantity: f64,
    rate: f64,
}

impl Batch {
    pub fn new(quantity: f64, rate: f64) -> Self {
        Self { quantity, rate }
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn value(&self) -> f64 {
        self.quantity * self.rate
    }

    /// The lot left after taking `taken` units, if anything is left.
    pub(crate) fn remainder_after(&self, taken: f64) -> Option<Batch> {
        let left = self.quantity - taken;
        (left > QUANTITY_EPSILON).then(|| Batch::new(left, self.rate))
    }
}

impl ValueObject for Batch {}

/// Valuation snapshot of one product: stock on hand, its value, and the lots behind it.
///
/// Snapshots are values. Every engine operation borrows one and returns a new
/// one with `version` bumped; the caller's copy is never touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductValuation {
    product_id: ProductId,
    tenant_id: TenantId,
    valuation_method: ValuationMethod,
    quantity: f64,
    current_rate: f64,
    total_value: f64,
    batch_queue: Vec<Batch>,
    version: u64,
}

/// Raw stored fields, used when a snapshot is rehydrated by a persistence gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValuation {
    pub product_id: ProductId,
    pub tenant_id: TenantId,
    pub valuation_method: ValuationMethod,
    pub quantity: f64,
    pub current_rate: f64,
    pub total_value: f64,
    pub batch_queue: Vec<Batch>,
    pub version: u64,
}

impl ProductValuation {
    /// A product with no stock.
    pub fn new(
        product_id: ProductId,
        tenant_id: TenantId,
        valuation_method: ValuationMethod,
    ) -> Self {
        Self {
            product_id,
            tenant_id,
            valuation_method,
            quantity: 0.0,
            current_rate: 0.0,
            total_value: 0.0,
            batch_queue: Vec::new(),
            version: 0,
        }
    }

    /// Rehydrate stored fields as-is. No reconciliation is performed; use
    /// [`crate::BatchQueueInvariant`] to check the result.
    pub fn restore(stored: StoredValuation) -> Self {
        Self {
            product_id: stored.product_id,
            tenant_id: stored.tenant_id,
            valuation_method: stored.valuation_method,
            quantity: stored.quantity,
            current_rate: stored.current_rate,
            total_value: stored.total_value,
            batch_queue: stored.batch_queue,
            version: stored.version,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn valuation_method(&self) -> ValuationMethod {
        self.valuation_method
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn current_rate(&self) -> f64 {
        self.current_rate
    }

    pub fn total_value(&self) -> f64 {
        self.total_value
    }

    pub fn batch_queue(&self) -> &[Batch] {
        &self.batch_queue
    }

    pub fn is_empty(&self) -> bool {
        self.batch_queue.is_empty()
    }

    /// Next snapshot built from `batch_queue`; totals are re-derived from the
    /// lots and the current rate is taken from the product's strategy.
    pub(crate) fn succeed(
        &self,
        valuation_method: ValuationMethod,
        batch_queue: Vec<Batch>,
    ) -> Self {
        let quantity: f64 = batch_queue.iter().map(Batch::quantity).sum();
        let total_value: f64 = batch_queue.iter().map(Batch::value).sum();
        let mut next = Self {
            product_id: self.product_id,
            tenant_id: self.tenant_id,
            valuation_method,
            quantity,
            current_rate: 0.0,
            total_value,
            batch_queue,
            version: self.version + 1,
        };
        next.current_rate = valuation_method.strategy().current_rate(&next);
        next
    }
}

impl AggregateRoot for ProductValuation {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
