use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgecost_core::{AggregateId, DomainError, DomainResult, ensure_non_negative, ensure_positive};
use forgecost_events::Event;

use crate::product::ProductId;

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// Business document that caused a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    PurchaseReceipt,
    SalesIssue,
    ProductionReceipt,
    MaterialIssue,
    Adjustment,
}

/// Request to move stock in or out of one product.
///
/// Built by the caller; the engine never persists it. Only incoming
/// transactions carry a rate, outgoing ones are costed by the product's method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockTransaction {
    pub product_id: ProductId,
    pub direction: Direction,
    pub quantity: f64,
    pub rate: Option<f64>,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub occurred_at: DateTime<Utc>,
}

impl StockTransaction {
    pub fn incoming(
        product_id: ProductId,
        quantity: f64,
        rate: f64,
        reference_type: ReferenceType,
        reference_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id,
            direction: Direction::In,
            quantity,
            rate: Some(rate),
            reference_type,
            reference_id: reference_id.into(),
            occurred_at,
        }
    }

    pub fn outgoing(
        product_id: ProductId,
        quantity: f64,
        reference_type: ReferenceType,
        reference_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id,
            direction: Direction::Out,
            quantity,
            rate: None,
            reference_type,
            reference_id: reference_id.into(),
            occurred_at,
        }
    }

    /// Shape checks that do not need the product snapshot.
    pub fn validate(&self) -> DomainResult<()> {
        ensure_positive("quantity", self.quantity)?;
        if self.reference_id.trim().is_empty() {
            return Err(DomainError::validation("reference_id cannot be empty"));
        }
        match (self.direction, self.rate) {
            (Direction::In, Some(rate)) => ensure_non_negative("rate", rate),
            (Direction::In, None) => Err(DomainError::validation(
                "incoming transaction requires a rate",
            )),
            (Direction::Out, Some(_)) => Err(DomainError::validation(
                "outgoing transaction cannot carry a rate",
            )),
            (Direction::Out, None) => Ok(()),
        }
    }
}

/// Immutable ledger record of an applied transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub product_id: ProductId,
    pub direction: Direction,
    pub quantity: f64,
    /// Receipt rate for IN, average issue cost for OUT.
    pub rate: f64,
    /// Zero for receipts.
    pub cost_of_goods_sold: f64,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub occurred_at: DateTime<Utc>,
}

impl Event for StockMovement {
    fn event_type(&self) -> &'static str {
        "inventory.stock.movement_recorded"
    }

    fn version(&self) -> u32 {
        1
    }

    fn aggregate_id(&self) -> AggregateId {
        self.product_id.0
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
