//! Reconciliation of a product's batch queue against its totals.

use forgecost_core::{DomainError, DomainResult};

use crate::product::{Batch, ProductValuation, QUANTITY_EPSILON};

/// Allowed drift between the queue sums and the recorded totals.
pub const QUEUE_TOLERANCE: f64 = 0.01;

/// Validation and lossy repair of the two queue invariants:
/// `sum(lot.quantity) == quantity` and `sum(lot.quantity * lot.rate) == total_value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchQueueInvariant;

impl BatchQueueInvariant {
    /// Whether the snapshot reconciles within [`QUEUE_TOLERANCE`].
    pub fn validate(state: &ProductValuation) -> bool {
        Self::check(state).is_ok()
    }

    /// Like [`validate`](Self::validate) but names the first broken invariant.
    pub fn check(state: &ProductValuation) -> DomainResult<()> {
        if !state.quantity().is_finite() || !state.total_value().is_finite() {
            return Err(DomainError::queue_integrity(format!(
                "product {} has non-finite totals",
                state.product_id()
            )));
        }
        if state.quantity() < 0.0 {
            return Err(DomainError::queue_integrity(format!(
                "product {} has negative quantity {}",
                state.product_id(),
                state.quantity()
            )));
        }
        if let Some((idx, lot)) = state
            .batch_queue()
            .iter()
            .enumerate()
            .find(|(_, lot)| !is_sound(lot))
        {
            return Err(DomainError::queue_integrity(format!(
                "product {} lot #{idx} is malformed ({} @ {})",
                state.product_id(),
                lot.quantity(),
                lot.rate()
            )));
        }

        let queued_quantity: f64 = state.batch_queue().iter().map(Batch::quantity).sum();
        if (queued_quantity - state.quantity()).abs() > QUEUE_TOLERANCE {
            return Err(DomainError::queue_integrity(format!(
                "product {} lots hold {queued_quantity} units but quantity is {}",
                state.product_id(),
                state.quantity()
            )));
        }

        let queued_value: f64 = state.batch_queue().iter().map(Batch::value).sum();
        if (queued_value - state.total_value()).abs() > QUEUE_TOLERANCE {
            return Err(DomainError::queue_integrity(format!(
                "product {} lots are worth {queued_value} but total value is {}",
                state.product_id(),
                state.total_value()
            )));
        }

        Ok(())
    }

    /// Collapse the queue into one synthetic lot at `total_value / quantity`.
    ///
    /// Lot history is lost. A non-positive or non-finite quantity leaves an
    /// empty product. Callers must record the repair as a data-integrity event.
    pub fn repair(state: &ProductValuation) -> ProductValuation {
        state.succeed(state.valuation_method(), Self::collapsed_lots(state))
    }

    /// The single average-cost lot standing for the snapshot's totals.
    pub(crate) fn collapsed_lots(state: &ProductValuation) -> Vec<Batch> {
        let quantity = state.quantity();
        let total_value = state.total_value();
        if quantity.is_finite() && total_value.is_finite() && quantity > QUANTITY_EPSILON {
            vec![Batch::new(quantity, (total_value / quantity).max(0.0))]
        } else {
            Vec::new()
        }
    }
}

fn is_sound(lot: &Batch) -> bool {
    lot.quantity().is_finite()
        && lot.rate().is_finite()
        && lot.quantity() > 0.0
        && lot.rate() >= 0.0
}
