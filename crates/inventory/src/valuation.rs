//! Costing strategies over a product's batch queue.
//!
//! Four methods share one contract. FIFO and LIFO walk real receipt lots;
//! the two averaging methods keep a single synthetic lot at the running
//! average rate. All of them are pure: they borrow a snapshot and hand back
//! a new one, so a failed call leaves nothing to roll back.

use std::collections::VecDeque;

use forgecost_core::{DomainError, DomainResult, ensure_non_negative, ensure_positive};

use crate::product::{Batch, ProductValuation, QUANTITY_EPSILON, ValuationMethod};
use crate::queue::QUEUE_TOLERANCE;

/// Result of an outgoing valuation.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingValuation {
    pub product: ProductValuation,
    pub cost_of_goods_sold: f64,
    /// Average cost per unit issued (`cost_of_goods_sold / quantity`).
    pub rate: f64,
}

/// Costing contract implemented by every valuation method.
pub trait ValuationStrategy: Send + Sync {
    fn method(&self) -> ValuationMethod;

    /// Receive `quantity` units at `rate`. Requires `quantity > 0` and `rate >= 0`.
    fn apply_incoming(
        &self,
        state: &ProductValuation,
        quantity: f64,
        rate: f64,
    ) -> DomainResult<ProductValuation>;

    /// Issue `quantity` units. Requires `0 < quantity <= state.quantity()`.
    fn apply_outgoing(
        &self,
        state: &ProductValuation,
        quantity: f64,
    ) -> DomainResult<OutgoingValuation>;

    /// Rate the method reports for the snapshot; 0 for an empty queue.
    fn current_rate(&self, state: &ProductValuation) -> f64;
}

fn validate_incoming(quantity: f64, rate: f64) -> DomainResult<()> {
    ensure_positive("quantity", quantity)?;
    ensure_non_negative("rate", rate)
}

fn validate_outgoing(state: &ProductValuation, quantity: f64) -> DomainResult<()> {
    ensure_positive("quantity", quantity)?;
    if quantity > state.quantity() {
        return Err(DomainError::insufficient_inventory(
            state.product_id().0,
            quantity,
            state.quantity(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsumeFrom {
    Head,
    Tail,
}

/// Walk lots from one end, splitting the last one touched.
///
/// `state.quantity()` is the sum of the lots in queue order, so subtracting
/// them one by one from either end can leave rounding residue. Issuing the
/// whole stock therefore takes every lot, and residue within
/// [`QUEUE_TOLERANCE`] left after the last lot counts as consumed.
fn consume_lots(
    state: &ProductValuation,
    quantity: f64,
    from: ConsumeFrom,
) -> DomainResult<(Vec<Batch>, f64)> {
    if quantity >= state.quantity() {
        let cost: f64 = state.batch_queue().iter().map(Batch::value).sum();
        return Ok((Vec::new(), cost));
    }

    let mut lots: VecDeque<Batch> = state.batch_queue().iter().copied().collect();
    let mut remaining = quantity;
    let mut cost = 0.0;

    while remaining > QUANTITY_EPSILON {
        let lot = match from {
            ConsumeFrom::Head => lots.pop_front(),
            ConsumeFrom::Tail => lots.pop_back(),
        };
        let Some(lot) = lot else {
            if remaining <= QUEUE_TOLERANCE {
                break;
            }
            return Err(DomainError::queue_integrity(format!(
                "batch queue of product {} ran out with {remaining} units still to issue",
                state.product_id()
            )));
        };

        let take = lot.quantity().min(remaining);
        cost += take * lot.rate();
        remaining -= take;

        if let Some(rest) = lot.remainder_after(take) {
            match from {
                ConsumeFrom::Head => lots.push_front(rest),
                ConsumeFrom::Tail => lots.push_back(rest),
            }
        }
    }

    Ok((lots.into_iter().collect(), cost))
}

fn append_lot(state: &ProductValuation, quantity: f64, rate: f64) -> Vec<Batch> {
    let mut lots = state.batch_queue().to_vec();
    lots.push(Batch::new(quantity, rate));
    lots
}

fn walk_outgoing(
    method: ValuationMethod,
    state: &ProductValuation,
    quantity: f64,
    from: ConsumeFrom,
) -> DomainResult<OutgoingValuation> {
    validate_outgoing(state, quantity)?;
    let (lots, cost_of_goods_sold) = consume_lots(state, quantity, from)?;
    Ok(OutgoingValuation {
        product: state.succeed(method, lots),
        cost_of_goods_sold,
        rate: cost_of_goods_sold / quantity,
    })
}

/// First in, first out: issues consume the oldest lots.
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoStrategy;

impl ValuationStrategy for FifoStrategy {
    fn method(&self) -> ValuationMethod {
        ValuationMethod::Fifo
    }

    fn apply_incoming(
        &self,
        state: &ProductValuation,
        quantity: f64,
        rate: f64,
    ) -> DomainResult<ProductValuation> {
        validate_incoming(quantity, rate)?;
        Ok(state.succeed(self.method(), append_lot(state, quantity, rate)))
    }

    fn apply_outgoing(
        &self,
        state: &ProductValuation,
        quantity: f64,
    ) -> DomainResult<OutgoingValuation> {
        walk_outgoing(self.method(), state, quantity, ConsumeFrom::Head)
    }

    /// Rate of the oldest lot, i.e. the cost the next issue starts at.
    fn current_rate(&self, state: &ProductValuation) -> f64 {
        state.batch_queue().first().map(Batch::rate).unwrap_or(0.0)
    }
}

/// Last in, first out: issues consume the newest lots.
#[derive(Debug, Clone, Copy, Default)]
pub struct LifoStrategy;

impl ValuationStrategy for LifoStrategy {
    fn method(&self) -> ValuationMethod {
        ValuationMethod::Lifo
    }

    fn apply_incoming(
        &self,
        state: &ProductValuation,
        quantity: f64,
        rate: f64,
    ) -> DomainResult<ProductValuation> {
        validate_incoming(quantity, rate)?;
        Ok(state.succeed(self.method(), append_lot(state, quantity, rate)))
    }

    fn apply_outgoing(
        &self,
        state: &ProductValuation,
        quantity: f64,
    ) -> DomainResult<OutgoingValuation> {
        walk_outgoing(self.method(), state, quantity, ConsumeFrom::Tail)
    }

    fn current_rate(&self, state: &ProductValuation) -> f64 {
        state.batch_queue().last().map(Batch::rate).unwrap_or(0.0)
    }
}

mod average {
    use super::*;

    pub(super) fn rate(state: &ProductValuation) -> f64 {
        if state.quantity() > QUANTITY_EPSILON {
            state.total_value() / state.quantity()
        } else {
            0.0
        }
    }

    pub(super) fn incoming(
        method: ValuationMethod,
        state: &ProductValuation,
        quantity: f64,
        rate: f64,
    ) -> DomainResult<ProductValuation> {
        validate_incoming(quantity, rate)?;
        let new_quantity = state.quantity() + quantity;
        let new_value = state.total_value() + quantity * rate;
        let new_rate = new_value / new_quantity;
        Ok(state.succeed(method, vec![Batch::new(new_quantity, new_rate)]))
    }

    pub(super) fn outgoing(
        method: ValuationMethod,
        state: &ProductValuation,
        quantity: f64,
    ) -> DomainResult<OutgoingValuation> {
        validate_outgoing(state, quantity)?;
        let unit_cost = rate(state);
        let left = state.quantity() - quantity;
        let lots = if left > QUANTITY_EPSILON {
            vec![Batch::new(left, unit_cost)]
        } else {
            Vec::new()
        };
        Ok(OutgoingValuation {
            product: state.succeed(method, lots),
            cost_of_goods_sold: quantity * unit_cost,
            rate: unit_cost,
        })
    }
}

/// Periodic weighted average (AVCO): one synthetic lot at the blended rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedAverageStrategy;

impl ValuationStrategy for WeightedAverageStrategy {
    fn method(&self) -> ValuationMethod {
        ValuationMethod::WeightedAverage
    }

    fn apply_incoming(
        &self,
        state: &ProductValuation,
        quantity: f64,
        rate: f64,
    ) -> DomainResult<ProductValuation> {
        average::incoming(self.method(), state, quantity, rate)
    }

    fn apply_outgoing(
        &self,
        state: &ProductValuation,
        quantity: f64,
    ) -> DomainResult<OutgoingValuation> {
        average::outgoing(self.method(), state, quantity)
    }

    fn current_rate(&self, state: &ProductValuation) -> f64 {
        average::rate(state)
    }
}

/// Moving average. Computes exactly what [`WeightedAverageStrategy`] does; it
/// exists as its own method because reports distinguish the two.
#[derive(Debug, Clone, Copy, Default)]
pub struct MovingAverageStrategy;

impl ValuationStrategy for MovingAverageStrategy {
    fn method(&self) -> ValuationMethod {
        ValuationMethod::MovingAverage
    }

    fn apply_incoming(
        &self,
        state: &ProductValuation,
        quantity: f64,
        rate: f64,
    ) -> DomainResult<ProductValuation> {
        average::incoming(self.method(), state, quantity, rate)
    }

    fn apply_outgoing(
        &self,
        state: &ProductValuation,
        quantity: f64,
    ) -> DomainResult<OutgoingValuation> {
        average::outgoing(self.method(), state, quantity)
    }

    fn current_rate(&self, state: &ProductValuation) -> f64 {
        average::rate(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::ProductId;
    use forgecost_core::{AggregateId, TenantId};
    use proptest::prelude::*;

    fn empty(method: ValuationMethod) -> ProductValuation {
        ProductValuation::new(ProductId::new(AggregateId::new()), TenantId::new(), method)
    }

    fn receive_all(method: ValuationMethod, lots: &[(f64, f64)]) -> ProductValuation {
        let strategy = method.strategy();
        lots.iter().fold(empty(method), |state, &(qty, rate)| {
            strategy.apply_incoming(&state, qty, rate).unwrap()
        })
    }

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn weighted_average_blends_receipts() {
        let strategy = WeightedAverageStrategy;
        let first = strategy
            .apply_incoming(&empty(ValuationMethod::WeightedAverage), 100.0, 10.0)
            .unwrap();
        assert_eq!(first.quantity(), 100.0);
        assert_eq!(first.current_rate(), 10.0);
        assert_eq!(first.total_value(), 1000.0);

        let second = strategy.apply_incoming(&first, 50.0, 12.0).unwrap();
        assert_eq!(second.quantity(), 150.0);
        assert_close(second.current_rate(), 1600.0 / 150.0, 1e-9);
        assert_close(second.total_value(), 1600.0, 1e-9);
        assert_eq!(second.batch_queue().len(), 1);
    }

    #[test]
    fn fifo_issue_consumes_oldest_lots_first() {
        let state = receive_all(ValuationMethod::Fifo, &[(50.0, 10.0), (30.0, 12.0)]);
        let out = FifoStrategy.apply_outgoing(&state, 60.0).unwrap();

        assert_close(out.cost_of_goods_sold, 620.0, 1e-9);
        assert_close(out.rate, 620.0 / 60.0, 1e-9);
        assert_eq!(out.product.batch_queue(), &[Batch::new(20.0, 12.0)]);
        assert_eq!(out.product.quantity(), 20.0);
        assert_eq!(out.product.current_rate(), 12.0);
    }

    #[test]
    fn fifo_receipt_does_not_move_current_rate() {
        let state = receive_all(ValuationMethod::Fifo, &[(10.0, 5.0)]);
        let next = FifoStrategy.apply_incoming(&state, 10.0, 9.0).unwrap();
        assert_eq!(next.current_rate(), 5.0);
    }

    #[test]
    fn lifo_issue_consumes_newest_lots_first() {
        let state = receive_all(ValuationMethod::Lifo, &[(50.0, 10.0), (30.0, 12.0)]);
        assert_eq!(state.current_rate(), 12.0);

        let out = LifoStrategy.apply_outgoing(&state, 40.0).unwrap();
        assert_close(out.cost_of_goods_sold, 30.0 * 12.0 + 10.0 * 10.0, 1e-9);
        assert_eq!(out.product.batch_queue(), &[Batch::new(40.0, 10.0)]);
    }

    #[test]
    fn moving_average_matches_weighted_average() {
        let lots = [(10.0, 3.0), (5.0, 4.5), (7.5, 1.25)];
        let weighted = receive_all(ValuationMethod::WeightedAverage, &lots);
        let moving = receive_all(ValuationMethod::MovingAverage, &lots);
        assert_eq!(weighted.current_rate(), moving.current_rate());

        let w = WeightedAverageStrategy.apply_outgoing(&weighted, 12.0).unwrap();
        let m = MovingAverageStrategy.apply_outgoing(&moving, 12.0).unwrap();
        assert_eq!(w.cost_of_goods_sold, m.cost_of_goods_sold);
        assert_eq!(m.product.valuation_method(), ValuationMethod::MovingAverage);
    }

    #[test]
    fn average_issue_of_everything_empties_the_queue() {
        let state = receive_all(ValuationMethod::WeightedAverage, &[(4.0, 2.5)]);
        let out = WeightedAverageStrategy.apply_outgoing(&state, 4.0).unwrap();
        assert!(out.product.is_empty());
        assert_eq!(out.product.current_rate(), 0.0);
        assert_eq!(out.cost_of_goods_sold, 10.0);
    }

    #[test]
    fn current_rate_of_empty_queue_is_zero() {
        for method in ValuationMethod::ALL {
            assert_eq!(method.strategy().current_rate(&empty(method)), 0.0);
        }
    }

    #[test]
    fn incoming_rejects_bad_input() {
        for method in ValuationMethod::ALL {
            let strategy = method.strategy();
            let state = empty(method);
            assert!(matches!(
                strategy.apply_incoming(&state, 0.0, 1.0),
                Err(DomainError::Validation(_))
            ));
            assert!(matches!(
                strategy.apply_incoming(&state, 1.0, -0.01),
                Err(DomainError::Validation(_))
            ));
            assert!(matches!(
                strategy.apply_incoming(&state, f64::NAN, 1.0),
                Err(DomainError::Validation(_))
            ));
            assert!(strategy.apply_incoming(&state, 1.0, 0.0).is_ok());
        }
    }

    #[test]
    fn over_issue_reports_required_and_available() {
        for method in ValuationMethod::ALL {
            let state = receive_all(method, &[(5.0, 1.0)]);
            let err = method.strategy().apply_outgoing(&state, 6.0).unwrap_err();
            assert_eq!(
                err,
                DomainError::insufficient_inventory(state.product_id().0, 6.0, 5.0)
            );
        }
    }

    #[test]
    fn full_issue_of_large_fractional_lots_empties_the_queue() {
        let lots = [
            (1_153_728.142857143, 1.0),
            (1_199_881.142857143, 1.0),
            (1_146_607.142857143, 1.0),
            (909_835.7142857143, 1.0),
            (705_460.8571428572, 1.0),
        ];
        for method in [ValuationMethod::Fifo, ValuationMethod::Lifo] {
            let state = receive_all(method, &lots);
            let out = method
                .strategy()
                .apply_outgoing(&state, state.quantity())
                .unwrap();
            assert!(out.product.is_empty());
            assert_eq!(out.product.quantity(), 0.0);
            assert_close(out.cost_of_goods_sold, state.total_value(), 1e-6);
        }
    }

    fn lots_strategy() -> impl Strategy<Value = Vec<(f64, f64)>> {
        prop::collection::vec((0.5f64..500.0, 0.0f64..250.0), 1..12)
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: under weighted average, receipts alone keep
        /// rate == total value / total quantity.
        #[test]
        fn weighted_average_rate_is_value_over_quantity(lots in lots_strategy()) {
            let state = receive_all(ValuationMethod::WeightedAverage, &lots);
            let qty: f64 = lots.iter().map(|(q, _)| q).sum();
            let value: f64 = lots.iter().map(|(q, r)| q * r).sum();
            prop_assert!((state.current_rate() - value / qty).abs() <= 1e-6);
        }

        /// Property: a FIFO issue no larger than the first lot only touches that lot.
        #[test]
        fn fifo_small_issue_stays_in_first_lot(lots in lots_strategy(), fraction in 0.01f64..1.0) {
            let state = receive_all(ValuationMethod::Fifo, &lots);
            let (first_qty, first_rate) = lots[0];
            let issue = first_qty * fraction;
            let out = FifoStrategy.apply_outgoing(&state, issue).unwrap();

            prop_assert!((out.cost_of_goods_sold - issue * first_rate).abs() <= 1e-6);
            let untouched = &state.batch_queue()[1..];
            let after = out.product.batch_queue();
            prop_assert!(after.ends_with(untouched));
        }

        /// Property: issuing the whole stock of large fractional lots drains the queue.
        #[test]
        fn full_issue_drains_any_queue(
            lots in prop::collection::vec((100_000.0f64..5_000_000.0, 0.1f64..50.0), 1..12),
            lifo in any::<bool>(),
        ) {
            let method = if lifo { ValuationMethod::Lifo } else { ValuationMethod::Fifo };
            let state = receive_all(method, &lots);
            let out = method.strategy().apply_outgoing(&state, state.quantity()).unwrap();

            prop_assert!(out.product.is_empty());
            let tolerance = state.total_value().abs() * 1e-12 + 1e-6;
            prop_assert!((out.cost_of_goods_sold - state.total_value()).abs() <= tolerance);
        }

        /// Property: a LIFO issue no larger than the last lot only touches that lot.
        #[test]
        fn lifo_small_issue_stays_in_last_lot(lots in lots_strategy(), fraction in 0.01f64..1.0) {
            let state = receive_all(ValuationMethod::Lifo, &lots);
            let (last_qty, last_rate) = lots[lots.len() - 1];
            let issue = last_qty * fraction;
            let out = LifoStrategy.apply_outgoing(&state, issue).unwrap();

            prop_assert!((out.cost_of_goods_sold - issue * last_rate).abs() <= 1e-6);
            let untouched = &state.batch_queue()[..lots.len() - 1];
            prop_assert!(out.product.batch_queue().starts_with(untouched));
        }
    }
}
