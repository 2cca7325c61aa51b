//! Stock transaction processing.
//!
//! The processor validates a transaction, picks the product's valuation
//! strategy, and checks the batch-queue invariant on both sides of the call.
//! It is constructed per request with the caller's tenant; there is no shared
//! processor and nothing is cached between calls.
//!
//! Callers must serialize mutating calls per product (row lock, single
//! writer, or versioned snapshots). Two concurrent issues against the same
//! snapshot would each pass the availability check and corrupt the queue once
//! both results are stored; the processor cannot see that race.

use forgecost_core::{DomainError, DomainResult, TenantId};

use crate::movement::{Direction, StockMovement, StockTransaction};
use crate::product::{ProductValuation, ValuationMethod};
use crate::queue::BatchQueueInvariant;
use crate::valuation::OutgoingValuation;

/// Outcome of one applied transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResult {
    pub transaction: StockTransaction,
    /// Zero for receipts.
    pub cost_of_goods_sold: f64,
    /// Receipt rate for IN, average issue cost for OUT.
    pub rate: f64,
    pub quantity_after: f64,
    pub value_after: f64,
}

impl TransactionResult {
    /// Ledger record for this result.
    pub fn movement(&self) -> StockMovement {
        StockMovement {
            product_id: self.transaction.product_id,
            direction: self.transaction.direction,
            quantity: self.transaction.quantity,
            rate: self.rate,
            cost_of_goods_sold: self.cost_of_goods_sold,
            reference_type: self.transaction.reference_type,
            reference_id: self.transaction.reference_id.clone(),
            occurred_at: self.transaction.occurred_at,
        }
    }
}

/// Where a sequential batch stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    /// Position of the failing transaction in the submitted list.
    pub index: usize,
    pub error: DomainError,
}

/// Outcome of [`StockTransactionProcessor::process_batch`].
///
/// `product` is the state after the last successful transaction; on failure,
/// nothing after `failure.index` was attempted.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub product: ProductValuation,
    pub results: Vec<TransactionResult>,
    pub failure: Option<BatchFailure>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    pub fn total_cost_of_goods_sold(&self) -> f64 {
        self.results.iter().map(|r| r.cost_of_goods_sold).sum()
    }
}

/// Result of a valuation-method change. Lot history is gone for good: the
/// old queue cannot be rebuilt from `product`.
#[derive(Debug, Clone, PartialEq)]
pub struct IrreversibleConversion {
    pub product: ProductValuation,
    pub previous_method: ValuationMethod,
    pub lots_discarded: usize,
}

/// Applies stock transactions to product valuation snapshots for one tenant.
#[derive(Debug, Clone, Copy)]
pub struct StockTransactionProcessor {
    tenant_id: TenantId,
}

impl StockTransactionProcessor {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn ensure_tenant(&self, product: &ProductValuation) -> DomainResult<()> {
        if product.tenant_id() != self.tenant_id {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_usable(&self, product: &ProductValuation) -> DomainResult<()> {
        self.ensure_tenant(product)?;
        BatchQueueInvariant::check(product)
    }

    /// Receive stock at `rate`.
    pub fn process_incoming(
        &self,
        product: &ProductValuation,
        quantity: f64,
        rate: f64,
    ) -> DomainResult<ProductValuation> {
        self.ensure_usable(product)?;
        let next = product
            .valuation_method()
            .strategy()
            .apply_incoming(product, quantity, rate)?;
        BatchQueueInvariant::check(&next)?;

        tracing::debug!(
            product_id = %product.product_id(),
            method = %product.valuation_method(),
            quantity,
            rate,
            quantity_after = next.quantity(),
            "stock received"
        );
        Ok(next)
    }

    /// Issue stock; the cost comes from the product's valuation method.
    pub fn process_outgoing(
        &self,
        product: &ProductValuation,
        quantity: f64,
    ) -> DomainResult<OutgoingValuation> {
        self.ensure_usable(product)?;
        let outgoing = product
            .valuation_method()
            .strategy()
            .apply_outgoing(product, quantity)?;
        BatchQueueInvariant::check(&outgoing.product)?;

        tracing::debug!(
            product_id = %product.product_id(),
            method = %product.valuation_method(),
            quantity,
            cost_of_goods_sold = outgoing.cost_of_goods_sold,
            quantity_after = outgoing.product.quantity(),
            "stock issued"
        );
        Ok(outgoing)
    }

    /// Apply one transaction and describe what happened.
    pub fn process(
        &self,
        product: &ProductValuation,
        transaction: &StockTransaction,
    ) -> DomainResult<(ProductValuation, TransactionResult)> {
        transaction.validate()?;
        if transaction.product_id != product.product_id() {
            return Err(DomainError::validation(format!(
                "transaction targets product {} but snapshot is {}",
                transaction.product_id,
                product.product_id()
            )));
        }

        let (next, cost_of_goods_sold, rate) = match (transaction.direction, transaction.rate) {
            (Direction::In, Some(rate)) => {
                let next = self.process_incoming(product, transaction.quantity, rate)?;
                (next, 0.0, rate)
            }
            (Direction::Out, _) => {
                let out = self.process_outgoing(product, transaction.quantity)?;
                (out.product, out.cost_of_goods_sold, out.rate)
            }
            (Direction::In, None) => {
                return Err(DomainError::validation("incoming transaction requires a rate"));
            }
        };

        let result = TransactionResult {
            transaction: transaction.clone(),
            cost_of_goods_sold,
            rate,
            quantity_after: next.quantity(),
            value_after: next.total_value(),
        };
        Ok((next, result))
    }

    /// Apply transactions one after another, each against the previous result.
    ///
    /// Stops at the first failure; earlier results are kept and later
    /// transactions are not attempted.
    pub fn process_batch(
        &self,
        product: &ProductValuation,
        transactions: &[StockTransaction],
    ) -> BatchOutcome {
        let mut current = product.clone();
        let mut results = Vec::with_capacity(transactions.len());

        for (index, transaction) in transactions.iter().enumerate() {
            match self.process(&current, transaction) {
                Ok((next, result)) => {
                    current = next;
                    results.push(result);
                }
                Err(error) => {
                    tracing::debug!(
                        product_id = %product.product_id(),
                        index,
                        error = %error,
                        "batch stopped"
                    );
                    return BatchOutcome {
                        product: current,
                        results,
                        failure: Some(BatchFailure { index, error }),
                    };
                }
            }
        }

        BatchOutcome {
            product: current,
            results,
            failure: None,
        }
    }

    /// Switch the product to `new_method`, collapsing its lots into one lot
    /// at the average cost of the stock on hand. Quantity and value are kept;
    /// lot history is not.
    pub fn convert_valuation_method(
        &self,
        product: &ProductValuation,
        new_method: ValuationMethod,
    ) -> DomainResult<IrreversibleConversion> {
        self.ensure_usable(product)?;
        if product.valuation_method() == new_method {
            return Err(DomainError::validation(format!(
                "product already uses {new_method}"
            )));
        }

        let converted = product.succeed(new_method, BatchQueueInvariant::collapsed_lots(product));

        tracing::warn!(
            target: "data_integrity",
            product_id = %product.product_id(),
            from = %product.valuation_method(),
            to = %new_method,
            lots_discarded = product.batch_queue().len(),
            "valuation method converted; lot history discarded"
        );

        Ok(IrreversibleConversion {
            product: converted,
            previous_method: product.valuation_method(),
            lots_discarded: product.batch_queue().len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::ReferenceType;
    use crate::product::{Batch, ProductId, StoredValuation};
    use crate::queue::QUEUE_TOLERANCE;
    use chrono::Utc;
    use forgecost_core::{AggregateId, AggregateRoot};
    use proptest::prelude::*;

    fn fixture(method: ValuationMethod) -> (StockTransactionProcessor, ProductValuation) {
        let tenant_id = TenantId::new();
        let product = ProductValuation::new(ProductId::new(AggregateId::new()), tenant_id, method);
        (StockTransactionProcessor::new(tenant_id), product)
    }

    fn receipt(product: &ProductValuation, qty: f64, rate: f64) -> StockTransaction {
        StockTransaction::incoming(
            product.product_id(),
            qty,
            rate,
            ReferenceType::PurchaseReceipt,
            "PO-100",
            Utc::now(),
        )
    }

    fn issue(product: &ProductValuation, qty: f64) -> StockTransaction {
        StockTransaction::outgoing(
            product.product_id(),
            qty,
            ReferenceType::SalesIssue,
            "SO-200",
            Utc::now(),
        )
    }

    #[test]
    fn weighted_average_scenario() {
        let (processor, product) = fixture(ValuationMethod::WeightedAverage);
        let product = processor.process_incoming(&product, 100.0, 10.0).unwrap();
        assert_eq!(
            (product.quantity(), product.current_rate(), product.total_value()),
            (100.0, 10.0, 1000.0)
        );

        let product = processor.process_incoming(&product, 50.0, 12.0).unwrap();
        assert_eq!(product.quantity(), 150.0);
        assert!((product.current_rate() - 10.6667).abs() < 1e-4);
        assert!((product.total_value() - 1600.0).abs() < 1e-9);
    }

    #[test]
    fn fifo_scenario_through_transactions() {
        let (processor, product) = fixture(ValuationMethod::Fifo);
        let txs = [
            receipt(&product, 50.0, 10.0),
            receipt(&product, 30.0, 12.0),
            issue(&product, 60.0),
        ];

        let outcome = processor.process_batch(&product, &txs);
        assert!(outcome.is_complete());
        assert_eq!(outcome.results.len(), 3);
        assert!((outcome.results[2].cost_of_goods_sold - 620.0).abs() < 1e-9);
        assert_eq!(outcome.product.batch_queue(), &[Batch::new(20.0, 12.0)]);
        assert_eq!(outcome.product.version(), 3);

        let movement = outcome.results[2].movement();
        assert_eq!(movement.direction, Direction::Out);
        assert_eq!(movement.reference_id, "SO-200");
        assert!((movement.rate - 620.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn over_issue_fails_and_leaves_product_untouched() {
        let (processor, product) = fixture(ValuationMethod::Lifo);
        let product = processor.process_incoming(&product, 10.0, 4.0).unwrap();
        let before = product.clone();

        let err = processor.process_outgoing(&product, 10.5).unwrap_err();
        assert_eq!(
            err,
            DomainError::insufficient_inventory(product.product_id().0, 10.5, 10.0)
        );
        assert_eq!(product, before);
    }

    #[test]
    fn batch_stops_at_first_failure() {
        let (processor, product) = fixture(ValuationMethod::Fifo);
        let txs = [
            receipt(&product, 10.0, 1.0),
            issue(&product, 25.0),
            receipt(&product, 100.0, 1.0),
        ];

        let outcome = processor.process_batch(&product, &txs);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.product.quantity(), 10.0);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.index, 1);
        assert!(matches!(failure.error, DomainError::InsufficientInventory { .. }));
    }

    #[test]
    fn other_tenants_snapshot_is_rejected() {
        let (_, product) = fixture(ValuationMethod::Fifo);
        let stranger = StockTransactionProcessor::new(TenantId::new());
        assert!(matches!(
            stranger.process_incoming(&product, 1.0, 1.0),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn transaction_for_another_product_is_rejected() {
        let (processor, product) = fixture(ValuationMethod::Fifo);
        let (_, other) = fixture(ValuationMethod::Fifo);
        let tx = receipt(&other, 1.0, 1.0);
        assert!(matches!(
            processor.process(&product, &tx),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn corrupt_queue_is_refused_before_processing() {
        let tenant_id = TenantId::new();
        let product = ProductValuation::restore(StoredValuation {
            product_id: ProductId::new(AggregateId::new()),
            tenant_id,
            valuation_method: ValuationMethod::Fifo,
            quantity: 40.0,
            current_rate: 1.0,
            total_value: 40.0,
            batch_queue: vec![Batch::new(10.0, 1.0)],
            version: 3,
        });
        let processor = StockTransactionProcessor::new(tenant_id);
        assert!(matches!(
            processor.process_outgoing(&product, 5.0),
            Err(DomainError::QueueIntegrity(_))
        ));
    }

    #[test]
    fn conversion_collapses_lots_and_keeps_value() {
        let (processor, product) = fixture(ValuationMethod::Fifo);
        let product = processor.process_incoming(&product, 50.0, 10.0).unwrap();
        let product = processor.process_incoming(&product, 30.0, 12.0).unwrap();

        let conversion = processor
            .convert_valuation_method(&product, ValuationMethod::WeightedAverage)
            .unwrap();
        assert_eq!(conversion.previous_method, ValuationMethod::Fifo);
        assert_eq!(conversion.lots_discarded, 2);

        let converted = conversion.product;
        assert_eq!(converted.valuation_method(), ValuationMethod::WeightedAverage);
        assert_eq!(converted.batch_queue().len(), 1);
        assert_eq!(converted.quantity(), 80.0);
        assert!((converted.total_value() - 860.0).abs() < 1e-9);
        assert!((converted.current_rate() - 10.75).abs() < 1e-9);
        assert_eq!(converted.version(), product.version() + 1);
    }

    #[test]
    fn converting_to_the_same_method_is_rejected() {
        let (processor, product) = fixture(ValuationMethod::Lifo);
        assert!(matches!(
            processor.convert_valuation_method(&product, ValuationMethod::Lifo),
            Err(DomainError::Validation(_))
        ));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Receive(f64, f64),
        Issue(f64),
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0.1f64..200.0, 0.0f64..100.0).prop_map(|(q, r)| Step::Receive(q, r)),
            (0.0f64..1.0).prop_map(Step::Issue),
        ]
    }

    fn method_strategy() -> impl Strategy<Value = ValuationMethod> {
        prop::sample::select(ValuationMethod::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of valid receipts and issues the lots
        /// reconcile with quantity and value.
        #[test]
        fn queue_reconciles_after_any_valid_sequence(
            method in method_strategy(),
            steps in prop::collection::vec(step_strategy(), 1..40),
        ) {
            let (processor, mut product) = fixture(method);
            for step in steps {
                product = match step {
                    Step::Receive(qty, rate) => {
                        processor.process_incoming(&product, qty, rate).unwrap()
                    }
                    // Issue a fraction of what is on hand so the step is always valid.
                    Step::Issue(fraction) => {
                        let qty = product.quantity() * fraction;
                        if qty <= 0.0 {
                            continue;
                        }
                        processor.process_outgoing(&product, qty).unwrap().product
                    }
                };

                let queued_qty: f64 = product.batch_queue().iter().map(Batch::quantity).sum();
                let queued_value: f64 = product.batch_queue().iter().map(Batch::value).sum();
                prop_assert!(product.quantity() >= 0.0);
                prop_assert!((queued_qty - product.quantity()).abs() <= QUEUE_TOLERANCE);
                prop_assert!((queued_value - product.total_value()).abs() <= QUEUE_TOLERANCE);
            }
        }

        /// Property: issuing more than is on hand always fails and changes nothing.
        #[test]
        fn over_issue_never_mutates(
            method in method_strategy(),
            on_hand in 0.0f64..500.0,
            excess in 0.001f64..100.0,
        ) {
            let (processor, product) = fixture(method);
            let product = if on_hand > 0.0 {
                processor.process_incoming(&product, on_hand, 3.0).unwrap()
            } else {
                product
            };
            let before = product.clone();
            let result = processor.process_outgoing(&product, product.quantity() + excess);
            let is_insufficient = matches!(result, Err(DomainError::InsufficientInventory { .. }));
            prop_assert!(is_insufficient);
            prop_assert_eq!(product, before);
        }
    }
}
