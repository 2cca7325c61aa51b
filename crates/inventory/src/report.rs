//! Valuation reporting.
//!
//! The engine keeps full `f64` precision; this is the one place values are
//! rounded, and only for presentation.

use serde::{Deserialize, Serialize};

use crate::product::{ProductId, ProductValuation, QUANTITY_EPSILON, ValuationMethod};

/// Round to cents (half away from zero).
pub fn round_currency(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One product's line in a valuation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationLine {
    pub product_id: ProductId,
    pub valuation_method: ValuationMethod,
    pub quantity: f64,
    pub unit_cost: f64,
    pub total_value: f64,
    pub open_lots: usize,
}

/// Tenant-level stock valuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationReport {
    pub lines: Vec<ValuationLine>,
    pub total_items: usize,
    pub stocked_items: usize,
    pub total_quantity: f64,
    pub total_value: f64,
}

impl ValuationReport {
    pub fn build<'a>(products: impl IntoIterator<Item = &'a ProductValuation>) -> Self {
        let products: Vec<&ProductValuation> = products.into_iter().collect();

        // Totals come from unrounded values so per-line rounding does not accumulate.
        let total_quantity: f64 = products.iter().map(|p| p.quantity()).sum();
        let total_value: f64 = products.iter().map(|p| p.total_value()).sum();

        let mut lines: Vec<ValuationLine> = products
            .iter()
            .map(|p| ValuationLine {
                product_id: p.product_id(),
                valuation_method: p.valuation_method(),
                quantity: p.quantity(),
                unit_cost: round_currency(p.current_rate()),
                total_value: round_currency(p.total_value()),
                open_lots: p.batch_queue().len(),
            })
            .collect();
        lines.sort_by_key(|l| *l.product_id.0.as_uuid());

        Self {
            total_items: lines.len(),
            stocked_items: products.iter().filter(|p| p.quantity() > QUANTITY_EPSILON).count(),
            total_quantity,
            total_value: round_currency(total_value),
            lines,
        }
    }

    /// Value held under one method.
    pub fn value_by_method(&self, method: ValuationMethod) -> f64 {
        self.lines
            .iter()
            .filter(|l| l.valuation_method == method)
            .map(|l| l.total_value)
            .sum()
    }
}
