//! Stage cost arithmetic.
//!
//! Unit cost uses a simplified equivalent-unit basis of `good + scrap` with no
//! percentage-of-completion weighting, so partially finished work in process
//! is valued as if complete.

use serde::{Deserialize, Serialize};

use forgecost_core::{DomainError, DomainResult, ensure_non_negative};

use crate::stage::{CostComponents, OverheadBasis, StageNo};

/// Cost of a stage computed from its quantities and accumulated components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageCostResult {
    pub stage_no: StageNo,
    pub good_qty: f64,
    pub scrap_qty: f64,
    /// Components with `transferred_in` and `direct_materials` as actually charged.
    pub costs: CostComponents,
    pub total_cost: f64,
    pub unit_cost: f64,
    pub equivalent_units: f64,
}

fn ensure_components(costs: &CostComponents) -> DomainResult<()> {
    ensure_non_negative("direct_materials", costs.direct_materials)?;
    ensure_non_negative("direct_labor", costs.direct_labor)?;
    ensure_non_negative("manufacturing_overhead", costs.manufacturing_overhead)?;
    ensure_non_negative("regrind_processing", costs.regrind_processing)?;
    ensure_non_negative("waste_credit", costs.waste_credit)
}

/// Compute a stage's total and unit cost.
///
/// `costs.transferred_in` is ignored and recomputed as
/// `(good + scrap) * previous_stage_unit_cost` for stages after 10.
/// Direct materials on any stage other than 10 are rejected.
pub fn calculate_stage_cost(
    stage_no: StageNo,
    good_qty: f64,
    scrap_qty: f64,
    costs: &CostComponents,
    previous_stage_unit_cost: Option<f64>,
) -> DomainResult<StageCostResult> {
    ensure_non_negative("good_qty", good_qty)?;
    ensure_non_negative("scrap_qty", scrap_qty)?;
    ensure_components(costs)?;
    if let Some(prev) = previous_stage_unit_cost {
        ensure_non_negative("previous_stage_unit_cost", prev)?;
    }

    if !stage_no.is_materials_entry() && costs.direct_materials != 0.0 {
        return Err(DomainError::validation(format!(
            "direct materials can only be charged at stage {}, not stage {stage_no}",
            StageNo::MATERIALS_ENTRY
        )));
    }

    let equivalent_units = good_qty + scrap_qty;
    let transferred_in = match previous_stage_unit_cost {
        Some(prev) if !stage_no.is_materials_entry() && prev > 0.0 => equivalent_units * prev,
        _ => 0.0,
    };

    let charged = CostComponents {
        transferred_in,
        ..*costs
    };
    let total_cost = charged.total();
    if total_cost < 0.0 {
        return Err(DomainError::validation(format!(
            "waste credit {} exceeds the cost of stage {stage_no}",
            costs.waste_credit
        )));
    }

    let unit_cost = if good_qty > 0.0 { total_cost / good_qty } else { 0.0 };

    Ok(StageCostResult {
        stage_no,
        good_qty,
        scrap_qty,
        costs: charged,
        total_cost,
        unit_cost,
        equivalent_units,
    })
}

/// Labor amount for `hours` at `rate` per hour.
pub fn labor_cost(hours: f64, rate: f64) -> DomainResult<f64> {
    ensure_non_negative("hours", hours)?;
    ensure_non_negative("rate", rate)?;
    Ok(hours * rate)
}

/// Overhead amount absorbed on `basis`.
///
/// For [`OverheadBasis::LaborCost`] the rate is the share of the labor amount
/// absorbed, so it cannot exceed 1. The other bases take a rate per hour or
/// per unit.
pub fn overhead_cost(base_quantity: f64, rate: f64, basis: OverheadBasis) -> DomainResult<f64> {
    ensure_non_negative("base_quantity", base_quantity)?;
    ensure_non_negative("rate", rate)?;
    match basis {
        OverheadBasis::LaborCost if rate > 1.0 => Err(DomainError::validation(format!(
            "overhead rate on labor cost must be a fraction of at most 1, got {rate}"
        ))),
        OverheadBasis::LaborCost => Ok(base_quantity * rate),
        OverheadBasis::LaborHours | OverheadBasis::MachineHours | OverheadBasis::UnitsProduced => {
            Ok(base_quantity * rate)
        }
    }
}

impl CostComponents {
    pub fn with_labor(&self, hours: f64, rate: f64) -> DomainResult<Self> {
        let amount = labor_cost(hours, rate)?;
        Ok(Self {
            direct_labor: self.direct_labor + amount,
            ..*self
        })
    }

    pub fn with_overhead(
        &self,
        base_quantity: f64,
        rate: f64,
        basis: OverheadBasis,
    ) -> DomainResult<Self> {
        let amount = overhead_cost(base_quantity, rate, basis)?;
        Ok(Self {
            manufacturing_overhead: self.manufacturing_overhead + amount,
            ..*self
        })
    }

    pub fn with_materials(&self, amount: f64) -> DomainResult<Self> {
        ensure_non_negative("direct_materials", amount)?;
        Ok(Self {
            direct_materials: self.direct_materials + amount,
            ..*self
        })
    }

    pub fn with_regrind(&self, amount: f64) -> DomainResult<Self> {
        ensure_non_negative("regrind_processing", amount)?;
        Ok(Self {
            regrind_processing: self.regrind_processing + amount,
            ..*self
        })
    }

    pub fn with_waste_credit(&self, amount: f64) -> DomainResult<Self> {
        ensure_non_negative("waste_credit", amount)?;
        Ok(Self {
            waste_credit: self.waste_credit + amount,
            ..*self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stage(n: u16) -> StageNo {
        StageNo::new(n).unwrap()
    }

    #[test]
    fn materials_stage_scenario() {
        let costs = CostComponents {
            direct_materials: 5000.0,
            direct_labor: 1000.0,
            manufacturing_overhead: 500.0,
            ..CostComponents::default()
        };
        let result = calculate_stage_cost(stage(10), 100.0, 5.0, &costs, None).unwrap();

        assert_eq!(result.total_cost, 6500.0);
        assert_eq!(result.unit_cost, 65.0);
        assert_eq!(result.equivalent_units, 105.0);
        assert_eq!(result.costs.transferred_in, 0.0);
    }

    #[test]
    fn transfer_stage_scenario() {
        let costs = CostComponents {
            direct_labor: 300.0,
            ..CostComponents::default()
        };
        let result = calculate_stage_cost(stage(20), 90.0, 0.0, &costs, Some(65.0)).unwrap();

        assert_eq!(result.costs.transferred_in, 5850.0);
        assert_eq!(result.total_cost, 6150.0);
        assert!((result.unit_cost - 68.33).abs() < 0.01);
    }

    #[test]
    fn transferred_in_counts_scrap_units() {
        let none = CostComponents::default();
        let result = calculate_stage_cost(stage(30), 10.0, 2.0, &none, Some(5.0)).unwrap();
        assert_eq!(result.costs.transferred_in, 60.0);
        assert_eq!(result.unit_cost, 6.0);
    }

    #[test]
    fn stage_ten_never_transfers_in() {
        let none = CostComponents::default();
        let result = calculate_stage_cost(stage(10), 10.0, 0.0, &none, Some(99.0)).unwrap();
        assert_eq!(result.costs.transferred_in, 0.0);
    }

    #[test]
    fn stale_transferred_in_input_is_recomputed() {
        let costs = CostComponents {
            transferred_in: 1_000_000.0,
            ..CostComponents::default()
        };
        let result = calculate_stage_cost(stage(40), 4.0, 0.0, &costs, None).unwrap();
        assert_eq!(result.total_cost, 0.0);
    }

    #[test]
    fn materials_outside_stage_ten_are_rejected() {
        let costs = CostComponents {
            direct_materials: 1.0,
            ..CostComponents::default()
        };
        for n in [20, 30, 40, 50] {
            assert!(matches!(
                calculate_stage_cost(stage(n), 1.0, 0.0, &costs, None),
                Err(DomainError::Validation(_))
            ));
        }
    }

    #[test]
    fn zero_good_output_has_zero_unit_cost() {
        let costs = CostComponents {
            direct_labor: 40.0,
            ..CostComponents::default()
        };
        let result = calculate_stage_cost(stage(20), 0.0, 3.0, &costs, None).unwrap();
        assert_eq!(result.total_cost, 40.0);
        assert_eq!(result.unit_cost, 0.0);
    }

    #[test]
    fn invalid_quantities_and_costs_are_rejected() {
        let ok = CostComponents::default();
        assert!(calculate_stage_cost(stage(20), -1.0, 0.0, &ok, None).is_err());
        assert!(calculate_stage_cost(stage(20), 1.0, f64::NAN, &ok, None).is_err());
        assert!(calculate_stage_cost(stage(20), 1.0, 0.0, &ok, Some(-2.0)).is_err());

        let negative_labor = CostComponents {
            direct_labor: -5.0,
            ..CostComponents::default()
        };
        assert!(calculate_stage_cost(stage(20), 1.0, 0.0, &negative_labor, None).is_err());
    }

    #[test]
    fn oversized_waste_credit_is_rejected() {
        let costs = CostComponents {
            direct_labor: 10.0,
            waste_credit: 11.0,
            ..CostComponents::default()
        };
        assert!(matches!(
            calculate_stage_cost(stage(20), 1.0, 0.0, &costs, None),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn postings_are_additive() {
        let costs = CostComponents::default()
            .with_labor(8.0, 25.0)
            .unwrap()
            .with_labor(2.0, 25.0)
            .unwrap()
            .with_overhead(10.0, 12.5, OverheadBasis::MachineHours)
            .unwrap()
            .with_overhead(250.0, 0.2, OverheadBasis::LaborCost)
            .unwrap();
        assert_eq!(costs.direct_labor, 250.0);
        assert_eq!(costs.manufacturing_overhead, 175.0);
    }

    #[test]
    fn labor_cost_overhead_rate_is_a_fraction() {
        assert_eq!(overhead_cost(400.0, 1.0, OverheadBasis::LaborCost).unwrap(), 400.0);
        assert!(matches!(
            overhead_cost(100.0, 1.5, OverheadBasis::LaborCost),
            Err(DomainError::Validation(_))
        ));
        assert_eq!(overhead_cost(100.0, 1.5, OverheadBasis::MachineHours).unwrap(), 150.0);
        assert_eq!(overhead_cost(4.0, 1.5, OverheadBasis::LaborHours).unwrap(), 6.0);
        assert_eq!(overhead_cost(10.0, 2.5, OverheadBasis::UnitsProduced).unwrap(), 25.0);
    }

    #[test]
    fn postings_reject_negative_inputs() {
        let costs = CostComponents::default();
        assert!(costs.with_labor(-1.0, 10.0).is_err());
        assert!(costs.with_overhead(1.0, -0.5, OverheadBasis::UnitsProduced).is_err());
        assert!(costs.with_materials(f64::INFINITY).is_err());
        assert!(costs.with_waste_credit(-3.0).is_err());
    }

    proptest! {
        /// Property: total cost is the sum of the charged components and unit
        /// cost spreads it over good units only.
        #[test]
        fn unit_cost_spreads_total_over_good_units(
            good in 1.0f64..10_000.0,
            scrap in 0.0f64..500.0,
            labor in 0.0f64..50_000.0,
            overhead in 0.0f64..50_000.0,
            prev in 0.01f64..500.0,
        ) {
            let costs = CostComponents {
                direct_labor: labor,
                manufacturing_overhead: overhead,
                ..CostComponents::default()
            };
            let result = calculate_stage_cost(stage(30), good, scrap, &costs, Some(prev)).unwrap();
            let expected_total = (good + scrap) * prev + labor + overhead;
            let tolerance = 1e-6 * expected_total.max(1.0);
            prop_assert!((result.total_cost - expected_total).abs() <= tolerance);
            prop_assert!((result.unit_cost * good - result.total_cost).abs() <= tolerance);
        }
    }
}
