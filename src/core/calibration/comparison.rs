use crate::config::{AcceptanceCriteria, FitnessConfig};
use crate::core::consumption::{DisaggregatedConsumption, EndUse, EndUseConsumption};
use crate::input::FuelType;
use crate::statistics::cvrmse;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

/// Simulated consumption of one fuel measured against its bill-derived target.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FuelComparison {
    /// |simulated − target| per end use (MBtu).
    #[serde(rename = "Absolute Error")]
    pub absolute_error: EndUseConsumption,
    /// simulated − target per end use (MBtu).
    #[serde(rename = "Bias Error")]
    pub bias_error: EndUseConsumption,
    /// CVRMSE (%) of the end-use residuals. Undefined when the target is all zeros.
    #[serde(rename = "CVRMSE")]
    pub cvrmse: Option<f64>,
    /// Total bias as a percentage of the total target.
    #[serde(rename = "Bias Error Percent")]
    pub bias_error_percent: Option<f64>,
}

pub type Comparison = IndexMap<FuelType, FuelComparison>;

/// Compares simulated results with the target for every fuel in the target. A fuel absent from
/// the simulation counts as zero consumption.
pub fn compare(
    simulated: &DisaggregatedConsumption,
    target: &DisaggregatedConsumption,
) -> Comparison {
    target
        .iter()
        .map(|(fuel_type, target)| {
            let simulated = simulated.get(fuel_type).copied().unwrap_or_default();
            let mut absolute_error = EndUseConsumption::default();
            let mut bias_error = EndUseConsumption::default();
            for end_use in EndUse::iter() {
                let bias = simulated.get(end_use) - target.get(end_use);
                bias_error.add(end_use, bias);
                absolute_error.add(end_use, bias.abs());
            }

            let observed: Vec<f64> = EndUse::iter().map(|end_use| target.get(end_use)).collect();
            let predicted: Vec<f64> = EndUse::iter()
                .map(|end_use| simulated.get(end_use))
                .collect();
            let target_total = target.total();
            let bias_error_percent =
                (target_total > 0.).then(|| 100. * bias_error.total() / target_total);

            (
                *fuel_type,
                FuelComparison {
                    absolute_error,
                    bias_error,
                    cvrmse: cvrmse(&observed, &predicted),
                    bias_error_percent,
                },
            )
        })
        .collect()
}

/// Weighted sum of error terms over all fuels; lower is better.
pub fn fitness(comparison: &Comparison, weights: &FitnessConfig) -> f64 {
    comparison
        .values()
        .map(|fuel| {
            weights.absolute_error_weight * fuel.absolute_error.total()
                + weights.bias_error_weight * fuel.bias_error.total().abs()
                + weights.cvrmse_weight * fuel.cvrmse.unwrap_or(0.)
        })
        .sum()
}

/// Whether every compared fuel is within its acceptance thresholds.
pub fn meets_criteria(comparison: &Comparison, criteria: &AcceptanceCriteria) -> bool {
    !comparison.is_empty()
        && comparison.iter().all(|(fuel_type, fuel)| {
            let thresholds = criteria.thresholds_for(*fuel_type);
            let within_bias = match fuel.bias_error_percent {
                Some(percent) => percent.abs() <= thresholds.bias_error_percent,
                None => fuel.absolute_error.total() == 0.,
            };
            let within_cvrmse = match thresholds.cvrmse {
                Some(limit) => fuel.cvrmse.is_some_and(|cvrmse| cvrmse <= limit),
                None => true,
            };
            within_bias && within_cvrmse
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn consumption(fuel_type: FuelType, baseload: f64, heating: f64, cooling: f64) -> DisaggregatedConsumption {
        [(
            fuel_type,
            EndUseConsumption {
                baseload,
                heating,
                cooling,
            },
        )]
        .into_iter()
        .collect()
    }

    #[rstest]
    fn should_measure_errors_per_end_use() {
        let target = consumption(FuelType::NaturalGas, 20., 100., 0.);
        let simulated = consumption(FuelType::NaturalGas, 25., 90., 0.);

        let comparison = compare(&simulated, &target);
        let gas = &comparison[&FuelType::NaturalGas];
        assert_eq!(
            gas.absolute_error,
            EndUseConsumption {
                baseload: 5.,
                heating: 10.,
                cooling: 0.
            }
        );
        assert_relative_eq!(gas.bias_error.total(), -5.);
        assert_relative_eq!(gas.bias_error_percent.unwrap(), -5. / 120. * 100.);
        // residuals -5, 10, 0 around a mean target of 40
        let expected_cvrmse = 100. * ((25. + 100.) / 3f64).sqrt() / 40.;
        assert_relative_eq!(gas.cvrmse.unwrap(), expected_cvrmse, epsilon = 1e-9);
    }

    #[rstest]
    fn should_report_fixed_errors_for_each_target_fuel() {
        let target: DisaggregatedConsumption = [
            (
                FuelType::Electricity,
                EndUseConsumption {
                    baseload: 10.,
                    heating: 0.,
                    cooling: 5.,
                },
            ),
            (
                FuelType::NaturalGas,
                EndUseConsumption {
                    baseload: 20.,
                    heating: 100.,
                    cooling: 0.,
                },
            ),
        ]
        .into_iter()
        .collect();
        // no electricity simulated; propane has no target and is not compared
        let simulated: DisaggregatedConsumption = [
            (
                FuelType::NaturalGas,
                EndUseConsumption {
                    baseload: 25.,
                    heating: 90.,
                    cooling: 0.,
                },
            ),
            (
                FuelType::Propane,
                EndUseConsumption {
                    baseload: 3.,
                    heating: 0.,
                    cooling: 0.,
                },
            ),
        ]
        .into_iter()
        .collect();

        let comparison = compare(&simulated, &target);
        assert_eq!(
            comparison.keys().copied().collect::<Vec<_>>(),
            vec![FuelType::Electricity, FuelType::NaturalGas]
        );

        let electricity = &comparison[&FuelType::Electricity];
        assert_eq!(
            serde_json::to_value(&electricity.absolute_error).unwrap(),
            serde_json::json!({"baseload": 10.0, "heating": 0.0, "cooling": 5.0})
        );
        assert_eq!(
            serde_json::to_value(&electricity.bias_error).unwrap(),
            serde_json::json!({"baseload": -10.0, "heating": 0.0, "cooling": -5.0})
        );
        assert_relative_eq!(electricity.cvrmse.unwrap(), 129.09944487358055, max_relative = 1e-12);
        assert_relative_eq!(electricity.bias_error_percent.unwrap(), -100., max_relative = 1e-12);

        let gas = &comparison[&FuelType::NaturalGas];
        assert_eq!(
            serde_json::to_value(&gas.absolute_error).unwrap(),
            serde_json::json!({"baseload": 5.0, "heating": 10.0, "cooling": 0.0})
        );
        assert_eq!(
            serde_json::to_value(&gas.bias_error).unwrap(),
            serde_json::json!({"baseload": 5.0, "heating": -10.0, "cooling": 0.0})
        );
        assert_relative_eq!(gas.cvrmse.unwrap(), 16.13743060919757, max_relative = 1e-12);
        assert_relative_eq!(gas.bias_error_percent.unwrap(), -25. / 6., max_relative = 1e-12);

        let serialized = serde_json::to_value(gas).unwrap();
        assert_eq!(serialized["Absolute Error"]["heating"], 10.0);
        assert_eq!(serialized["Bias Error"]["baseload"], 5.0);
        assert!(serialized["CVRMSE"].is_number());
        assert!(serialized["Bias Error Percent"].is_number());
    }

    #[rstest]
    fn should_treat_missing_simulated_fuel_as_zero() {
        let target = consumption(FuelType::Electricity, 10., 0., 5.);
        let comparison = compare(&Default::default(), &target);
        assert_relative_eq!(comparison[&FuelType::Electricity].bias_error_percent.unwrap(), -100.);
    }

    #[rstest]
    fn should_weight_fitness_terms() {
        let target = consumption(FuelType::NaturalGas, 20., 100., 0.);
        let simulated = consumption(FuelType::NaturalGas, 25., 90., 0.);
        let comparison = compare(&simulated, &target);
        let gas = &comparison[&FuelType::NaturalGas];

        let weights = FitnessConfig {
            absolute_error_weight: 2.,
            bias_error_weight: 3.,
            cvrmse_weight: 0.,
            ..Default::default()
        };
        assert_relative_eq!(fitness(&comparison, &weights), 2. * 15. + 3. * 5.);

        let weights = FitnessConfig::default();
        assert_relative_eq!(
            fitness(&comparison, &weights),
            15. + 5. + gas.cvrmse.unwrap()
        );
    }

    #[rstest]
    fn should_accept_close_results() {
        let target = consumption(FuelType::NaturalGas, 20., 100., 0.);
        let criteria = AcceptanceCriteria::default();

        let close = consumption(FuelType::NaturalGas, 20.5, 101., 0.);
        assert!(meets_criteria(&compare(&close, &target), &criteria));

        let biased = consumption(FuelType::NaturalGas, 25., 110., 0.);
        assert!(!meets_criteria(&compare(&biased, &target), &criteria));
    }

    #[rstest]
    fn should_ignore_cvrmse_under_bias_only_criteria() {
        let target = consumption(FuelType::NaturalGas, 20., 100., 0.);
        // right total, wrong split
        let misallocated = consumption(FuelType::NaturalGas, 60., 60., 0.);
        let comparison = compare(&misallocated, &target);

        assert!(!meets_criteria(&comparison, &AcceptanceCriteria::default()));
        let simplified = AcceptanceCriteria {
            cvrmse_threshold: None,
            ..Default::default()
        };
        assert!(meets_criteria(&comparison, &simplified));
    }
}
