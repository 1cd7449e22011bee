use crate::core::building_modifications::{Adjustment, Adjustments};
use crate::core::calibration::evaluation::simulate_scenario;
use crate::core::simulators::{SimulationResults, Simulator};
use crate::input::{BuildingRecord, FuelType};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Annual savings per fuel (MBtu), existing minus upgrade.
pub type FuelSavings = IndexMap<FuelType, f64>;

/// Upgrade savings predicted by the uncalibrated and the calibrated model.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SavingsComparison {
    pub uncalibrated: FuelSavings,
    pub calibrated: FuelSavings,
}

impl SavingsComparison {
    /// Calibrated minus uncalibrated savings for one fuel.
    pub fn difference(&self, fuel_type: FuelType) -> f64 {
        self.calibrated.get(&fuel_type).copied().unwrap_or(0.)
            - self.uncalibrated.get(&fuel_type).copied().unwrap_or(0.)
    }
}

fn savings(existing: &SimulationResults, upgrade: &SimulationResults) -> FuelSavings {
    let mut fuels: Vec<FuelType> = existing.fuels.keys().copied().collect();
    for fuel_type in upgrade.fuels.keys() {
        if !fuels.contains(fuel_type) {
            fuels.push(*fuel_type);
        }
    }

    fuels
        .into_iter()
        .map(|fuel_type| {
            (
                fuel_type,
                existing.total(fuel_type) - upgrade.total(fuel_type),
            )
        })
        .collect()
}

/// Simulates an upgrade with and without calibration adjustments and reports the savings each
/// predicts.
///
/// Adjustments in `excluded` are not applied to the upgraded building; use this for quantities
/// the upgrade itself sets, such as ceiling insulation in an attic upgrade. Each scenario runs in
/// its own subdirectory of `output_dir`.
pub fn upgrade_savings(
    simulator: &dyn Simulator,
    existing: &BuildingRecord,
    upgrade: &BuildingRecord,
    adjustments: &Adjustments,
    excluded: &[Adjustment],
    output_dir: &Path,
) -> anyhow::Result<SavingsComparison> {
    let upgrade_adjustments: Adjustments = adjustments
        .iter()
        .filter(|(adjustment, _)| !excluded.contains(adjustment))
        .map(|(adjustment, value)| (*adjustment, *value))
        .collect();

    let uncalibrated_existing = simulate_scenario(
        simulator,
        existing,
        None,
        &output_dir.join("uncalibrated_existing"),
    )?;
    let uncalibrated_upgrade = simulate_scenario(
        simulator,
        upgrade,
        None,
        &output_dir.join("uncalibrated_upgrade"),
    )?;
    let calibrated_existing = simulate_scenario(
        simulator,
        existing,
        Some(adjustments),
        &output_dir.join("calibrated_existing"),
    )?;
    let calibrated_upgrade = simulate_scenario(
        simulator,
        upgrade,
        Some(&upgrade_adjustments),
        &output_dir.join("calibrated_upgrade"),
    )?;

    let comparison = SavingsComparison {
        uncalibrated: savings(&uncalibrated_existing, &uncalibrated_upgrade),
        calibrated: savings(&calibrated_existing, &calibrated_upgrade),
    };
    for fuel_type in comparison.calibrated.keys() {
        info!(
            "{fuel_type} savings: uncalibrated {:.2} MBtu, calibrated {:.2} MBtu",
            comparison.uncalibrated.get(fuel_type).copied().unwrap_or(0.),
            comparison.calibrated[fuel_type]
        );
    }

    Ok(comparison)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::simulators::degree_day::DegreeDaySimulator;
    use crate::core::weather::WeatherSeries;
    use crate::input::tests::building_json;
    use crate::input::ingest_building_record;
    use chrono::NaiveDate;
    use rstest::*;
    use std::{env, fs};

    fn cold_year() -> WeatherSeries {
        let temperatures: Vec<f64> = (0..365)
            .map(|day| 10. - 12. * (2. * std::f64::consts::PI * (day as f64 - 15.) / 365.).cos())
            .collect();
        WeatherSeries::from_daily_means_c(
            NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            &temperatures,
        )
    }

    #[rstest]
    fn should_predict_different_savings_once_calibrated() {
        let existing = ingest_building_record(building_json().to_string().as_bytes()).unwrap();
        let mut upgrade = existing.clone();
        for floor in upgrade
            .first_building_mut()
            .unwrap()
            .building_details
            .enclosure
            .floors
            .iter_mut()
            .filter(|floor| floor.is_ceiling)
        {
            floor.insulation_assembly_r_value = 60.;
        }
        let adjustments = Adjustments::from([
            (Adjustment::HeatingEfficiencyMultiplier, 1.1),
            (Adjustment::CeilingRValueMultiplier, 0.8),
            (Adjustment::MiscLoadMultiplier, 1.2),
        ]);
        let directory =
            env::temp_dir().join(format!("hpxml-calibration-savings-{}", std::process::id()));

        let comparison = upgrade_savings(
            &DegreeDaySimulator::new(cold_year()),
            &existing,
            &upgrade,
            &adjustments,
            &[Adjustment::CeilingRValueMultiplier],
            &directory,
        )
        .unwrap();

        let gas = FuelType::NaturalGas;
        assert!(comparison.uncalibrated[&gas] > 0.);
        assert!(comparison.calibrated[&gas] > 0.);
        let difference = comparison.difference(gas).abs();
        assert!(difference > 0. && difference < 5., "{difference}");
        assert!(directory.join("calibrated_upgrade").join("building.json").exists());
        fs::remove_dir_all(&directory).unwrap();
    }
}
