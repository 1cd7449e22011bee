use crate::core::building_modifications::Adjustment;
use crate::core::calibration::comparison::Comparison;
use crate::core::consumption::DisaggregatedConsumption;
use crate::output::Output;
use crate::statistics::Summary;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::Write;

pub const LOGBOOK_LOCATION_KEY: &str = "logbook";

/// One generation of the search.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GenerationRecord {
    pub generation: usize,
    /// Fitness spread across the whole population.
    pub fitness: Summary,
    pub best_fitness: f64,
    pub best_individual: IndexMap<Adjustment, f64>,
    pub best_individual_sim_results: Option<DisaggregatedConsumption>,
    pub comparison: Option<Comparison>,
    pub failed_simulations: usize,
}

/// The unmodified building, simulated once before the search starts.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ExistingHomeResults {
    pub existing_home_sim_results: DisaggregatedConsumption,
    pub comparison: Comparison,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Logbook {
    pub calibration_success: bool,
    pub calibration_results: Vec<GenerationRecord>,
    pub existing_home_results: ExistingHomeResults,
}

impl Logbook {
    pub fn new(existing_home_results: ExistingHomeResults) -> Self {
        Self {
            calibration_success: false,
            calibration_results: vec![],
            existing_home_results,
        }
    }

    pub fn last_generation(&self) -> Option<&GenerationRecord> {
        self.calibration_results.last()
    }

    pub fn write(&self, output: &impl Output) -> anyhow::Result<()> {
        if output.is_noop() {
            return Ok(());
        }
        let mut writer = output.writer_for_location_key(LOGBOOK_LOCATION_KEY)?;
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calibration::comparison::compare;
    use crate::core::consumption::EndUseConsumption;
    use crate::input::FuelType;
    use crate::output::FileOutput;
    use crate::statistics::summarize;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use std::{env, fs};

    #[fixture]
    fn logbook() -> Logbook {
        let target: DisaggregatedConsumption = IndexMap::from([(
            FuelType::NaturalGas,
            EndUseConsumption {
                baseload: 20.,
                heating: 100.,
                cooling: 0.,
            },
        )]);
        let simulated: DisaggregatedConsumption = IndexMap::from([(
            FuelType::NaturalGas,
            EndUseConsumption {
                baseload: 22.,
                heating: 95.,
                cooling: 0.,
            },
        )]);
        let mut logbook = Logbook::new(ExistingHomeResults {
            existing_home_sim_results: simulated.clone(),
            comparison: compare(&simulated, &target),
        });
        logbook.calibration_results.push(GenerationRecord {
            generation: 0,
            fitness: summarize(&[3., 4., 5.]),
            best_fitness: 3.,
            best_individual: IndexMap::from([(Adjustment::HeatingSetpointOffset, -1.5)]),
            best_individual_sim_results: Some(simulated.clone()),
            comparison: Some(compare(&simulated, &target)),
            failed_simulations: 0,
        });
        logbook.calibration_success = true;
        logbook
    }

    #[rstest]
    fn should_serialize_with_named_sections(logbook: Logbook) {
        let value = serde_json::to_value(&logbook).unwrap();
        assert_eq!(value["calibration_success"], true);
        assert_eq!(
            value["calibration_results"][0]["best_individual"]["heating_setpoint_offset"],
            -1.5
        );
        assert_eq!(
            value["calibration_results"][0]["best_individual_sim_results"]["natural gas"]["heating"],
            95.
        );
        assert_eq!(
            value["existing_home_results"]["comparison"]["natural gas"]["Absolute Error"]["baseload"],
            2.
        );
    }

    #[rstest]
    fn should_write_through_output(logbook: Logbook) {
        let directory =
            env::temp_dir().join(format!("hpxml-calibration-logbook-{}", std::process::id()));
        let output = FileOutput::new(directory.clone(), "{}.json".to_string());
        logbook.write(&output).unwrap();

        let written: Logbook =
            serde_json::from_str(&fs::read_to_string(directory.join("logbook.json")).unwrap())
                .unwrap();
        assert!(written.calibration_success);
        assert_eq!(written.calibration_results.len(), 1);
        assert_eq!(
            written.calibration_results[0].best_individual,
            logbook.calibration_results[0].best_individual
        );
        assert_eq!(
            written.existing_home_results.existing_home_sim_results,
            logbook.existing_home_results.existing_home_sim_results
        );
        fs::remove_dir_all(&directory).unwrap();
    }
}
