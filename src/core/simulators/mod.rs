pub mod degree_day;
pub mod external_command;

pub use degree_day::DegreeDaySimulator;
pub use external_command::ExternalCommandSimulator;

use crate::core::consumption::{DisaggregatedConsumption, EndUse, EndUseConsumption};
use crate::input::{BuildingRecord, FuelType};
use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Name of the building document written into each simulation's working directory.
pub const BUILDING_FILE_NAME: &str = "building.json";

/// A black-box annual energy simulation of a building record.
///
/// Implementations are called concurrently from worker threads, each call with its own working
/// directory. The directory already exists and holds the record as [`BUILDING_FILE_NAME`].
pub trait Simulator: Debug + Send + Sync {
    fn simulate(
        &self,
        record: &BuildingRecord,
        working_dir: &Path,
    ) -> anyhow::Result<SimulationResults>;
}

#[derive(Debug, Error)]
pub enum ResultsParseError {
    #[error("Simulation results must be a JSON object")]
    NotAnObject,
    #[error("Simulation result '{0}' is not a number")]
    NotANumber(String),
}

/// Annual energy (MBtu) of one fuel: its total and its breakdown by named end use.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct FuelResults {
    pub total: f64,
    pub end_uses: IndexMap<String, f64>,
}

/// Annual simulation output keyed by fuel.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SimulationResults {
    pub fuels: IndexMap<FuelType, FuelResults>,
}

impl SimulationResults {
    pub fn add_end_use(&mut self, fuel_type: FuelType, end_use: &str, mbtu: f64) {
        let fuel = self.fuels.entry(fuel_type).or_default();
        *fuel.end_uses.entry(end_use.to_string()).or_default() += mbtu;
        fuel.total += mbtu;
    }

    /// Adds every fuel and end use of `other` into these results.
    pub fn accumulate(&mut self, other: &SimulationResults) {
        for (fuel_type, fuel) in &other.fuels {
            for (end_use, mbtu) in &fuel.end_uses {
                self.add_end_use(*fuel_type, end_use, *mbtu);
            }
        }
    }

    pub fn total(&self, fuel_type: FuelType) -> f64 {
        self.fuels.get(&fuel_type).map_or(0., |fuel| fuel.total)
    }

    /// Collapses named end uses into baseload, heating and cooling per fuel.
    pub fn disaggregate(&self) -> DisaggregatedConsumption {
        self.fuels
            .iter()
            .map(|(fuel_type, fuel)| {
                let mut consumption = EndUseConsumption::default();
                for (end_use, mbtu) in &fuel.end_uses {
                    consumption.add(end_use_category(end_use), *mbtu);
                }
                (*fuel_type, consumption)
            })
            .collect()
    }

    /// Parses annual results in OpenStudio-HPXML's JSON layout. Both the flat form
    /// (`"End Use: Natural Gas: Heating (MBtu)"`) and the form nested by section
    /// (`{"End Use": {"Natural Gas: Heating (MBtu)": ..}}`) are accepted. Fuels this crate does
    /// not model are ignored.
    pub fn from_annual_json(value: &Value) -> Result<Self, ResultsParseError> {
        let Value::Object(_) = value else {
            return Err(ResultsParseError::NotAnObject);
        };
        let mut flat = vec![];
        flatten_results(None, value, &mut flat)?;

        let mut results = Self::default();
        let mut reported_totals: IndexMap<FuelType, f64> = Default::default();
        for (key, mbtu) in flat {
            let Some(key) = key.strip_suffix(" (MBtu)") else {
                continue;
            };
            let mut parts = key.splitn(3, ": ");
            let (Some(section), Some(fuel_label), Some(name)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let Some(fuel_type) = fuel_type_from_results_label(fuel_label) else {
                debug!("Ignoring results for unmodelled fuel '{fuel_label}'");
                continue;
            };
            match (section, name) {
                ("End Use", _) => results.add_end_use(fuel_type, name, mbtu),
                ("Fuel Use", "Total") => {
                    reported_totals.insert(fuel_type, mbtu);
                }
                _ => {}
            }
        }
        for (fuel_type, total) in reported_totals {
            results.fuels.entry(fuel_type).or_default().total = total;
        }

        Ok(results)
    }

    pub fn read_annual_json(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Could not open simulation results {}", path.display()))?;
        let value: Value = serde_json::from_reader(BufReader::new(file))?;

        Ok(Self::from_annual_json(&value)?)
    }

    /// The flat OpenStudio-HPXML layout that [`SimulationResults::from_annual_json`] reads.
    pub fn to_annual_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (fuel_type, fuel) in &self.fuels {
            let label = results_label(*fuel_type);
            map.insert(
                format!("Fuel Use: {label}: Total (MBtu)"),
                Value::from(fuel.total),
            );
            for (end_use, mbtu) in &fuel.end_uses {
                map.insert(
                    format!("End Use: {label}: {end_use} (MBtu)"),
                    Value::from(*mbtu),
                );
            }
        }

        Value::Object(map)
    }
}

fn flatten_results(
    prefix: Option<&str>,
    value: &Value,
    flat: &mut Vec<(String, f64)>,
) -> Result<(), ResultsParseError> {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                let key = match prefix {
                    Some(prefix) => format!("{prefix}: {key}"),
                    None => key.clone(),
                };
                flatten_results(Some(&key), value, flat)?;
            }
        }
        Value::Number(number) => {
            let key = prefix.unwrap_or_default().to_string();
            let mbtu = number
                .as_f64()
                .ok_or_else(|| ResultsParseError::NotANumber(key.clone()))?;
            flat.push((key, mbtu));
        }
        Value::Null => {}
        _ => {
            if let Some(key) = prefix.filter(|key| key.ends_with("(MBtu)")) {
                return Err(ResultsParseError::NotANumber(key.to_string()));
            }
        }
    }

    Ok(())
}

/// Category of a named simulator end use. Fans, pumps and backup heat count with the service
/// they support; everything else is baseload.
pub fn end_use_category(end_use: &str) -> EndUse {
    if end_use.starts_with("Heating") {
        EndUse::Heating
    } else if end_use.starts_with("Cooling") {
        EndUse::Cooling
    } else {
        EndUse::Baseload
    }
}

fn fuel_type_from_results_label(label: &str) -> Option<FuelType> {
    match label.to_lowercase().as_str() {
        "wood cord" => Some(FuelType::Wood),
        other => FuelType::from_str(other).ok(),
    }
}

fn results_label(fuel_type: FuelType) -> &'static str {
    match fuel_type {
        FuelType::Electricity => "Electricity",
        FuelType::NaturalGas => "Natural Gas",
        FuelType::FuelOil => "Fuel Oil",
        FuelType::Propane => "Propane",
        FuelType::Wood => "Wood Cord",
        FuelType::WoodPellets => "Wood Pellets",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use serde_json::json;

    #[fixture]
    fn annual_results() -> Value {
        json!({
            "Fuel Use: Electricity: Total (MBtu)": 36.0,
            "Fuel Use: Natural Gas: Total (MBtu)": 178.0,
            "Fuel Use: Coal: Total (MBtu)": 0.0,
            "End Use: Electricity: Cooling (MBtu)": 8.1,
            "End Use: Electricity: Cooling Fans/Pumps (MBtu)": 1.2,
            "End Use: Electricity: Heating Fans/Pumps (MBtu)": 0.7,
            "End Use: Electricity: Lighting Interior (MBtu)": 5.0,
            "End Use: Electricity: Plug Loads (MBtu)": 21.0,
            "End Use: Natural Gas: Heating (MBtu)": 151.7,
            "End Use: Natural Gas: Hot Water (MBtu)": 26.3,
            "End Use: Coal: Heating (MBtu)": 0.0,
            "Load: Heating: Delivered (MBtu)": 120.0,
            "Unmet Hours: Heating (hr)": 0.0,
        })
    }

    #[rstest]
    fn should_parse_flat_results(annual_results: Value) {
        let results = SimulationResults::from_annual_json(&annual_results).unwrap();
        assert_eq!(
            results.fuels.keys().copied().collect::<Vec<_>>(),
            vec![FuelType::Electricity, FuelType::NaturalGas]
        );
        assert_relative_eq!(results.total(FuelType::Electricity), 36.0);
        assert_relative_eq!(
            results.fuels[&FuelType::NaturalGas].end_uses["Hot Water"],
            26.3
        );
    }

    #[rstest]
    fn should_disaggregate_end_uses(annual_results: Value) {
        let results = SimulationResults::from_annual_json(&annual_results).unwrap();
        let disaggregated = results.disaggregate();

        let electricity = disaggregated[&FuelType::Electricity];
        assert_relative_eq!(electricity.cooling, 9.3, epsilon = 1e-9);
        assert_relative_eq!(electricity.heating, 0.7, epsilon = 1e-9);
        assert_relative_eq!(electricity.baseload, 26.0, epsilon = 1e-9);
        assert_eq!(
            disaggregated[&FuelType::NaturalGas],
            EndUseConsumption {
                baseload: 26.3,
                heating: 151.7,
                cooling: 0.
            }
        );
    }

    #[rstest]
    fn should_parse_results_nested_by_section() {
        let nested = json!({
            "End Use": {"Natural Gas: Heating (MBtu)": 10.0, "Natural Gas: Hot Water (MBtu)": 2.5},
            "Fuel Use": {"Natural Gas: Total (MBtu)": 12.5},
        });
        let results = SimulationResults::from_annual_json(&nested).unwrap();
        assert_relative_eq!(results.total(FuelType::NaturalGas), 12.5);
        assert_relative_eq!(results.disaggregate()[&FuelType::NaturalGas].heating, 10.0);
    }

    #[rstest]
    fn should_reject_non_numeric_energy() {
        let result =
            SimulationResults::from_annual_json(&json!({"End Use: Propane: Heating (MBtu)": "a lot"}));
        assert!(matches!(result, Err(ResultsParseError::NotANumber(_))));
        assert!(matches!(
            SimulationResults::from_annual_json(&json!([1, 2])),
            Err(ResultsParseError::NotAnObject)
        ));
    }

    #[rstest]
    fn should_write_what_it_reads(annual_results: Value) {
        let results = SimulationResults::from_annual_json(&annual_results).unwrap();
        let reread = SimulationResults::from_annual_json(&results.to_annual_json()).unwrap();
        assert_eq!(reread, results);
    }

    #[rstest]
    #[case("Heating Heat Pump Backup", EndUse::Heating)]
    #[case("Cooling Fans/Pumps", EndUse::Cooling)]
    #[case("Hot Water", EndUse::Baseload)]
    #[case("Range/Oven", EndUse::Baseload)]
    fn should_categorize_end_uses(#[case] name: &str, #[case] expected: EndUse) {
        assert_eq!(end_use_category(name), expected);
    }
}
