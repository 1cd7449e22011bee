use crate::core::building_modifications::Adjustment;
use crate::errors::CalibrationError;
use crate::input::FuelType;
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use strum::IntoEnumIterator;

/// Declarative settings for a calibration run. Every section is optional in a configuration
/// document; missing sections take their defaults.
#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationConfig {
    #[validate]
    pub acceptance_criteria: AcceptanceCriteria,
    #[validate]
    pub genetic_algorithm: GeneticAlgorithmConfig,
    #[validate]
    pub fitness: FitnessConfig,
    pub parameters: IndexMap<Adjustment, ParameterBounds>,
    #[validate]
    pub bills: BillValidationConfig,
    pub billing_period: BillingPeriodOverride,
    #[validate]
    pub regression: RegressionConfig,
    pub simulator: SimulatorConfig,
    #[validate(minimum = 1)]
    pub num_proc: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            acceptance_criteria: Default::default(),
            genetic_algorithm: Default::default(),
            fitness: Default::default(),
            parameters: Adjustment::iter()
                .map(|adjustment| (adjustment, adjustment.default_bounds().into()))
                .collect(),
            bills: Default::default(),
            billing_period: Default::default(),
            regression: Default::default(),
            simulator: Default::default(),
            num_proc: 1,
        }
    }
}

/// Thresholds deciding when a regression fit, and when a calibrated model, is good enough.
///
/// `cvrmse_threshold` has no serde default: a document that gives an acceptance block without it
/// opts out of the strict criteria and the simplified set is used instead.
#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AcceptanceCriteria {
    #[serde(default = "default_bill_regression_max_cvrmse")]
    #[validate(exclusive_minimum = 0.)]
    pub bill_regression_max_cvrmse: f64,
    /// Maximum CVRMSE (%) between simulated and target end uses, per fuel type.
    pub cvrmse_threshold: Option<f64>,
    /// Maximum absolute bias (% of target) per fuel type.
    #[serde(default = "default_bias_error_threshold")]
    #[validate(exclusive_minimum = 0.)]
    pub bias_error_threshold: f64,
    #[serde(default)]
    #[validate]
    pub simplified: SimplifiedCriteria,
    /// Per-fuel replacements for the thresholds above.
    #[serde(default)]
    pub fuel_overrides: IndexMap<FuelType, ThresholdOverride>,
}

fn default_bill_regression_max_cvrmse() -> f64 {
    20.
}

fn default_bias_error_threshold() -> f64 {
    5.
}

impl Default for AcceptanceCriteria {
    fn default() -> Self {
        Self {
            bill_regression_max_cvrmse: default_bill_regression_max_cvrmse(),
            cvrmse_threshold: Some(15.),
            bias_error_threshold: default_bias_error_threshold(),
            simplified: Default::default(),
            fuel_overrides: Default::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct SimplifiedCriteria {
    #[validate(exclusive_minimum = 0.)]
    pub bias_error_threshold: f64,
    /// Relaxed CVRMSE threshold; `None` makes the simplified set bias-only.
    pub cvrmse_threshold: Option<f64>,
}

impl Default for SimplifiedCriteria {
    fn default() -> Self {
        Self {
            bias_error_threshold: 10.,
            cvrmse_threshold: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdOverride {
    pub cvrmse_threshold: Option<f64>,
    pub bias_error_threshold: Option<f64>,
}

/// The thresholds actually applied to one fuel type.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FuelThresholds {
    pub cvrmse: Option<f64>,
    pub bias_error_percent: f64,
    pub simplified: bool,
}

impl AcceptanceCriteria {
    pub fn uses_simplified_criteria(&self) -> bool {
        self.cvrmse_threshold.is_none()
    }

    pub fn thresholds_for(&self, fuel_type: FuelType) -> FuelThresholds {
        let (cvrmse, bias_error_percent, simplified) = match self.cvrmse_threshold {
            Some(cvrmse) => (Some(cvrmse), self.bias_error_threshold, false),
            None => (
                self.simplified.cvrmse_threshold,
                self.simplified.bias_error_threshold,
                true,
            ),
        };
        let fuel_override = self.fuel_overrides.get(&fuel_type);

        FuelThresholds {
            cvrmse: fuel_override
                .and_then(|o| o.cvrmse_threshold)
                .or(cvrmse),
            bias_error_percent: fuel_override
                .and_then(|o| o.bias_error_threshold)
                .unwrap_or(bias_error_percent),
            simplified,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct GeneticAlgorithmConfig {
    #[validate(minimum = 2)]
    pub population_size: usize,
    #[validate(minimum = 1)]
    pub generations: usize,
    pub elite_count: usize,
    #[validate(minimum = 1)]
    pub tournament_size: usize,
    #[validate(minimum = 0.)]
    #[validate(maximum = 1.)]
    pub crossover_probability: f64,
    #[validate(minimum = 0.)]
    #[validate(maximum = 1.)]
    pub mutation_probability: f64,
    /// Standard deviation of a mutation as a fraction of the parameter's range.
    #[validate(exclusive_minimum = 0.)]
    pub mutation_scale: f64,
    pub random_seed: u64,
}

impl Default for GeneticAlgorithmConfig {
    fn default() -> Self {
        Self {
            population_size: 20,
            generations: 30,
            elite_count: 2,
            tournament_size: 3,
            crossover_probability: 0.8,
            mutation_probability: 0.2,
            mutation_scale: 0.1,
            random_seed: 42,
        }
    }
}

/// Weights combining the comparison metrics into a single fitness (lower is better).
#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct FitnessConfig {
    #[validate(minimum = 0.)]
    pub absolute_error_weight: f64,
    #[validate(minimum = 0.)]
    pub bias_error_weight: f64,
    #[validate(minimum = 0.)]
    pub cvrmse_weight: f64,
    /// Fitness given to an individual whose simulation failed.
    #[validate(exclusive_minimum = 0.)]
    pub failure_penalty: f64,
}

impl Default for FitnessConfig {
    fn default() -> Self {
        Self {
            absolute_error_weight: 1.,
            bias_error_weight: 1.,
            cvrmse_weight: 1.,
            failure_penalty: 1e9,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterBounds {
    pub lower: f64,
    pub upper: f64,
}

impl ParameterBounds {
    pub fn range(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }
}

impl From<(f64, f64)> for ParameterBounds {
    fn from((lower, upper): (f64, f64)) -> Self {
        Self { lower, upper }
    }
}

/// Rules deciding whether a fuel's bills are usable.
#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct BillValidationConfig {
    #[validate(minimum = 1)]
    pub min_period_days: i64,
    #[validate(minimum = 1)]
    pub min_periods: usize,
    #[validate(minimum = 0)]
    pub max_gap_days: i64,
    #[validate(minimum = 1)]
    pub min_total_days: i64,
}

impl Default for BillValidationConfig {
    fn default() -> Self {
        Self {
            min_period_days: 20,
            min_periods: 6,
            max_gap_days: 30,
            min_total_days: 300,
        }
    }
}

/// Billing period boundaries used when the first bill has no start date or the last bill has
/// no end date.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BillingPeriodOverride {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct RegressionConfig {
    /// Spacing (°F) of candidate breakpoints.
    #[validate(exclusive_minimum = 0.)]
    pub breakpoint_step: f64,
    /// Base temperature (°F) for the degree days reported with each normalized bill.
    pub degree_day_base: f64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            breakpoint_step: 0.5,
            degree_day_base: 65.,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimulatorConfig {
    #[default]
    DegreeDay,
    ExternalCommand {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_results_file")]
        results_file: String,
    },
}

fn default_results_file() -> String {
    "run/results_annual.json".to_string()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl CalibrationConfig {
    pub fn parse(contents: &str, format: ConfigFormat) -> Result<Self, CalibrationError> {
        let config: Self = match format {
            ConfigFormat::Json => serde_json::from_str(contents)
                .map_err(|e| CalibrationError::InvalidConfiguration(e.to_string()))?,
            ConfigFormat::Yaml => serde_yaml::from_str(contents)
                .map_err(|e| CalibrationError::InvalidConfiguration(e.to_string()))?,
        };
        config.check()?;

        Ok(config)
    }

    /// Loads a configuration file, choosing the format from the extension (`.json`, else YAML).
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let format = match path.extension().and_then(OsStr::to_str) {
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        };

        Ok(Self::parse(&contents, format)?)
    }

    pub fn check(&self) -> Result<(), CalibrationError> {
        self.validate()
            .map_err(|errors| CalibrationError::InvalidConfiguration(errors.to_string()))?;

        let ga = &self.genetic_algorithm;
        if ga.elite_count >= ga.population_size {
            return Err(CalibrationError::InvalidConfiguration(format!(
                "elite_count ({}) must be smaller than population_size ({})",
                ga.elite_count, ga.population_size
            )));
        }
        if ga.tournament_size > ga.population_size {
            return Err(CalibrationError::InvalidConfiguration(format!(
                "tournament_size ({}) cannot exceed population_size ({})",
                ga.tournament_size, ga.population_size
            )));
        }
        if self.parameters.is_empty() {
            return Err(CalibrationError::InvalidConfiguration(
                "at least one calibration parameter is required".to_string(),
            ));
        }
        for (adjustment, bounds) in &self.parameters {
            if !(bounds.lower.is_finite() && bounds.upper.is_finite()) || bounds.lower > bounds.upper {
                return Err(CalibrationError::InvalidConfiguration(format!(
                    "bounds for {adjustment} are invalid: lower {} upper {}",
                    bounds.lower, bounds.upper
                )));
            }
            if !adjustment.is_offset() && bounds.lower <= 0. {
                return Err(CalibrationError::InvalidConfiguration(format!(
                    "multiplier {adjustment} must have a positive lower bound"
                )));
            }
        }
        let criteria = &self.acceptance_criteria;
        let thresholds = criteria
            .cvrmse_threshold
            .into_iter()
            .chain(criteria.simplified.cvrmse_threshold)
            .chain(criteria.fuel_overrides.values().flat_map(|o| {
                o.cvrmse_threshold.into_iter().chain(o.bias_error_threshold)
            }));
        for threshold in thresholds {
            if threshold <= 0. {
                return Err(CalibrationError::InvalidConfiguration(format!(
                    "acceptance thresholds must be positive, got {threshold}"
                )));
            }
        }
        if let (Some(start), Some(end)) = (self.billing_period.start, self.billing_period.end) {
            if start >= end {
                return Err(CalibrationError::InvalidConfiguration(format!(
                    "billing period start {start} is not before its end {end}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    fn should_use_strict_criteria_by_default() {
        let config = CalibrationConfig::parse("{}", ConfigFormat::Json).unwrap();
        assert!(!config.acceptance_criteria.uses_simplified_criteria());
        assert_eq!(
            config.acceptance_criteria.thresholds_for(FuelType::Electricity),
            FuelThresholds {
                cvrmse: Some(15.),
                bias_error_percent: 5.,
                simplified: false,
            }
        );
        assert_eq!(config.parameters.len(), Adjustment::iter().count());
    }

    #[rstest]
    fn should_switch_to_simplified_criteria_when_cvrmse_is_omitted() {
        let yaml = "
acceptance_criteria:
  bill_regression_max_cvrmse: 20
  bias_error_threshold: 5
  simplified:
    bias_error_threshold: 12
";
        let config = CalibrationConfig::parse(yaml, ConfigFormat::Yaml).unwrap();
        assert!(config.acceptance_criteria.uses_simplified_criteria());
        assert_eq!(
            config.acceptance_criteria.thresholds_for(FuelType::NaturalGas),
            FuelThresholds {
                cvrmse: None,
                bias_error_percent: 12.,
                simplified: true,
            }
        );
    }

    #[rstest]
    fn should_apply_fuel_overrides() {
        let yaml = "
acceptance_criteria:
  cvrmse_threshold: 15
  fuel_overrides:
    natural gas:
      bias_error_threshold: 8
";
        let config = CalibrationConfig::parse(yaml, ConfigFormat::Yaml).unwrap();
        let thresholds = config.acceptance_criteria.thresholds_for(FuelType::NaturalGas);
        assert_eq!(thresholds.bias_error_percent, 8.);
        assert_eq!(thresholds.cvrmse, Some(15.));
    }

    #[rstest]
    fn should_read_parameter_bounds_in_order() {
        let yaml = "
parameters:
  misc_load_multiplier: {lower: 0.5, upper: 1.5}
  heating_setpoint_offset: {lower: -3, upper: 3}
";
        let config = CalibrationConfig::parse(yaml, ConfigFormat::Yaml).unwrap();
        let names: Vec<_> = config.parameters.keys().copied().collect();
        assert_eq!(
            names,
            vec![
                Adjustment::MiscLoadMultiplier,
                Adjustment::HeatingSetpointOffset
            ]
        );
    }

    #[rstest]
    #[case("genetic_algorithm: {population_size: 4, elite_count: 4}")]
    #[case("genetic_algorithm: {mutation_probability: 1.5}")]
    #[case("parameters: {air_leakage_multiplier: {lower: 2, upper: 1}}")]
    #[case("parameters: {lighting_load_multiplier: {lower: 0, upper: 1}}")]
    #[case("acceptance_criteria: {cvrmse_threshold: -1}")]
    #[case("regression: {breakpoint_step: 0}")]
    #[case("unknown_section: 1")]
    fn should_reject_invalid_configuration(#[case] yaml: &str) {
        assert!(matches!(
            CalibrationConfig::parse(yaml, ConfigFormat::Yaml),
            Err(CalibrationError::InvalidConfiguration(_))
        ));
    }

    #[rstest]
    fn should_read_external_simulator_settings() {
        let json = r#"{"simulator": {"type": "external_command", "program": "openstudio", "args": ["run"]}}"#;
        let config = CalibrationConfig::parse(json, ConfigFormat::Json).unwrap();
        match config.simulator {
            SimulatorConfig::ExternalCommand {
                program,
                args,
                results_file,
            } => {
                assert_eq!(program, "openstudio");
                assert_eq!(args, vec!["run".to_string()]);
                assert_eq!(results_file, "run/results_annual.json");
            }
            other => panic!("unexpected simulator {other:?}"),
        }
    }
}
