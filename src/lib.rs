pub mod config;
pub mod core;
pub mod errors;
pub mod input;
pub mod output;
pub mod read_weather_file;
pub mod statistics;

pub use crate::core::calibration::CalibrationOutcome;

use crate::config::{CalibrationConfig, SimulatorConfig};
use crate::core::calibration::CalibrationEngine;
use crate::core::consumption::DisaggregatedConsumption;
use crate::core::inverse_model::{BillProjection, InverseModel};
use crate::core::simulators::{DegreeDaySimulator, ExternalCommandSimulator, Simulator};
use crate::core::weather::WeatherSeries;
use crate::input::{BuildingRecord, FuelType};
use crate::output::Output;
use crate::read_weather_file::WeatherProvider;
use indexmap::IndexMap;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument};

pub const NORMALIZED_BILLS_LOCATION_KEY: &str = "normalized_bills";

/// The simulator a configuration asks for. The built-in simulator runs on the reference-year
/// weather, the same weather the calibration target is normalized to.
pub fn build_simulator(
    config: &SimulatorConfig,
    reference_weather: WeatherSeries,
) -> Arc<dyn Simulator> {
    match config {
        SimulatorConfig::DegreeDay => Arc::new(DegreeDaySimulator::new(reference_weather)),
        SimulatorConfig::ExternalCommand {
            program,
            args,
            results_file,
        } => Arc::new(ExternalCommandSimulator::new(
            program.clone(),
            args.clone(),
            PathBuf::from(results_file),
        )),
    }
}

/// Fits the bills of a building record against the weather at its location.
pub fn inverse_model(
    record: &BuildingRecord,
    config: &CalibrationConfig,
    weather: &dyn WeatherProvider,
) -> anyhow::Result<InverseModel> {
    let site = &record.first_building()?.site;
    let billing_weather = weather.billing_period_weather(site.latitude, site.longitude)?;
    let reference_weather = weather.reference_year_weather(site.latitude, site.longitude)?;

    Ok(InverseModel::new(
        record,
        billing_weather,
        reference_weather,
        config,
    )?)
}

#[derive(Debug, Serialize)]
struct NormalizedConsumptionReport {
    building_id: String,
    annual: DisaggregatedConsumption,
    per_bill: IndexMap<FuelType, Vec<BillProjection>>,
}

/// Writes the weather-normalized annual consumption and its per-bill breakdown.
pub fn write_normalized_consumption(
    model: &InverseModel,
    output: &impl Output,
) -> anyhow::Result<()> {
    let report = NormalizedConsumptionReport {
        building_id: model.building_id().to_string(),
        annual: model.target()?,
        per_bill: model.normalized_consumption_per_bill()?,
    };
    if output.is_noop() {
        return Ok(());
    }
    let mut writer = output.writer_for_location_key(NORMALIZED_BILLS_LOCATION_KEY)?;
    serde_json::to_writer_pretty(&mut writer, &report)?;
    writer.flush()?;

    Ok(())
}

/// Calibrates a building against its bills: normalizes the bills into a target, searches for the
/// adjustments that reproduce it and writes the logbook to `output`. Simulations run under
/// `output_dir`.
#[instrument(skip_all)]
pub fn run_calibration(
    record: &BuildingRecord,
    config: CalibrationConfig,
    weather: &dyn WeatherProvider,
    output: impl Output,
    output_dir: PathBuf,
) -> anyhow::Result<CalibrationOutcome> {
    config.check()?;
    let model = inverse_model(record, &config, weather)?;
    let target = Arc::new(model.target()?);
    for (fuel_type, consumption) in target.iter() {
        info!(
            "{fuel_type} target: baseload {:.2}, heating {:.2}, cooling {:.2} MBtu",
            consumption.baseload, consumption.heating, consumption.cooling
        );
    }

    let site = &record.first_building()?.site;
    let simulator = build_simulator(
        &config.simulator,
        weather.reference_year_weather(site.latitude, site.longitude)?,
    );
    let engine = CalibrationEngine::new(config, simulator, output_dir)?;
    let outcome = engine.run(record, target)?;
    outcome.logbook.write(&output)?;

    Ok(outcome)
}
