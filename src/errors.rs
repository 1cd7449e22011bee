use crate::input::FuelType;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Building record was considered invalid due to error: {0}")]
    InvalidDocument(#[from] DocumentError),
    #[error("Utility bill data cannot be used for calibration: {0}")]
    BillData(#[from] BillDataError),
    #[error("Weather data cannot be used for calibration: {0}")]
    WeatherData(#[from] WeatherDataError),
    #[error(transparent)]
    ModelFit(#[from] ModelFitError),
    #[error("Configuration was considered invalid due to error: {0}")]
    InvalidConfiguration(String),
}

/// Errors raised when the building record itself cannot be read or is structurally invalid.
/// These are never repaired, only reported.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Could not parse building record: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Building record failed validation: {0}")]
    Validation(String),
    #[error("Building record does not contain any buildings")]
    NoBuildings,
    #[error("No Consumption section matches the Building ID {0}")]
    NoConsumptionForBuilding(String),
}

#[derive(Debug, Error)]
pub enum BillDataError {
    #[error("No bills were found for fuel type {0}")]
    NoBills(FuelType),
    #[error("Bill for {fuel_type} starting {start} has an end date ({end}) that is not after its start date")]
    NonPositivePeriod {
        fuel_type: FuelType,
        start: NaiveDate,
        end: NaiveDate,
    },
    #[error("Bills for {fuel_type} overlap: period ending {previous_end} overlaps period starting {next_start}")]
    OverlappingPeriods {
        fuel_type: FuelType,
        previous_end: NaiveDate,
        next_start: NaiveDate,
    },
    #[error("Gap of {gap_days} days in {fuel_type} bills between {previous_end} and {next_start} exceeds the tolerance of {max_gap_days} days")]
    GapTooLarge {
        fuel_type: FuelType,
        previous_end: NaiveDate,
        next_start: NaiveDate,
        gap_days: i64,
        max_gap_days: i64,
    },
    #[error("{fuel_type} bills cover {covered_days} days, fewer than the required {min_total_days}")]
    InsufficientDuration {
        fuel_type: FuelType,
        covered_days: i64,
        min_total_days: i64,
    },
    #[error("Only {remaining} {fuel_type} bills remain after excluding periods shorter than {min_period_days} days (at least {min_periods} required)")]
    TooFewPeriods {
        fuel_type: FuelType,
        remaining: usize,
        min_periods: usize,
        min_period_days: i64,
    },
    #[error("Bill for {fuel_type} starting {start} has negative consumption {consumption}")]
    NegativeConsumption {
        fuel_type: FuelType,
        start: NaiveDate,
        consumption: f64,
    },
    #[error("No weather data overlaps the {fuel_type} bill period {start} to {end}")]
    NoOverlappingWeather {
        fuel_type: FuelType,
        start: NaiveDate,
        end: NaiveDate,
    },
    #[error("Unit '{unit}' cannot be used for fuel type {fuel_type}")]
    UnsupportedUnit { fuel_type: FuelType, unit: String },
    #[error("Could not read bill file: {0}")]
    Import(String),
}

#[derive(Debug, Error)]
pub enum WeatherDataError {
    #[error("Weather series is empty")]
    Empty,
    #[error("Weather series is missing {missing_days} day(s) between {start} and {end}")]
    MissingDays {
        start: NaiveDate,
        end: NaiveDate,
        missing_days: i64,
    },
    #[error("Weather series is not in chronological order at {0}")]
    OutOfOrder(NaiveDate),
    #[error("Could not read weather file: {0}")]
    Read(String),
    #[error("No reference weather file was given and the building's weather station names none")]
    NoReferenceWeather,
}

/// The named failure raised when no change-point model variant fits a fuel's bills within the
/// acceptance threshold. Expected for unmodelable consumption patterns, so callers may match on it.
#[derive(Clone, Debug, Error)]
#[error("No change-point model for {fuel_type} achieved a CVRMSE at or below {max_cvrmse}% (best: {best_cvrmse:?})")]
pub struct ModelFitError {
    pub fuel_type: FuelType,
    pub max_cvrmse: f64,
    pub best_cvrmse: Option<f64>,
}
