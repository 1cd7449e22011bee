use crate::input::FuelType;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

pub const HOURS_PER_DAY: u32 = 24;
pub const DAYS_PER_YEAR: u32 = 365;
pub const KBTU_PER_MBTU: f64 = 1_000.;
pub const BTU_PER_KBTU: f64 = 1_000.;
pub const KBTU_PER_KWH: f64 = 3.412_141_63;
pub const KBTU_PER_THERM: f64 = 100.;
// heat content of delivered and piped fuels, per EIA
pub const KBTU_PER_CCF_NATURAL_GAS: f64 = 103.7;
pub const KBTU_PER_GALLON_FUEL_OIL: f64 = 138.5;
pub const KBTU_PER_GALLON_PROPANE: f64 = 91.6;
pub const KBTU_PER_CORD_WOOD: f64 = 20_000.;
pub const KBTU_PER_LB_WOOD_PELLETS: f64 = 8.;

pub fn celsius_to_fahrenheit(temp_c: f64) -> f64 {
    temp_c * 1.8 + 32.
}

pub fn fahrenheit_to_celsius(temp_f: f64) -> f64 {
    (temp_f - 32.) / 1.8
}

pub fn kbtu_to_mbtu(kbtu: f64) -> f64 {
    kbtu / KBTU_PER_MBTU
}

/// Units that utility bills are reported in.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum EnergyUnit {
    #[serde(rename = "Btu")]
    Btu,
    #[serde(rename = "kBtu")]
    KBtu,
    #[serde(rename = "MBtu")]
    MBtu,
    #[serde(rename = "kWh")]
    KWh,
    #[serde(rename = "MWh")]
    MWh,
    #[serde(rename = "therms")]
    Therms,
    #[serde(rename = "ccf")]
    Ccf,
    #[serde(rename = "kcf")]
    Kcf,
    #[serde(rename = "Mcf")]
    Mcf,
    #[serde(rename = "gal")]
    Gallons,
    #[serde(rename = "cord")]
    Cords,
    #[serde(rename = "lbs")]
    Pounds,
}

impl EnergyUnit {
    /// Converts an amount in this unit of the given fuel into kBtu.
    pub fn to_kbtu(&self, amount: f64, fuel_type: FuelType) -> Result<f64, UnitConversionError> {
        let factor = match (self, fuel_type) {
            (EnergyUnit::Btu, _) => 1. / BTU_PER_KBTU,
            (EnergyUnit::KBtu, _) => 1.,
            (EnergyUnit::MBtu, _) => KBTU_PER_MBTU,
            (EnergyUnit::KWh, _) => KBTU_PER_KWH,
            (EnergyUnit::MWh, _) => KBTU_PER_KWH * 1_000.,
            (EnergyUnit::Therms, _) => KBTU_PER_THERM,
            (EnergyUnit::Ccf, FuelType::NaturalGas) => KBTU_PER_CCF_NATURAL_GAS,
            (EnergyUnit::Kcf | EnergyUnit::Mcf, FuelType::NaturalGas) => {
                KBTU_PER_CCF_NATURAL_GAS * 10.
            }
            (EnergyUnit::Gallons, FuelType::FuelOil) => KBTU_PER_GALLON_FUEL_OIL,
            (EnergyUnit::Gallons, FuelType::Propane) => KBTU_PER_GALLON_PROPANE,
            (EnergyUnit::Cords, FuelType::Wood) => KBTU_PER_CORD_WOOD,
            (EnergyUnit::Pounds, FuelType::WoodPellets) => KBTU_PER_LB_WOOD_PELLETS,
            (unit, fuel_type) => {
                return Err(UnitConversionError {
                    unit: *unit,
                    fuel_type,
                })
            }
        };

        Ok(amount * factor)
    }
}

impl Display for EnergyUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EnergyUnit::Btu => "Btu",
            EnergyUnit::KBtu => "kBtu",
            EnergyUnit::MBtu => "MBtu",
            EnergyUnit::KWh => "kWh",
            EnergyUnit::MWh => "MWh",
            EnergyUnit::Therms => "therms",
            EnergyUnit::Ccf => "ccf",
            EnergyUnit::Kcf => "kcf",
            EnergyUnit::Mcf => "Mcf",
            EnergyUnit::Gallons => "gal",
            EnergyUnit::Cords => "cord",
            EnergyUnit::Pounds => "lbs",
        };
        write!(f, "{label}")
    }
}

impl FromStr for EnergyUnit {
    type Err = UnknownUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_string()))
            .map_err(|_| UnknownUnitError(s.to_string()))
    }
}

#[derive(Debug, Error)]
#[error("Energy unit {unit} cannot be converted for fuel type {fuel_type}")]
pub struct UnitConversionError {
    pub unit: EnergyUnit,
    pub fuel_type: FuelType,
}

#[derive(Debug, Error)]
#[error("Unknown energy unit '{0}'")]
pub struct UnknownUnitError(String);

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::*;

    #[rstest]
    #[case(0., 32.)]
    #[case(100., 212.)]
    #[case(-40., -40.)]
    fn should_convert_celsius_to_fahrenheit(#[case] c: f64, #[case] f: f64) {
        assert_relative_eq!(celsius_to_fahrenheit(c), f);
        assert_relative_eq!(fahrenheit_to_celsius(f), c, epsilon = 1e-12);
    }

    #[rstest]
    fn should_convert_kwh_for_any_fuel() {
        assert_relative_eq!(
            EnergyUnit::KWh.to_kbtu(1000., FuelType::Electricity).unwrap(),
            3412.14163
        );
    }

    #[rstest]
    fn should_convert_therms_and_ccf_of_gas() {
        assert_relative_eq!(
            EnergyUnit::Therms
                .to_kbtu(14., FuelType::NaturalGas)
                .unwrap(),
            1400.
        );
        assert_relative_eq!(
            EnergyUnit::Ccf.to_kbtu(10., FuelType::NaturalGas).unwrap(),
            1037.
        );
    }

    #[rstest]
    fn should_reject_gallons_of_electricity() {
        assert!(EnergyUnit::Gallons
            .to_kbtu(1., FuelType::Electricity)
            .is_err());
    }

    #[rstest]
    fn should_parse_units_from_bill_file_labels() {
        assert_eq!("kWh".parse::<EnergyUnit>().unwrap(), EnergyUnit::KWh);
        assert_eq!(" therms".parse::<EnergyUnit>().unwrap(), EnergyUnit::Therms);
        assert!("furlongs".parse::<EnergyUnit>().is_err());
    }
}
