use crate::core::units::EnergyUnit;
use crate::errors::{BillDataError, DocumentError};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_valid::Validate;
use std::collections::BTreeSet;
use std::io::{BufReader, Read};
use std::path::Path;
use strum_macros::{Display, EnumIter, EnumString};

pub fn ingest_building_record(json: impl Read) -> Result<BuildingRecord, DocumentError> {
    let record: BuildingRecord = serde_json::from_reader(BufReader::new(json))?;
    record
        .validate()
        .map_err(|errors| DocumentError::Validation(errors.to_string()))?;
    record.check_integrity()?;

    Ok(record)
}

/// Fuel types that can appear on a utility bill or a simulation result.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum FuelType {
    #[serde(rename = "electricity")]
    #[strum(serialize = "electricity")]
    Electricity,
    #[serde(rename = "natural gas")]
    #[strum(serialize = "natural gas")]
    NaturalGas,
    #[serde(rename = "fuel oil")]
    #[strum(serialize = "fuel oil")]
    FuelOil,
    #[serde(rename = "propane")]
    #[strum(serialize = "propane")]
    Propane,
    #[serde(rename = "wood")]
    #[strum(serialize = "wood")]
    Wood,
    #[serde(rename = "wood pellets")]
    #[strum(serialize = "wood pellets")]
    WoodPellets,
}

impl FuelType {
    /// Delivered fuels are bought in batches (tank fills, cords) rather than metered, so their
    /// bills carry no temperature-correlated signal.
    pub fn is_delivered(&self) -> bool {
        matches!(
            self,
            FuelType::FuelOil | FuelType::Propane | FuelType::Wood | FuelType::WoodPellets
        )
    }

    /// Whether bills of this fuel can be weather-normalized with a change-point regression.
    pub fn is_regressable(&self) -> bool {
        !self.is_delivered()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct BuildingRecord {
    #[validate]
    pub building: Vec<Building>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumption: Vec<Consumption>,
}

impl BuildingRecord {
    pub fn first_building(&self) -> Result<&Building, DocumentError> {
        self.building.first().ok_or(DocumentError::NoBuildings)
    }

    pub fn first_building_mut(&mut self) -> Result<&mut Building, DocumentError> {
        self.building.first_mut().ok_or(DocumentError::NoBuildings)
    }

    pub fn first_building_id(&self) -> Result<&str, DocumentError> {
        Ok(self.first_building()?.building_id.as_str())
    }

    pub fn consumption_for_building(&self, building_id: &str) -> Result<&Consumption, DocumentError> {
        self.consumption
            .iter()
            .find(|consumption| consumption.building_id == building_id)
            .ok_or_else(|| DocumentError::NoConsumptionForBuilding(building_id.to_string()))
    }

    /// Inserts a consumption section built from imported bills, tagged with the first building's
    /// id. Any existing section for that building is replaced. Fuel types keep the order in which
    /// they first appear in the bills.
    pub fn insert_bills(&mut self, bills: &[ImportedBill]) -> Result<(), DocumentError> {
        let building_id = self.first_building_id()?.to_string();

        let mut infos: IndexMap<(FuelType, EnergyUnit), Vec<ConsumptionDetail>> =
            Default::default();
        for bill in bills {
            infos
                .entry((bill.fuel_type, bill.unit))
                .or_default()
                .push(ConsumptionDetail {
                    start_date_time: Some(bill.start),
                    end_date_time: Some(bill.end),
                    consumption: bill.consumption,
                });
        }

        let consumption = Consumption {
            building_id: building_id.clone(),
            consumption_details: ConsumptionDetails {
                consumption_info: infos
                    .into_iter()
                    .map(|((fuel_type, units), consumption_detail)| ConsumptionInfo {
                        fuel_type,
                        units,
                        consumption_detail,
                    })
                    .collect(),
            },
        };

        self.consumption
            .retain(|existing| existing.building_id != building_id);
        self.consumption.push(consumption);

        Ok(())
    }

    fn check_integrity(&self) -> Result<(), DocumentError> {
        if self.building.is_empty() {
            return Err(DocumentError::NoBuildings);
        }
        let mut ids = BTreeSet::new();
        for building in &self.building {
            if !ids.insert(building.building_id.as_str()) {
                return Err(DocumentError::Validation(format!(
                    "Building ID {} is used more than once",
                    building.building_id
                )));
            }
            building.building_details.check_integrity()?;
        }
        for consumption in &self.consumption {
            if !ids.contains(consumption.building_id.as_str()) {
                return Err(DocumentError::Validation(format!(
                    "Consumption section references unknown Building ID {}",
                    consumption.building_id
                )));
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Building {
    #[serde(rename = "BuildingID")]
    pub building_id: String,
    #[validate]
    pub site: Site,
    #[validate]
    pub building_details: BuildingDetails,
}

#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Site {
    #[validate(minimum = -90.)]
    #[validate(maximum = 90.)]
    pub latitude: f64,
    #[validate(minimum = -180.)]
    #[validate(maximum = 180.)]
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_station: Option<WeatherStation>,
}

impl Site {
    pub fn epw_file_path(&self) -> Option<&Path> {
        self.weather_station
            .as_ref()
            .and_then(|station| station.epw_file_path.as_deref())
            .map(Path::new)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct WeatherStation {
    pub name: String,
    #[serde(rename = "EPWFilePath", skip_serializing_if = "Option::is_none")]
    pub epw_file_path: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct BuildingDetails {
    #[validate(exclusive_minimum = 0.)]
    pub conditioned_floor_area: f64,
    #[serde(default = "default_ceiling_height")]
    #[validate(exclusive_minimum = 0.)]
    pub average_ceiling_height: f64,
    #[validate]
    pub enclosure: Enclosure,
    pub systems: Systems,
    #[serde(default)]
    pub appliances: Vec<Appliance>,
    #[serde(default)]
    pub lighting: Lighting,
    #[serde(default)]
    pub misc_loads: MiscLoads,
}

fn default_ceiling_height() -> f64 {
    8.
}

fn default_fraction_served() -> f64 {
    1.
}

/// Fuels serving space heating and space cooling for a building.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConditioningFuels {
    pub heating: BTreeSet<FuelType>,
    pub cooling: BTreeSet<FuelType>,
}

impl ConditioningFuels {
    pub fn serves_heating(&self, fuel_type: FuelType) -> bool {
        self.heating.contains(&fuel_type)
    }

    pub fn serves_cooling(&self, fuel_type: FuelType) -> bool {
        self.cooling.contains(&fuel_type)
    }
}

impl BuildingDetails {
    pub fn conditioning_fuels(&self) -> ConditioningFuels {
        let mut fuels = ConditioningFuels::default();
        for heating_system in &self.systems.heating_systems {
            if heating_system.fraction_heat_load_served > 0. {
                fuels.heating.insert(heating_system.heating_system_fuel);
            }
        }
        for cooling_system in &self.systems.cooling_systems {
            if cooling_system.fraction_cool_load_served > 0. {
                fuels.cooling.insert(FuelType::Electricity);
            }
        }
        for heat_pump in &self.systems.heat_pumps {
            if heat_pump.fraction_heat_load_served > 0. {
                fuels.heating.insert(FuelType::Electricity);
                if let Some(backup_fuel) = heat_pump.backup_heating_fuel {
                    fuels.heating.insert(backup_fuel);
                }
            }
            if heat_pump.fraction_cool_load_served > 0. {
                fuels.cooling.insert(FuelType::Electricity);
            }
        }

        fuels
    }

    /// Building volume in cubic feet.
    pub fn conditioned_volume(&self) -> f64 {
        self.conditioned_floor_area * self.average_ceiling_height
    }

    fn check_integrity(&self) -> Result<(), DocumentError> {
        let systems = &self.systems;
        let heat_fraction: f64 = systems
            .heating_systems
            .iter()
            .map(|system| system.fraction_heat_load_served)
            .chain(
                systems
                    .heat_pumps
                    .iter()
                    .map(|heat_pump| heat_pump.fraction_heat_load_served),
            )
            .sum();
        let cool_fraction: f64 = systems
            .cooling_systems
            .iter()
            .map(|system| system.fraction_cool_load_served)
            .chain(
                systems
                    .heat_pumps
                    .iter()
                    .map(|heat_pump| heat_pump.fraction_cool_load_served),
            )
            .sum();
        if heat_fraction > 1.0001 || cool_fraction > 1.0001 {
            return Err(DocumentError::Validation(format!(
                "Fractions of load served sum to more than one (heating: {heat_fraction}, cooling: {cool_fraction})"
            )));
        }
        for water_heater in &systems.water_heating_systems {
            if water_heater.energy_factor.is_none() && water_heater.uniform_energy_factor.is_none()
            {
                return Err(DocumentError::Validation(format!(
                    "Water heater {} has neither EnergyFactor nor UniformEnergyFactor",
                    water_heater.id
                )));
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Enclosure {
    pub air_infiltration: AirInfiltration,
    #[serde(default)]
    #[validate]
    pub roofs: Vec<Surface>,
    #[serde(default)]
    #[validate]
    pub walls: Vec<Surface>,
    #[serde(default)]
    #[validate]
    pub rim_joists: Vec<Surface>,
    #[serde(default)]
    #[validate]
    pub floors: Vec<Floor>,
    #[serde(default)]
    pub foundation_walls: Vec<FoundationWall>,
    #[serde(default)]
    pub slabs: Vec<Slab>,
    #[serde(default)]
    #[validate]
    pub windows: Vec<Window>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct AirInfiltration {
    /// Air changes per hour at 50 Pa.
    #[serde(rename = "AirLeakageACH50", skip_serializing_if = "Option::is_none")]
    pub air_leakage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_leakage_area: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leakiness_description: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Surface {
    #[serde(rename = "SystemIdentifier")]
    pub id: String,
    #[validate(minimum = 0.)]
    pub area: f64,
    #[validate(exclusive_minimum = 0.)]
    pub insulation_assembly_r_value: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Floor {
    #[serde(rename = "SystemIdentifier")]
    pub id: String,
    #[validate(minimum = 0.)]
    pub area: f64,
    #[validate(exclusive_minimum = 0.)]
    pub insulation_assembly_r_value: f64,
    /// Whether this floor is the ceiling of the conditioned space (an attic floor).
    #[serde(default)]
    pub is_ceiling: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct FoundationWall {
    #[serde(rename = "SystemIdentifier")]
    pub id: String,
    pub area: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insulation_exterior_r_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insulation_interior_r_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insulation_assembly_r_value: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Slab {
    #[serde(rename = "SystemIdentifier")]
    pub id: String,
    /// Exposed perimeter in feet.
    pub exposed_perimeter: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub under_slab_insulation_r_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perimeter_insulation_r_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exterior_horizontal_insulation_r_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap_insulation_r_value: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Window {
    #[serde(rename = "SystemIdentifier")]
    pub id: String,
    #[validate(minimum = 0.)]
    pub area: f64,
    #[serde(rename = "UFactor", skip_serializing_if = "Option::is_none")]
    pub u_factor: Option<f64>,
    #[serde(rename = "SHGC", skip_serializing_if = "Option::is_none")]
    pub shgc: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Systems {
    #[serde(default)]
    pub heating_systems: Vec<HeatingSystem>,
    #[serde(default)]
    pub cooling_systems: Vec<CoolingSystem>,
    #[serde(default)]
    pub heat_pumps: Vec<HeatPump>,
    #[serde(rename = "HVACControl", skip_serializing_if = "Option::is_none")]
    pub hvac_control: Option<HvacControl>,
    #[serde(default)]
    pub water_heating_systems: Vec<WaterHeatingSystem>,
    #[serde(default)]
    pub water_heating: WaterHeating,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct HeatingSystem {
    #[serde(rename = "SystemIdentifier")]
    pub id: String,
    pub heating_system_fuel: FuelType,
    #[serde(rename = "AnnualHeatingEfficiencyAFUE", skip_serializing_if = "Option::is_none")]
    pub heating_efficiency_afue: Option<f64>,
    #[serde(rename = "AnnualHeatingEfficiencyPercent", skip_serializing_if = "Option::is_none")]
    pub heating_efficiency_percent: Option<f64>,
    #[serde(default = "default_fraction_served")]
    pub fraction_heat_load_served: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct CoolingSystem {
    #[serde(rename = "SystemIdentifier")]
    pub id: String,
    #[serde(rename = "AnnualCoolingEfficiencySEER", skip_serializing_if = "Option::is_none")]
    pub cooling_efficiency_seer: Option<f64>,
    #[serde(rename = "AnnualCoolingEfficiencySEER2", skip_serializing_if = "Option::is_none")]
    pub cooling_efficiency_seer2: Option<f64>,
    #[serde(rename = "AnnualCoolingEfficiencyEER", skip_serializing_if = "Option::is_none")]
    pub cooling_efficiency_eer: Option<f64>,
    #[serde(rename = "AnnualCoolingEfficiencyCEER", skip_serializing_if = "Option::is_none")]
    pub cooling_efficiency_ceer: Option<f64>,
    #[serde(default = "default_fraction_served")]
    pub fraction_cool_load_served: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct HeatPump {
    #[serde(rename = "SystemIdentifier")]
    pub id: String,
    #[serde(rename = "AnnualHeatingEfficiencyHSPF", skip_serializing_if = "Option::is_none")]
    pub heating_efficiency_hspf: Option<f64>,
    #[serde(rename = "AnnualHeatingEfficiencyHSPF2", skip_serializing_if = "Option::is_none")]
    pub heating_efficiency_hspf2: Option<f64>,
    #[serde(rename = "AnnualHeatingEfficiencyCOP", skip_serializing_if = "Option::is_none")]
    pub heating_efficiency_cop: Option<f64>,
    #[serde(rename = "AnnualCoolingEfficiencySEER", skip_serializing_if = "Option::is_none")]
    pub cooling_efficiency_seer: Option<f64>,
    #[serde(rename = "AnnualCoolingEfficiencySEER2", skip_serializing_if = "Option::is_none")]
    pub cooling_efficiency_seer2: Option<f64>,
    #[serde(rename = "AnnualCoolingEfficiencyEER", skip_serializing_if = "Option::is_none")]
    pub cooling_efficiency_eer: Option<f64>,
    #[serde(rename = "AnnualCoolingEfficiencyCEER", skip_serializing_if = "Option::is_none")]
    pub cooling_efficiency_ceer: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_heating_fuel: Option<FuelType>,
    #[serde(default = "default_fraction_served")]
    pub fraction_heat_load_served: f64,
    #[serde(default = "default_fraction_served")]
    pub fraction_cool_load_served: f64,
}

/// Thermostat settings in °F. Weekday/weekend schedules are comma-separated hourly values.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct HvacControl {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setpoint_temp_heating_season: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setback_temp_heating_season: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setpoint_temp_cooling_season: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_temp_cooling_season: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekday_setpoint_temps_heating_season: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekend_setpoint_temps_heating_season: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekday_setpoint_temps_cooling_season: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekend_setpoint_temps_cooling_season: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum WaterHeaterType {
    #[serde(rename = "storage water heater")]
    Storage,
    #[serde(rename = "instantaneous water heater")]
    Instantaneous,
    #[serde(rename = "heat pump water heater")]
    HeatPump,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct WaterHeatingSystem {
    #[serde(rename = "SystemIdentifier")]
    pub id: String,
    pub fuel_type: FuelType,
    pub water_heater_type: WaterHeaterType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uniform_energy_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_efficiency: Option<f64>,
    #[serde(rename = "FractionDHWLoadServed", default = "default_fraction_served")]
    pub fraction_dhw_load_served: f64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct WaterHeating {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_fixtures_usage_multiplier: Option<f64>,
}

#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Serialize)]
pub enum ApplianceType {
    #[serde(rename = "refrigerator")]
    #[strum(serialize = "Refrigerator")]
    Refrigerator,
    #[serde(rename = "freezer")]
    #[strum(serialize = "Freezer")]
    Freezer,
    #[serde(rename = "clothes washer")]
    #[strum(serialize = "Clothes Washer")]
    ClothesWasher,
    #[serde(rename = "clothes dryer")]
    #[strum(serialize = "Clothes Dryer")]
    ClothesDryer,
    #[serde(rename = "dishwasher")]
    #[strum(serialize = "Dishwasher")]
    Dishwasher,
    #[serde(rename = "cooking range")]
    #[strum(serialize = "Range/Oven")]
    CookingRange,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Appliance {
    #[serde(rename = "SystemIdentifier")]
    pub id: String,
    pub appliance_type: ApplianceType,
    pub fuel_type: FuelType,
    pub annual_consumption: f64,
    pub units: EnergyUnit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_multiplier: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Lighting {
    #[serde(rename = "InteriorAnnualKWh", default)]
    pub interior_annual_kwh: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interior_usage_multiplier: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct MiscLoads {
    #[serde(default)]
    pub plug_loads: Vec<PlugLoad>,
    #[serde(default)]
    pub fuel_loads: Vec<FuelLoad>,
    #[serde(default)]
    pub pools: Vec<WaterFeature>,
    #[serde(default)]
    pub permanent_spas: Vec<WaterFeature>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum WaterFeatureType {
    #[serde(rename = "in ground")]
    InGround,
    #[serde(rename = "on ground")]
    OnGround,
    #[serde(rename = "above ground")]
    AboveGround,
    #[serde(rename = "other")]
    Other,
    /// Present in the record but not in use; its loads are ignored.
    #[serde(rename = "none")]
    None,
}

/// A pool or permanent spa. Pump energy is electric; the heater may burn any fuel.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct WaterFeature {
    #[serde(rename = "SystemIdentifier")]
    pub id: String,
    #[serde(rename = "Type")]
    pub feature_type: WaterFeatureType,
    #[serde(rename = "PumpAnnualKWh", default)]
    pub pump_annual_kwh: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pump_usage_multiplier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heater_fuel_type: Option<FuelType>,
    #[serde(rename = "HeaterAnnualKBtu", default)]
    pub heater_annual_kbtu: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heater_usage_multiplier: Option<f64>,
}

impl WaterFeature {
    pub fn is_in_use(&self) -> bool {
        self.feature_type != WaterFeatureType::None
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct PlugLoad {
    #[serde(rename = "SystemIdentifier")]
    pub id: String,
    #[serde(rename = "AnnualKWh")]
    pub annual_kwh: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_multiplier: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct FuelLoad {
    #[serde(rename = "SystemIdentifier")]
    pub id: String,
    pub fuel_type: FuelType,
    pub annual_therms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_multiplier: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Consumption {
    #[serde(rename = "BuildingID")]
    pub building_id: String,
    pub consumption_details: ConsumptionDetails,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ConsumptionDetails {
    pub consumption_info: Vec<ConsumptionInfo>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ConsumptionInfo {
    pub fuel_type: FuelType,
    pub units: EnergyUnit,
    pub consumption_detail: Vec<ConsumptionDetail>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ConsumptionDetail {
    #[serde(
        default,
        deserialize_with = "deserialize_optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_date_time: Option<NaiveDateTime>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_date_time: Option<NaiveDateTime>,
    pub consumption: f64,
}

/// Parses a bill boundary given either as a date (`2019-01-31`) or a date and time
/// (`2019-01-31T23:59:59`, optionally with a space instead of `T`).
pub fn parse_bill_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            ["%Y-%m-%d", "%m/%d/%Y"]
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}

fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(value) => parse_bill_timestamp(&value).map(Some).ok_or_else(|| {
            serde::de::Error::custom(format!("could not parse '{value}' as a bill date"))
        }),
    }
}

/// A bill read from a delimited bill file.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportedBill {
    pub fuel_type: FuelType,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub consumption: f64,
    pub unit: EnergyUnit,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BillFileRow {
    fuel_type: String,
    start_date: String,
    end_date: String,
    consumption: f64,
    unit: String,
}

/// Reads bills from a delimited file with the columns
/// `FuelType,StartDate,EndDate,Consumption,Unit`.
pub fn bills_from_csv(file: impl Read) -> Result<Vec<ImportedBill>, BillDataError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    reader
        .deserialize::<BillFileRow>()
        .enumerate()
        .map(|(i, row)| {
            let row = row.map_err(|e| BillDataError::Import(e.to_string()))?;
            let fuel_type: FuelType = row.fuel_type.parse().map_err(|_| {
                BillDataError::Import(format!("row {i}: unknown fuel type '{}'", row.fuel_type))
            })?;
            let unit: EnergyUnit = row
                .unit
                .parse()
                .map_err(|e| BillDataError::Import(format!("row {i}: {e}")))?;
            let start = parse_bill_timestamp(&row.start_date).ok_or_else(|| {
                BillDataError::Import(format!("row {i}: bad start date '{}'", row.start_date))
            })?;
            let end = parse_bill_timestamp(&row.end_date).ok_or_else(|| {
                BillDataError::Import(format!("row {i}: bad end date '{}'", row.end_date))
            })?;

            Ok(ImportedBill {
                fuel_type,
                start,
                end,
                consumption: row.consumption,
                unit,
            })
        })
        .collect()
}
