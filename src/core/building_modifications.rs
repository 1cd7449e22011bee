use crate::input::{Building, BuildingDetails, HvacControl, WaterHeaterType};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;
use tracing::{debug, warn};

/// Assemblies at or below this R-value are taken to be uninsulated and are left alone by the
/// R-value multipliers.
const ESTIMATED_UNINSULATED_R_VALUE: f64 = 4.;
const MAX_FUEL_BURNING_EFFICIENCY: f64 = 1.0;
const MAX_NON_HEAT_PUMP_WATER_HEATER_EFFICIENCY: f64 = 0.99;
const HEAT_PUMP_WATER_HEATER_EFFICIENCY_BOUNDS: (f64, f64) = (1.01, 5.0);
const MAX_SHGC: f64 = 0.99;

/// A named, calibratable change to a building description. Offsets are added (°F); every other
/// adjustment multiplies the quantities it names.
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Adjustment {
    HeatingSetpointOffset,
    CoolingSetpointOffset,
    AirLeakageMultiplier,
    HeatingEfficiencyMultiplier,
    CoolingEfficiencyMultiplier,
    MiscLoadMultiplier,
    RoofRValueMultiplier,
    CeilingRValueMultiplier,
    FloorRValueMultiplier,
    AboveGroundWallsRValueMultiplier,
    BelowGroundWallsRValueMultiplier,
    SlabRValueMultiplier,
    WaterHeaterEfficiencyMultiplier,
    WaterFixturesUsageMultiplier,
    LightingLoadMultiplier,
    WindowUFactorMultiplier,
    WindowShgcMultiplier,
    ApplianceUsageMultiplier,
}

impl Adjustment {
    pub fn is_offset(&self) -> bool {
        matches!(
            self,
            Adjustment::HeatingSetpointOffset | Adjustment::CoolingSetpointOffset
        )
    }

    /// The value at which this adjustment leaves a building unchanged.
    pub fn neutral_value(&self) -> f64 {
        if self.is_offset() {
            0.
        } else {
            1.
        }
    }

    /// Search bounds used when a configuration does not name its own.
    pub fn default_bounds(&self) -> (f64, f64) {
        match self {
            Adjustment::HeatingSetpointOffset | Adjustment::CoolingSetpointOffset => (-5., 5.),
            Adjustment::AirLeakageMultiplier => (0.5, 2.),
            Adjustment::HeatingEfficiencyMultiplier | Adjustment::CoolingEfficiencyMultiplier => {
                (0.7, 1.3)
            }
            Adjustment::MiscLoadMultiplier
            | Adjustment::WaterFixturesUsageMultiplier
            | Adjustment::LightingLoadMultiplier
            | Adjustment::ApplianceUsageMultiplier => (0.5, 2.),
            Adjustment::RoofRValueMultiplier
            | Adjustment::CeilingRValueMultiplier
            | Adjustment::FloorRValueMultiplier
            | Adjustment::AboveGroundWallsRValueMultiplier
            | Adjustment::BelowGroundWallsRValueMultiplier
            | Adjustment::SlabRValueMultiplier => (0.5, 1.5),
            Adjustment::WaterHeaterEfficiencyMultiplier
            | Adjustment::WindowUFactorMultiplier
            | Adjustment::WindowShgcMultiplier => (0.8, 1.2),
        }
    }
}

/// A set of adjustment values keyed by name, as found in a calibration individual.
pub type Adjustments = IndexMap<Adjustment, f64>;

#[derive(Debug, Error)]
pub enum ModificationError {
    #[error("Building {building_id} has a setpoint schedule that could not be parsed: '{schedule}'")]
    InvalidSchedule {
        building_id: String,
        schedule: String,
    },
}

/// Applies every adjustment present in `adjustments` to the building in a fixed order.
/// Adjustments absent from the map leave their quantities unchanged.
pub fn apply_adjustments(
    building: &mut Building,
    adjustments: &Adjustments,
) -> Result<(), ModificationError> {
    let building_id = building.building_id.clone();
    let details = &mut building.building_details;

    for adjustment in Adjustment::iter() {
        let Some(&value) = adjustments.get(&adjustment) else {
            debug!("No value for {adjustment} provided; leaving building {building_id} unchanged");
            continue;
        };
        match adjustment {
            Adjustment::HeatingSetpointOffset => {
                if let Some(control) = details.systems.hvac_control.as_mut() {
                    offset_heating_setpoints(control, value, &building_id)?;
                }
            }
            Adjustment::CoolingSetpointOffset => {
                if let Some(control) = details.systems.hvac_control.as_mut() {
                    offset_cooling_setpoints(control, value, &building_id)?;
                }
            }
            Adjustment::AirLeakageMultiplier => scale_air_leakage(details, value),
            Adjustment::HeatingEfficiencyMultiplier => scale_heating_efficiency(details, value),
            Adjustment::CoolingEfficiencyMultiplier => scale_cooling_efficiency(details, value),
            Adjustment::MiscLoadMultiplier => scale_misc_loads(details, value),
            Adjustment::RoofRValueMultiplier => {
                for roof in details.enclosure.roofs.iter_mut() {
                    scale_r_value(&mut roof.insulation_assembly_r_value, value);
                }
            }
            Adjustment::CeilingRValueMultiplier => {
                for floor in details.enclosure.floors.iter_mut().filter(|f| f.is_ceiling) {
                    scale_r_value(&mut floor.insulation_assembly_r_value, value);
                }
            }
            Adjustment::FloorRValueMultiplier => {
                for floor in details.enclosure.floors.iter_mut().filter(|f| !f.is_ceiling) {
                    scale_r_value(&mut floor.insulation_assembly_r_value, value);
                }
            }
            Adjustment::AboveGroundWallsRValueMultiplier => {
                let enclosure = &mut details.enclosure;
                for surface in enclosure
                    .rim_joists
                    .iter_mut()
                    .chain(enclosure.walls.iter_mut())
                {
                    scale_r_value(&mut surface.insulation_assembly_r_value, value);
                }
            }
            Adjustment::BelowGroundWallsRValueMultiplier => {
                for wall in details.enclosure.foundation_walls.iter_mut() {
                    for r_value in [
                        &mut wall.insulation_exterior_r_value,
                        &mut wall.insulation_interior_r_value,
                        &mut wall.insulation_assembly_r_value,
                    ]
                    .into_iter()
                    .flatten()
                    {
                        scale_r_value(r_value, value);
                    }
                }
            }
            Adjustment::SlabRValueMultiplier => {
                for slab in details.enclosure.slabs.iter_mut() {
                    for r_value in [
                        &mut slab.under_slab_insulation_r_value,
                        &mut slab.perimeter_insulation_r_value,
                        &mut slab.exterior_horizontal_insulation_r_value,
                        &mut slab.gap_insulation_r_value,
                    ]
                    .into_iter()
                    .flatten()
                    {
                        scale_r_value(r_value, value);
                    }
                }
            }
            Adjustment::WaterHeaterEfficiencyMultiplier => {
                scale_water_heater_efficiency(details, value)
            }
            Adjustment::WaterFixturesUsageMultiplier => {
                let water_heating = &mut details.systems.water_heating;
                water_heating.water_fixtures_usage_multiplier = Some(round_to(
                    water_heating.water_fixtures_usage_multiplier.unwrap_or(1.) * value,
                    2,
                ));
            }
            Adjustment::LightingLoadMultiplier => {
                let lighting = &mut details.lighting;
                lighting.interior_usage_multiplier = Some(round_to(
                    lighting.interior_usage_multiplier.unwrap_or(1.) * value,
                    2,
                ));
            }
            Adjustment::WindowUFactorMultiplier => {
                for u_factor in details
                    .enclosure
                    .windows
                    .iter_mut()
                    .filter_map(|window| window.u_factor.as_mut())
                {
                    *u_factor = round_to(*u_factor * value, 2);
                }
            }
            Adjustment::WindowShgcMultiplier => {
                for shgc in details
                    .enclosure
                    .windows
                    .iter_mut()
                    .filter_map(|window| window.shgc.as_mut())
                {
                    *shgc = round_to((*shgc * value).min(MAX_SHGC), 2);
                }
            }
            Adjustment::ApplianceUsageMultiplier => {
                if details.appliances.is_empty() {
                    debug!("No appliances found in building {building_id}; not modifying appliance usage");
                }
                for appliance in details.appliances.iter_mut() {
                    appliance.usage_multiplier =
                        Some(round_to(appliance.usage_multiplier.unwrap_or(1.) * value, 2));
                }
            }
        }
    }

    Ok(())
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn scale_r_value(r_value: &mut f64, multiplier: f64) {
    if *r_value > ESTIMATED_UNINSULATED_R_VALUE {
        *r_value = round_to(*r_value * multiplier, 1);
    }
}

fn offset_schedule(schedule: &str, offset: f64, building_id: &str) -> Result<String, ModificationError> {
    let temperatures = schedule
        .split(',')
        .map(|temp| temp.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ModificationError::InvalidSchedule {
            building_id: building_id.to_string(),
            schedule: schedule.to_string(),
        })?;

    Ok(temperatures
        .iter()
        .map(|temp| round_to(temp + offset, 2).to_string())
        .collect::<Vec<_>>()
        .join(", "))
}

fn offset_heating_setpoints(
    control: &mut HvacControl,
    offset: f64,
    building_id: &str,
) -> Result<(), ModificationError> {
    if let Some(setpoint) = control.setpoint_temp_heating_season.as_mut() {
        *setpoint += offset;
        if let Some(setback) = control.setback_temp_heating_season.as_mut() {
            *setback += offset;
        }
    }
    for schedule in [
        &mut control.weekday_setpoint_temps_heating_season,
        &mut control.weekend_setpoint_temps_heating_season,
    ]
    .into_iter()
    .flatten()
    {
        *schedule = offset_schedule(schedule, offset, building_id)?;
    }

    Ok(())
}

fn offset_cooling_setpoints(
    control: &mut HvacControl,
    offset: f64,
    building_id: &str,
) -> Result<(), ModificationError> {
    if let Some(setpoint) = control.setpoint_temp_cooling_season.as_mut() {
        *setpoint += offset;
        if let Some(setup) = control.setup_temp_cooling_season.as_mut() {
            *setup += offset;
        }
    }
    for schedule in [
        &mut control.weekday_setpoint_temps_cooling_season,
        &mut control.weekend_setpoint_temps_cooling_season,
    ]
    .into_iter()
    .flatten()
    {
        *schedule = offset_schedule(schedule, offset, building_id)?;
    }

    Ok(())
}

fn scale_air_leakage(details: &mut BuildingDetails, multiplier: f64) {
    let infiltration = &mut details.enclosure.air_infiltration;
    if let Some(ach50) = infiltration.air_leakage.as_mut() {
        *ach50 = round_to(*ach50 * multiplier, 2);
    }
    if let Some(ela) = infiltration.effective_leakage_area.as_mut() {
        *ela = round_to(*ela * multiplier, 1);
    }
    if infiltration.leakiness_description.is_some() {
        warn!("Automatic modification of air infiltration leakiness description is not supported");
    }
}

fn scale_heating_efficiency(details: &mut BuildingDetails, multiplier: f64) {
    for system in details.systems.heating_systems.iter_mut() {
        for efficiency in [
            &mut system.heating_efficiency_afue,
            &mut system.heating_efficiency_percent,
        ]
        .into_iter()
        .flatten()
        {
            *efficiency = round_to((*efficiency * multiplier).min(MAX_FUEL_BURNING_EFFICIENCY), 2);
        }
    }
    for heat_pump in details.systems.heat_pumps.iter_mut() {
        for efficiency in [
            &mut heat_pump.heating_efficiency_hspf,
            &mut heat_pump.heating_efficiency_hspf2,
            &mut heat_pump.heating_efficiency_cop,
        ]
        .into_iter()
        .flatten()
        {
            *efficiency = round_to(*efficiency * multiplier, 2);
        }
    }
}

fn scale_cooling_efficiency(details: &mut BuildingDetails, multiplier: f64) {
    let systems = &mut details.systems;
    let cooling_system_efficiencies = systems.cooling_systems.iter_mut().flat_map(|system| {
        [
            &mut system.cooling_efficiency_seer,
            &mut system.cooling_efficiency_seer2,
            &mut system.cooling_efficiency_eer,
            &mut system.cooling_efficiency_ceer,
        ]
    });
    let heat_pump_efficiencies = systems.heat_pumps.iter_mut().flat_map(|heat_pump| {
        [
            &mut heat_pump.cooling_efficiency_seer,
            &mut heat_pump.cooling_efficiency_seer2,
            &mut heat_pump.cooling_efficiency_eer,
            &mut heat_pump.cooling_efficiency_ceer,
        ]
    });
    for efficiency in cooling_system_efficiencies
        .chain(heat_pump_efficiencies)
        .flatten()
    {
        *efficiency = round_to(*efficiency * multiplier, 2);
    }
}

fn scale_misc_loads(details: &mut BuildingDetails, multiplier: f64) {
    let misc_loads = &mut details.misc_loads;
    let water_features = misc_loads
        .pools
        .iter_mut()
        .chain(misc_loads.permanent_spas.iter_mut())
        .filter(|feature| feature.is_in_use())
        .flat_map(|feature| {
            [
                &mut feature.pump_usage_multiplier,
                &mut feature.heater_usage_multiplier,
            ]
        });
    for usage in misc_loads
        .plug_loads
        .iter_mut()
        .map(|load| &mut load.usage_multiplier)
        .chain(
            misc_loads
                .fuel_loads
                .iter_mut()
                .map(|load| &mut load.usage_multiplier),
        )
        .chain(water_features)
    {
        *usage = Some(round_to(usage.unwrap_or(1.) * multiplier, 2));
    }
}

fn scale_water_heater_efficiency(details: &mut BuildingDetails, multiplier: f64) {
    for water_heater in details.systems.water_heating_systems.iter_mut() {
        let is_heat_pump = water_heater.water_heater_type == WaterHeaterType::HeatPump;
        let mut changed = false;
        for factor in [
            &mut water_heater.energy_factor,
            &mut water_heater.uniform_energy_factor,
        ]
        .into_iter()
        .flatten()
        {
            let scaled = if is_heat_pump {
                let (lower, upper) = HEAT_PUMP_WATER_HEATER_EFFICIENCY_BOUNDS;
                (*factor * multiplier).clamp(lower, upper)
            } else {
                (*factor * multiplier).min(MAX_NON_HEAT_PUMP_WATER_HEATER_EFFICIENCY)
            };
            if scaled != *factor {
                changed = true;
            }
            *factor = round_to(scaled, 2);
        }
        // recovery efficiency is tied to the original rating
        if changed {
            water_heater.recovery_efficiency = None;
        }
    }
}
