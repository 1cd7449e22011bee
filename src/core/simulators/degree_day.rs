use crate::core::simulators::{SimulationResults, Simulator};
use crate::core::units::{DAYS_PER_YEAR, HOURS_PER_DAY, KBTU_PER_KWH, KBTU_PER_MBTU, KBTU_PER_THERM};
use crate::core::weather::WeatherSeries;
use crate::input::{Building, BuildingDetails, BuildingRecord, FuelType, HvacControl, Systems};
use anyhow::{anyhow, bail};
use chrono::NaiveDate;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, instrument};

// volumetric heat capacity of air, Btu/ft³·°F
const AIR_HEAT_CAPACITY: f64 = 0.018;
// LBNL rule of thumb: natural infiltration is roughly ACH50 / 20
const ACH50_TO_NATURAL_ACH: f64 = 20.;
const ELA_SQ_IN_PER_CFM50: f64 = 0.055;
const DEFAULT_ACH50: f64 = 10.;
// resistance of the slab edge heat path with no insulation (F-factor ≈ 0.73)
const SLAB_EDGE_BASE_R_VALUE: f64 = 1.37;
const UNINSULATED_FOUNDATION_WALL_R_VALUE: f64 = 2.;
/// Below-grade surfaces see a smaller temperature difference than the outdoor air.
const BELOW_GRADE_EXPOSURE: f64 = 0.5;
const DEFAULT_WINDOW_U_FACTOR: f64 = 0.5;
const DEFAULT_WINDOW_SHGC: f64 = 0.44;
// average daily solar heat reaching windows, Btu/ft²
const WINDOW_SOLAR_IRRADIATION: f64 = 300.;

const DEFAULT_HEATING_SETPOINT: f64 = 68.;
const DEFAULT_COOLING_SETPOINT: f64 = 78.;
const SETBACK_HOURS_PER_DAY: f64 = 8.;
const WEEKDAYS_PER_WEEK: f64 = 5.;

const DEFAULT_AFUE: f64 = 0.78;
const DEFAULT_HEAT_PUMP_COP: f64 = 2.3;
const DEFAULT_SEER: f64 = 13.;
const HSPF2_PER_HSPF: f64 = 0.85;
const SEER2_PER_SEER: f64 = 0.95;

// 50 gal/day at 8.34 lb/gal heated through 70 °F
const DAILY_HOT_WATER_DEMAND_BTU: f64 = 50. * 8.34 * 70.;

const BTU_PER_MBTU: f64 = 1e6;

/// A single-zone daily degree-day model of a house.
///
/// Each day of the weather series gives an envelope heat loss `UA × 24 × ΔT` against the
/// thermostat setpoints, offset by internal and solar gains. Heating and cooling loads are divided
/// among the conditioning systems by their fraction of load served and converted to fuel use
/// through their efficiencies. Water heating, lighting, plug loads, fuel loads and appliances are
/// spread evenly over the year.
#[derive(Clone, Debug)]
pub struct DegreeDaySimulator {
    weather: WeatherSeries,
}

impl DegreeDaySimulator {
    pub fn new(weather: WeatherSeries) -> Self {
        Self { weather }
    }

    /// Energy use of the building on each day of the simulator's weather.
    pub fn daily_results(
        &self,
        building: &Building,
    ) -> anyhow::Result<Vec<(NaiveDate, SimulationResults)>> {
        if self.weather.is_empty() {
            bail!("The degree-day simulator has no weather to simulate");
        }
        let details = &building.building_details;
        let conductance = envelope_conductance(details) + infiltration_conductance(details);
        let gains = internal_gains_btu_per_day(details) + solar_gains_btu_per_day(details);
        let control = details.systems.hvac_control.as_ref();
        let heating_setpoint = heating_setpoint(control)?;
        let cooling_setpoint = cooling_setpoint(control)?;
        let heating = heating_shares(&details.systems)?;
        let cooling = cooling_shares(&details.systems)?;
        let base_loads = daily_base_loads(details)?;
        debug!(
            "Building {}: UA {conductance:.1} Btu/h·°F, gains {gains:.0} Btu/day, setpoints {heating_setpoint:.1}/{cooling_setpoint:.1} °F",
            building.building_id
        );

        Ok(self
            .weather
            .days()
            .iter()
            .map(|day| {
                let daily_conductance = conductance * HOURS_PER_DAY as f64;
                let outdoor = day.mean_f();
                let heating_load =
                    (daily_conductance * (heating_setpoint - outdoor) - gains).max(0.);
                let cooling_load =
                    (daily_conductance * (outdoor - cooling_setpoint) + gains).max(0.);

                let mut results = base_loads.clone();
                for share in &heating {
                    results.add_end_use(
                        share.fuel_type,
                        "Heating",
                        heating_load * share.fraction / share.efficiency / BTU_PER_MBTU,
                    );
                }
                for share in &cooling {
                    results.add_end_use(
                        share.fuel_type,
                        "Cooling",
                        cooling_load * share.fraction / share.efficiency / BTU_PER_MBTU,
                    );
                }
                (day.date, results)
            })
            .collect())
    }
}

impl Simulator for DegreeDaySimulator {
    #[instrument(skip_all, fields(working_dir = %working_dir.display()))]
    fn simulate(
        &self,
        record: &BuildingRecord,
        working_dir: &Path,
    ) -> anyhow::Result<SimulationResults> {
        let building = record.first_building()?;
        let mut annual = SimulationResults::default();
        for (_, daily) in self.daily_results(building)? {
            annual.accumulate(&daily);
        }

        let run_dir = working_dir.join("run");
        fs::create_dir_all(&run_dir)?;
        let writer = BufWriter::new(File::create(run_dir.join("results_annual.json"))?);
        serde_json::to_writer_pretty(writer, &annual.to_annual_json())?;

        Ok(annual)
    }
}

/// Conductive heat loss coefficient of the envelope (Btu/h·°F).
fn envelope_conductance(details: &BuildingDetails) -> f64 {
    let enclosure = &details.enclosure;
    let opaque: f64 = enclosure
        .roofs
        .iter()
        .chain(&enclosure.walls)
        .chain(&enclosure.rim_joists)
        .map(|surface| surface.area / surface.insulation_assembly_r_value)
        .sum();
    let floors: f64 = enclosure
        .floors
        .iter()
        .map(|floor| floor.area / floor.insulation_assembly_r_value)
        .sum();
    let foundation_walls: f64 = enclosure
        .foundation_walls
        .iter()
        .map(|wall| {
            let r_value = wall.insulation_assembly_r_value.unwrap_or_else(|| {
                UNINSULATED_FOUNDATION_WALL_R_VALUE
                    + wall.insulation_exterior_r_value.unwrap_or(0.)
                    + wall.insulation_interior_r_value.unwrap_or(0.)
            });
            BELOW_GRADE_EXPOSURE * wall.area / r_value
        })
        .sum();
    let slabs: f64 = enclosure
        .slabs
        .iter()
        .map(|slab| {
            let insulation: f64 = [
                slab.under_slab_insulation_r_value,
                slab.perimeter_insulation_r_value,
                slab.exterior_horizontal_insulation_r_value,
                slab.gap_insulation_r_value,
            ]
            .into_iter()
            .flatten()
            .sum();
            slab.exposed_perimeter / (SLAB_EDGE_BASE_R_VALUE + insulation)
        })
        .sum();
    let windows: f64 = enclosure
        .windows
        .iter()
        .map(|window| window.area * window.u_factor.unwrap_or(DEFAULT_WINDOW_U_FACTOR))
        .sum();

    opaque + floors + foundation_walls + slabs + windows
}

/// Heat loss coefficient of natural infiltration (Btu/h·°F).
fn infiltration_conductance(details: &BuildingDetails) -> f64 {
    let volume = details.conditioned_volume();
    let infiltration = &details.enclosure.air_infiltration;
    let ach50 = infiltration
        .air_leakage
        .or_else(|| {
            infiltration
                .effective_leakage_area
                .map(|ela| ela / ELA_SQ_IN_PER_CFM50 * 60. / volume)
        })
        .unwrap_or(DEFAULT_ACH50);

    AIR_HEAT_CAPACITY * volume * ach50 / ACH50_TO_NATURAL_ACH
}

fn internal_gains_btu_per_day(details: &BuildingDetails) -> f64 {
    (lighting_kwh_per_year(details) + plug_load_kwh_per_year(details)) * KBTU_PER_KWH * 1_000.
        / DAYS_PER_YEAR as f64
}

fn solar_gains_btu_per_day(details: &BuildingDetails) -> f64 {
    details
        .enclosure
        .windows
        .iter()
        .map(|window| {
            window.area * window.shgc.unwrap_or(DEFAULT_WINDOW_SHGC) * WINDOW_SOLAR_IRRADIATION
        })
        .sum()
}

fn lighting_kwh_per_year(details: &BuildingDetails) -> f64 {
    let lighting = &details.lighting;
    lighting.interior_annual_kwh * lighting.interior_usage_multiplier.unwrap_or(1.)
}

fn plug_load_kwh_per_year(details: &BuildingDetails) -> f64 {
    details
        .misc_loads
        .plug_loads
        .iter()
        .map(|load| load.annual_kwh * load.usage_multiplier.unwrap_or(1.))
        .sum()
}

fn schedule_mean(schedule: &str) -> anyhow::Result<f64> {
    let temperatures = schedule
        .split(',')
        .map(|temp| temp.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| anyhow!("Could not parse setpoint schedule '{schedule}'"))?;
    if temperatures.is_empty() {
        bail!("Setpoint schedule is empty");
    }

    Ok(temperatures.iter().sum::<f64>() / temperatures.len() as f64)
}

/// Mean thermostat temperature across a week, from hourly schedules when given, else from a
/// setpoint with an optional nightly setback.
fn weekly_mean_setpoint(
    weekday_schedule: Option<&String>,
    weekend_schedule: Option<&String>,
    setpoint: Option<f64>,
    setback: Option<f64>,
    default: f64,
) -> anyhow::Result<f64> {
    if let Some(weekday) = weekday_schedule {
        let weekday = schedule_mean(weekday)?;
        let weekend = match weekend_schedule {
            Some(weekend) => schedule_mean(weekend)?,
            None => weekday,
        };
        return Ok(
            (weekday * WEEKDAYS_PER_WEEK + weekend * (7. - WEEKDAYS_PER_WEEK)) / 7.,
        );
    }
    let setpoint = setpoint.unwrap_or(default);

    Ok(match setback {
        Some(setback) => {
            let hours = HOURS_PER_DAY as f64;
            (setpoint * (hours - SETBACK_HOURS_PER_DAY) + setback * SETBACK_HOURS_PER_DAY) / hours
        }
        None => setpoint,
    })
}

fn heating_setpoint(control: Option<&HvacControl>) -> anyhow::Result<f64> {
    let Some(control) = control else {
        return Ok(DEFAULT_HEATING_SETPOINT);
    };
    weekly_mean_setpoint(
        control.weekday_setpoint_temps_heating_season.as_ref(),
        control.weekend_setpoint_temps_heating_season.as_ref(),
        control.setpoint_temp_heating_season,
        control.setback_temp_heating_season,
        DEFAULT_HEATING_SETPOINT,
    )
}

fn cooling_setpoint(control: Option<&HvacControl>) -> anyhow::Result<f64> {
    let Some(control) = control else {
        return Ok(DEFAULT_COOLING_SETPOINT);
    };
    weekly_mean_setpoint(
        control.weekday_setpoint_temps_cooling_season.as_ref(),
        control.weekend_setpoint_temps_cooling_season.as_ref(),
        control.setpoint_temp_cooling_season,
        control.setup_temp_cooling_season,
        DEFAULT_COOLING_SETPOINT,
    )
}

/// The part of a heating or cooling load met by one system.
#[derive(Debug)]
struct LoadShare {
    fuel_type: FuelType,
    fraction: f64,
    /// Delivered heat per unit of fuel energy.
    efficiency: f64,
}

fn checked_share(
    id: &str,
    fuel_type: FuelType,
    fraction: f64,
    efficiency: f64,
) -> anyhow::Result<LoadShare> {
    if efficiency.is_nan() || efficiency <= 0. {
        bail!("System {id} has a non-positive efficiency ({efficiency})");
    }

    Ok(LoadShare {
        fuel_type,
        fraction,
        efficiency,
    })
}

fn heating_shares(systems: &Systems) -> anyhow::Result<Vec<LoadShare>> {
    let furnaces_and_boilers = systems.heating_systems.iter().map(|system| {
        let efficiency = system
            .heating_efficiency_afue
            .or(system.heating_efficiency_percent)
            .unwrap_or(DEFAULT_AFUE);
        checked_share(
            &system.id,
            system.heating_system_fuel,
            system.fraction_heat_load_served,
            efficiency,
        )
    });
    let heat_pumps = systems.heat_pumps.iter().map(|heat_pump| {
        let cop = heat_pump
            .heating_efficiency_cop
            .or_else(|| heat_pump.heating_efficiency_hspf.map(|hspf| hspf / KBTU_PER_KWH))
            .or_else(|| {
                heat_pump
                    .heating_efficiency_hspf2
                    .map(|hspf2| hspf2 / HSPF2_PER_HSPF / KBTU_PER_KWH)
            })
            .unwrap_or(DEFAULT_HEAT_PUMP_COP);
        checked_share(
            &heat_pump.id,
            FuelType::Electricity,
            heat_pump.fraction_heat_load_served,
            cop,
        )
    });

    furnaces_and_boilers
        .chain(heat_pumps)
        .filter(|share| !matches!(share, Ok(LoadShare { fraction, .. }) if *fraction <= 0.))
        .collect()
}

fn cooling_cop(
    seer: Option<f64>,
    seer2: Option<f64>,
    eer: Option<f64>,
    ceer: Option<f64>,
) -> f64 {
    seer.or_else(|| seer2.map(|seer2| seer2 / SEER2_PER_SEER))
        .or(eer)
        .or(ceer)
        .unwrap_or(DEFAULT_SEER)
        / KBTU_PER_KWH
}

fn cooling_shares(systems: &Systems) -> anyhow::Result<Vec<LoadShare>> {
    let air_conditioners = systems.cooling_systems.iter().map(|system| {
        let cop = cooling_cop(
            system.cooling_efficiency_seer,
            system.cooling_efficiency_seer2,
            system.cooling_efficiency_eer,
            system.cooling_efficiency_ceer,
        );
        checked_share(
            &system.id,
            FuelType::Electricity,
            system.fraction_cool_load_served,
            cop,
        )
    });
    let heat_pumps = systems.heat_pumps.iter().map(|heat_pump| {
        let cop = cooling_cop(
            heat_pump.cooling_efficiency_seer,
            heat_pump.cooling_efficiency_seer2,
            heat_pump.cooling_efficiency_eer,
            heat_pump.cooling_efficiency_ceer,
        );
        checked_share(
            &heat_pump.id,
            FuelType::Electricity,
            heat_pump.fraction_cool_load_served,
            cop,
        )
    });

    air_conditioners
        .chain(heat_pumps)
        .filter(|share| !matches!(share, Ok(LoadShare { fraction, .. }) if *fraction <= 0.))
        .collect()
}

/// Weather-independent energy use on one day (MBtu).
fn daily_base_loads(details: &BuildingDetails) -> anyhow::Result<SimulationResults> {
    let days = DAYS_PER_YEAR as f64;
    let mut results = SimulationResults::default();

    let hot_water_demand = DAILY_HOT_WATER_DEMAND_BTU
        * details
            .systems
            .water_heating
            .water_fixtures_usage_multiplier
            .unwrap_or(1.);
    for water_heater in &details.systems.water_heating_systems {
        let efficiency = water_heater
            .uniform_energy_factor
            .or(water_heater.energy_factor)
            .ok_or_else(|| anyhow!("Water heater {} has no efficiency", water_heater.id))?;
        let share = checked_share(
            &water_heater.id,
            water_heater.fuel_type,
            water_heater.fraction_dhw_load_served,
            efficiency,
        )?;
        results.add_end_use(
            share.fuel_type,
            "Hot Water",
            hot_water_demand * share.fraction / share.efficiency / BTU_PER_MBTU,
        );
    }

    let kwh_to_mbtu = KBTU_PER_KWH / KBTU_PER_MBTU;
    results.add_end_use(
        FuelType::Electricity,
        "Lighting Interior",
        lighting_kwh_per_year(details) * kwh_to_mbtu / days,
    );
    results.add_end_use(
        FuelType::Electricity,
        "Plug Loads",
        plug_load_kwh_per_year(details) * kwh_to_mbtu / days,
    );
    for load in &details.misc_loads.fuel_loads {
        results.add_end_use(
            load.fuel_type,
            "Fuel Loads",
            load.annual_therms * load.usage_multiplier.unwrap_or(1.) * KBTU_PER_THERM
                / KBTU_PER_MBTU
                / days,
        );
    }
    let water_features = [
        ("Pool", &details.misc_loads.pools),
        ("Permanent Spa", &details.misc_loads.permanent_spas),
    ];
    for (name, features) in water_features {
        for feature in features.iter().filter(|feature| feature.is_in_use()) {
            results.add_end_use(
                FuelType::Electricity,
                &format!("{name} Pump"),
                feature.pump_annual_kwh * feature.pump_usage_multiplier.unwrap_or(1.) * kwh_to_mbtu
                    / days,
            );
            if let Some(fuel_type) = feature.heater_fuel_type {
                results.add_end_use(
                    fuel_type,
                    &format!("{name} Heater"),
                    feature.heater_annual_kbtu * feature.heater_usage_multiplier.unwrap_or(1.)
                        / KBTU_PER_MBTU
                        / days,
                );
            }
        }
    }
    for appliance in &details.appliances {
        let annual_kbtu = appliance
            .units
            .to_kbtu(appliance.annual_consumption, appliance.fuel_type)?;
        results.add_end_use(
            appliance.fuel_type,
            &appliance.appliance_type.to_string(),
            annual_kbtu * appliance.usage_multiplier.unwrap_or(1.) / KBTU_PER_MBTU / days,
        );
    }

    Ok(results)
}
