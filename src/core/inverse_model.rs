use crate::config::CalibrationConfig;
use crate::core::consumption::{DisaggregatedConsumption, EndUseConsumption};
use crate::core::regression::{ChangePointModel, ChangePointRegression};
use crate::core::units::kbtu_to_mbtu;
use crate::core::utility_bills::{BillNormalizer, NormalizedBills, UtilityBill};
use crate::core::weather::WeatherSeries;
use crate::errors::{CalibrationError, WeatherDataError};
use crate::input::{BuildingRecord, ConditioningFuels, FuelType};
use chrono::NaiveDate;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// One bill's period projected onto the reference year, split by end use (MBtu).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BillProjection {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(flatten)]
    pub consumption: EndUseConsumption,
}

/// Turns a building's bills into weather-normalized annual consumption per fuel.
///
/// Bills are extracted and validated up front. Normalized bill tables and fitted models are
/// computed on first use and kept for the lifetime of the instance.
#[derive(Debug)]
pub struct InverseModel {
    building_id: String,
    conditioning: ConditioningFuels,
    bills: IndexMap<FuelType, Vec<UtilityBill>>,
    billing_weather: WeatherSeries,
    reference_weather: WeatherSeries,
    config: CalibrationConfig,
    regression: ChangePointRegression,
    normalized: RwLock<IndexMap<FuelType, Arc<NormalizedBills>>>,
    models: RwLock<IndexMap<FuelType, Arc<ChangePointModel>>>,
}

impl InverseModel {
    pub fn new(
        record: &BuildingRecord,
        billing_weather: WeatherSeries,
        reference_weather: WeatherSeries,
        config: &CalibrationConfig,
    ) -> Result<Self, CalibrationError> {
        config.check()?;
        let regression = ChangePointRegression::new(
            config.acceptance_criteria.bill_regression_max_cvrmse,
            config.regression.breakpoint_step,
        )?;
        let building = record.first_building()?;
        let normalizer = BillNormalizer::new(
            &config.bills,
            &config.billing_period,
            config.regression.degree_day_base,
        );
        let bills = normalizer.bills_by_fuel(record, &building.building_id)?;
        reference_weather.check_complete()?;
        if reference_weather.is_empty() {
            return Err(WeatherDataError::Empty.into());
        }

        Ok(Self {
            building_id: building.building_id.clone(),
            conditioning: building.building_details.conditioning_fuels(),
            bills,
            billing_weather,
            reference_weather,
            config: config.clone(),
            regression,
            normalized: Default::default(),
            models: Default::default(),
        })
    }

    pub fn building_id(&self) -> &str {
        &self.building_id
    }

    /// Billed fuels whose bills are regressed against temperature, in bill order.
    pub fn regressable_fuels(&self) -> Vec<FuelType> {
        self.bills
            .keys()
            .copied()
            .filter(|fuel_type| {
                if fuel_type.is_delivered() {
                    info!("Skipping {fuel_type}: delivered fuels are not weather-normalized");
                }
                fuel_type.is_regressable()
            })
            .collect()
    }

    pub fn bills(&self, fuel_type: FuelType) -> Option<&[UtilityBill]> {
        self.bills.get(&fuel_type).map(Vec::as_slice)
    }

    /// The bills of a fuel joined with the billing-period weather.
    pub fn normalized_bills(
        &self,
        fuel_type: FuelType,
    ) -> Result<Arc<NormalizedBills>, CalibrationError> {
        if let Some(normalized) = self.normalized.read().get(&fuel_type) {
            return Ok(normalized.clone());
        }

        let bills = self
            .bills
            .get(&fuel_type)
            .ok_or(crate::errors::BillDataError::NoBills(fuel_type))?;
        let normalizer = BillNormalizer::new(
            &self.config.bills,
            &self.config.billing_period,
            self.config.regression.degree_day_base,
        );
        let normalized = Arc::new(normalizer.normalize(fuel_type, bills, &self.billing_weather)?);
        self.normalized
            .write()
            .insert(fuel_type, normalized.clone());

        Ok(normalized)
    }

    /// The best change-point model for a fuel's bills.
    #[instrument(skip(self))]
    pub fn model(&self, fuel_type: FuelType) -> Result<Arc<ChangePointModel>, CalibrationError> {
        if let Some(model) = self.models.read().get(&fuel_type) {
            return Ok(model.clone());
        }

        let normalized = self.normalized_bills(fuel_type)?;
        let model = Arc::new(self.regression.fit(fuel_type, &normalized, &self.conditioning)?);
        info!(
            "{fuel_type}: selected {} model with CVRMSE {:.2}%",
            model.variant, model.cvrmse
        );
        self.models.write().insert(fuel_type, model.clone());

        Ok(model)
    }

    /// Annual end-use consumption of a fuel over the reference year.
    pub fn annual_consumption(
        &self,
        fuel_type: FuelType,
    ) -> Result<EndUseConsumption, CalibrationError> {
        let model = self.model(fuel_type)?;

        let mut annual = EndUseConsumption::default();
        for day in self.reference_weather.days() {
            annual += EndUseConsumption::from(model.predict(day.mean_f()));
        }

        Ok(annual.scaled(kbtu_to_mbtu(1.)))
    }

    /// Weather-normalized annual consumption of every regressable fuel: the calibration target.
    #[instrument(skip(self))]
    pub fn target(&self) -> Result<DisaggregatedConsumption, CalibrationError> {
        self.regressable_fuels()
            .into_iter()
            .map(|fuel_type| Ok((fuel_type, self.annual_consumption(fuel_type)?)))
            .collect()
    }

    /// Each bill's period mapped by month and day onto the reference year and predicted with the
    /// fuel's model, giving one end-use record per bill.
    pub fn normalized_consumption_per_bill(
        &self,
    ) -> Result<IndexMap<FuelType, Vec<BillProjection>>, CalibrationError> {
        self.regressable_fuels()
            .into_iter()
            .map(|fuel_type| {
                let model = self.model(fuel_type)?;
                let normalized = self.normalized_bills(fuel_type)?;
                let projections = normalized
                    .values()
                    .map(|bill| {
                        let mut consumption = EndUseConsumption::default();
                        for date in bill.start.iter_days().take_while(|date| *date < bill.end) {
                            let Some(temperature_f) =
                                self.reference_weather.mean_f_on_month_day(date)
                            else {
                                continue;
                            };
                            consumption += EndUseConsumption::from(model.predict(temperature_f));
                        }
                        BillProjection {
                            start: bill.start,
                            end: bill.end,
                            consumption: consumption.scaled(kbtu_to_mbtu(1.)),
                        }
                    })
                    .collect();
                Ok((fuel_type, projections))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::{fahrenheit_to_celsius, EnergyUnit};
    use crate::input::tests::building_json;
    use crate::input::{ingest_building_record, ImportedBill};
    use approx::assert_relative_eq;
    use chrono::NaiveTime;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// A smooth annual temperature cycle (°F) with its minimum in mid-January.
    fn temperature_f(day_of_year: usize) -> f64 {
        52. - 25. * (2. * std::f64::consts::PI * (day_of_year as f64 - 15.) / 365.).cos()
    }

    fn weather(year: i32) -> WeatherSeries {
        let temperatures: Vec<f64> = (0..365)
            .map(|i| fahrenheit_to_celsius(temperature_f(i)))
            .collect();
        WeatherSeries::from_daily_means_c(date(year, 1, 1), &temperatures)
    }

    /// Gas: 20 kBtu/day baseload plus 3 kBtu/day per °F below 60 °F.
    fn gas_daily(t: f64) -> f64 {
        20. + 3. * (60. - t).max(0.)
    }

    /// Electricity: 30 kBtu/day baseload plus 2 kBtu/day per °F above 68 °F.
    fn electricity_daily(t: f64) -> f64 {
        30. + 2. * (t - 68.).max(0.)
    }

    fn bills_for(year: i32, series: &WeatherSeries) -> Vec<ImportedBill> {
        let mut bills = vec![];
        for month in 1..=12 {
            let start = date(year, month, 1);
            let end = if month == 12 {
                date(year + 1, 1, 1)
            } else {
                date(year, month + 1, 1)
            };
            let days = series.between(start, end);
            let gas_kbtu: f64 = days.iter().map(|d| gas_daily(d.mean_f())).sum();
            let electricity_kbtu: f64 = days.iter().map(|d| electricity_daily(d.mean_f())).sum();
            for (fuel_type, amount) in [
                (FuelType::Electricity, electricity_kbtu),
                (FuelType::NaturalGas, gas_kbtu),
                (FuelType::Propane, 500.),
            ] {
                bills.push(ImportedBill {
                    fuel_type,
                    start: start.and_time(NaiveTime::MIN),
                    end: end.and_time(NaiveTime::MIN),
                    consumption: amount,
                    unit: EnergyUnit::KBtu,
                });
            }
        }
        bills
    }

    #[fixture]
    fn inverse_model() -> InverseModel {
        let billing_weather = weather(2019);
        let mut record = ingest_building_record(building_json().to_string().as_bytes()).unwrap();
        record.insert_bills(&bills_for(2019, &billing_weather)).unwrap();
        InverseModel::new(
            &record,
            billing_weather,
            weather(2019),
            &CalibrationConfig::default(),
        )
        .unwrap()
    }

    #[rstest]
    fn should_skip_delivered_fuels(inverse_model: InverseModel) {
        assert_eq!(
            inverse_model.regressable_fuels(),
            vec![FuelType::Electricity, FuelType::NaturalGas]
        );
        let target = inverse_model.target().unwrap();
        assert!(!target.contains_key(&FuelType::Propane));
    }

    #[rstest]
    fn should_disaggregate_into_baseload_and_weather_dependent_parts(
        inverse_model: InverseModel,
    ) {
        let target = inverse_model.target().unwrap();

        let gas = target[&FuelType::NaturalGas];
        assert_relative_eq!(gas.baseload, 20. * 365. / 1000., max_relative = 0.05);
        assert!(gas.heating > 0.);
        assert_relative_eq!(gas.cooling, 0.);

        let electricity = target[&FuelType::Electricity];
        assert_relative_eq!(electricity.baseload, 30. * 365. / 1000., max_relative = 0.05);
        assert!(electricity.cooling > 0.);
        assert_relative_eq!(electricity.heating, 0.);

        let gas_model = inverse_model.model(FuelType::NaturalGas).unwrap();
        assert!(gas_model.variant.has_heating_term());
    }

    #[rstest]
    fn should_reject_a_zero_breakpoint_step_before_fitting() {
        let billing_weather = weather(2019);
        let mut record = ingest_building_record(building_json().to_string().as_bytes()).unwrap();
        record.insert_bills(&bills_for(2019, &billing_weather)).unwrap();
        let mut config = CalibrationConfig::default();
        config.regression.breakpoint_step = 0.;

        let result = InverseModel::new(&record, billing_weather, weather(2019), &config);
        assert!(matches!(
            result,
            Err(CalibrationError::InvalidConfiguration(_))
        ));
    }

    #[rstest]
    fn should_cache_models(inverse_model: InverseModel) {
        let first = inverse_model.model(FuelType::NaturalGas).unwrap();
        let second = inverse_model.model(FuelType::NaturalGas).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[rstest]
    fn should_project_each_monthly_bill(inverse_model: InverseModel) {
        let per_bill = inverse_model.normalized_consumption_per_bill().unwrap();
        let target = inverse_model.target().unwrap();
        for (fuel_type, projections) in &per_bill {
            assert_eq!(projections.len(), 12);
            assert!(projections
                .iter()
                .all(|p| p.consumption.baseload.is_finite() && p.consumption.baseload > 0.));
            let baseload: f64 = projections.iter().map(|p| p.consumption.baseload).sum();
            assert_relative_eq!(baseload, target[fuel_type].baseload, max_relative = 1e-9);
        }
    }
}
