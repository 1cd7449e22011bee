use crate::config::{BillValidationConfig, BillingPeriodOverride};
use crate::core::degree_days::{sum_degree_days, DegreeDayMode};
use crate::core::weather::WeatherSeries;
use crate::errors::{BillDataError, CalibrationError};
use crate::input::{BuildingRecord, ConsumptionDetail, FuelType};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

/// One billing period of one fuel with its consumption in kBtu. `end` is exclusive.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UtilityBill {
    pub fuel_type: FuelType,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub consumption_kbtu: f64,
}

impl UtilityBill {
    pub fn period_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// A bill joined with the weather over its period.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NormalizedBillRecord {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub period_days: i64,
    pub consumption_kbtu: f64,
    /// Average daily consumption (kBtu/day).
    pub daily_consumption: f64,
    /// Average daily temperature (°F) over the days with weather.
    pub average_temperature_f: f64,
    pub heating_degree_days: f64,
    pub cooling_degree_days: f64,
}

/// Normalized bills of one fuel, ordered by start date.
pub type NormalizedBills = BTreeMap<NaiveDate, NormalizedBillRecord>;

/// The exclusive end date of a bill boundary. A boundary at midnight already marks the start of
/// the following period; any later time of day includes that day in the bill.
pub(crate) fn exclusive_end(end: NaiveDateTime) -> NaiveDate {
    if end.time() == NaiveTime::MIN {
        end.date()
    } else {
        end.date() + Duration::days(1)
    }
}

pub struct BillNormalizer<'a> {
    validation: &'a BillValidationConfig,
    billing_period: &'a BillingPeriodOverride,
    degree_day_base: f64,
}

impl<'a> BillNormalizer<'a> {
    pub fn new(
        validation: &'a BillValidationConfig,
        billing_period: &'a BillingPeriodOverride,
        degree_day_base: f64,
    ) -> Self {
        Self {
            validation,
            billing_period,
            degree_day_base,
        }
    }

    /// Extracts the validated bills of every fuel in the building's consumption section, fuels in
    /// document order.
    #[instrument(skip(self, record))]
    pub fn bills_by_fuel(
        &self,
        record: &BuildingRecord,
        building_id: &str,
    ) -> Result<IndexMap<FuelType, Vec<UtilityBill>>, CalibrationError> {
        let consumption = record.consumption_for_building(building_id)?;

        let mut bills: IndexMap<FuelType, Vec<UtilityBill>> = Default::default();
        for info in &consumption.consumption_details.consumption_info {
            let fuel_type = info.fuel_type;
            for (start, end, amount) in self.resolve_dates(fuel_type, &info.consumption_detail) {
                let consumption_kbtu = info.units.to_kbtu(amount, fuel_type).map_err(|_| {
                    BillDataError::UnsupportedUnit {
                        fuel_type,
                        unit: info.units.to_string(),
                    }
                })?;
                bills.entry(fuel_type).or_default().push(UtilityBill {
                    fuel_type,
                    start,
                    end,
                    consumption_kbtu,
                });
            }
        }

        bills
            .into_iter()
            .map(|(fuel_type, fuel_bills)| Ok((fuel_type, self.validate(fuel_type, fuel_bills)?)))
            .collect()
    }

    /// Fills missing boundaries from neighbouring periods, then from the configured billing period
    /// for the first start and last end. Bills still missing a boundary are dropped.
    fn resolve_dates(
        &self,
        fuel_type: FuelType,
        details: &[ConsumptionDetail],
    ) -> Vec<(NaiveDate, NaiveDate, f64)> {
        let starts: Vec<Option<NaiveDate>> = details
            .iter()
            .map(|detail| detail.start_date_time.map(|start| start.date()))
            .collect();
        let ends: Vec<Option<NaiveDate>> = details
            .iter()
            .map(|detail| detail.end_date_time.map(exclusive_end))
            .collect();
        let last = details.len().saturating_sub(1);

        details
            .iter()
            .enumerate()
            .filter_map(|(i, detail)| {
                let start = starts[i].or_else(|| match i {
                    0 => self.billing_period.start,
                    _ => ends[i - 1],
                });
                let end = ends[i].or_else(|| {
                    if i == last {
                        self.billing_period.end
                    } else {
                        starts[i + 1]
                    }
                });
                match (start, end) {
                    (Some(start), Some(end)) => Some((start, end, detail.consumption)),
                    _ => {
                        warn!(
                            "Dropping {fuel_type} bill {i} (consumption {}): its period cannot be inferred",
                            detail.consumption
                        );
                        None
                    }
                }
            })
            .collect()
    }

    /// Checks one fuel's bills and drops periods too short to be meaningful.
    pub fn validate(
        &self,
        fuel_type: FuelType,
        mut bills: Vec<UtilityBill>,
    ) -> Result<Vec<UtilityBill>, BillDataError> {
        let config = self.validation;
        if bills.is_empty() {
            return Err(BillDataError::NoBills(fuel_type));
        }
        for bill in &bills {
            if bill.end <= bill.start {
                return Err(BillDataError::NonPositivePeriod {
                    fuel_type,
                    start: bill.start,
                    end: bill.end,
                });
            }
            if bill.consumption_kbtu < 0. {
                return Err(BillDataError::NegativeConsumption {
                    fuel_type,
                    start: bill.start,
                    consumption: bill.consumption_kbtu,
                });
            }
        }

        bills.sort_by_key(|bill| bill.start);
        for (previous, next) in bills.iter().tuple_windows() {
            if next.start < previous.end {
                return Err(BillDataError::OverlappingPeriods {
                    fuel_type,
                    previous_end: previous.end,
                    next_start: next.start,
                });
            }
            let gap_days = (next.start - previous.end).num_days();
            if gap_days > config.max_gap_days {
                return Err(BillDataError::GapTooLarge {
                    fuel_type,
                    previous_end: previous.end,
                    next_start: next.start,
                    gap_days,
                    max_gap_days: config.max_gap_days,
                });
            }
            if gap_days > 0 {
                debug!("{gap_days} day gap in {fuel_type} bills before {}", next.start);
            }
        }

        let (kept, short): (Vec<_>, Vec<_>) = bills
            .into_iter()
            .partition(|bill| bill.period_days() >= config.min_period_days);
        if !short.is_empty() {
            if kept.len() < config.min_periods {
                return Err(BillDataError::TooFewPeriods {
                    fuel_type,
                    remaining: kept.len(),
                    min_periods: config.min_periods,
                    min_period_days: config.min_period_days,
                });
            }
            for bill in &short {
                warn!(
                    "Excluding {fuel_type} bill {} to {} ({} days, shorter than {} days)",
                    bill.start,
                    bill.end,
                    bill.period_days(),
                    config.min_period_days
                );
            }
        }

        let covered_days: i64 = kept.iter().map(UtilityBill::period_days).sum();
        if covered_days < config.min_total_days {
            return Err(BillDataError::InsufficientDuration {
                fuel_type,
                covered_days,
                min_total_days: config.min_total_days,
            });
        }

        Ok(kept)
    }

    /// Joins each bill with the weather over its period.
    pub fn normalize(
        &self,
        fuel_type: FuelType,
        bills: &[UtilityBill],
        weather: &WeatherSeries,
    ) -> Result<NormalizedBills, BillDataError> {
        if bills.is_empty() {
            return Err(BillDataError::NoBills(fuel_type));
        }

        bills
            .iter()
            .map(|bill| {
                let days = weather.between(bill.start, bill.end);
                if days.is_empty() {
                    return Err(BillDataError::NoOverlappingWeather {
                        fuel_type,
                        start: bill.start,
                        end: bill.end,
                    });
                }
                let period_days = bill.period_days();
                if (days.len() as i64) < period_days {
                    warn!(
                        "Weather covers {} of {period_days} days of the {fuel_type} bill starting {}",
                        days.len(),
                        bill.start
                    );
                }
                let average_temperature_f =
                    days.iter().map(|day| day.mean_f()).sum::<f64>() / days.len() as f64;

                Ok((
                    bill.start,
                    NormalizedBillRecord {
                        start: bill.start,
                        end: bill.end,
                        period_days,
                        consumption_kbtu: bill.consumption_kbtu,
                        daily_consumption: bill.consumption_kbtu / period_days as f64,
                        average_temperature_f,
                        heating_degree_days: sum_degree_days(
                            days,
                            DegreeDayMode::Heating,
                            self.degree_day_base,
                        ),
                        cooling_degree_days: sum_degree_days(
                            days,
                            DegreeDayMode::Cooling,
                            self.degree_day_base,
                        ),
                    },
                ))
            })
            .collect()
    }
}
