//! Heating and cooling degree days from daily mean temperatures, in °F.

use crate::core::weather::{DailyTemperature, WeatherSeries};
use crate::errors::WeatherDataError;
use chrono::NaiveDate;
use indexmap::IndexMap;
use strum_macros::Display;

/// Degree-day totals keyed by a label such as `HDD65F` or `CDD65F`.
pub type DegreeDays = IndexMap<String, f64>;

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum DegreeDayMode {
    #[strum(serialize = "HDD")]
    Heating,
    #[strum(serialize = "CDD")]
    Cooling,
}

pub fn degree_day_label(mode: DegreeDayMode, base_temperature_f: f64) -> String {
    format!("{mode}{base_temperature_f}F")
}

/// Contribution of a single day with the given mean temperature.
pub fn daily_degree_days(mode: DegreeDayMode, mean_f: f64, base_temperature_f: f64) -> f64 {
    match mode {
        DegreeDayMode::Heating => (base_temperature_f - mean_f).max(0.),
        DegreeDayMode::Cooling => (mean_f - base_temperature_f).max(0.),
    }
}

/// Unrounded total over a run of days.
pub(crate) fn sum_degree_days(
    days: &[DailyTemperature],
    mode: DegreeDayMode,
    base_temperature_f: f64,
) -> f64 {
    days.iter()
        .map(|day| daily_degree_days(mode, day.mean_f(), base_temperature_f))
        .sum()
}

fn round_total(total: f64) -> f64 {
    (total * 100.).round() / 100.
}

fn calculate(
    series: &WeatherSeries,
    base_temperature_f: f64,
    modes: &[DegreeDayMode],
) -> Result<DegreeDays, WeatherDataError> {
    series.check_complete()?;

    Ok(modes
        .iter()
        .map(|&mode| {
            (
                degree_day_label(mode, base_temperature_f),
                round_total(sum_degree_days(series.days(), mode, base_temperature_f)),
            )
        })
        .collect())
}

pub fn heating_degree_days(
    series: &WeatherSeries,
    base_temperature_f: f64,
) -> Result<DegreeDays, WeatherDataError> {
    calculate(series, base_temperature_f, &[DegreeDayMode::Heating])
}

pub fn cooling_degree_days(
    series: &WeatherSeries,
    base_temperature_f: f64,
) -> Result<DegreeDays, WeatherDataError> {
    calculate(series, base_temperature_f, &[DegreeDayMode::Cooling])
}

/// Heating and cooling totals in one call, heating first.
pub fn degree_days(
    series: &WeatherSeries,
    base_temperature_f: f64,
) -> Result<DegreeDays, WeatherDataError> {
    calculate(
        series,
        base_temperature_f,
        &[DegreeDayMode::Heating, DegreeDayMode::Cooling],
    )
}

/// Heating and cooling totals for the days of `series` in `[start, end)`.
pub fn degree_days_between(
    series: &WeatherSeries,
    base_temperature_f: f64,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<DegreeDays, WeatherDataError> {
    degree_days(&series.sub_series(start, end), base_temperature_f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::fahrenheit_to_celsius;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[fixture]
    fn series() -> WeatherSeries {
        // 50, 60, 70, 80 °F
        let temperatures: Vec<f64> = [50., 60., 70., 80.]
            .into_iter()
            .map(fahrenheit_to_celsius)
            .collect();
        WeatherSeries::from_daily_means_c(
            NaiveDate::from_ymd_opt(2019, 7, 1).unwrap(),
            &temperatures,
        )
    }

    #[rstest]
    fn should_label_by_mode_and_base() {
        assert_eq!(degree_day_label(DegreeDayMode::Heating, 65.), "HDD65F");
        assert_eq!(degree_day_label(DegreeDayMode::Cooling, 50.), "CDD50F");
    }

    #[rstest]
    fn should_sum_heating_and_cooling_contributions(series: WeatherSeries) {
        let totals = degree_days(&series, 65.).unwrap();
        assert_relative_eq!(totals["HDD65F"], 20.);
        assert_relative_eq!(totals["CDD65F"], 20.);
    }

    #[rstest]
    #[case(40.)]
    #[case(65.)]
    #[case(90.)]
    fn independent_totals_should_match_combined_and_be_non_negative(
        series: WeatherSeries,
        #[case] base: f64,
    ) {
        let combined = degree_days(&series, base).unwrap();
        let heating = heating_degree_days(&series, base).unwrap();
        let cooling = cooling_degree_days(&series, base).unwrap();

        let hdd_label = degree_day_label(DegreeDayMode::Heating, base);
        let cdd_label = degree_day_label(DegreeDayMode::Cooling, base);
        assert_eq!(heating[&hdd_label], combined[&hdd_label]);
        assert_eq!(cooling[&cdd_label], combined[&cdd_label]);
        assert!(combined[&hdd_label] >= 0.);
        assert!(combined[&cdd_label] >= 0.);
    }

    #[rstest]
    fn should_fail_for_series_with_missing_days() {
        let days = vec![
            DailyTemperature {
                date: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
                mean_c: 0.,
            },
            DailyTemperature {
                date: NaiveDate::from_ymd_opt(2019, 1, 3).unwrap(),
                mean_c: 0.,
            },
        ];
        let series = WeatherSeries::new(days).unwrap();
        assert!(matches!(
            degree_days(&series, 65.),
            Err(WeatherDataError::MissingDays { .. })
        ));
    }

    #[rstest]
    fn should_restrict_to_date_range(series: WeatherSeries) {
        let totals = degree_days_between(
            &series,
            65.,
            NaiveDate::from_ymd_opt(2019, 7, 2).unwrap(),
            NaiveDate::from_ymd_opt(2019, 7, 4).unwrap(),
        )
        .unwrap();
        assert_relative_eq!(totals["HDD65F"], 5.);
        assert_relative_eq!(totals["CDD65F"], 5.);
    }
}
