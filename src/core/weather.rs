use crate::core::units::celsius_to_fahrenheit;
use crate::errors::WeatherDataError;
use chrono::{Datelike, NaiveDate};

/// Mean outdoor dry-bulb temperature for one calendar day.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DailyTemperature {
    pub date: NaiveDate,
    pub mean_c: f64,
}

impl DailyTemperature {
    pub fn mean_f(&self) -> f64 {
        celsius_to_fahrenheit(self.mean_c)
    }
}

/// A chronological series of daily mean temperatures. Days are strictly increasing; gaps are
/// allowed at construction and reported by [`WeatherSeries::check_complete`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeatherSeries {
    days: Vec<DailyTemperature>,
}

impl WeatherSeries {
    pub fn new(days: Vec<DailyTemperature>) -> Result<Self, WeatherDataError> {
        if let Some(pair) = days.windows(2).find(|pair| pair[1].date <= pair[0].date) {
            return Err(WeatherDataError::OutOfOrder(pair[1].date));
        }

        Ok(Self { days })
    }

    /// Builds a gap-free series starting at `start` with one temperature (°C) per day.
    pub fn from_daily_means_c(start: NaiveDate, temperatures_c: &[f64]) -> Self {
        Self {
            days: start
                .iter_days()
                .zip(temperatures_c)
                .map(|(date, &mean_c)| DailyTemperature { date, mean_c })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn days(&self) -> &[DailyTemperature] {
        &self.days
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.days.first().map(|day| day.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.days.last().map(|day| day.date)
    }

    /// Fails when any calendar day between the first and last entries is absent.
    pub fn check_complete(&self) -> Result<(), WeatherDataError> {
        let (Some(start), Some(end)) = (self.first_date(), self.last_date()) else {
            return Ok(());
        };
        let expected_days = (end - start).num_days() + 1;
        let missing_days = expected_days - self.days.len() as i64;
        if missing_days > 0 {
            return Err(WeatherDataError::MissingDays {
                start,
                end,
                missing_days,
            });
        }

        Ok(())
    }

    /// Days falling in `[start, end)`.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> &[DailyTemperature] {
        let from = self.days.partition_point(|day| day.date < start);
        let to = self.days.partition_point(|day| day.date < end);
        &self.days[from..to.max(from)]
    }

    /// A new series holding the days in `[start, end)`.
    pub fn sub_series(&self, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            days: self.between(start, end).to_vec(),
        }
    }

    /// Temperature (°F) on the day of this series with the same month and day as `date`,
    /// ignoring the year. 29 February falls back to 28 February when the series has no leap day.
    pub fn mean_f_on_month_day(&self, date: NaiveDate) -> Option<f64> {
        let find = |month: u32, day: u32| {
            self.days
                .iter()
                .find(|d| d.date.month() == month && d.date.day() == day)
                .map(DailyTemperature::mean_f)
        };

        find(date.month(), date.day()).or_else(|| {
            (date.month() == 2 && date.day() == 29)
                .then(|| find(2, 28))
                .flatten()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[fixture]
    fn january() -> WeatherSeries {
        let temperatures: Vec<f64> = (0..31).map(|i| i as f64 / 2.).collect();
        WeatherSeries::from_daily_means_c(date(2019, 1, 1), &temperatures)
    }

    #[rstest]
    fn should_select_half_open_ranges(january: WeatherSeries) {
        let days = january.between(date(2019, 1, 10), date(2019, 1, 20));
        assert_eq!(days.len(), 10);
        assert_eq!(days[0].date, date(2019, 1, 10));
        assert_eq!(days[9].date, date(2019, 1, 19));
        assert!(january.between(date(2019, 3, 1), date(2019, 4, 1)).is_empty());
    }

    #[rstest]
    fn should_report_missing_days() {
        let series = WeatherSeries::new(vec![
            DailyTemperature {
                date: date(2019, 1, 1),
                mean_c: 0.,
            },
            DailyTemperature {
                date: date(2019, 1, 4),
                mean_c: 0.,
            },
        ])
        .unwrap();
        assert!(matches!(
            series.check_complete(),
            Err(WeatherDataError::MissingDays {
                missing_days: 2,
                ..
            })
        ));
    }

    #[rstest]
    fn should_reject_out_of_order_days() {
        let result = WeatherSeries::new(vec![
            DailyTemperature {
                date: date(2019, 1, 2),
                mean_c: 0.,
            },
            DailyTemperature {
                date: date(2019, 1, 2),
                mean_c: 1.,
            },
        ]);
        assert!(matches!(result, Err(WeatherDataError::OutOfOrder(_))));
    }

    #[rstest]
    fn should_look_up_temperatures_by_month_and_day(january: WeatherSeries) {
        assert_relative_eq!(
            january.mean_f_on_month_day(date(2023, 1, 11)).unwrap(),
            41.
        );
        assert_eq!(january.mean_f_on_month_day(date(2023, 2, 11)), None);
    }
}
