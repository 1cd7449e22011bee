use crate::core::weather::{DailyTemperature, WeatherSeries};
use crate::errors::WeatherDataError;
use crate::input::Site;
use chrono::NaiveDate;
use csv::ReaderBuilder as CsvReaderBuilder;
use indexmap::IndexMap;
use serde::Deserialize;
use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const COLUMN_LATITUDE: usize = 6;
const COLUMN_LONGITUDE: usize = 7;
const COLUMN_YEAR: usize = 0;
const COLUMN_MONTH: usize = 1;
const COLUMN_DAY: usize = 2;
const COLUMN_AIR_TEMP: usize = 6; // dry bulb temp in degrees C
const EPW_HEADER_ROWS: usize = 8;

/// Non-leap year onto which typical-year weather files are mapped.
pub const REFERENCE_YEAR: i32 = 2019;

/// Distance (degrees of latitude or longitude) beyond which a weather file is reported as being
/// far from the building it is used for.
const LOCATION_TOLERANCE_DEGREES: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EpwDates {
    /// Use the year column of each row (actual meteorological year files).
    AsRecorded,
    /// Ignore the year column and place every day in the given year (typical year files).
    InYear(i32),
}

#[derive(Clone, Debug)]
pub struct EpwWeather {
    pub latitude: f64,
    pub longitude: f64,
    pub series: WeatherSeries,
}

fn field<'a>(record: &'a csv::StringRecord, column: usize, row: usize) -> Result<&'a str, WeatherDataError> {
    record
        .get(column)
        .ok_or_else(|| WeatherDataError::Read(format!("row {row} has no column {column}")))
}

fn parse_field<T: std::str::FromStr>(
    record: &csv::StringRecord,
    column: usize,
    row: usize,
) -> Result<T, WeatherDataError> {
    let value = field(record, column, row)?;
    value.trim().parse().map_err(|_| {
        WeatherDataError::Read(format!("row {row} column {column}: could not parse '{value}'"))
    })
}

/// Reads an EPW file and reduces its hourly dry-bulb temperatures to daily means.
pub fn epw_to_daily_series(file: impl Read, dates: EpwDates) -> Result<EpwWeather, WeatherDataError> {
    let mut reader = CsvReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_reader(file);

    let mut latitude: Option<f64> = None;
    let mut longitude: Option<f64> = None;
    // (date) -> (sum, count)
    let mut hourly_sums: IndexMap<NaiveDate, (f64, usize)> = Default::default();

    for (i, result) in reader.records().enumerate() {
        let record = result.map_err(|e| WeatherDataError::Read(e.to_string()))?;
        if i == 0 {
            latitude = Some(parse_field(&record, COLUMN_LATITUDE, i)?);
            longitude = Some(parse_field(&record, COLUMN_LONGITUDE, i)?);
        } else if i >= EPW_HEADER_ROWS {
            let year = match dates {
                EpwDates::AsRecorded => parse_field(&record, COLUMN_YEAR, i)?,
                EpwDates::InYear(year) => year,
            };
            let month: u32 = parse_field(&record, COLUMN_MONTH, i)?;
            let day: u32 = parse_field(&record, COLUMN_DAY, i)?;
            let air_temperature: f64 = parse_field(&record, COLUMN_AIR_TEMP, i)?;
            let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                // leap days of typical years have no place in a non-leap year
                debug!("Skipping EPW row {i} dated {year}-{month}-{day}");
                continue;
            };
            let entry = hourly_sums.entry(date).or_insert((0., 0));
            entry.0 += air_temperature;
            entry.1 += 1;
        }
    }

    let mut days: Vec<DailyTemperature> = hourly_sums
        .into_iter()
        .map(|(date, (sum, count))| DailyTemperature {
            date,
            mean_c: sum / count as f64,
        })
        .collect();
    days.sort_by_key(|day| day.date);
    if days.is_empty() {
        return Err(WeatherDataError::Empty);
    }

    Ok(EpwWeather {
        latitude: latitude.ok_or(WeatherDataError::Empty)?,
        longitude: longitude.ok_or(WeatherDataError::Empty)?,
        series: WeatherSeries::new(days)?,
    })
}

#[derive(Debug, Deserialize)]
struct DailyWeatherRow {
    date: NaiveDate,
    temperature_c: f64,
}

/// Reads a daily weather file with the columns `date,temperature_c`.
pub fn daily_csv_to_series(file: impl Read) -> Result<WeatherSeries, WeatherDataError> {
    let mut reader = CsvReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);
    let days = reader
        .deserialize::<DailyWeatherRow>()
        .map(|row| {
            row.map(|row| DailyTemperature {
                date: row.date,
                mean_c: row.temperature_c,
            })
            .map_err(|e| WeatherDataError::Read(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if days.is_empty() {
        return Err(WeatherDataError::Empty);
    }

    WeatherSeries::new(days)
}

/// Reads a weather file on its own dates, EPW when the extension is `.epw` and daily CSV
/// otherwise.
pub fn weather_series_from_path(path: &Path) -> Result<WeatherSeries, WeatherDataError> {
    let file = File::open(path)
        .map_err(|e| WeatherDataError::Read(format!("{}: {e}", path.display())))?;
    let reader = BufReader::new(file);

    if path.extension().and_then(OsStr::to_str) == Some("epw") {
        Ok(epw_to_daily_series(reader, EpwDates::AsRecorded)?.series)
    } else {
        daily_csv_to_series(reader)
    }
}

/// Source of the two weather series a calibration needs for a building location.
pub trait WeatherProvider: Send + Sync {
    /// Actual weather covering the billing periods.
    fn billing_period_weather(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<WeatherSeries, WeatherDataError>;

    /// A full typical year onto which fitted bill models are projected.
    fn reference_year_weather(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<WeatherSeries, WeatherDataError>;
}

/// Reads weather from files, EPW when the extension is `.epw` and daily CSV otherwise.
#[derive(Clone, Debug)]
pub struct FileWeatherProvider {
    billing_weather_path: PathBuf,
    reference_weather_path: PathBuf,
}

impl FileWeatherProvider {
    pub fn new(billing_weather_path: PathBuf, reference_weather_path: PathBuf) -> Self {
        Self {
            billing_weather_path,
            reference_weather_path,
        }
    }

    /// Reads the reference year from `reference_weather_path`, or else from the EPW file of the
    /// site's weather station. A relative station path is taken from `record_dir`.
    pub fn for_site(
        site: &Site,
        record_dir: &Path,
        billing_weather_path: PathBuf,
        reference_weather_path: Option<PathBuf>,
    ) -> Result<Self, WeatherDataError> {
        let reference_weather_path = match reference_weather_path {
            Some(path) => path,
            None => record_dir.join(
                site.epw_file_path()
                    .ok_or(WeatherDataError::NoReferenceWeather)?,
            ),
        };
        debug!("Reference weather from {}", reference_weather_path.display());

        Ok(Self::new(billing_weather_path, reference_weather_path))
    }

    fn read(
        path: &Path,
        dates: EpwDates,
        latitude: f64,
        longitude: f64,
    ) -> Result<WeatherSeries, WeatherDataError> {
        let file = File::open(path)
            .map_err(|e| WeatherDataError::Read(format!("{}: {e}", path.display())))?;
        let reader = BufReader::new(file);

        if path.extension().and_then(OsStr::to_str) == Some("epw") {
            let weather = epw_to_daily_series(reader, dates)?;
            if (weather.latitude - latitude).abs() > LOCATION_TOLERANCE_DEGREES
                || (weather.longitude - longitude).abs() > LOCATION_TOLERANCE_DEGREES
            {
                warn!(
                    "Weather file {} is located at ({}, {}), far from the building at ({latitude}, {longitude})",
                    path.display(),
                    weather.latitude,
                    weather.longitude
                );
            }
            Ok(weather.series)
        } else {
            daily_csv_to_series(reader)
        }
    }
}

impl WeatherProvider for FileWeatherProvider {
    fn billing_period_weather(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<WeatherSeries, WeatherDataError> {
        Self::read(
            &self.billing_weather_path,
            EpwDates::AsRecorded,
            latitude,
            longitude,
        )
    }

    fn reference_year_weather(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<WeatherSeries, WeatherDataError> {
        Self::read(
            &self.reference_weather_path,
            EpwDates::InYear(REFERENCE_YEAR),
            latitude,
            longitude,
        )
    }
}

/// Weather already held in memory, used the same for every location.
#[derive(Clone, Debug)]
pub struct StaticWeatherProvider {
    pub billing_period: WeatherSeries,
    pub reference_year: WeatherSeries,
}

impl WeatherProvider for StaticWeatherProvider {
    fn billing_period_weather(&self, _: f64, _: f64) -> Result<WeatherSeries, WeatherDataError> {
        Ok(self.billing_period.clone())
    }

    fn reference_year_weather(&self, _: f64, _: f64) -> Result<WeatherSeries, WeatherDataError> {
        Ok(self.reference_year.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::WeatherStation;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn epw_text(year: i32) -> String {
        let mut text = String::from(
            "LOCATION,Denver Intl Ap,CO,USA,TMY3,725650,39.83,-104.65,-7.0,1650.0\n",
        );
        for _ in 1..EPW_HEADER_ROWS {
            text.push_str("HEADER,placeholder\n");
        }
        for day in 1..=2 {
            for hour in 1..=24 {
                let temperature = if day == 1 { hour as f64 } else { -5. };
                text.push_str(&format!(
                    "{year},1,{day},{hour},60,A7A7,{temperature},-10.0,50,83000\n"
                ));
            }
        }
        text
    }

    #[rstest]
    fn should_average_hourly_epw_temperatures_per_day() {
        let weather = epw_to_daily_series(epw_text(1995).as_bytes(), EpwDates::AsRecorded).unwrap();
        assert_relative_eq!(weather.latitude, 39.83);
        assert_relative_eq!(weather.longitude, -104.65);
        let days = weather.series.days();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(1995, 1, 1).unwrap());
        assert_relative_eq!(days[0].mean_c, 12.5);
        assert_relative_eq!(days[1].mean_c, -5.);
    }

    #[rstest]
    fn should_map_typical_year_onto_reference_year() {
        let weather =
            epw_to_daily_series(epw_text(1995).as_bytes(), EpwDates::InYear(REFERENCE_YEAR))
                .unwrap();
        assert_eq!(
            weather.series.first_date(),
            NaiveDate::from_ymd_opt(REFERENCE_YEAR, 1, 1)
        );
    }

    #[rstest]
    fn should_report_unparseable_epw_rows() {
        let text = epw_text(1995).replace("-5,", "cold,");
        assert!(matches!(
            epw_to_daily_series(text.as_bytes(), EpwDates::AsRecorded),
            Err(WeatherDataError::Read(_))
        ));
    }

    #[rstest]
    fn should_read_daily_csv() {
        let csv = "date,temperature_c\n2019-01-01,-3.5\n2019-01-02,1.0\n";
        let series = daily_csv_to_series(csv.as_bytes()).unwrap();
        assert_eq!(series.len(), 2);
        assert_relative_eq!(series.days()[0].mean_c, -3.5);
    }

    #[rstest]
    fn should_reject_empty_daily_csv() {
        assert!(matches!(
            daily_csv_to_series("date,temperature_c\n".as_bytes()),
            Err(WeatherDataError::Empty)
        ));
    }

    fn site(epw_file_path: Option<&str>) -> Site {
        Site {
            latitude: 39.74,
            longitude: -104.99,
            weather_station: Some(WeatherStation {
                name: "Denver".to_string(),
                epw_file_path: epw_file_path.map(str::to_string),
            }),
        }
    }

    #[rstest]
    fn should_default_reference_weather_to_the_weather_station() {
        let provider = FileWeatherProvider::for_site(
            &site(Some("weather/denver.epw")),
            Path::new("records"),
            PathBuf::from("actual.csv"),
            None,
        )
        .unwrap();
        assert_eq!(
            provider.reference_weather_path,
            PathBuf::from("records/weather/denver.epw")
        );

        let provider = FileWeatherProvider::for_site(
            &site(Some("weather/denver.epw")),
            Path::new("records"),
            PathBuf::from("actual.csv"),
            Some(PathBuf::from("tmy.epw")),
        )
        .unwrap();
        assert_eq!(provider.reference_weather_path, PathBuf::from("tmy.epw"));
        assert_eq!(provider.billing_weather_path, PathBuf::from("actual.csv"));
    }

    #[rstest]
    fn should_require_reference_weather_without_a_station_file() {
        assert!(matches!(
            FileWeatherProvider::for_site(&site(None), Path::new("."), PathBuf::from("a.csv"), None),
            Err(WeatherDataError::NoReferenceWeather)
        ));
    }
}
