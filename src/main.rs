use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use hpxml_calibration::config::CalibrationConfig;
use hpxml_calibration::core::building_modifications::{apply_adjustments, Adjustments};
use hpxml_calibration::core::degree_days::{degree_days, degree_days_between, DegreeDays};
use hpxml_calibration::input::{bills_from_csv, ingest_building_record, BuildingRecord};
use hpxml_calibration::output::FileOutput;
use hpxml_calibration::read_weather_file::{weather_series_from_path, FileWeatherProvider};
use hpxml_calibration::{inverse_model, run_calibration, write_normalized_consumption};
use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct CalibrationArgs {
    #[command(subcommand)]
    command: Command,
    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Increase logging verbosity (-v debug, -vv trace)")]
    verbose: u8,
    #[clap(
        long,
        global = true,
        default_value_t = false,
        help = "Whether to log out spans"
    )]
    log_spans: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Calibrate a building against its utility bills
    Calibrate {
        #[command(flatten)]
        inputs: BillInputs,
        #[arg(long, help = "Number of simulations to run in parallel")]
        num_proc: Option<usize>,
    },
    /// Write weather-normalized annual and per-bill consumption
    Normalize {
        #[command(flatten)]
        inputs: BillInputs,
    },
    /// Print heating and cooling degree days of a weather file
    DegreeDays {
        weather_file: PathBuf,
        #[arg(long, default_value_t = 65.0, help = "Base temperature in °F")]
        base: f64,
        #[arg(long, requires = "end", help = "First day to include (YYYY-MM-DD)")]
        start: Option<NaiveDate>,
        #[arg(long, requires = "start", help = "Day after the last day to include (YYYY-MM-DD)")]
        end: Option<NaiveDate>,
    },
    /// Insert bills from a CSV file into a building record
    ImportBills {
        building_file: PathBuf,
        bills_file: PathBuf,
        #[arg(long, short, help = "Where to write the updated record; defaults to stdout")]
        output: Option<PathBuf>,
    },
    /// Apply adjustments to the first building of a record
    Modify {
        building_file: PathBuf,
        #[arg(help = "JSON or YAML map of adjustment name to value")]
        adjustments_file: PathBuf,
        #[arg(long, short, help = "Where to write the modified record; defaults to stdout")]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Clone, Debug)]
struct BillInputs {
    building_file: PathBuf,
    #[arg(long, short, help = "Calibration configuration in JSON or YAML")]
    config: Option<PathBuf>,
    #[arg(long, help = "Bills in CSV format, replacing any in the building record")]
    bills: Option<PathBuf>,
    #[arg(long, help = "Weather over the billing periods (.epw or daily .csv)")]
    billing_weather: PathBuf,
    #[arg(
        long,
        help = "Typical-year weather to normalize onto (.epw or daily .csv); defaults to the weather station's EPW file"
    )]
    reference_weather: Option<PathBuf>,
    #[arg(long, short, help = "Directory for results; defaults to <building>__calibration")]
    output_dir: Option<PathBuf>,
}

impl BillInputs {
    fn record(&self) -> anyhow::Result<BuildingRecord> {
        let mut record = read_record(&self.building_file)?;
        if let Some(bills) = &self.bills {
            let bills = bills_from_csv(BufReader::new(open(bills)?))?;
            record.insert_bills(&bills)?;
        }
        Ok(record)
    }

    fn config(&self) -> anyhow::Result<CalibrationConfig> {
        match &self.config {
            Some(path) => CalibrationConfig::from_path(path),
            None => Ok(CalibrationConfig::default()),
        }
    }

    fn weather(&self, record: &BuildingRecord) -> anyhow::Result<FileWeatherProvider> {
        let record_dir = self.building_file.parent().unwrap_or_else(|| Path::new(""));
        Ok(FileWeatherProvider::for_site(
            &record.first_building()?.site,
            record_dir,
            self.billing_weather.clone(),
            self.reference_weather.clone(),
        )?)
    }

    fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| {
            let stem = self
                .building_file
                .file_stem()
                .and_then(OsStr::to_str)
                .unwrap_or("building");
            self.building_file
                .with_file_name(format!("{stem}__calibration"))
        })
    }
}

fn open(path: &Path) -> anyhow::Result<File> {
    File::open(path).with_context(|| format!("Could not open {}", path.display()))
}

fn read_record(path: &Path) -> anyhow::Result<BuildingRecord> {
    ingest_building_record(open(path)?)
        .with_context(|| format!("Could not read building record {}", path.display()))
}

fn write_record(record: &BuildingRecord, output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, record)?;
            writer.flush()?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, record)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

fn read_adjustments(path: &Path) -> anyhow::Result<Adjustments> {
    let contents = std::fs::read_to_string(path)?;
    Ok(match path.extension().and_then(OsStr::to_str) {
        Some("json") => serde_json::from_str(&contents)?,
        _ => serde_yaml::from_str(&contents)?,
    })
}

fn write_degree_days(totals: &DegreeDays, output: impl Write) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record(totals.keys())?;
    writer.write_record(totals.values().map(|total| format!("{total:.2}")))?;
    writer.flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = CalibrationArgs::parse();

    // set up basic tracing
    let tracing_subscriber = {
        let level = match args.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        let mut builder = tracing_subscriber::fmt::fmt().with_max_level(level);

        if args.log_spans {
            builder = builder.with_span_events(FmtSpan::CLOSE);
        }

        builder.finish()
    };
    tracing::subscriber::set_global_default(tracing_subscriber)?;

    match args.command {
        Command::Calibrate { inputs, num_proc } => {
            let record = inputs.record()?;
            let mut config = inputs.config()?;
            if let Some(num_proc) = num_proc {
                config.num_proc = num_proc;
            }
            let output_dir = inputs.output_dir();
            let output = FileOutput::new(output_dir.clone(), "{}.json".to_string());

            let outcome = run_calibration(
                &record,
                config,
                &inputs.weather(&record)?,
                &output,
                output_dir,
            )?;
            info!(
                "Calibration {}; logbook written to {}",
                if outcome.success { "succeeded" } else { "failed" },
                output.path_for_location_key("logbook")?.display()
            );
            for (adjustment, value) in &outcome.best_adjustments {
                println!("{adjustment}: {value:.3}");
            }
        }
        Command::Normalize { inputs } => {
            let record = inputs.record()?;
            let config = inputs.config()?;
            let model = inverse_model(&record, &config, &inputs.weather(&record)?)?;
            let output = FileOutput::new(inputs.output_dir(), "{}.json".to_string());
            write_normalized_consumption(&model, &output)?;
            info!(
                "Normalized consumption written to {}",
                output.path_for_location_key("normalized_bills")?.display()
            );
        }
        Command::DegreeDays {
            weather_file,
            base,
            start,
            end,
        } => {
            let series = weather_series_from_path(&weather_file)?;
            let totals = match (start, end) {
                (Some(start), Some(end)) => degree_days_between(&series, base, start, end)?,
                _ => degree_days(&series, base)?,
            };
            write_degree_days(&totals, io::stdout().lock())?;
        }
        Command::ImportBills {
            building_file,
            bills_file,
            output,
        } => {
            let mut record = read_record(&building_file)?;
            let bills = bills_from_csv(BufReader::new(open(&bills_file)?))?;
            record.insert_bills(&bills)?;
            write_record(&record, output.as_deref())?;
        }
        Command::Modify {
            building_file,
            adjustments_file,
            output,
        } => {
            let mut record = read_record(&building_file)?;
            let adjustments = read_adjustments(&adjustments_file)?;
            apply_adjustments(record.first_building_mut()?, &adjustments)?;
            write_record(&record, output.as_deref())?;
        }
    }

    Ok(())
}
