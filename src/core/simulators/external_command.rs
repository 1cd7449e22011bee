use crate::core::simulators::{SimulationResults, Simulator, BUILDING_FILE_NAME};
use crate::input::BuildingRecord;
use anyhow::{bail, Context};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, instrument};

const BUILDING_PLACEHOLDER: &str = "{building}";
const WORKING_DIR_PLACEHOLDER: &str = "{working_dir}";
const STDERR_TAIL_LINES: usize = 20;

/// Runs an external simulation program in each individual's working directory, for example
/// `openstudio run --workflow ...`, and reads back its annual results.
///
/// Arguments may contain `{building}` and `{working_dir}`, which are replaced with the path of
/// the building document and of the working directory.
#[derive(Clone, Debug)]
pub struct ExternalCommandSimulator {
    program: String,
    args: Vec<String>,
    results_file: PathBuf,
}

impl ExternalCommandSimulator {
    pub fn new(program: String, args: Vec<String>, results_file: PathBuf) -> Self {
        Self {
            program,
            args,
            results_file,
        }
    }

    fn expand_args(&self, working_dir: &Path) -> Vec<String> {
        let building = working_dir.join(BUILDING_FILE_NAME);
        self.args
            .iter()
            .map(|arg| {
                arg.replace(BUILDING_PLACEHOLDER, &building.to_string_lossy())
                    .replace(WORKING_DIR_PLACEHOLDER, &working_dir.to_string_lossy())
            })
            .collect()
    }
}

impl Simulator for ExternalCommandSimulator {
    #[instrument(skip_all, fields(program = %self.program, working_dir = %working_dir.display()))]
    fn simulate(
        &self,
        _record: &BuildingRecord,
        working_dir: &Path,
    ) -> anyhow::Result<SimulationResults> {
        let args = self.expand_args(working_dir);
        debug!("Running {} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(working_dir)
            .output()
            .with_context(|| format!("Could not start simulator '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            bail!(
                "Simulator '{}' exited with {} in {}:\n{tail}",
                self.program,
                output.status,
                working_dir.display()
            );
        }

        SimulationResults::read_annual_json(&working_dir.join(&self.results_file))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::input::ingest_building_record;
    use crate::input::tests::building_json;
    use crate::input::FuelType;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use std::{env, fs};

    fn working_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!(
            "hpxml-calibration-external-{name}-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[fixture]
    fn record() -> BuildingRecord {
        ingest_building_record(building_json().to_string().as_bytes()).unwrap()
    }

    #[rstest]
    fn should_substitute_placeholders() {
        let simulator = ExternalCommandSimulator::new(
            "simulate".to_string(),
            vec!["--hpxml={building}".to_string(), "{working_dir}/out".to_string()],
            PathBuf::from("results.json"),
        );
        let dir = Path::new("/tmp/generation_00/individual_03");
        assert_eq!(
            simulator.expand_args(dir),
            vec![
                "--hpxml=/tmp/generation_00/individual_03/building.json".to_string(),
                "/tmp/generation_00/individual_03/out".to_string(),
            ]
        );
    }

    #[rstest]
    fn should_read_results_written_by_the_command(record: BuildingRecord) {
        let dir = working_dir("success");
        let simulator = ExternalCommandSimulator::new(
            "sh".to_string(),
            vec![
                "-c".to_string(),
                r#"echo '{"End Use: Natural Gas: Heating (MBtu)": 42.5}' > results.json"#
                    .to_string(),
            ],
            PathBuf::from("results.json"),
        );

        let results = simulator.simulate(&record, &dir).unwrap();
        assert_relative_eq!(results.total(FuelType::NaturalGas), 42.5);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[rstest]
    fn should_fail_when_the_command_fails(record: BuildingRecord) {
        let dir = working_dir("failure");
        let simulator = ExternalCommandSimulator::new(
            "sh".to_string(),
            vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()],
            PathBuf::from("results.json"),
        );

        let error = simulator.simulate(&record, &dir).unwrap_err();
        assert!(error.to_string().contains("boom"));
        fs::remove_dir_all(&dir).unwrap();
    }
}
