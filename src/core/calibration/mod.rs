pub mod comparison;
mod evaluation;
pub mod logbook;
mod population;
pub mod savings;

pub use comparison::{Comparison, FuelComparison};
pub use evaluation::Evaluation;
pub use logbook::{ExistingHomeResults, GenerationRecord, Logbook};
pub use population::{Individual, ParameterSpace};

use crate::config::CalibrationConfig;
use crate::core::building_modifications::Adjustments;
use crate::core::calibration::comparison::compare;
use crate::core::calibration::evaluation::{evaluate_generation, simulate_scenario, EvaluationContext};
use crate::core::calibration::population::{initial_population, next_generation, rank};
use crate::core::consumption::DisaggregatedConsumption;
use crate::core::simulators::Simulator;
use crate::input::BuildingRecord;
use crate::statistics::summarize;
use anyhow::bail;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const EXISTING_HOME_DIRECTORY: &str = "existing_home";

#[derive(Clone, Copy, Debug, PartialEq)]
enum Stage {
    Evaluate,
    CheckTermination,
    Reproduce,
    Terminal { success: bool },
}

/// What a calibration run settled on.
#[derive(Clone, Debug)]
pub struct CalibrationOutcome {
    pub success: bool,
    /// Adjustments of the best individual of the final generation.
    pub best_adjustments: Adjustments,
    pub best_results: Option<DisaggregatedConsumption>,
    pub logbook: Logbook,
}

/// Genetic search over building adjustments for the one whose simulation best matches a
/// bill-derived target.
///
/// Simulations of a generation run on a fixed pool of `num_proc` threads that is built once and
/// reused for every generation. Each individual is simulated in
/// `<output_dir>/generation_<gg>/individual_<ii>`.
pub struct CalibrationEngine {
    config: CalibrationConfig,
    simulator: Arc<dyn Simulator>,
    pool: ThreadPool,
    space: ParameterSpace,
    output_dir: PathBuf,
}

impl CalibrationEngine {
    pub fn new(
        config: CalibrationConfig,
        simulator: Arc<dyn Simulator>,
        output_dir: PathBuf,
    ) -> anyhow::Result<Self> {
        config.check()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_proc)
            .thread_name(|index| format!("calibration-worker-{index}"))
            .build()?;
        let space = ParameterSpace::new(&config.parameters);

        Ok(Self {
            config,
            simulator,
            pool,
            space,
            output_dir,
        })
    }

    pub fn parameter_space(&self) -> &ParameterSpace {
        &self.space
    }

    /// Simulates the unmodified building and compares it with the target.
    pub fn existing_home_results(
        &self,
        record: &BuildingRecord,
        target: &DisaggregatedConsumption,
    ) -> anyhow::Result<ExistingHomeResults> {
        let results = simulate_scenario(
            self.simulator.as_ref(),
            record,
            None,
            &self.output_dir.join(EXISTING_HOME_DIRECTORY),
        )?
        .disaggregate();

        Ok(ExistingHomeResults {
            comparison: compare(&results, target),
            existing_home_sim_results: results,
        })
    }

    #[instrument(skip_all)]
    pub fn run(
        &self,
        record: &BuildingRecord,
        target: Arc<DisaggregatedConsumption>,
    ) -> anyhow::Result<CalibrationOutcome> {
        if target.is_empty() {
            bail!("No weather-normalized consumption to calibrate against");
        }
        let ga = &self.config.genetic_algorithm;

        let mut logbook = Logbook::new(self.existing_home_results(record, &target)?);
        let mut rng = Pcg64::seed_from_u64(ga.random_seed);
        let mut population = initial_population(&self.space, ga.population_size, &mut rng);
        let context = EvaluationContext {
            record,
            target: &target,
            simulator: self.simulator.as_ref(),
            config: &self.config,
            space: &self.space,
        };
        if self.config.acceptance_criteria.uses_simplified_criteria() {
            info!("No CVRMSE threshold configured, accepting on simplified criteria");
        }

        let mut generation = 0;
        let mut stage = Stage::Evaluate;
        let success = loop {
            stage = match stage {
                Stage::Evaluate => {
                    let generation_dir = self.output_dir.join(format!("generation_{generation:02}"));
                    evaluate_generation(&self.pool, &context, &generation_dir, &mut population);
                    rank(&mut population);
                    let summary = self.generation_record(generation, &population);
                    info!(
                        "Generation {generation}: best fitness {:.4}, mean {:.4}, {} failed",
                        summary.best_fitness, summary.fitness.mean, summary.failed_simulations
                    );
                    logbook.calibration_results.push(summary);
                    Stage::CheckTermination
                }
                Stage::CheckTermination => {
                    if population.iter().any(Individual::is_accepted) {
                        Stage::Terminal { success: true }
                    } else if generation + 1 >= ga.generations {
                        Stage::Terminal { success: false }
                    } else {
                        Stage::Reproduce
                    }
                }
                Stage::Reproduce => {
                    population = next_generation(&population, &self.space, ga, &mut rng);
                    generation += 1;
                    Stage::Evaluate
                }
                Stage::Terminal { success } => break success,
            };
        };

        if success {
            info!("Calibration succeeded after {} generations", generation + 1);
        } else {
            warn!(
                "Calibration did not meet the acceptance criteria within {} generations",
                ga.generations
            );
        }
        logbook.calibration_success = success;
        let best = best_individual(&population);

        Ok(CalibrationOutcome {
            success,
            best_adjustments: best
                .map(|individual| self.space.adjustments(&individual.genes))
                .unwrap_or_default(),
            best_results: best
                .and_then(|individual| individual.evaluation.as_ref())
                .and_then(|evaluation| evaluation.results.clone()),
            logbook,
        })
    }

    fn generation_record(&self, generation: usize, ranked: &[Individual]) -> GenerationRecord {
        let fitnesses: Vec<f64> = ranked.iter().map(Individual::fitness).collect();
        let best = best_individual(ranked);
        let evaluation = best.and_then(|individual| individual.evaluation.as_ref());

        GenerationRecord {
            generation,
            fitness: summarize(&fitnesses),
            best_fitness: best.map_or(f64::INFINITY, Individual::fitness),
            best_individual: best
                .map(|individual| self.space.adjustments(&individual.genes))
                .unwrap_or_default(),
            best_individual_sim_results: evaluation.and_then(|e| e.results.clone()),
            comparison: evaluation.and_then(|e| e.comparison.clone()),
            failed_simulations: ranked
                .iter()
                .filter(|individual| {
                    individual
                        .evaluation
                        .as_ref()
                        .is_some_and(Evaluation::is_failure)
                })
                .count(),
        }
    }
}

/// The first accepted individual of a ranked population, else its fittest.
fn best_individual(ranked: &[Individual]) -> Option<&Individual> {
    ranked
        .iter()
        .find(|individual| individual.is_accepted())
        .or_else(|| ranked.first())
}
