use crate::config::CalibrationConfig;
use crate::core::building_modifications::{apply_adjustments, Adjustments};
use crate::core::calibration::comparison::{compare, fitness, meets_criteria, Comparison};
use crate::core::calibration::population::{Individual, ParameterSpace};
use crate::core::consumption::DisaggregatedConsumption;
use crate::core::simulators::{SimulationResults, Simulator, BUILDING_FILE_NAME};
use crate::input::BuildingRecord;
use rayon::ThreadPool;
use std::fs::{self, File};
use std::io::BufWriter;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc;
use tracing::{debug, warn};

/// How well one individual's simulation matched the target.
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub fitness: f64,
    /// `None` when the simulation failed.
    pub results: Option<DisaggregatedConsumption>,
    pub comparison: Option<Comparison>,
    pub accepted: bool,
}

impl Evaluation {
    fn failed(penalty: f64) -> Self {
        Self {
            fitness: penalty,
            results: None,
            comparison: None,
            accepted: false,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.results.is_none()
    }
}

/// Read-only state shared by every evaluation task of a run.
pub(crate) struct EvaluationContext<'a> {
    pub record: &'a BuildingRecord,
    pub target: &'a DisaggregatedConsumption,
    pub simulator: &'a dyn Simulator,
    pub config: &'a CalibrationConfig,
    pub space: &'a ParameterSpace,
}

/// Writes the record into `working_dir` and simulates it, optionally after applying adjustments
/// to its first building.
pub(crate) fn simulate_scenario(
    simulator: &dyn Simulator,
    record: &BuildingRecord,
    adjustments: Option<&Adjustments>,
    working_dir: &Path,
) -> anyhow::Result<SimulationResults> {
    let mut record = record.clone();
    if let Some(adjustments) = adjustments {
        apply_adjustments(record.first_building_mut()?, adjustments)?;
    }

    fs::create_dir_all(working_dir)?;
    let writer = BufWriter::new(File::create(working_dir.join(BUILDING_FILE_NAME))?);
    serde_json::to_writer_pretty(writer, &record)?;

    simulator.simulate(&record, working_dir)
}

fn evaluate_individual(context: &EvaluationContext, genes: &[f64], working_dir: &Path) -> Evaluation {
    let penalty = context.config.fitness.failure_penalty;
    let adjustments = context.space.adjustments(genes);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        simulate_scenario(
            context.simulator,
            context.record,
            Some(&adjustments),
            working_dir,
        )
    }));
    let results = match outcome {
        Ok(Ok(results)) => results.disaggregate(),
        Ok(Err(error)) => {
            warn!(
                "Simulation in {} failed, assigning penalty fitness: {error:#}",
                working_dir.display()
            );
            return Evaluation::failed(penalty);
        }
        Err(_) => {
            warn!(
                "Simulation in {} panicked, assigning penalty fitness",
                working_dir.display()
            );
            return Evaluation::failed(penalty);
        }
    };

    let comparison = compare(&results, context.target);
    let fitness = fitness(&comparison, &context.config.fitness);
    if !fitness.is_finite() {
        warn!("Non-finite fitness in {}", working_dir.display());
        return Evaluation::failed(penalty);
    }
    debug!("{} fitness {fitness:.4}", working_dir.display());

    Evaluation {
        fitness,
        accepted: meets_criteria(&comparison, &context.config.acceptance_criteria),
        results: Some(results),
        comparison: Some(comparison),
    }
}

/// Evaluates every individual of the population that has no evaluation yet, one pool task per
/// individual. Each task reports `(index, evaluation)` over a channel and the results are slotted
/// back by index once the whole generation has finished.
pub(crate) fn evaluate_generation(
    pool: &ThreadPool,
    context: &EvaluationContext,
    generation_dir: &Path,
    population: &mut [Individual],
) {
    let (sender, receiver) = mpsc::channel();

    pool.scope(|scope| {
        for (id, individual) in population.iter().enumerate() {
            if individual.evaluation.is_some() {
                continue;
            }
            let sender = sender.clone();
            let genes = &individual.genes;
            let working_dir = generation_dir.join(format!("individual_{id:02}"));
            scope.spawn(move |_| {
                let evaluation = evaluate_individual(context, genes, &working_dir);
                // the receiver lives until after the scope, so sending cannot fail
                let _ = sender.send((id, evaluation));
            });
        }
    });
    drop(sender);

    for (id, evaluation) in receiver {
        population[id].evaluation = Some(evaluation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParameterBounds;
    use crate::core::building_modifications::Adjustment;
    use crate::core::consumption::EndUseConsumption;
    use crate::input::tests::building_json;
    use crate::input::{ingest_building_record, FuelType};
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use rayon::ThreadPoolBuilder;
    use rstest::*;
    use std::env;

    /// Returns fixed results scaled by the building's plug-load multiplier, and fails or panics
    /// for the multipliers named.
    #[derive(Debug)]
    struct FakeSimulator;

    impl Simulator for FakeSimulator {
        fn simulate(
            &self,
            record: &BuildingRecord,
            working_dir: &Path,
        ) -> anyhow::Result<SimulationResults> {
            assert!(working_dir.join(BUILDING_FILE_NAME).exists());
            let multiplier = record.first_building()?.building_details.misc_loads.plug_loads[0]
                .usage_multiplier
                .unwrap_or(1.);
            if multiplier == 1.5 {
                anyhow::bail!("simulation diverged");
            }
            if multiplier == 2. {
                panic!("simulator crashed");
            }
            let mut results = SimulationResults::default();
            results.add_end_use(FuelType::Electricity, "Plug Loads", 10. * multiplier);
            Ok(results)
        }
    }

    #[rstest]
    fn should_evaluate_each_individual_in_its_own_directory() {
        let record = ingest_building_record(building_json().to_string().as_bytes()).unwrap();
        let target: DisaggregatedConsumption = IndexMap::from([(
            FuelType::Electricity,
            EndUseConsumption {
                baseload: 10.,
                heating: 0.,
                cooling: 0.,
            },
        )]);
        let config = CalibrationConfig::default();
        let space = ParameterSpace::new(&IndexMap::from([(
            Adjustment::MiscLoadMultiplier,
            ParameterBounds::from((0.5, 2.)),
        )]));
        let context = EvaluationContext {
            record: &record,
            target: &target,
            simulator: &FakeSimulator,
            config: &config,
            space: &space,
        };
        let mut population: Vec<Individual> = [1., 1.5, 2., 0.5]
            .into_iter()
            .map(|gene| Individual {
                genes: vec![gene],
                evaluation: None,
            })
            .collect();
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let generation_dir = env::temp_dir().join(format!(
            "hpxml-calibration-evaluation-{}/generation_00",
            std::process::id()
        ));

        evaluate_generation(&pool, &context, &generation_dir, &mut population);

        let fitnesses: Vec<f64> = population.iter().map(Individual::fitness).collect();
        assert_eq!(fitnesses[0], 0.);
        assert_eq!(fitnesses[1], config.fitness.failure_penalty);
        assert_eq!(fitnesses[2], config.fitness.failure_penalty);
        assert!(fitnesses[3] > 0. && fitnesses[3] < config.fitness.failure_penalty);
        assert!(population[0].is_accepted());
        assert!(population[1].evaluation.as_ref().unwrap().is_failure());
        for id in 0..4 {
            assert!(generation_dir
                .join(format!("individual_{id:02}"))
                .join(BUILDING_FILE_NAME)
                .exists());
        }
        fs::remove_dir_all(generation_dir.parent().unwrap()).unwrap();
    }
}
