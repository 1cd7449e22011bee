use crate::config::{GeneticAlgorithmConfig, ParameterBounds};
use crate::core::building_modifications::{Adjustment, Adjustments};
use crate::core::calibration::evaluation::Evaluation;
use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// The calibrated adjustments and their bounds, in a fixed gene order.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSpace {
    parameters: Vec<(Adjustment, ParameterBounds)>,
}

impl ParameterSpace {
    pub fn new(parameters: &IndexMap<Adjustment, ParameterBounds>) -> Self {
        Self {
            parameters: parameters
                .iter()
                .map(|(adjustment, bounds)| (*adjustment, *bounds))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Named adjustment values for a gene vector.
    pub fn adjustments(&self, genes: &[f64]) -> Adjustments {
        self.parameters
            .iter()
            .zip(genes)
            .map(|((adjustment, _), value)| (*adjustment, *value))
            .collect()
    }

    fn random_genes<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        self.parameters
            .iter()
            .map(|(_, bounds)| rng.random_range(bounds.lower..=bounds.upper))
            .collect()
    }
}

/// A candidate set of adjustment values and, once simulated, its evaluation.
#[derive(Clone, Debug)]
pub struct Individual {
    pub genes: Vec<f64>,
    pub evaluation: Option<Evaluation>,
}

impl Individual {
    fn new(genes: Vec<f64>) -> Self {
        Self {
            genes,
            evaluation: None,
        }
    }

    /// Fitness of an evaluated individual; unevaluated individuals rank last.
    pub fn fitness(&self) -> f64 {
        self.evaluation
            .as_ref()
            .map_or(f64::INFINITY, |evaluation| evaluation.fitness)
    }

    pub fn is_accepted(&self) -> bool {
        self.evaluation
            .as_ref()
            .is_some_and(|evaluation| evaluation.accepted)
    }
}

pub(crate) fn initial_population<R: Rng>(
    space: &ParameterSpace,
    size: usize,
    rng: &mut R,
) -> Vec<Individual> {
    (0..size)
        .map(|_| Individual::new(space.random_genes(rng)))
        .collect()
}

/// Sorts by ascending fitness. Equal fitnesses keep their order.
pub(crate) fn rank(population: &mut [Individual]) {
    population.sort_by_key(|individual| OrderedFloat(individual.fitness()));
}

fn tournament<'a, R: Rng>(
    ranked: &'a [Individual],
    size: usize,
    rng: &mut R,
) -> Option<&'a Individual> {
    if ranked.is_empty() {
        return None;
    }
    (0..size.max(1))
        .map(|_| &ranked[rng.random_range(0..ranked.len())])
        .min_by_key(|individual| OrderedFloat(individual.fitness()))
}

/// Uniform crossover: when it happens, each gene is swapped between the children with even odds.
fn crossover<R: Rng>(
    first: &[f64],
    second: &[f64],
    probability: f64,
    rng: &mut R,
) -> (Vec<f64>, Vec<f64>) {
    let mut first = first.to_vec();
    let mut second = second.to_vec();
    if rng.random_bool(probability) {
        for (a, b) in first.iter_mut().zip(second.iter_mut()) {
            if rng.random_bool(0.5) {
                std::mem::swap(a, b);
            }
        }
    }

    (first, second)
}

/// Gaussian mutation with a standard deviation of `scale` times each parameter's range. Mutated
/// genes are clamped back into their bounds.
fn mutate<R: Rng>(
    genes: &mut [f64],
    space: &ParameterSpace,
    probability: f64,
    scale: f64,
    rng: &mut R,
) {
    for (gene, (_, bounds)) in genes.iter_mut().zip(&space.parameters) {
        if !rng.random_bool(probability) || bounds.range() <= 0. {
            continue;
        }
        let Ok(normal) = Normal::new(0., scale * bounds.range()) else {
            continue;
        };
        *gene = bounds.clamp(*gene + normal.sample(rng));
    }
}

/// Breeds the next population from a ranked one. The `elite_count` fittest individuals survive
/// unchanged together with their evaluations; the rest are offspring of tournament winners.
pub(crate) fn next_generation<R: Rng>(
    ranked: &[Individual],
    space: &ParameterSpace,
    config: &GeneticAlgorithmConfig,
    rng: &mut R,
) -> Vec<Individual> {
    let size = config.population_size;
    let mut next: Vec<Individual> = ranked.iter().take(config.elite_count).cloned().collect();

    while next.len() < size {
        let (Some(mother), Some(father)) = (
            tournament(ranked, config.tournament_size, rng),
            tournament(ranked, config.tournament_size, rng),
        ) else {
            break;
        };
        let (mut first, mut second) = crossover(
            &mother.genes,
            &father.genes,
            config.crossover_probability,
            rng,
        );
        for child in [&mut first, &mut second] {
            mutate(
                child,
                space,
                config.mutation_probability,
                config.mutation_scale,
                rng,
            );
        }
        next.push(Individual::new(first));
        if next.len() < size {
            next.push(Individual::new(second));
        }
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;
    use rstest::*;

    #[fixture]
    fn space() -> ParameterSpace {
        ParameterSpace::new(&IndexMap::from([
            (Adjustment::HeatingSetpointOffset, ParameterBounds::from((-5., 5.))),
            (Adjustment::MiscLoadMultiplier, ParameterBounds::from((0.5, 2.))),
            (Adjustment::AirLeakageMultiplier, ParameterBounds::from((1., 1.))),
        ]))
    }

    fn evaluated(genes: Vec<f64>, fitness: f64) -> Individual {
        Individual {
            genes,
            evaluation: Some(Evaluation {
                fitness,
                results: None,
                comparison: None,
                accepted: false,
            }),
        }
    }

    fn within_bounds(space: &ParameterSpace, genes: &[f64]) -> bool {
        genes
            .iter()
            .zip(&space.parameters)
            .all(|(gene, (_, bounds))| bounds.lower <= *gene && *gene <= bounds.upper)
    }

    #[rstest]
    fn should_draw_initial_population_within_bounds(space: ParameterSpace) {
        let mut rng = Pcg64::seed_from_u64(7);
        let population = initial_population(&space, 50, &mut rng);
        assert_eq!(population.len(), 50);
        for individual in &population {
            assert_eq!(individual.genes.len(), space.len());
            assert!(within_bounds(&space, &individual.genes));
            assert_eq!(individual.genes[2], 1.);
            assert!(individual.evaluation.is_none());
        }
    }

    #[rstest]
    fn should_be_reproducible_from_a_seed(space: ParameterSpace) {
        let first = initial_population(&space, 5, &mut Pcg64::seed_from_u64(42));
        let second = initial_population(&space, 5, &mut Pcg64::seed_from_u64(42));
        let genes = |population: &[Individual]| {
            population
                .iter()
                .map(|individual| individual.genes.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(genes(&first), genes(&second));
    }

    #[rstest]
    fn should_rank_by_ascending_fitness() {
        let mut population = vec![
            evaluated(vec![1.], 3.),
            Individual::new(vec![2.]),
            evaluated(vec![3.], 1.),
            evaluated(vec![4.], 2.),
        ];
        rank(&mut population);
        let order: Vec<f64> = population.iter().map(|i| i.genes[0]).collect();
        assert_eq!(order, vec![3., 4., 1., 2.]);
    }

    #[rstest]
    fn should_keep_elites_and_fill_with_offspring(space: ParameterSpace) {
        let mut rng = Pcg64::seed_from_u64(3);
        let mut ranked: Vec<Individual> = initial_population(&space, 10, &mut rng)
            .into_iter()
            .enumerate()
            .map(|(i, individual)| evaluated(individual.genes, i as f64))
            .collect();
        rank(&mut ranked);
        let config = GeneticAlgorithmConfig {
            population_size: 10,
            elite_count: 2,
            mutation_probability: 1.,
            ..Default::default()
        };

        let next = next_generation(&ranked, &space, &config, &mut rng);

        assert_eq!(next.len(), 10);
        assert_eq!(next[0].genes, ranked[0].genes);
        assert_eq!(next[1].genes, ranked[1].genes);
        assert_eq!(next[0].fitness(), 0.);
        assert!(next[2..].iter().all(|child| child.evaluation.is_none()));
        assert!(next.iter().all(|child| within_bounds(&space, &child.genes)));
    }

    #[rstest]
    fn should_not_recombine_without_crossover() {
        let mut rng = Pcg64::seed_from_u64(1);
        let (first, second) = crossover(&[1., 2., 3.], &[4., 5., 6.], 0., &mut rng);
        assert_eq!(first, vec![1., 2., 3.]);
        assert_eq!(second, vec![4., 5., 6.]);
    }

    #[rstest]
    fn should_exchange_genes_position_by_position() {
        let mut rng = Pcg64::seed_from_u64(1);
        let (first, second) = crossover(&[1., 2., 3., 4.], &[5., 6., 7., 8.], 1., &mut rng);
        for i in 0..4 {
            let mut pair = [first[i], second[i]];
            pair.sort_by(f64::total_cmp);
            assert_eq!(pair, [(i + 1) as f64, (i + 5) as f64]);
        }
    }

    #[rstest]
    fn should_clamp_mutations(space: ParameterSpace) {
        let mut rng = Pcg64::seed_from_u64(9);
        for _ in 0..100 {
            let mut genes = vec![5., 2., 1.];
            mutate(&mut genes, &space, 1., 2., &mut rng);
            assert!(within_bounds(&space, &genes));
        }
    }
}
