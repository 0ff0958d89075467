//! Four islands minimizing the sphere function, trading their best
//! individuals around a ring every few generations.

use std::time::Duration;

use archipelago::{
  migration::{emigrate, immigrate, EmigrationConfig, ImmigrationConfig},
  objective,
  operation::{self, Operation},
  Lineage, Model, Population, RunOptions, Topology,
};
use rand::Rng;

type Genome = Vec<f64>;
type Batch = Vec<Genome>;

fn main() {
  env_logger::init();

  // each island starts from its own random cloud of 5-dimensional points
  let seed = Operation::initializer("seed", "real-vector", || {
    let mut rng = rand::thread_rng();
    (0..64)
      .map(|_| (0..5).map(|_| rng.gen_range(-10.0..10.0)).collect())
      .collect::<Batch>()
  });

  // fitness is the negated sphere function, so bigger is better
  let objective =
    objective::per_genome_par(|genome: &Genome| {
      -genome.iter().map(|x| x * x).sum::<f64>()
    });

  // keep the best half, then refill by jittering random survivors
  let evolve: Operation<Batch> = Operation::builder("evolve")
    .requires_fitness(true)
    .invalidates_fitness(true)
    .build(|mut population: Population<Batch>, _| {
      let fitness = population.fitness.take().expect("declared required");
      let mut order: Vec<usize> = (0..population.size()).collect();
      order.sort_by(|&a, &b| fitness[b].partial_cmp(&fitness[a]).unwrap());
      order.truncate(population.size() / 2);
      let mut survivors: Batch =
        order.into_iter().map(|i| population.genomes[i].clone()).collect();

      let mut rng = rand::thread_rng();
      let offspring: Batch = (0..survivors.len())
        .map(|_| {
          let parent = &survivors[rng.gen_range(0..survivors.len())];
          parent.iter().map(|x| x + rng.gen_range(-0.5..0.5)).collect()
        })
        .collect();
      survivors.extend(offspring);
      population.genomes = survivors;
      Ok(population)
    });

  // migration: ship 4 of the best genomes to the next island on the ring,
  // evict the worst residents to make room for arrivals
  let pick_best = |keep: usize| -> Operation<Batch> {
    Operation::builder(format!("best({keep})"))
      .requires_fitness(true)
      .invalidates_fitness(true)
      .build(move |mut population: Population<Batch>, _| {
        let fitness = population.fitness.take().expect("declared required");
        let mut order: Vec<usize> = (0..population.size()).collect();
        order.sort_by(|&a, &b| fitness[b].partial_cmp(&fitness[a]).unwrap());
        order.truncate(keep);
        let selected: Batch =
          order.into_iter().map(|i| population.genomes[i].clone()).collect();
        population.genomes = selected;
        Ok(population)
      })
  };
  let emigration = emigrate(
    pick_best(4),
    EmigrationConfig::builder()
      .topology(Topology::Ring)
      .interval(5)
      .build(),
  )
  .unwrap();
  let immigration = immigrate(
    pick_best,
    ImmigrationConfig::builder()
      .interval(5)
      .blocking(true)
      .timeout(Duration::from_secs(10))
      .build(),
  )
  .unwrap();

  let model = Model::new(
    objective,
    vec![Lineage::replicated(
      seed,
      vec![
        evolve,
        emigration,
        immigration,
        operation::max_generations(100),
      ],
      4,
    )
    .unwrap()],
  )
  .unwrap();

  let report = archipelago::run(model, RunOptions::default()).unwrap();

  println!("finished in {:?}", report.total_time());
  for outcome in report.populations() {
    let best = outcome
      .population
      .genomes
      .iter()
      .map(|genome| genome.iter().map(|x| x * x).sum::<f64>())
      .fold(f64::INFINITY, f64::min);
    println!(
      "{}: generation {}, best sphere value {best:.6}",
      outcome.worker, outcome.population.generation
    );
  }
}
