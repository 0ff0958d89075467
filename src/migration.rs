//! The island-model migration protocol: the send-side `emigrate` and the
//! receive-side `immigrate` operations.
//!
//! Both are ordinary [`Operation`]s placed inside a pipeline. Emigration
//! resolves this worker's neighbors through a [`Topology`], selects emigrants
//! with a caller-supplied selection operation, and drops the genome batch
//! into the chosen targets' mailboxes without ever blocking. Immigration
//! drains its own mailbox (blocking with a timeout, or polling once) and
//! splices the arrivals in, shrinking the resident population first so the
//! total size is preserved exactly.
//!
//! Senders and receivers do not run in lockstep: `generation % interval == 0`
//! on the sender says nothing about the receiver's local generation, and the
//! protocol tolerates that.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use typed_builder::TypedBuilder;

use crate::{
  error::{Error, Result},
  operation::Operation,
  pipeline::Pipeline,
  population::Population,
  representation::Representation,
  topology::Topology,
};

/// A genome batch in flight between two workers' mailboxes.
#[derive(Debug)]
pub struct Migrants<R> {
  /// Roster index of the sending worker.
  pub source: usize,
  /// The emigrant genomes. Their fitness does not travel with them.
  pub genomes: R,
}

/// How many targets an emigration draws from the neighbor set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetCount {
  /// Always this many targets.
  Fixed(usize),
  /// A fresh draw from this inclusive range on every emigration.
  Range(usize, usize),
}

impl TargetCount {
  fn draw(&self, rng: &mut impl Rng) -> usize {
    match *self {
      Self::Fixed(count) => count,
      Self::Range(low, high) => rng.gen_range(low..=high),
    }
  }
}

impl From<usize> for TargetCount {
  fn from(count: usize) -> Self {
    Self::Fixed(count)
  }
}

/// Configuration of an [`emigrate`] operation.
#[derive(TypedBuilder, Clone, Debug)]
pub struct EmigrationConfig {
  /// The neighbor-selection scheme.
  pub topology: Topology,
  /// Emigrate every this many generations.
  #[builder(default = 1)]
  pub interval: u32,
  /// How many distinct neighbors receive the emigrants.
  #[builder(default = TargetCount::Fixed(1), setter(into))]
  pub targets: TargetCount,
}

/// Configuration of an [`immigrate`] operation.
#[derive(TypedBuilder, Clone, Debug)]
pub struct ImmigrationConfig {
  /// Check for immigrants every this many generations.
  #[builder(default = 1)]
  pub interval: u32,
  /// Wait for a batch instead of polling the mailbox once.
  #[builder(default = true)]
  pub blocking: bool,
  /// How long a blocking wait may last before the run is declared
  /// deadlocked.
  #[builder(default = Duration::from_secs(10))]
  pub timeout: Duration,
}

/// Builds the send side of the migration protocol.
///
/// `selection` picks the emigrants: it is run on a copy of the population
/// through a single-operation sub-pipeline, and whatever genomes it leaves
/// are sent. The sub-pipeline carries the usual fitness laziness, so a
/// selection that requires fitness only invokes the objective on the
/// generations an emigration actually fires. The sender's own population is
/// returned unchanged, fitness included.
///
/// The operation is a no-op when the run has a single population, when the
/// population is terminated, when the local generation is off the interval,
/// or when fewer neighbors exist than targets requested.
pub fn emigrate<R: Representation>(
  selection: Operation<R>,
  config: EmigrationConfig,
) -> Result<Operation<R>> {
  if config.interval == 0 {
    return Err(Error::InvalidMigration(
      "emigration interval must be at least 1".to_string(),
    ));
  }
  if let TargetCount::Range(low, high) = config.targets {
    if low > high {
      return Err(Error::InvalidMigration(format!(
        "emigration target range {low}..={high} is empty"
      )));
    }
  }

  let EmigrationConfig {
    topology,
    interval,
    targets,
  } = config;
  let input = selection.input().clone();
  let selection = Pipeline::single(Arc::new(selection));

  Ok(
    Operation::builder("emigrate")
      .input(input)
      .build(move |population: Population<R>, ctx| {
        let n = ctx.population_count();
        if n <= 1
          || population.terminated
          || population.generation % interval != 0
        {
          return Ok(population);
        }

        let neighbors = topology.neighbors(n, ctx.index());
        let mut rng = rand::thread_rng();
        let wanted = targets.draw(&mut rng);
        if wanted == 0 || neighbors.len() < wanted {
          log::debug!(
            "worker {}: {} neighbors cannot host {wanted} emigrations",
            ctx.worker_name(),
            neighbors.len()
          );
          return Ok(population);
        }
        let chosen: Vec<usize> = neighbors
          .choose_multiple(&mut rng, wanted)
          .copied()
          .collect();

        let emigrants = selection.apply(population.clone(), ctx)?;
        log::debug!(
          "worker {}: generation {}, sending {} emigrants to {chosen:?}",
          ctx.worker_name(),
          population.generation,
          emigrants.size()
        );
        for target in chosen {
          ctx.send_migrants(
            target,
            Migrants {
              source: ctx.index(),
              genomes: emigrants.genomes.clone(),
            },
          );
        }
        Ok(population)
      }),
  )
}

/// Builds the receive side of the migration protocol.
///
/// `shrink` maps a target size to a selection operation that reduces the
/// resident population to that size; the immigrants are then concatenated
/// on, so the population leaves with exactly the size it came in with. The
/// shrink runs through a single-operation sub-pipeline with the usual
/// fitness laziness, and the splice always leaves fitness absent.
///
/// When `blocking`, an empty mailbox is waited on for up to the configured
/// timeout and a miss is fatal ([`Error::MigrationTimeout`], usually two
/// populations waiting on each other). Otherwise the mailbox is polled once
/// and an empty poll is a no-op. Either way the operation is a no-op, with
/// any existing fitness left intact, when the run has a single population,
/// the population is terminated, or the generation is off the interval.
pub fn immigrate<R, S>(
  shrink: S,
  config: ImmigrationConfig,
) -> Result<Operation<R>>
where
  R: Representation,
  S: Fn(usize) -> Operation<R> + Send + Sync + 'static,
{
  if config.interval == 0 {
    return Err(Error::InvalidMigration(
      "immigration interval must be at least 1".to_string(),
    ));
  }

  let ImmigrationConfig {
    interval,
    blocking,
    timeout,
  } = config;

  Ok(
    Operation::builder("immigrate")
      .build(move |population: Population<R>, ctx| {
        let n = ctx.population_count();
        if n <= 1
          || population.terminated
          || population.generation % interval != 0
        {
          return Ok(population);
        }

        let migrants = if blocking {
          Some(ctx.receive_migrants(timeout)?)
        } else {
          ctx.try_receive_migrants()
        };
        let Some(migrants) = migrants else {
          return Ok(population);
        };

        let arriving = migrants.genomes.population_size();
        let target_size = population.size().saturating_sub(arriving);
        log::debug!(
          "worker {}: generation {}, {arriving} immigrants from {}, \
           shrinking residents to {target_size}",
          ctx.worker_name(),
          population.generation,
          migrants.source
        );

        let residents = Pipeline::single(Arc::new(shrink(target_size)))
          .apply(population, ctx)?;
        let mut arrivals = Population::new(
          migrants.genomes,
          residents.representation.clone(),
        );
        arrivals.generation = residents.generation;

        let mut joined = Population::concatenate(vec![residents, arrivals])?;
        joined.record("immigrants", arriving as u64);
        Ok(joined)
      }),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{context::Context, objective};

  type Real = Vec<f64>;

  fn sum_objective() -> crate::objective::Objective<Real> {
    objective::batched(|genomes: &Real| genomes.clone())
  }

  fn cluster(n: usize) -> Vec<Context<Real>> {
    Context::cluster(
      sum_objective(),
      (0..n).map(|i| format!("population-{i}")).collect(),
    )
  }

  /// Keeps the `keep` best genomes by raw value.
  fn best(keep: usize) -> Operation<Real> {
    Operation::builder(format!("best({keep})"))
      .requires_fitness(true)
      .build(move |mut population: Population<Real>, _| {
        population
          .genomes
          .sort_by(|a, b| b.partial_cmp(a).expect("NaN genome"));
        population.genomes.truncate(keep);
        population.fitness = None;
        Ok(population)
      })
  }

  fn scored(genomes: Vec<f64>) -> Population<Real> {
    let mut population = Population::new(genomes, "real-vector");
    population.fitness = Some(population.genomes.clone());
    population
  }

  #[test]
  fn test_emigrate_sends_to_ring_neighbor() {
    let contexts = cluster(3);
    let operation = emigrate(
      best(2),
      EmigrationConfig::builder().topology(Topology::Ring).build(),
    )
    .unwrap();

    let population = scored(vec![5.0, 1.0, 9.0, 3.0]);
    let after = operation
      .apply_checked(population.clone(), &contexts[0])
      .unwrap();
    // the sender's own population is untouched
    assert_eq!(after.size(), 4);
    assert_eq!(after.genomes, population.genomes);

    // worker 1 got the two best genomes, nobody else got anything
    let received = contexts[1].try_receive_migrants().unwrap();
    assert_eq!(received.source, 0);
    assert_eq!(received.genomes, vec![9.0, 5.0]);
    assert!(contexts[0].try_receive_migrants().is_none());
    assert!(contexts[2].try_receive_migrants().is_none());
  }

  #[test]
  fn test_emigrate_respects_interval() {
    let contexts = cluster(2);
    let operation = emigrate(
      best(1),
      EmigrationConfig::builder()
        .topology(Topology::Ring)
        .interval(3)
        .build(),
    )
    .unwrap();

    let mut population = scored(vec![1.0, 2.0]);
    population.generation = 4;
    operation.apply_checked(population, &contexts[0]).unwrap();
    assert!(contexts[1].try_receive_migrants().is_none());

    let mut population = scored(vec![1.0, 2.0]);
    population.generation = 6;
    operation.apply_checked(population, &contexts[0]).unwrap();
    assert!(contexts[1].try_receive_migrants().is_some());
  }

  #[test]
  fn test_emigrate_is_noop_for_single_population() {
    let contexts = cluster(1);
    let operation = emigrate(
      best(1),
      EmigrationConfig::builder().topology(Topology::Ring).build(),
    )
    .unwrap();

    let after = operation
      .apply_checked(scored(vec![1.0, 2.0]), &contexts[0])
      .unwrap();
    assert_eq!(after.size(), 2);
    assert!(contexts[0].try_receive_migrants().is_none());
  }

  #[test]
  fn test_emigrate_is_noop_when_short_of_neighbors() {
    let contexts = cluster(2);
    // ring gives one neighbor, three targets requested
    let operation = emigrate(
      best(1),
      EmigrationConfig::builder()
        .topology(Topology::Ring)
        .targets(3)
        .build(),
    )
    .unwrap();

    operation
      .apply_checked(scored(vec![1.0, 2.0]), &contexts[0])
      .unwrap();
    assert!(contexts[1].try_receive_migrants().is_none());
  }

  #[test]
  fn test_off_interval_emigration_never_evaluates() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let contexts = Context::cluster(
      objective::batched(move |genomes: &Real| {
        seen.fetch_add(1, Ordering::SeqCst);
        genomes.clone()
      }),
      vec!["a".into(), "b".into()],
    );
    let operation = emigrate(
      best(1),
      EmigrationConfig::builder()
        .topology(Topology::Ring)
        .interval(5)
        .build(),
    )
    .unwrap();

    // off the interval nothing is sent, nothing is evaluated, and the
    // absent fitness stays absent
    let mut population = Population::new(vec![1.0, 2.0], "real-vector");
    population.generation = 2;
    let after = operation.apply_checked(population, &contexts[0]).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(after.fitness.is_none());
    assert!(contexts[1].try_receive_migrants().is_none());

    // on the interval the selection demands fitness, once
    let mut population = Population::new(vec![1.0, 2.0], "real-vector");
    population.generation = 5;
    operation.apply_checked(population, &contexts[0]).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(contexts[1].try_receive_migrants().is_some());
  }

  #[test]
  fn test_off_interval_immigration_keeps_fitness() {
    let contexts = cluster(2);
    let operation = immigrate(
      best,
      ImmigrationConfig::builder()
        .interval(4)
        .blocking(false)
        .build(),
    )
    .unwrap();

    let mut population = scored(vec![1.0, 2.0]);
    population.generation = 3;
    let after = operation.apply_checked(population, &contexts[0]).unwrap();
    assert_eq!(after.fitness, Some(vec![1.0, 2.0]));
  }

  #[test]
  fn test_emigrate_rejects_empty_target_range() {
    let result = emigrate(
      best(1),
      EmigrationConfig::builder()
        .topology(Topology::Ring)
        .targets(TargetCount::Range(3, 1))
        .build(),
    );
    assert!(matches!(result, Err(Error::InvalidMigration(_))));
  }

  #[test]
  fn test_immigrate_preserves_population_size() {
    let contexts = cluster(2);
    contexts[1].send_migrants(
      0,
      Migrants {
        source: 1,
        genomes: vec![100.0, 200.0],
      },
    );

    let operation = immigrate(
      best,
      ImmigrationConfig::builder().blocking(false).build(),
    )
    .unwrap();

    let after = operation
      .apply_checked(scored(vec![1.0, 2.0, 3.0, 4.0, 5.0]), &contexts[0])
      .unwrap();
    assert_eq!(after.size(), 5);
    // fitness never survives a splice
    assert!(after.fitness.is_none());
    // the three best residents plus both immigrants
    assert_eq!(after.genomes, vec![5.0, 4.0, 3.0, 100.0, 200.0]);
  }

  #[test]
  fn test_immigrate_nonblocking_empty_mailbox_is_noop() {
    let contexts = cluster(2);
    let operation = immigrate(
      best,
      ImmigrationConfig::builder().blocking(false).build(),
    )
    .unwrap();

    let before = scored(vec![1.0, 2.0]);
    let after = operation
      .apply_checked(before.clone(), &contexts[0])
      .unwrap();
    assert_eq!(after.genomes, before.genomes);
  }

  #[test]
  fn test_immigrate_blocking_times_out() {
    let contexts = cluster(2);
    let operation = immigrate(
      best,
      ImmigrationConfig::builder()
        .timeout(Duration::from_millis(20))
        .build(),
    )
    .unwrap();

    let err = operation
      .apply_checked(scored(vec![1.0, 2.0]), &contexts[0])
      .unwrap_err();
    assert!(matches!(err, Error::MigrationTimeout { .. }));
  }
}
