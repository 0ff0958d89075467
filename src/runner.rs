//! The concurrent multi-population runner.
//!
//! One worker thread per population, one coordinating caller per run. Every
//! worker applies its initializer first, then blocks until the coordinator
//! broadcasts the [`Roster`], the barrier guaranteeing that no population
//! starts evolving before every mailbox exists and is addressable. From
//! there, workers loop through their pipelines independently; only migration
//! synchronizes them. The coordinator joins all workers at the end and
//! assembles the [`Report`], so a stalled worker stalls the whole run,
//! surfaced through the migration timeout rather than a watchdog.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
  bootstrap::{self, BootstrapConfig},
  context::{Context, Roster},
  error::{Error, Result},
  migration::Migrants,
  model::Model,
  objective::Objective,
  operation::Operation,
  pipeline::Pipeline,
  population::Population,
  representation::Representation,
};

/// One worker's final accounting.
#[derive(Serialize, Deserialize)]
#[serde(bound(
  serialize = "R: Serialize, R::Fitness: Serialize",
  deserialize = "R: Deserialize<'de>, R::Fitness: Deserialize<'de>"
))]
pub struct PopulationReport<R: Representation> {
  /// The worker's roster name.
  pub worker: String,
  /// Wall time from the worker's spawn to its termination.
  pub time: Duration,
  /// The final population snapshot.
  pub population: Population<R>,
}

impl<R> fmt::Debug for PopulationReport<R>
where
  R: Representation + fmt::Debug,
  R::Fitness: fmt::Debug,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PopulationReport")
      .field("worker", &self.worker)
      .field("time", &self.time)
      .field("population", &self.population)
      .finish()
  }
}

/// The outcome of a whole run. Immutable once assembled.
#[derive(Serialize)]
#[serde(bound(serialize = "R: Serialize, R::Fitness: Serialize"))]
pub struct Report<R: Representation> {
  total_time: Duration,
  populations: Vec<PopulationReport<R>>,
}

impl<R> fmt::Debug for Report<R>
where
  R: Representation + fmt::Debug,
  R::Fitness: fmt::Debug,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Report")
      .field("total_time", &self.total_time)
      .field("populations", &self.populations)
      .finish()
  }
}

impl<R: Representation> Report<R> {
  /// Wall time of the whole run, measured at the coordinator.
  pub fn total_time(&self) -> Duration {
    self.total_time
  }

  /// Per-population reports, in global population index order.
  pub fn populations(&self) -> &[PopulationReport<R>] {
    &self.populations
  }
}

/// Options of a single [`run`] invocation.
#[derive(TypedBuilder, Clone, Debug)]
pub struct RunOptions {
  /// Worker node addresses to distribute populations across. Empty means
  /// everything runs on the local node.
  #[builder(default)]
  pub nodes: Vec<String>,

  /// Population indices per node, parallel to `nodes`. Defaults to an even
  /// contiguous split.
  #[builder(default)]
  pub population_groups: Option<Vec<Vec<usize>>>,

  /// Leader-side handshake tuning for distributed runs.
  #[builder(default)]
  pub bootstrap: BootstrapConfig,
}

impl Default for RunOptions {
  fn default() -> Self {
    Self::builder().build()
  }
}

/// Runs a model to termination and reports every population's outcome.
///
/// With no nodes configured, all population workers run as local threads.
/// With nodes configured, the leader-side bootstrap handshake of
/// [`bootstrap`] places each population group on a remote worker node and
/// collects the reports back, which is why genomes and fitness must be
/// serializable here.
///
/// Populations placed on different nodes do not share a roster: each node's
/// workers see only their own group, so topology indexing and migration are
/// scoped to the node. A model that relies on migration between all of its
/// populations must keep them in a single group.
pub fn run<R>(model: Model<R>, options: RunOptions) -> Result<Report<R>>
where
  R: Representation + Serialize + DeserializeOwned,
  R::Fitness: Serialize + DeserializeOwned,
{
  let start = Instant::now();
  let count = model.population_count();

  if options.nodes.is_empty() {
    log::info!("running {count} populations locally");
    let indices: Vec<usize> = (0..count).collect();
    let populations = run_group(&model, &indices)?;
    return Ok(Report {
      total_time: start.elapsed(),
      populations,
    });
  }

  let groups = match options.population_groups {
    Some(groups) => validate_groups(groups, options.nodes.len(), count)?,
    None => even_split(count, options.nodes.len()),
  };
  log::info!(
    "running {count} populations across {} nodes: {groups:?}",
    options.nodes.len()
  );
  if groups.iter().filter(|group| !group.is_empty()).count() > 1 {
    log::warn!(
      "populations are split across nodes; each node's roster covers only \
       its own group, so topologies and migration see the group, not the \
       whole run"
    );
  }

  let node_reports =
    bootstrap::lead::<R>(&options.nodes, &groups, &options.bootstrap)?;

  let mut indexed = Vec::with_capacity(count);
  for (node, (group, reports)) in
    options.nodes.iter().zip(groups.iter().zip(node_reports))
  {
    if reports.len() != group.len() {
      return Err(Error::Protocol(format!(
        "node {node} reported {} populations, expected {}",
        reports.len(),
        group.len()
      )));
    }
    indexed.extend(group.iter().copied().zip(reports));
  }
  indexed.sort_by_key(|(index, _)| *index);

  Ok(Report {
    total_time: start.elapsed(),
    populations: indexed.into_iter().map(|(_, report)| report).collect(),
  })
}

/// Everything a worker needs to hear before it may start evolving.
struct RosterEnvelope<R: Representation> {
  roster: Roster,
  outboxes: Vec<Sender<Migrants<R>>>,
}

/// Runs the populations with the given global indices on local threads.
/// Reports come back in the order of `indices`.
pub(crate) fn run_group<R: Representation>(
  model: &Model<R>,
  indices: &[usize],
) -> Result<Vec<PopulationReport<R>>> {
  let expanded = model.expand();
  for &index in indices {
    if index >= expanded.len() {
      return Err(Error::InvalidModel(format!(
        "population index {index} out of range, model has {}",
        expanded.len()
      )));
    }
  }

  let names: Vec<String> = indices
    .iter()
    .map(|index| format!("population-{index}"))
    .collect();
  let roster = Roster::new(names.clone());

  let (outboxes, inboxes): (Vec<_>, Vec<_>) =
    indices.iter().map(|_| mpsc::channel()).unzip();

  let mut roster_senders = Vec::with_capacity(indices.len());
  let mut handles = Vec::with_capacity(indices.len());
  for ((slot, &index), inbox) in
    indices.iter().enumerate().zip(inboxes.into_iter())
  {
    let (initializer, pipeline) = expanded[index].clone();
    let objective = model.objective();
    let name = names[slot].clone();
    let (roster_tx, roster_rx) = mpsc::channel();
    roster_senders.push(roster_tx);

    log::debug!("spawning worker {name}");
    let handle = thread::Builder::new().name(name.clone()).spawn(move || {
      worker_loop(name, initializer, pipeline, objective, slot, inbox, roster_rx)
    })?;
    handles.push(handle);
  }

  // every worker exists and owns its mailbox: broadcast the roster. A
  // worker that already failed has dropped its end, which join() reports.
  for sender in roster_senders {
    let _ = sender.send(RosterEnvelope {
      roster: roster.clone(),
      outboxes: outboxes.clone(),
    });
  }
  drop(outboxes);

  let mut reports = Vec::with_capacity(handles.len());
  let mut first_error = None;
  for (slot, handle) in handles.into_iter().enumerate() {
    match handle.join() {
      Ok(Ok(report)) => reports.push(report),
      Ok(Err(error)) => {
        log::error!("worker {}: {error}", names[slot]);
        first_error.get_or_insert(error);
      }
      Err(panic) => {
        let reason = panic
          .downcast_ref::<&str>()
          .map(|s| s.to_string())
          .or_else(|| panic.downcast_ref::<String>().cloned())
          .unwrap_or_else(|| "panicked".to_string());
        log::error!("worker {} panicked: {reason}", names[slot]);
        first_error.get_or_insert(Error::WorkerFailed {
          worker: names[slot].clone(),
          reason,
        });
      }
    }
  }
  match first_error {
    Some(error) => Err(error),
    None => Ok(reports),
  }
}

fn worker_loop<R: Representation>(
  name: String,
  initializer: std::sync::Arc<Operation<R>>,
  pipeline: Pipeline<R>,
  objective: Objective<R>,
  index: usize,
  inbox: Receiver<Migrants<R>>,
  roster_rx: Receiver<RosterEnvelope<R>>,
) -> Result<PopulationReport<R>> {
  let started = Instant::now();

  let mut population = initializer.initialize()?;
  log::debug!("worker {name}: initialized {} genomes", population.size());

  let envelope = roster_rx.recv().map_err(|_| Error::WorkerFailed {
    worker: name.clone(),
    reason: "coordinator went away before the roster broadcast".to_string(),
  })?;
  let ctx = Context::new(
    objective,
    envelope.roster,
    index,
    envelope.outboxes,
    inbox,
  );

  loop {
    population = pipeline.apply(population, &ctx)?;
    if population.terminated {
      break;
    }
    population.generation += 1;
  }
  log::debug!(
    "worker {name}: terminated at generation {}",
    population.generation
  );

  Ok(PopulationReport {
    worker: name,
    time: started.elapsed(),
    population,
  })
}

/// Splits `0..count` into `nodes` contiguous groups of near-equal size.
fn even_split(count: usize, nodes: usize) -> Vec<Vec<usize>> {
  let base = count / nodes;
  let extra = count % nodes;
  let mut next = 0;
  (0..nodes)
    .map(|node| {
      let size = base + usize::from(node < extra);
      let group = (next..next + size).collect();
      next += size;
      group
    })
    .collect()
}

fn validate_groups(
  groups: Vec<Vec<usize>>,
  nodes: usize,
  count: usize,
) -> Result<Vec<Vec<usize>>> {
  if groups.len() != nodes {
    return Err(Error::InvalidModel(format!(
      "{} population groups given for {nodes} nodes",
      groups.len()
    )));
  }
  let mut seen = vec![false; count];
  for group in &groups {
    for &index in group {
      if index >= count {
        return Err(Error::InvalidModel(format!(
          "population index {index} out of range, model has {count}"
        )));
      }
      if seen[index] {
        return Err(Error::InvalidModel(format!(
          "population index {index} assigned to more than one node"
        )));
      }
      seen[index] = true;
    }
  }
  if let Some(missing) = seen.iter().position(|placed| !placed) {
    return Err(Error::InvalidModel(format!(
      "population index {missing} is not assigned to any node"
    )));
  }
  Ok(groups)
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::{
    migration::{
      emigrate,
      immigrate,
      EmigrationConfig,
      ImmigrationConfig,
    },
    model::Lineage,
    objective,
    operation::{self, Operation},
    topology::Topology,
  };

  type Real = Vec<f64>;

  fn initializer(size: usize) -> Operation<Real> {
    Operation::initializer("seed", "real-vector", move || {
      (0..size).map(|i| i as f64).collect()
    })
  }

  fn negate_objective() -> Objective<Real> {
    objective::per_genome(|g: &f64| -g)
  }

  /// Keeps the `keep` genomes with the best fitness.
  fn best(keep: usize) -> Operation<Real> {
    Operation::builder(format!("best({keep})"))
      .requires_fitness(true)
      .invalidates_fitness(true)
      .build(move |mut population: Population<Real>, _| {
        let fitness =
          population.fitness.take().expect("declared as required");
        let mut order: Vec<usize> = (0..population.genomes.len()).collect();
        order.sort_by(|&a, &b| {
          fitness[b].partial_cmp(&fitness[a]).expect("NaN fitness")
        });
        order.truncate(keep);
        let selected: Vec<f64> =
          order.into_iter().map(|i| population.genomes[i]).collect();
        population.genomes = selected;
        Ok(population)
      })
  }

  #[test]
  fn test_single_population_terminates_at_generation_five() {
    let model = Model::new(
      negate_objective(),
      vec![
        Lineage::new(initializer(10), vec![operation::max_generations(5)])
          .unwrap(),
      ],
    )
    .unwrap();

    let report = run(model, RunOptions::default()).unwrap();
    assert_eq!(report.populations().len(), 1);

    let outcome = &report.populations()[0];
    assert_eq!(outcome.worker, "population-0");
    assert_eq!(outcome.population.generation, 5);
    assert!(outcome.population.terminated);
    assert_eq!(outcome.population.size(), 10);
  }

  #[test]
  fn test_duplicated_lineage_runs_independent_populations() {
    let model = Model::new(
      negate_objective(),
      vec![Lineage::replicated(
        initializer(4),
        vec![operation::max_generations(2)],
        3,
      )
      .unwrap()],
    )
    .unwrap();

    let report = run(model, RunOptions::default()).unwrap();
    assert_eq!(report.populations().len(), 3);
    for (index, outcome) in report.populations().iter().enumerate() {
      assert_eq!(outcome.worker, format!("population-{index}"));
      assert!(outcome.population.terminated);
    }
  }

  #[test]
  fn test_ring_migration_run_completes_without_deadlock() {
    let emigration = EmigrationConfig::builder()
      .topology(Topology::Ring)
      .interval(1)
      .build();
    let immigration = ImmigrationConfig::builder()
      .interval(1)
      .blocking(true)
      .timeout(Duration::from_secs(5))
      .build();

    let model = Model::new(
      negate_objective(),
      vec![Lineage::replicated(
        initializer(8),
        vec![
          emigrate(best(2), emigration).unwrap(),
          immigrate(best, immigration).unwrap(),
          operation::max_generations(4),
        ],
        2,
      )
      .unwrap()],
    )
    .unwrap();

    let report = run(model, RunOptions::default()).unwrap();
    assert_eq!(report.populations().len(), 2);
    for outcome in report.populations() {
      assert!(outcome.population.terminated);
      assert_eq!(outcome.population.generation, 4);
      // every round splices in exactly as many immigrants as emigrate
      // sends, so the size never drifts
      assert_eq!(outcome.population.size(), 8);
      assert_eq!(
        outcome.population.log.get("immigrants"),
        Some(&serde_json::json!(2))
      );
    }
  }

  #[test]
  fn test_run_group_scopes_roster_to_its_indices() {
    // only population 1 of a two-population model runs in this group; its
    // roster has a single entry, so ring emigration no-ops and the group
    // still terminates on its own
    let emigration =
      EmigrationConfig::builder().topology(Topology::Ring).build();
    let model = Model::new(
      negate_objective(),
      vec![Lineage::replicated(
        initializer(4),
        vec![
          emigrate(best(1), emigration).unwrap(),
          operation::max_generations(2),
        ],
        2,
      )
      .unwrap()],
    )
    .unwrap();

    let reports = run_group(&model, &[1]).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].worker, "population-1");
    assert!(reports[0].population.terminated);
  }

  #[test]
  fn test_worker_error_aborts_the_run() {
    let failing: Operation<Real> = Operation::builder("explode").build(
      |population, _| {
        if population.generation >= 2 {
          Err(Error::WorkerFailed {
            worker: "population-0".to_string(),
            reason: "injected".to_string(),
          })
        } else {
          Ok(population)
        }
      },
    );

    let model = Model::new(
      negate_objective(),
      vec![Lineage::new(
        initializer(4),
        vec![failing, operation::max_generations(10)],
      )
      .unwrap()],
    )
    .unwrap();

    let err = run(model, RunOptions::default()).unwrap_err();
    assert!(matches!(err, Error::WorkerFailed { .. }));
  }

  #[test]
  fn test_even_split() {
    assert_eq!(even_split(5, 2), vec![vec![0, 1, 2], vec![3, 4]]);
    assert_eq!(even_split(4, 2), vec![vec![0, 1], vec![2, 3]]);
    assert_eq!(even_split(1, 2), vec![vec![0], vec![]]);
  }

  #[test]
  fn test_group_validation() {
    assert!(validate_groups(vec![vec![0], vec![1]], 2, 2).is_ok());
    // wrong node count
    assert!(validate_groups(vec![vec![0, 1]], 2, 2).is_err());
    // double placement
    assert!(validate_groups(vec![vec![0, 1], vec![1]], 2, 2).is_err());
    // unplaced population
    assert!(validate_groups(vec![vec![0], vec![]], 2, 2).is_err());
    // out of range
    assert!(validate_groups(vec![vec![0], vec![5]], 2, 2).is_err());
  }
}
