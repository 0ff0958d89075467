//! The per-generation population snapshot and its pure transformation
//! helpers.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
  error::{Error, Result},
  representation::{Representation, RepresentationTag},
};

/// One population's state for one generation.
///
/// A population is created by an initializer operation at generation 1 with
/// fitness absent, transformed by successive operation applications inside a
/// [`Pipeline`](crate::pipeline::Pipeline), and discarded once `terminated`
/// is set and the final snapshot has been reported.
///
/// The one invariant that matters: `fitness` is either `None` or consistent
/// with the current `genomes`. Any operation that changes genomes without
/// recomputing fitness must declare `invalidates_fitness`, which makes the
/// pipeline clear the field after the application.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound(
  serialize = "R: Serialize, R::Fitness: Serialize",
  deserialize = "R: Deserialize<'de>, R::Fitness: Deserialize<'de>"
))]
pub struct Population<R: Representation> {
  /// The genome batch. Opaque to the engine.
  pub genomes: R,
  /// Fitness of `genomes`, if it has been computed for them.
  pub fitness: Option<R::Fitness>,
  /// The genome encoding this population currently uses.
  pub representation: RepresentationTag,
  /// Generation counter, starting at 1.
  pub generation: u32,
  /// Set by a termination operation; no further generations run.
  pub terminated: bool,
  /// Free-form diagnostics recorded by operations along the way.
  pub log: BTreeMap<String, serde_json::Value>,
}

impl<R: Representation> Population<R> {
  /// Creates a generation-1 population with no fitness.
  pub fn new(genomes: R, representation: impl Into<RepresentationTag>) -> Self {
    Self {
      genomes,
      fitness: None,
      representation: representation.into(),
      generation: 1,
      terminated: false,
      log: BTreeMap::new(),
    }
  }

  /// Number of individuals.
  pub fn size(&self) -> usize {
    self.genomes.population_size()
  }

  /// Records a diagnostic entry, replacing any previous value for `key`.
  pub fn record(
    &mut self,
    key: impl Into<String>,
    value: impl Into<serde_json::Value>,
  ) {
    self.log.insert(key.into(), value.into());
  }

  /// Returns `count` copies of this snapshot.
  pub fn duplicate(&self, count: usize) -> Vec<Self> {
    vec![self.clone(); count]
  }

  /// Concatenates populations using the representation's own genome and
  /// fitness concatenation.
  ///
  /// See [`join_with`](Population::join_with) for the join semantics.
  pub fn concatenate(parts: Vec<Self>) -> Result<Self> {
    Self::join_with(parts, R::concatenate, R::concatenate_fitness)
  }

  /// Joins populations with caller-supplied genome and fitness join
  /// functions. Used by branching flows and by immigration.
  ///
  /// All inputs must share one representation, or the join fails with
  /// [`Error::IncompatibleRepresentations`]. The joined population takes the
  /// maximum generation, is terminated if any input is terminated, and has
  /// fitness only if *every* input has fitness; partial fitness is never
  /// trusted. Log entries are merged, later inputs winning on key clashes.
  pub fn join_with<GF, FF>(
    parts: Vec<Self>,
    join_genomes: GF,
    join_fitness: FF,
  ) -> Result<Self>
  where
    GF: FnOnce(Vec<R>) -> R,
    FF: FnOnce(Vec<R::Fitness>) -> R::Fitness,
  {
    if parts.is_empty() {
      return Err(Error::IncompatibleRepresentations { found: vec![] });
    }
    if !parts.iter().map(|p| &p.representation).all_equal() {
      return Err(Error::IncompatibleRepresentations {
        found: parts
          .iter()
          .map(|p| p.representation.clone())
          .unique()
          .collect(),
      });
    }

    let representation = parts[0].representation.clone();
    let generation = parts.iter().map(|p| p.generation).max().unwrap_or(1);
    let terminated = parts.iter().any(|p| p.terminated);
    let all_scored = parts.iter().all(|p| p.fitness.is_some());

    let mut genome_parts = Vec::with_capacity(parts.len());
    let mut fitness_parts = Vec::with_capacity(parts.len());
    let mut log = BTreeMap::new();
    for part in parts {
      genome_parts.push(part.genomes);
      if all_scored {
        fitness_parts.extend(part.fitness);
      }
      log.extend(part.log);
    }

    Ok(Self {
      genomes: join_genomes(genome_parts),
      fitness: all_scored.then(|| join_fitness(fitness_parts)),
      representation,
      generation,
      terminated,
      log,
    })
  }
}

// derived Debug cannot name the `R::Fitness: Debug` bound, so spell the
// impl out
impl<R> fmt::Debug for Population<R>
where
  R: Representation + fmt::Debug,
  R::Fitness: fmt::Debug,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Population")
      .field("genomes", &self.genomes)
      .field("fitness", &self.fitness)
      .field("representation", &self.representation)
      .field("generation", &self.generation)
      .field("terminated", &self.terminated)
      .field("log", &self.log)
      .finish()
  }
}
