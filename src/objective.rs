//! Objective function wrappers.
//!
//! The engine consumes one batched objective per model: genomes in, fitness
//! out, same cardinality and order, higher is better. Most objectives are
//! written per genome though, so this module lifts per-genome closures into
//! batched form, sequentially or in parallel with [rayon].

use std::sync::Arc;

use rayon::prelude::*;

use crate::representation::Representation;

/// A batched objective function shared by all workers of a run.
pub type Objective<R> =
  Arc<dyn Fn(&R) -> <R as Representation>::Fitness + Send + Sync>;

/// Wraps an already-batched objective.
pub fn batched<R, F>(objective: F) -> Objective<R>
where
  R: Representation,
  F: Fn(&R) -> R::Fitness + Send + Sync + 'static,
{
  Arc::new(objective)
}

/// Lifts a per-genome objective into a batched one.
pub fn per_genome<G, F>(objective: F) -> Objective<Vec<G>>
where
  G: Clone + Send + 'static,
  F: Fn(&G) -> f64 + Send + Sync + 'static,
{
  Arc::new(move |genomes: &Vec<G>| genomes.iter().map(&objective).collect())
}

/// Lifts a per-genome objective into a batched one evaluated in parallel.
///
/// For cheap objectives the parallelization overhead usually dominates.
/// Benchmark if in doubt.
pub fn per_genome_par<G, F>(objective: F) -> Objective<Vec<G>>
where
  G: Clone + Send + Sync + 'static,
  F: Fn(&G) -> f64 + Send + Sync + 'static,
{
  Arc::new(move |genomes: &Vec<G>| {
    genomes.par_iter().map(|genome| objective(genome)).collect()
  })
}
