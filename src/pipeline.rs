//! Ordered operation chains with build-time representation checking.

use std::sync::Arc;

use crate::{
  context::Context,
  error::{Error, Result},
  operation::Operation,
  population::Population,
  representation::{Representation, RepresentationTag},
};

/// An ordered sequence of operations applied once per generation.
///
/// Construction validates the whole chain against the representation the
/// lineage's initializer produces: each operation must accept what the chain
/// has produced so far, and since a pipeline is re-applied generation
/// after generation, the first operation is re-checked against the
/// pipeline's own output. A mismatch fails eagerly with
/// [`Error::RepresentationMismatch`], never at run time.
#[derive(Clone)]
pub struct Pipeline<R: Representation> {
  operations: Vec<Arc<Operation<R>>>,
}

impl<R: Representation> Pipeline<R> {
  /// Builds a pipeline whose input is a population of the `initial`
  /// representation.
  pub fn new(
    initial: impl Into<RepresentationTag>,
    operations: Vec<Operation<R>>,
  ) -> Result<Self> {
    let operations: Vec<_> = operations.into_iter().map(Arc::new).collect();
    let mut current = initial.into();
    for operation in &operations {
      if !operation.input().accepts(&current) {
        return Err(Error::RepresentationMismatch {
          operation: operation.name().to_string(),
          representation: current,
        });
      }
      current = operation.output().resolve(current);
    }
    // the chain wraps around: next generation feeds this output back into
    // the first operation
    if let Some(first) = operations.first() {
      if !first.input().accepts(&current) {
        return Err(Error::RepresentationMismatch {
          operation: first.name().to_string(),
          representation: current,
        });
      }
    }
    Ok(Self { operations })
  }

  /// Wraps one already-validated operation, skipping the chain check. Used
  /// by migration to run a nested selection with the same laziness rules as
  /// a full pipeline.
  pub(crate) fn single(operation: Arc<Operation<R>>) -> Self {
    Self {
      operations: vec![operation],
    }
  }

  /// The operations of this pipeline, in application order.
  pub fn operations(&self) -> &[Arc<Operation<R>>] {
    &self.operations
  }

  /// Number of operations.
  pub fn len(&self) -> usize {
    self.operations.len()
  }

  /// Whether the pipeline has no operations.
  pub fn is_empty(&self) -> bool {
    self.operations.is_empty()
  }

  /// Runs one generation over the population.
  ///
  /// A terminated population short-circuits: it is returned unchanged and no
  /// operation runs. Otherwise the operations are folded over the population
  /// in order; fitness is computed lazily (only right before an operation
  /// that requires it, at most once per distinct genome set) and cleared
  /// again after every operation that invalidates it.
  pub fn apply(
    &self,
    mut population: Population<R>,
    ctx: &Context<R>,
  ) -> Result<Population<R>> {
    if population.terminated {
      return Ok(population);
    }
    for operation in &self.operations {
      if operation.requires_fitness() && population.fitness.is_none() {
        log::trace!(
          "worker {}: evaluating fitness for '{}'",
          ctx.worker_name(),
          operation.name()
        );
        population.fitness = Some(ctx.evaluate(&population.genomes));
      }
      population = operation.apply_checked(population, ctx)?;
      if operation.invalidates_fitness() {
        population.fitness = None;
      }
    }
    Ok(population)
  }
}

impl<R: Representation> std::fmt::Debug for Pipeline<R> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_list()
      .entries(self.operations.iter().map(|operation| operation.name()))
      .finish()
  }
}
