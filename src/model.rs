//! Model definitions: an objective paired with the lineages that evolve
//! against it.

use std::sync::Arc;

use crate::{
  error::{Error, Result},
  objective::Objective,
  operation::Operation,
  pipeline::Pipeline,
  representation::Representation,
};

/// One (initializer, pipeline) configuration, optionally replicated into
/// several identical, independently evolving populations.
pub struct Lineage<R: Representation> {
  initializer: Arc<Operation<R>>,
  pipeline: Pipeline<R>,
  duplicate: usize,
}

impl<R: Representation> Lineage<R> {
  /// A lineage evolving a single population. The pipeline is built and
  /// representation-checked against the initializer's output.
  pub fn new(
    initializer: Operation<R>,
    operations: Vec<Operation<R>>,
  ) -> Result<Self> {
    Self::replicated(initializer, operations, 1)
  }

  /// A lineage expanded into `duplicate` independent populations sharing
  /// the same definitions. Each population generates its own genomes and
  /// evolves on its own.
  pub fn replicated(
    initializer: Operation<R>,
    operations: Vec<Operation<R>>,
    duplicate: usize,
  ) -> Result<Self> {
    if duplicate == 0 {
      return Err(Error::InvalidModel(
        "a lineage must expand into at least one population".to_string(),
      ));
    }
    if operations.is_empty() {
      return Err(Error::InvalidModel(format!(
        "lineage '{}' has an empty pipeline and would never terminate",
        initializer.name()
      )));
    }
    let initial = initializer.initial_representation()?;
    let pipeline = Pipeline::new(initial, operations)?;
    Ok(Self {
      initializer: Arc::new(initializer),
      pipeline,
      duplicate,
    })
  }

  /// How many populations this lineage expands into.
  pub fn duplicate(&self) -> usize {
    self.duplicate
  }

  /// The lineage's pipeline.
  pub fn pipeline(&self) -> &Pipeline<R> {
    &self.pipeline
  }
}

/// A complete algorithm definition: the objective every population maximizes
/// plus one or more lineages.
pub struct Model<R: Representation> {
  objective: Objective<R>,
  lineages: Vec<Lineage<R>>,
}

impl<R: Representation> Model<R> {
  /// Builds a model. At least one lineage is required.
  pub fn new(
    objective: Objective<R>,
    lineages: Vec<Lineage<R>>,
  ) -> Result<Self> {
    if lineages.is_empty() {
      return Err(Error::InvalidModel(
        "a model needs at least one lineage".to_string(),
      ));
    }
    Ok(Self {
      objective,
      lineages,
    })
  }

  /// The model's objective function.
  pub fn objective(&self) -> Objective<R> {
    self.objective.clone()
  }

  /// Total number of populations after expanding lineage duplicates.
  pub fn population_count(&self) -> usize {
    self.lineages.iter().map(Lineage::duplicate).sum()
  }

  /// Expands the lineages into one (initializer, pipeline) pair per
  /// population, in global index order.
  pub(crate) fn expand(&self) -> Vec<(Arc<Operation<R>>, Pipeline<R>)> {
    self
      .lineages
      .iter()
      .flat_map(|lineage| {
        (0..lineage.duplicate).map(|_| {
          (Arc::clone(&lineage.initializer), lineage.pipeline.clone())
        })
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{objective, operation};

  type Real = Vec<f64>;

  fn initializer() -> Operation<Real> {
    Operation::initializer("seed", "real-vector", || vec![0.0; 10])
  }

  fn objective() -> Objective<Real> {
    objective::batched(|genomes: &Real| genomes.clone())
  }

  #[test]
  fn test_duplicate_expansion() {
    let model = Model::new(
      objective(),
      vec![
        Lineage::replicated(
          initializer(),
          vec![operation::max_generations(3)],
          3,
        )
        .unwrap(),
        Lineage::new(initializer(), vec![operation::max_generations(3)])
          .unwrap(),
      ],
    )
    .unwrap();

    assert_eq!(model.population_count(), 4);
    assert_eq!(model.expand().len(), 4);
  }

  #[test]
  fn test_non_initializer_is_rejected() {
    let passthrough: Operation<Real> =
      Operation::builder("noop").build(|population, _| Ok(population));
    let result =
      Lineage::new(passthrough, vec![operation::max_generations(3)]);
    assert!(matches!(result, Err(Error::NotAnInitializer(_))));
  }

  #[test]
  fn test_zero_duplicates_are_rejected() {
    let result = Lineage::replicated(
      initializer(),
      vec![operation::max_generations(3)],
      0,
    );
    assert!(matches!(result, Err(Error::InvalidModel(_))));
  }

  #[test]
  fn test_empty_pipeline_is_rejected() {
    let result = Lineage::new(initializer(), vec![]);
    assert!(matches!(result, Err(Error::InvalidModel(_))));
  }

  #[test]
  fn test_model_needs_a_lineage() {
    assert!(matches!(
      Model::new(objective(), vec![]),
      Err(Error::InvalidModel(_))
    ));
  }
}
