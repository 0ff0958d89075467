//! The pipeline's unit of composition.
//!
//! An [`Operation`] is a named, metadata-tagged population transform. The
//! metadata (`requires_fitness`, `invalidates_fitness` and the input/output
//! representations) is what the engine's laziness, invalidation and static
//! chain checking are built on, so it must be declared truthfully.
//!
//! Operations are built from closures:
//!
//! ```
//! use archipelago::operation::Operation;
//! use archipelago::population::Population;
//!
//! // doubles every genome, keeping the representation
//! let double: Operation<Vec<f64>> = Operation::builder("double")
//!   .invalidates_fitness(true)
//!   .build(|mut population: Population<Vec<f64>>, _ctx| {
//!     for genome in &mut population.genomes {
//!       *genome *= 2.0;
//!     }
//!     Ok(population)
//!   });
//! assert_eq!(double.name(), "double");
//! ```

use std::marker::PhantomData;

use crate::{
  context::Context,
  error::{Error, Result},
  population::Population,
  representation::{
    InputRepresentations,
    OutputRepresentation,
    Representation,
    RepresentationTag,
  },
};

/// The boxed transform at the heart of an operation.
pub type ApplyFn<R> = Box<
  dyn Fn(Population<R>, &Context<R>) -> Result<Population<R>> + Send + Sync,
>;

/// The boxed genome creator carried by initializer operations.
pub type CreateFn<R> = Box<dyn Fn() -> R + Send + Sync>;

/// A named, immutable population transform.
pub struct Operation<R: Representation> {
  name: String,
  requires_fitness: bool,
  invalidates_fitness: bool,
  input: InputRepresentations,
  output: OutputRepresentation,
  apply: ApplyFn<R>,
  create: Option<CreateFn<R>>,
}

impl<R: Representation> Operation<R> {
  /// Starts building an operation. All metadata defaults to the least
  /// demanding contract: no fitness required, none invalidated, any input
  /// representation, same output representation.
  pub fn builder(name: impl Into<String>) -> OperationBuilder<R> {
    OperationBuilder {
      name: name.into(),
      requires_fitness: false,
      invalidates_fitness: false,
      input: InputRepresentations::Any,
      output: OutputRepresentation::Same,
      _representation: PhantomData,
    }
  }

  /// Creates an initializer: an operation that can conjure a generation-1
  /// population of the given representation out of nothing. Inside a
  /// pipeline it passes populations through unchanged.
  pub fn initializer<F>(
    name: impl Into<String>,
    representation: impl Into<RepresentationTag>,
    create: F,
  ) -> Self
  where
    F: Fn() -> R + Send + Sync + 'static,
  {
    let tag = representation.into();
    Self {
      name: name.into(),
      requires_fitness: false,
      invalidates_fitness: false,
      input: InputRepresentations::Any,
      output: OutputRepresentation::Tag(tag),
      apply: Box::new(|population, _| Ok(population)),
      create: Some(Box::new(create)),
    }
  }

  /// The operation's name, used in error reports.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Whether the operation needs fitness to be present.
  pub fn requires_fitness(&self) -> bool {
    self.requires_fitness
  }

  /// Whether the operation leaves fitness inconsistent with the genomes.
  pub fn invalidates_fitness(&self) -> bool {
    self.invalidates_fitness
  }

  /// The representations this operation accepts.
  pub fn input(&self) -> &InputRepresentations {
    &self.input
  }

  /// The representation this operation produces.
  pub fn output(&self) -> &OutputRepresentation {
    &self.output
  }

  /// The representation a fresh population from this initializer carries,
  /// or [`Error::NotAnInitializer`] if this operation cannot initialize.
  pub fn initial_representation(&self) -> Result<RepresentationTag> {
    match (&self.create, &self.output) {
      (Some(_), OutputRepresentation::Tag(tag)) => Ok(tag.clone()),
      _ => Err(Error::NotAnInitializer(self.name.clone())),
    }
  }

  /// Creates the generation-1 population of an initializer.
  pub fn initialize(&self) -> Result<Population<R>> {
    let tag = self.initial_representation()?;
    let create = self
      .create
      .as_ref()
      .ok_or_else(|| Error::NotAnInitializer(self.name.clone()))?;
    Ok(Population::new(create(), tag))
  }

  /// Applies the operation, enforcing its declared contract: fails with
  /// [`Error::MissingFitness`] if fitness is required but absent, and stamps
  /// the output representation onto the result when the operation declares a
  /// concrete one.
  pub fn apply_checked(
    &self,
    population: Population<R>,
    ctx: &Context<R>,
  ) -> Result<Population<R>> {
    if self.requires_fitness && population.fitness.is_none() {
      return Err(Error::MissingFitness {
        operation: self.name.clone(),
      });
    }
    let mut next = (self.apply)(population, ctx)?;
    if let OutputRepresentation::Tag(tag) = &self.output {
      next.representation = tag.clone();
    }
    Ok(next)
  }
}

impl<R: Representation> std::fmt::Debug for Operation<R> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Operation")
      .field("name", &self.name)
      .field("requires_fitness", &self.requires_fitness)
      .field("invalidates_fitness", &self.invalidates_fitness)
      .field("input", &self.input)
      .field("output", &self.output)
      .finish_non_exhaustive()
  }
}

/// Accumulates operation metadata until [`build`](OperationBuilder::build)
/// attaches the transform closure.
pub struct OperationBuilder<R: Representation> {
  name: String,
  requires_fitness: bool,
  invalidates_fitness: bool,
  input: InputRepresentations,
  output: OutputRepresentation,
  _representation: PhantomData<fn() -> R>,
}

impl<R: Representation> OperationBuilder<R> {
  /// Declares that the operation needs fitness to be present.
  pub fn requires_fitness(mut self, requires: bool) -> Self {
    self.requires_fitness = requires;
    self
  }

  /// Declares that the operation leaves fitness inconsistent with the
  /// genomes it returns.
  pub fn invalidates_fitness(mut self, invalidates: bool) -> Self {
    self.invalidates_fitness = invalidates;
    self
  }

  /// Restricts the representations the operation accepts.
  pub fn input(mut self, input: InputRepresentations) -> Self {
    self.input = input;
    self
  }

  /// Declares the representation the operation produces.
  pub fn output(mut self, output: OutputRepresentation) -> Self {
    self.output = output;
    self
  }

  /// Finishes the operation with its transform.
  pub fn build<F>(self, apply: F) -> Operation<R>
  where
    F: Fn(Population<R>, &Context<R>) -> Result<Population<R>>
      + Send
      + Sync
      + 'static,
  {
    Operation {
      name: self.name,
      requires_fitness: self.requires_fitness,
      invalidates_fitness: self.invalidates_fitness,
      input: self.input,
      output: self.output,
      apply: Box::new(apply),
      create: None,
    }
  }
}

/// A termination operation that sets `terminated` once the population has
/// reached `limit` generations. Requires no fitness and invalidates none.
pub fn max_generations<R: Representation>(limit: u32) -> Operation<R> {
  Operation::builder(format!("max-generations({limit})")).build(
    move |mut population, _| {
      if population.generation >= limit {
        population.terminated = true;
      }
      Ok(population)
    },
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::objective;

  fn ctx() -> Context<Vec<f64>> {
    Context::local(objective::batched(|genomes: &Vec<f64>| {
      genomes.iter().map(|g| -g).collect()
    }))
  }

  fn initializer() -> Operation<Vec<f64>> {
    Operation::initializer("seed", "real-vector", || vec![1.0, 2.0, 3.0])
  }

  #[test]
  fn test_initializer_produces_generation_one() {
    let population = initializer().initialize().unwrap();
    assert_eq!(population.generation, 1);
    assert_eq!(population.size(), 3);
    assert!(population.fitness.is_none());
    assert_eq!(population.representation, "real-vector".into());
  }

  #[test]
  fn test_non_initializer_cannot_initialize() {
    let op: Operation<Vec<f64>> =
      Operation::builder("noop").build(|population, _| Ok(population));
    assert!(matches!(op.initialize(), Err(Error::NotAnInitializer(_))));
  }

  #[test]
  fn test_missing_fitness_is_fatal() {
    let op: Operation<Vec<f64>> = Operation::builder("ranked")
      .requires_fitness(true)
      .build(|population, _| Ok(population));

    let population = initializer().initialize().unwrap();
    let err = op.apply_checked(population, &ctx()).unwrap_err();
    assert!(matches!(err, Error::MissingFitness { .. }));
  }

  #[test]
  fn test_output_representation_is_stamped() {
    let op: Operation<Vec<f64>> = Operation::builder("quantize")
      .output(OutputRepresentation::Tag("bit-string".into()))
      .build(|population, _| Ok(population));

    let population = initializer().initialize().unwrap();
    let next = op.apply_checked(population, &ctx()).unwrap();
    assert_eq!(next.representation, "bit-string".into());
  }

  #[test]
  fn test_max_generations_fires_at_limit() {
    let op = max_generations::<Vec<f64>>(5);
    let mut population = initializer().initialize().unwrap();

    population.generation = 4;
    population = op.apply_checked(population, &ctx()).unwrap();
    assert!(!population.terminated);

    population.generation = 5;
    population = op.apply_checked(population, &ctx()).unwrap();
    assert!(population.terminated);
  }
}
