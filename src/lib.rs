//! **Archipelago** is an island-model evolutionary computation engine. It
//! runs many populations concurrently, one worker thread each, evolves
//! every population through its own pipeline of operations, and exchanges
//! individuals between populations along a configurable topology. It strives
//! to be simple, explicit about representations, and highly focused on usage
//! of closures.
//!
//! Here's a [quick start example](#example) for the impatient.
//!
//! This crate is built around a small set of abstractions:
//! - **Representation** - the genome batch type a population carries,
//!   abstracted by the [`Representation`] trait and described at runtime by a
//!   [`RepresentationTag`]. The engine never inspects genomes; it only checks
//!   that consecutive operations agree on the encoding.
//! - **Operation** - one transformation step of a population per generation:
//!   evaluation demand, selection, variation, termination, migration. An
//!   [`Operation`] is a named closure plus metadata: the representations it
//!   accepts, the representation it emits, whether it requires fitness and
//!   whether it invalidates it.
//! - **Pipeline** - an ordered chain of operations applied once per
//!   generation. Building a [`Pipeline`] checks the whole representation
//!   chain, including the wrap-around from the last operation back into the
//!   first, so mismatches surface before anything runs.
//! - **Model** - an objective function plus one or more [`Lineage`]s, each an
//!   initializer and a pipeline, optionally replicated into several
//!   independent populations.
//! - **Runner** - [`run`] expands the model, spawns one thread per
//!   population, holds every worker at a roster barrier until all mailboxes
//!   exist, and joins them into a [`Report`]. With worker nodes configured in
//!   [`RunOptions`], the [`bootstrap`] handshake places population groups on
//!   remote processes instead.
//!
//! # Migration
//!
//! Islands are only interesting when individuals move between them. The
//! [`migration`] module builds a pair of pipeline operations from closures
//! you already have: [`emigrate`](migration::emigrate) wraps a selection
//! operation and sends clones of the selected genomes to neighbors chosen
//! from a [`Topology`], and [`immigrate`](migration::immigrate) wraps a
//! shrink operation and splices arrivals in without changing the population
//! size. Emigration never blocks; immigration may, which is the engine's
//! only cross-population synchronization.
//!
//! # Closures
//!
//! Operations are built from closures. A plain transformation is a
//! `Fn(Population<R>, &Context<R>) -> Result<Population<R>>`; an objective
//! is a `Fn(&R) -> Fitness` (or a per-genome closure lifted with
//! [`objective::per_genome`], in parallel with
//! [`objective::per_genome_par`]). This crate deliberately ships almost no
//! ready-made genetic operators: selection and variation must be tailored to
//! the problem, and a predefined set would only prompt you to pick a less
//! suitable, ready-made option. The one exception is
//! [`operation::max_generations`], which every finite run wants.
//!
//! # Example
//!
//! A single population of reals evolving toward zero, with a generation cap:
//! ```
//! use archipelago::{
//!   objective, operation, Lineage, Model, Operation, Population, RunOptions,
//! };
//!
//! // genomes start far from the optimum
//! let seed = Operation::initializer("seed", "real-vector", || {
//!   (0..32).map(|i| i as f64).collect::<Vec<f64>>()
//! });
//! // fitness is the negated magnitude, so bigger is better
//! let objective = objective::per_genome(|genome: &f64| -genome.abs());
//! // decay every genome a little each generation
//! let decay: Operation<Vec<f64>> = Operation::builder("decay")
//!   .invalidates_fitness(true)
//!   .build(|mut population: Population<Vec<f64>>, _| {
//!     for genome in &mut population.genomes {
//!       *genome *= 0.9;
//!     }
//!     Ok(population)
//!   });
//!
//! let model = Model::new(
//!   objective,
//!   vec![Lineage::new(seed, vec![decay, operation::max_generations(50)])?],
//! )?;
//! let report = archipelago::run(model, RunOptions::default())?;
//! assert!(report.populations()[0].population.terminated);
//! # Ok::<(), archipelago::Error>(())
//! ```
//!
//! # Common pitfalls
//!
//! - An operation that changes genomes but forgets to declare
//!   `invalidates_fitness` leaves stale fitness behind, and the next
//!   fitness-requiring operation will happily consume it. The engine can
//!   only enforce what the metadata declares.
//! - Blocking immigration with no matching emigration deadlocks until the
//!   immigration timeout fires. Keep the intervals of the two sides
//!   compatible, or make immigration non-blocking.
//! - Representation checking happens when a [`Pipeline`] is built, not when
//!   closures are written. If a chain refuses to build, read the error: it
//!   names the first operation whose input disagrees with what the previous
//!   operation emits.

#![warn(missing_docs)]

pub mod bootstrap;
pub mod context;
pub mod error;
pub mod migration;
pub mod model;
pub mod objective;
pub mod operation;
pub mod pipeline;
pub mod population;
pub mod representation;
pub mod runner;
pub mod topology;

pub use crate::{
  context::{Context, Roster},
  error::{Error, Result},
  model::{Lineage, Model},
  objective::Objective,
  operation::Operation,
  pipeline::Pipeline,
  population::Population,
  representation::{Representation, RepresentationTag},
  runner::{run, Report, RunOptions},
  topology::Topology,
};
