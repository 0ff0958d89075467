//! Crate-wide error taxonomy.
//!
//! Every validation failure in this crate is reported through [`Error`]
//! instead of a panic. Configuration problems (representation mismatches,
//! invalid topologies, malformed models) surface when the offending value is
//! *built*; the only errors raised while a run is in flight are
//! [`Error::MissingFitness`] (a misdeclared operation contract),
//! [`Error::MigrationTimeout`] (a probable deadlock between populations) and
//! the bootstrap/worker failures.

use std::time::Duration;

use thiserror::Error;

use crate::representation::RepresentationTag;

/// Any error this crate can produce.
#[derive(Debug, Error)]
pub enum Error {
  /// An operation was chained after a producer whose representation it does
  /// not accept. Raised by [`Pipeline::new`](crate::pipeline::Pipeline::new).
  #[error(
    "operation '{operation}' does not accept representation '{representation}'"
  )]
  RepresentationMismatch {
    /// Name of the offending operation.
    operation: String,
    /// The representation produced by the preceding chain.
    representation: RepresentationTag,
  },

  /// An operation declared `requires_fitness` but was applied to a population
  /// whose fitness is absent. This is a misdeclared operation contract, not a
  /// recoverable condition.
  #[error("operation '{operation}' requires fitness, but the population has none")]
  MissingFitness {
    /// Name of the offending operation.
    operation: String,
  },

  /// Populations with different representations were joined.
  #[error("cannot join populations with mixed representations {found:?}")]
  IncompatibleRepresentations {
    /// The distinct representations found among the joined populations.
    found: Vec<RepresentationTag>,
  },

  /// An operation without a creator or a concrete output representation was
  /// used to initialize a lineage.
  #[error("operation '{0}' cannot initialize a lineage")]
  NotAnInitializer(String),

  /// A custom topology map failed validation.
  #[error("invalid topology map: {0}")]
  InvalidTopology(String),

  /// A migration operation was misconfigured.
  #[error("invalid migration configuration: {0}")]
  InvalidMigration(String),

  /// A model or run option failed validation.
  #[error("invalid model: {0}")]
  InvalidModel(String),

  /// A blocking immigration ran out of time. Two populations waiting on each
  /// other's emigrants is the usual cause.
  #[error("worker {worker} received no immigrants within {timeout:?}")]
  MigrationTimeout {
    /// Name of the starved worker.
    worker: String,
    /// How long it waited.
    timeout: Duration,
  },

  /// The leader exhausted its connection attempts, or a worker never heard
  /// the initiate message. Unreachable nodes never accepted a connection;
  /// unconfirmed nodes accepted one but never exposed a registered worker.
  #[error(
    "bootstrap timed out (unreachable: {unreachable:?}, unconfirmed: {unconfirmed:?})"
  )]
  BootstrapTimeout {
    /// Nodes that never accepted a connection.
    unreachable: Vec<String>,
    /// Nodes that connected but never confirmed a registered worker.
    unconfirmed: Vec<String>,
  },

  /// A population worker failed or panicked; the whole run is aborted.
  #[error("worker {worker} failed: {reason}")]
  WorkerFailed {
    /// Name of the failed worker.
    worker: String,
    /// Whatever is known about the failure.
    reason: String,
  },

  /// An unexpected or malformed message arrived during the bootstrap
  /// handshake.
  #[error("bootstrap protocol violation: {0}")]
  Protocol(String),

  /// The bootstrap CLI was invoked with unrecognized arguments.
  #[error("usage: <program> leader <worker-node>... | <program> worker")]
  Usage,

  /// An I/O failure during the bootstrap handshake.
  #[error(transparent)]
  Io(#[from] std::io::Error),

  /// A bootstrap message could not be encoded or decoded.
  #[error(transparent)]
  Wire(#[from] serde_json::Error),
}

/// A specialized result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
