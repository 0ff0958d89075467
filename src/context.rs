//! Per-worker ambient data.
//!
//! Every operation application receives a [`Context`]: the run's objective
//! function plus the worker's view of the run: the [`Roster`] of all
//! workers, its own index in it, and the migration mailboxes. The roster is
//! read-only after the bootstrap broadcast; each worker exclusively owns its
//! inbox, and peers write to it only through the senders handed out here.

use std::sync::mpsc::{Receiver, Sender};
use std::time::Duration;

use crate::{
  error::{Error, Result},
  migration::Migrants,
  objective::Objective,
  representation::Representation,
};

/// The stable, ordered list of all population workers of a run.
///
/// Topology functions index into it, and mailbox addressing follows it: the
/// worker at roster index `i` owns mailbox `i`.
#[derive(Clone, Debug)]
pub struct Roster {
  names: Vec<String>,
}

impl Roster {
  /// Creates a roster from worker names, in their canonical order.
  pub fn new(names: Vec<String>) -> Self {
    Self { names }
  }

  /// Number of workers.
  pub fn len(&self) -> usize {
    self.names.len()
  }

  /// Whether the roster is empty.
  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// All worker names in roster order.
  pub fn names(&self) -> &[String] {
    &self.names
  }

  /// The name of the worker at `index`.
  pub fn name(&self, index: usize) -> Option<&str> {
    self.names.get(index).map(String::as_str)
  }

  /// The roster index of the named worker.
  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.names.iter().position(|n| n == name)
  }
}

/// Ambient data passed to every operation application of one worker.
pub struct Context<R: Representation> {
  objective: Objective<R>,
  roster: Roster,
  index: usize,
  outboxes: Vec<Sender<Migrants<R>>>,
  inbox: Receiver<Migrants<R>>,
}

impl<R: Representation> Context<R> {
  pub(crate) fn new(
    objective: Objective<R>,
    roster: Roster,
    index: usize,
    outboxes: Vec<Sender<Migrants<R>>>,
    inbox: Receiver<Migrants<R>>,
  ) -> Self {
    Self {
      objective,
      roster,
      index,
      outboxes,
      inbox,
    }
  }

  /// Builds one connected context per worker name: a shared roster and a
  /// full mesh of mailboxes. The runner wires its workers this way; it is
  /// also the entry point for driving pipelines by hand.
  pub fn cluster(objective: Objective<R>, names: Vec<String>) -> Vec<Self> {
    let (outboxes, inboxes): (Vec<_>, Vec<_>) =
      names.iter().map(|_| std::sync::mpsc::channel()).unzip();
    let roster = Roster::new(names);
    inboxes
      .into_iter()
      .enumerate()
      .map(|(index, inbox)| {
        Self::new(
          objective.clone(),
          roster.clone(),
          index,
          outboxes.clone(),
          inbox,
        )
      })
      .collect()
  }

  /// A single-worker context, for running a pipeline without a runner.
  pub fn local(objective: Objective<R>) -> Self {
    Self::cluster(objective, vec!["local".to_string()])
      .pop()
      .expect("cluster of one")
  }

  /// The run's objective function.
  pub fn objective(&self) -> &Objective<R> {
    &self.objective
  }

  /// Evaluates the objective on a genome batch.
  pub fn evaluate(&self, genomes: &R) -> R::Fitness {
    (self.objective)(genomes)
  }

  /// The roster of all workers.
  pub fn roster(&self) -> &Roster {
    &self.roster
  }

  /// This worker's roster index.
  pub fn index(&self) -> usize {
    self.index
  }

  /// This worker's name.
  pub fn worker_name(&self) -> &str {
    self.roster.name(self.index).unwrap_or("unknown")
  }

  /// Number of populations in the run.
  pub fn population_count(&self) -> usize {
    self.roster.len()
  }

  /// Sends migrants to the mailbox of the worker at roster index `target`
  /// without blocking. Returns whether the batch was delivered; a peer that
  /// has already terminated simply misses out, which is not an error.
  pub fn send_migrants(&self, target: usize, migrants: Migrants<R>) -> bool {
    match self.outboxes.get(target) {
      Some(outbox) => match outbox.send(migrants) {
        Ok(()) => true,
        Err(_) => {
          log::debug!(
            "worker {}: peer {target} is gone, dropping emigrants",
            self.worker_name()
          );
          false
        }
      },
      None => {
        log::warn!(
          "worker {}: no mailbox for target {target}",
          self.worker_name()
        );
        false
      }
    }
  }

  /// Waits for an immigrant batch for up to `timeout`, failing with
  /// [`Error::MigrationTimeout`] when none arrives in time.
  pub fn receive_migrants(&self, timeout: Duration) -> Result<Migrants<R>> {
    self.inbox.recv_timeout(timeout).map_err(|_| {
      Error::MigrationTimeout {
        worker: self.worker_name().to_string(),
        timeout,
      }
    })
  }

  /// Checks the mailbox once, without blocking.
  pub fn try_receive_migrants(&self) -> Option<Migrants<R>> {
    self.inbox.try_recv().ok()
  }
}
