//! Multi-node bootstrap: the leader/worker handshake that places population
//! groups on remote nodes.
//!
//! The protocol is JSON lines over TCP. The leader dials every declared
//! worker node, looks up the worker process registered under
//! [`WORKER_NAME`], and, once confirmed, sends an `initiate` message
//! carrying its own identity and the node's population group. Connection and
//! confirmation are retried up to `max_attempts`, spaced `attempt_gap`
//! apart; exhausting them fails with [`Error::BootstrapTimeout`] listing,
//! separately, the nodes that never connected and the nodes that connected
//! but never confirmed a worker.
//!
//! A worker node binds a listener, answers lookups, waits (bounded) for the
//! initiate, runs its assigned populations, reports back, and then monitors
//! the leader's connection, returning exactly when the leader goes away.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
  error::{Error, Result},
  model::Model,
  representation::Representation,
  runner::{self, PopulationReport},
};

/// The well-known name every worker process registers under, and the name
/// leaders look up.
pub const WORKER_NAME: &str = "archipelago-worker";

/// Leader-side handshake tuning.
#[derive(TypedBuilder, Clone, Debug)]
pub struct BootstrapConfig {
  /// How many connect-and-confirm rounds to try before giving up.
  #[builder(default = 5)]
  pub max_attempts: u32,

  /// Pause between rounds.
  #[builder(default = Duration::from_millis(500))]
  pub attempt_gap: Duration,

  /// How long to wait for a single handshake reply.
  #[builder(default = Duration::from_secs(5))]
  pub reply_timeout: Duration,

  /// The identity the leader announces in its initiate message.
  #[builder(default = String::from("leader"), setter(into))]
  pub leader_name: String,
}

impl Default for BootstrapConfig {
  fn default() -> Self {
    Self::builder().build()
  }
}

/// How a process was asked to participate in a distributed run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CliRole {
  /// Coordinate a run across the listed worker nodes.
  Leader {
    /// Worker node addresses, as given on the command line.
    nodes: Vec<String>,
  },
  /// Host whatever populations a leader assigns.
  Worker,
}

/// Parses the bootstrap CLI surface: `leader <worker-node>...` or `worker`.
/// Anything else is an [`Error::Usage`]. `args` excludes the program name.
///
/// # Examples
/// ```
/// use archipelago::bootstrap::{parse_cli, CliRole};
///
/// let role = parse_cli(["leader", "10.0.0.2:7000"]).unwrap();
/// assert!(matches!(role, CliRole::Leader { .. }));
/// assert_eq!(parse_cli(["worker"]).unwrap(), CliRole::Worker);
/// assert!(parse_cli(["observer"]).is_err());
/// ```
pub fn parse_cli<I, S>(args: I) -> Result<CliRole>
where
  I: IntoIterator<Item = S>,
  S: Into<String>,
{
  let mut args = args.into_iter().map(Into::into);
  match args.next().as_deref() {
    Some("leader") => {
      let nodes: Vec<String> = args.collect();
      if nodes.is_empty() {
        return Err(Error::Usage);
      }
      Ok(CliRole::Leader { nodes })
    }
    Some("worker") => match args.next() {
      None => Ok(CliRole::Worker),
      Some(_) => Err(Error::Usage),
    },
    _ => Err(Error::Usage),
  }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Message {
  Lookup { name: String },
  Registered { name: String, worker: String },
  Initiate { leader: String, populations: Vec<usize> },
  Report { populations: serde_json::Value },
}

fn write_message(stream: &mut TcpStream, message: &Message) -> Result<()> {
  let mut line = serde_json::to_vec(message)?;
  line.push(b'\n');
  stream.write_all(&line)?;
  Ok(())
}

fn read_message(reader: &mut BufReader<TcpStream>) -> Result<Message> {
  let mut line = String::new();
  if reader.read_line(&mut line)? == 0 {
    return Err(Error::Protocol("connection closed".to_string()));
  }
  Ok(serde_json::from_str(&line)?)
}

fn is_timeout(error: &Error) -> bool {
  matches!(
    error,
    Error::Io(io) if matches!(
      io.kind(),
      std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
  )
}

#[derive(Debug)]
struct Slot {
  node: String,
  link: Option<(TcpStream, BufReader<TcpStream>)>,
  confirmed: bool,
}

/// Runs the leader side: handshake with every node, hand out the population
/// groups, and collect the per-node reports.
pub(crate) fn lead<R>(
  nodes: &[String],
  groups: &[Vec<usize>],
  config: &BootstrapConfig,
) -> Result<Vec<Vec<PopulationReport<R>>>>
where
  R: Representation + Serialize + DeserializeOwned,
  R::Fitness: Serialize + DeserializeOwned,
{
  let mut slots = connect_all(nodes, config)?;

  for (slot, group) in slots.iter_mut().zip(groups) {
    let (stream, _) = slot.link.as_mut().expect("confirmed link");
    write_message(
      stream,
      &Message::Initiate {
        leader: config.leader_name.clone(),
        populations: group.clone(),
      },
    )?;
    log::info!(
      "bootstrap: initiated {} with populations {group:?}",
      slot.node
    );
  }

  let mut all = Vec::with_capacity(slots.len());
  for slot in &mut slots {
    let (stream, reader) = slot.link.as_mut().expect("confirmed link");
    // runs take as long as they take
    stream.set_read_timeout(None)?;
    match read_message(reader)? {
      Message::Report { populations } => {
        all.push(serde_json::from_value(populations)?);
      }
      other => {
        return Err(Error::Protocol(format!(
          "expected a report from {}, got {other:?}",
          slot.node
        )));
      }
    }
  }
  Ok(all)
}

fn connect_all(nodes: &[String], config: &BootstrapConfig) -> Result<Vec<Slot>> {
  let mut slots: Vec<Slot> = nodes
    .iter()
    .map(|node| Slot {
      node: node.clone(),
      link: None,
      confirmed: false,
    })
    .collect();

  for attempt in 1..=config.max_attempts {
    for slot in &mut slots {
      if slot.link.is_none() {
        match TcpStream::connect(&slot.node) {
          Ok(stream) => {
            stream.set_read_timeout(Some(config.reply_timeout))?;
            let reader = BufReader::new(stream.try_clone()?);
            log::debug!("bootstrap: connected to {}", slot.node);
            slot.link = Some((stream, reader));
          }
          Err(error) => {
            log::debug!(
              "bootstrap attempt {attempt}: {} unreachable: {error}",
              slot.node
            );
            continue;
          }
        }
      }
      if !slot.confirmed {
        let (stream, reader) = slot.link.as_mut().expect("just connected");
        match confirm(stream, reader) {
          Ok(worker) => {
            log::debug!(
              "bootstrap: {} confirmed worker '{worker}'",
              slot.node
            );
            slot.confirmed = true;
          }
          Err(error) => {
            log::debug!(
              "bootstrap attempt {attempt}: {} unconfirmed: {error}",
              slot.node
            );
          }
        }
      }
    }
    if slots.iter().all(|slot| slot.confirmed) {
      break;
    }
    if attempt < config.max_attempts {
      std::thread::sleep(config.attempt_gap);
    }
  }

  let unreachable: Vec<String> = slots
    .iter()
    .filter(|slot| slot.link.is_none())
    .map(|slot| slot.node.clone())
    .collect();
  let unconfirmed: Vec<String> = slots
    .iter()
    .filter(|slot| slot.link.is_some() && !slot.confirmed)
    .map(|slot| slot.node.clone())
    .collect();
  if !unreachable.is_empty() || !unconfirmed.is_empty() {
    return Err(Error::BootstrapTimeout {
      unreachable,
      unconfirmed,
    });
  }
  Ok(slots)
}

fn confirm(
  stream: &mut TcpStream,
  reader: &mut BufReader<TcpStream>,
) -> Result<String> {
  write_message(
    stream,
    &Message::Lookup {
      name: WORKER_NAME.to_string(),
    },
  )?;
  match read_message(reader)? {
    Message::Registered { name, worker } if name == WORKER_NAME => Ok(worker),
    other => Err(Error::Protocol(format!(
      "unexpected reply to lookup: {other:?}"
    ))),
  }
}

/// A worker process hosting population groups for a remote leader.
pub struct WorkerNode<R: Representation> {
  listener: TcpListener,
  model: Model<R>,
  name: String,
}

impl<R> WorkerNode<R>
where
  R: Representation + Serialize + DeserializeOwned,
  R::Fitness: Serialize + DeserializeOwned,
{
  /// Binds the worker's listener. The model must be the same definition the
  /// leader runs; both processes are built from the same program.
  pub fn bind(model: Model<R>, addr: &str) -> Result<Self> {
    let listener = TcpListener::bind(addr)?;
    let name = format!("{WORKER_NAME}@{}", listener.local_addr()?);
    Ok(Self {
      listener,
      model,
      name,
    })
  }

  /// The address the worker actually listens on.
  pub fn local_addr(&self) -> Result<SocketAddr> {
    Ok(self.listener.local_addr()?)
  }

  /// Registers under [`WORKER_NAME`], waits up to `timeout` for a leader's
  /// initiate message ([`Error::BootstrapTimeout`] otherwise), runs the
  /// assigned populations, reports back, and returns once the leader's
  /// process or node terminates.
  pub fn serve(self, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;

    self.listener.set_nonblocking(true)?;
    let mut stream = loop {
      match self.listener.accept() {
        Ok((stream, peer)) => {
          log::debug!("worker {}: leader connection from {peer}", self.name);
          break stream;
        }
        Err(error)
          if error.kind() == std::io::ErrorKind::WouldBlock =>
        {
          if Instant::now() >= deadline {
            log::error!("worker {}: no leader connected", self.name);
            return Err(Self::initiate_timeout());
          }
          std::thread::sleep(Duration::from_millis(25));
        }
        Err(error) => return Err(error.into()),
      }
    };
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_millis(250)))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    // answer lookups until the initiate arrives
    let (leader, populations) = loop {
      match read_message(&mut reader) {
        Ok(Message::Lookup { name }) if name == WORKER_NAME => {
          write_message(
            &mut stream,
            &Message::Registered {
              name,
              worker: self.name.clone(),
            },
          )?;
        }
        Ok(Message::Initiate {
          leader,
          populations,
        }) => break (leader, populations),
        Ok(other) => {
          return Err(Error::Protocol(format!(
            "unexpected message before initiate: {other:?}"
          )));
        }
        Err(error) if is_timeout(&error) => {
          if Instant::now() >= deadline {
            log::error!("worker {}: no initiate message", self.name);
            return Err(Self::initiate_timeout());
          }
        }
        Err(error) => return Err(error),
      }
    };
    log::info!(
      "worker {}: initiate from '{leader}', populations {populations:?}",
      self.name
    );

    let reports = runner::run_group(&self.model, &populations)?;
    stream.set_read_timeout(None)?;
    write_message(
      &mut stream,
      &Message::Report {
        populations: serde_json::to_value(&reports)?,
      },
    )?;

    // monitor the leader: done exactly when its end of the wire goes away
    let mut line = String::new();
    loop {
      line.clear();
      match reader.read_line(&mut line) {
        Ok(0) | Err(_) => break,
        Ok(_) => {}
      }
    }
    log::info!("worker {}: leader is gone, shutting down", self.name);
    Ok(())
  }

  fn initiate_timeout() -> Error {
    Error::BootstrapTimeout {
      unreachable: Vec::new(),
      unconfirmed: vec!["leader".to_string()],
    }
  }
}
