//! Genome representations and the capability trait every encoding plugs in
//! through.
//!
//! The engine never inspects genomes. It moves them around as one opaque
//! batch value implementing [`Representation`], and tracks *which* encoding a
//! batch uses with a [`RepresentationTag`], a plain label such as
//! `"real-vector"` or `"bit-string"`. Operations declare which tags they
//! accept and which tag they produce, and
//! [`Pipeline::new`](crate::pipeline::Pipeline::new) checks the whole chain
//! once, at build time.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The label of a genome encoding.
///
/// Tags are compared by name only; two crates using `"permutation"` for
/// different layouts are indistinguishable to the engine, which is by
/// construction the caller's contract to keep.
///
/// # Examples
/// ```
/// use archipelago::representation::RepresentationTag;
///
/// let tag = RepresentationTag::new("real-vector");
/// assert_eq!(tag.as_str(), "real-vector");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct RepresentationTag(Cow<'static, str>);

impl RepresentationTag {
  /// Creates a tag from a static name.
  pub const fn new(name: &'static str) -> Self {
    Self(Cow::Borrowed(name))
  }

  /// Creates a tag from an owned name.
  pub fn owned(name: String) -> Self {
    Self(Cow::Owned(name))
  }

  /// The tag's name.
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&'static str> for RepresentationTag {
  fn from(name: &'static str) -> Self {
    Self::new(name)
  }
}

impl fmt::Display for RepresentationTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// The representations an operation accepts as input.
#[derive(Clone, Debug)]
pub enum InputRepresentations {
  /// The operation works on any representation.
  Any,
  /// The operation accepts exactly these representations.
  Set(Vec<RepresentationTag>),
}

impl InputRepresentations {
  /// A set containing a single representation.
  pub fn only(tag: impl Into<RepresentationTag>) -> Self {
    Self::Set(vec![tag.into()])
  }

  /// Whether `tag` is acceptable input.
  pub fn accepts(&self, tag: &RepresentationTag) -> bool {
    match self {
      Self::Any => true,
      Self::Set(tags) => tags.contains(tag),
    }
  }
}

/// The representation an operation produces.
#[derive(Clone, Debug)]
pub enum OutputRepresentation {
  /// The operation passes its input representation through.
  Same,
  /// The operation always produces this representation.
  Tag(RepresentationTag),
}

impl OutputRepresentation {
  /// Resolves the produced representation given the incoming one.
  pub fn resolve(&self, current: RepresentationTag) -> RepresentationTag {
    match self {
      Self::Same => current,
      Self::Tag(tag) => tag.clone(),
    }
  }
}

/// The capability every genome encoding must implement.
///
/// An implementor is one *batch* of genomes: the engine only ever needs to
/// count individuals and to concatenate batches (and their fitness values)
/// when populations are joined or immigrants are spliced in.
///
/// A blanket implementation covers `Vec<G>` batches scored with `Vec<f64>`
/// fitness, which is enough for most encodings; batched tensor layouts
/// implement the trait directly.
pub trait Representation: Clone + Send + 'static {
  /// Fitness values for a batch, same cardinality and order as the
  /// individuals. Higher is better; the engine always maximizes.
  type Fitness: Clone + Send + 'static;

  /// Number of individuals in this batch.
  fn population_size(&self) -> usize;

  /// Concatenates batches in order.
  fn concatenate(parts: Vec<Self>) -> Self;

  /// Concatenates fitness values in the same order as [`concatenate`]
  /// concatenates their genomes.
  ///
  /// [`concatenate`]: Representation::concatenate
  fn concatenate_fitness(parts: Vec<Self::Fitness>) -> Self::Fitness;
}

impl<G: Clone + Send + 'static> Representation for Vec<G> {
  type Fitness = Vec<f64>;

  fn population_size(&self) -> usize {
    self.len()
  }

  fn concatenate(parts: Vec<Self>) -> Self {
    parts.into_iter().flatten().collect()
  }

  fn concatenate_fitness(parts: Vec<Vec<f64>>) -> Vec<f64> {
    parts.into_iter().flatten().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_vec_representation() {
    let batch = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
    assert_eq!(batch.population_size(), 2);

    let joined =
      Vec::concatenate(vec![batch.clone(), vec![vec![5.0, 6.0]]]);
    assert_eq!(joined.population_size(), 3);
    assert_eq!(joined[2], vec![5.0, 6.0]);

    let fitness =
      <Vec<Vec<f64>> as Representation>::concatenate_fitness(vec![
        vec![1.0, 2.0],
        vec![3.0],
      ]);
    assert_eq!(fitness, vec![1.0, 2.0, 3.0]);
  }

  #[test]
  fn test_input_representations() {
    let any = InputRepresentations::Any;
    assert!(any.accepts(&"real-vector".into()));

    let set = InputRepresentations::only("bit-string");
    assert!(set.accepts(&"bit-string".into()));
    assert!(!set.accepts(&"real-vector".into()));
  }

  #[test]
  fn test_output_resolution() {
    let same = OutputRepresentation::Same;
    assert_eq!(same.resolve("permutation".into()), "permutation".into());

    let fixed = OutputRepresentation::Tag("bit-string".into());
    assert_eq!(fixed.resolve("permutation".into()), "bit-string".into());
  }
}
