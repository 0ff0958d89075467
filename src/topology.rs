//! Migration topologies: pure neighbor computations over roster indices.
//!
//! A topology answers one question: given `n` populations, which roster
//! indices are the neighbors of population `i`? The built-ins are all
//! 0-indexed and population-count-agnostic; neighbor lists are sorted
//! ascending.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::error::{Error, Result};

/// A neighbor-selection scheme for migration.
///
/// # Examples
/// ```
/// use archipelago::topology::Topology;
///
/// assert_eq!(Topology::Ring.neighbors(5, 4), vec![0]);
/// assert_eq!(Topology::Star.neighbors(4, 0), vec![1, 2, 3]);
/// assert_eq!(Topology::Star.neighbors(4, 2), vec![0]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Topology {
  /// Each population's single neighbor is `(i + 1) mod n`.
  Ring,
  /// Populations on a square grid of side `ceil(sqrt(n))`; neighbors are
  /// the existing up/down/left/right cells. The last row may be incomplete.
  Mesh2d,
  /// Populations on a cubic grid of side `ceil(n^(1/3))`; neighbors are the
  /// four in-plane cells plus the same cell in the two adjacent layers.
  Mesh3d,
  /// Every other population.
  FullyConnected,
  /// Population 0 is the hub, connected to all others; everyone else's only
  /// neighbor is 0.
  Star,
  /// An explicit adjacency map, validated by [`Topology::custom`].
  Custom(BTreeMap<usize, Vec<usize>>),
}

impl Topology {
  /// Builds a topology from an explicit adjacency map over `0..n-1` where
  /// `n = map.len()`. The keys must be exactly `0..n-1` and every neighbor
  /// must fall within them, or construction fails with
  /// [`Error::InvalidTopology`].
  pub fn custom(map: BTreeMap<usize, Vec<usize>>) -> Result<Self> {
    let n = map.len();
    for index in 0..n {
      if !map.contains_key(&index) {
        return Err(Error::InvalidTopology(format!(
          "missing index {index}: keys must be exactly 0..{n}"
        )));
      }
    }
    for (index, neighbors) in &map {
      for &neighbor in neighbors {
        if neighbor >= n {
          return Err(Error::InvalidTopology(format!(
            "index {index} lists neighbor {neighbor}, outside 0..{n}"
          )));
        }
      }
    }
    Ok(Self::Custom(map))
  }

  /// Neighbor indices of population `self_index` among `population_count`
  /// populations, sorted ascending.
  ///
  /// For [`Topology::Custom`] the adjacency map is authoritative and must
  /// cover exactly `population_count` populations; a mismatched map is a
  /// configuration bug, caught by a debug assertion.
  pub fn neighbors(
    &self,
    population_count: usize,
    self_index: usize,
  ) -> Vec<usize> {
    let n = population_count;
    match self {
      Self::Ring => {
        if n == 0 {
          vec![]
        } else {
          vec![(self_index + 1) % n]
        }
      }
      Self::Mesh2d => {
        let side = grid_side(n, 2);
        if side == 0 {
          return vec![];
        }
        let row = self_index / side;
        let col = self_index % side;
        let mut cells = Vec::new();
        if row > 0 {
          cells.push((row - 1, col));
        }
        cells.push((row + 1, col));
        if col > 0 {
          cells.push((row, col - 1));
        }
        if col + 1 < side {
          cells.push((row, col + 1));
        }
        cells
          .into_iter()
          .map(|(r, c)| r * side + c)
          .filter(|&index| index < n)
          .sorted()
          .collect()
      }
      Self::Mesh3d => {
        let side = grid_side(n, 3);
        if side == 0 {
          return vec![];
        }
        let plane = side * side;
        let layer = self_index / plane;
        let row = (self_index % plane) / side;
        let col = self_index % side;
        let mut cells = Vec::new();
        if row > 0 {
          cells.push((layer, row - 1, col));
        }
        cells.push((layer, row + 1, col));
        if col > 0 {
          cells.push((layer, row, col - 1));
        }
        if col + 1 < side {
          cells.push((layer, row, col + 1));
        }
        if layer > 0 {
          cells.push((layer - 1, row, col));
        }
        cells.push((layer + 1, row, col));
        cells
          .into_iter()
          .filter(|&(l, r, _)| l < side && r < side)
          .map(|(l, r, c)| l * plane + r * side + c)
          .filter(|&index| index < n)
          .sorted()
          .collect()
      }
      Self::FullyConnected => {
        (0..n).filter(|&index| index != self_index).collect()
      }
      Self::Star => {
        if self_index == 0 {
          (1..n).collect()
        } else {
          vec![0]
        }
      }
      Self::Custom(map) => {
        debug_assert_eq!(
          map.len(),
          n,
          "custom adjacency map covers {} populations, run has {n}",
          map.len()
        );
        map.get(&self_index).cloned().unwrap_or_default()
      }
    }
  }
}

/// Smallest side length whose `dimensions`-power holds `n` cells.
/// Integer-exact on purpose; float roots misround perfect powers.
fn grid_side(n: usize, dimensions: u32) -> usize {
  let mut side = 0usize;
  while side.pow(dimensions) < n {
    side += 1;
  }
  side
}

#[cfg(test)]
mod tests {
  use super::*;

  fn adjacency(topology: &Topology, n: usize) -> Vec<Vec<usize>> {
    (0..n).map(|i| topology.neighbors(n, i)).collect()
  }

  #[test]
  fn test_ring() {
    assert_eq!(
      adjacency(&Topology::Ring, 5),
      vec![vec![1], vec![2], vec![3], vec![4], vec![0]]
    );
  }

  #[test]
  fn test_star() {
    assert_eq!(
      adjacency(&Topology::Star, 4),
      vec![vec![1, 2, 3], vec![0], vec![0], vec![0]]
    );
  }

  #[test]
  fn test_fully_connected() {
    assert_eq!(
      adjacency(&Topology::FullyConnected, 4),
      vec![
        vec![1, 2, 3],
        vec![0, 2, 3],
        vec![0, 1, 3],
        vec![0, 1, 2]
      ]
    );
  }

  #[test]
  fn test_mesh2d_with_incomplete_last_row() {
    // n = 5 on a 3-wide grid:
    //   0 1 2
    //   3 4
    assert_eq!(
      adjacency(&Topology::Mesh2d, 5),
      vec![vec![1, 3], vec![0, 2, 4], vec![1], vec![0, 4], vec![1, 3]]
    );
  }

  #[test]
  fn test_mesh2d_full_square() {
    // n = 4 on a 2-wide grid
    assert_eq!(
      adjacency(&Topology::Mesh2d, 4),
      vec![vec![1, 2], vec![0, 3], vec![0, 3], vec![1, 2]]
    );
  }

  #[test]
  fn test_mesh3d_cube() {
    // n = 8 on a 2x2x2 cube: corner 0 and corner 7
    let topology = Topology::Mesh3d;
    assert_eq!(topology.neighbors(8, 0), vec![1, 2, 4]);
    assert_eq!(topology.neighbors(8, 7), vec![3, 5, 6]);
    assert_eq!(topology.neighbors(8, 5), vec![1, 4, 7]);
  }

  #[test]
  fn test_mesh3d_truncated() {
    // n = 5 still lives on a 2x2x2 grid; indices >= 5 are filtered out
    let topology = Topology::Mesh3d;
    assert_eq!(topology.neighbors(5, 0), vec![1, 2, 4]);
    assert_eq!(topology.neighbors(5, 4), vec![0]);
  }

  #[test]
  fn test_custom_round_trips() {
    let map = BTreeMap::from([
      (0, vec![1]),
      (1, vec![0, 2]),
      (2, vec![]),
    ]);
    let topology = Topology::custom(map).unwrap();
    assert_eq!(topology.neighbors(3, 1), vec![0, 2]);
    assert_eq!(topology.neighbors(3, 2), Vec::<usize>::new());
  }

  #[test]
  #[should_panic(expected = "custom adjacency map")]
  fn test_custom_map_must_match_population_count() {
    let map = BTreeMap::from([(0, vec![1]), (1, vec![0])]);
    let topology = Topology::custom(map).unwrap();
    topology.neighbors(3, 0);
  }

  #[test]
  fn test_custom_rejects_gaps() {
    let map = BTreeMap::from([(0, vec![1]), (2, vec![0])]);
    assert!(matches!(
      Topology::custom(map),
      Err(Error::InvalidTopology(_))
    ));
  }

  #[test]
  fn test_custom_rejects_out_of_range_neighbors() {
    let map = BTreeMap::from([(0, vec![1]), (1, vec![7])]);
    assert!(matches!(
      Topology::custom(map),
      Err(Error::InvalidTopology(_))
    ));
  }
}
