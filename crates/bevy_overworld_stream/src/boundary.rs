//! Boundaries between regions rendered with different tileset pairs.
//!
//! Recomputed from scratch whenever the resident map set changes. The
//! slot scheduler uses them for the lookahead that runs when no viewport
//! coverage is available.

use std::collections::{HashMap, HashSet};

use bevy::math::IVec2;

use crate::coords::Direction;
use crate::map::{LoadedMapInstance, MapId};
use crate::pair::PairKey;

/// Axis a boundary line runs along.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Orientation {
  /// Crossed by moving up or down.
  Horizontal,
  /// Crossed by moving left or right.
  Vertical,
}

/// Straight edge where a map using `pair_a` meets a map using `pair_b`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Boundary {
  /// World tile where the line starts.
  pub origin: IVec2,
  pub length: i32,
  pub orientation: Orientation,
  pub pair_a: PairKey,
  pub pair_b: PairKey,
  pub map_a: MapId,
  pub map_b: MapId,
}

impl Boundary {
  /// True when `tile` lies alongside the line and within `distance` tiles
  /// across it.
  pub fn is_near(&self, tile: IVec2, distance: i32) -> bool {
    match self.orientation {
      Orientation::Horizontal => {
        tile.x >= self.origin.x
          && tile.x < self.origin.x + self.length
          && (tile.y - self.origin.y).abs() <= distance
      }
      Orientation::Vertical => {
        tile.y >= self.origin.y
          && tile.y < self.origin.y + self.length
          && (tile.x - self.origin.x).abs() <= distance
      }
    }
  }

  /// The pair on the far side from `current`.
  pub fn other_pair(&self, current: &PairKey) -> &PairKey {
    if self.pair_a == *current {
      &self.pair_b
    } else {
      &self.pair_a
    }
  }
}

/// Finds one boundary per unordered pair combination.
///
/// Maps are scanned in order and each map's spatial connections in
/// declaration order; the first connection found for a combination
/// defines its line.
pub fn detect_boundaries(
  maps: &[LoadedMapInstance],
  pair_of: impl Fn(&LoadedMapInstance) -> Option<PairKey>,
) -> Vec<Boundary> {
  let by_id: HashMap<&MapId, &LoadedMapInstance> = maps.iter().map(|m| (m.id(), m)).collect();
  let mut seen: HashSet<(PairKey, PairKey)> = HashSet::new();
  let mut boundaries = Vec::new();

  for map in maps {
    let Some(pair_a) = pair_of(map) else {
      continue;
    };
    for connection in map.entry.spatial_connections() {
      let Some(neighbor) = by_id.get(&connection.neighbor) else {
        continue;
      };
      let Some(pair_b) = pair_of(neighbor) else {
        continue;
      };
      if pair_a == pair_b {
        continue;
      }

      let combination = if pair_a < pair_b {
        (pair_a.clone(), pair_b.clone())
      } else {
        (pair_b.clone(), pair_a.clone())
      };
      if !seen.insert(combination) {
        continue;
      }

      if let Some((origin, length, orientation)) =
        edge_line(map, neighbor, connection.direction, connection.offset)
      {
        boundaries.push(Boundary {
          origin,
          length,
          orientation,
          pair_a: pair_a.clone(),
          pair_b,
          map_a: map.id().clone(),
          map_b: neighbor.id().clone(),
        });
      }
    }
  }

  boundaries
}

fn edge_line(
  a: &LoadedMapInstance,
  b: &LoadedMapInstance,
  direction: Direction,
  offset: i32,
) -> Option<(IVec2, i32, Orientation)> {
  let (ao, aw, ah) = (a.offset, a.entry.width, a.entry.height);
  let (bw, bh) = (b.entry.width, b.entry.height);
  let line = match direction {
    Direction::Up => (IVec2::new(ao.x + offset, ao.y), aw.min(bw), Orientation::Horizontal),
    Direction::Down => (
      IVec2::new(ao.x + offset, ao.y + ah),
      aw.min(bw),
      Orientation::Horizontal,
    ),
    Direction::Left => (IVec2::new(ao.x, ao.y + offset), ah.min(bh), Orientation::Vertical),
    Direction::Right => (
      IVec2::new(ao.x + aw, ao.y + offset),
      ah.min(bh),
      Orientation::Vertical,
    ),
    Direction::Dive | Direction::Emerge => return None,
  };
  Some(line)
}

/// Boundaries `tile` is within `distance` of.
pub fn nearby_boundaries(
  boundaries: &[Boundary],
  tile: IVec2,
  distance: i32,
) -> impl Iterator<Item = &Boundary> {
  boundaries.iter().filter(move |b| b.is_near(tile, distance))
}

/// The pair the observer is about to walk into, if any.
///
/// Only boundaries the facing direction actually crosses count: a
/// horizontal line is approached moving up from below it or down from
/// above it, a vertical line moving left from its right or right from its
/// left.
pub fn upcoming_pair(
  boundaries: &[Boundary],
  tile: IVec2,
  current: &PairKey,
  facing: Option<Direction>,
  distance: i32,
) -> Option<PairKey> {
  let facing = facing?;
  nearby_boundaries(boundaries, tile, distance)
    .find(|b| match (b.orientation, facing) {
      (Orientation::Horizontal, Direction::Up) => tile.y > b.origin.y,
      (Orientation::Horizontal, Direction::Down) => tile.y < b.origin.y,
      (Orientation::Vertical, Direction::Left) => tile.x > b.origin.x,
      (Orientation::Vertical, Direction::Right) => tile.x < b.origin.x,
      _ => false,
    })
    .map(|b| b.other_pair(current).clone())
}
