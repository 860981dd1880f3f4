//! Tile-space coordinate helpers.
//!
//! All positions are in world tiles (`IVec2`). The anchor map always sits at
//! the origin; every other resident map carries an offset relative to it.
//! - [`TileBounds`]: Inclusive tile rectangle
//! - [`Direction`]: Connection/facing direction
//! - [`connection_offset`]: Neighbor placement from connection metadata

use std::fmt;
use std::str::FromStr;

use bevy::math::IVec2;
use serde::{Deserialize, Serialize};

/// Direction of a map connection or of the observer's facing.
///
/// `Dive` and `Emerge` link maps vertically (underwater layers) and have no
/// spatial placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
  Up,
  Down,
  Left,
  Right,
  Dive,
  Emerge,
}

impl Direction {
  /// Returns true if the connection places the neighbor edge-to-edge.
  #[inline]
  pub const fn is_spatial(self) -> bool {
    matches!(self, Self::Up | Self::Down | Self::Left | Self::Right)
  }

  /// Unit step in tile space (Y grows downward).
  pub const fn step(self) -> IVec2 {
    match self {
      Self::Up => IVec2::new(0, -1),
      Self::Down => IVec2::new(0, 1),
      Self::Left => IVec2::new(-1, 0),
      Self::Right => IVec2::new(1, 0),
      Self::Dive | Self::Emerge => IVec2::ZERO,
    }
  }

  /// Direction pointing the other way.
  pub const fn opposite(self) -> Self {
    match self {
      Self::Up => Self::Down,
      Self::Down => Self::Up,
      Self::Left => Self::Right,
      Self::Right => Self::Left,
      Self::Dive => Self::Emerge,
      Self::Emerge => Self::Dive,
    }
  }
}

impl fmt::Display for Direction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Up => "up",
      Self::Down => "down",
      Self::Left => "left",
      Self::Right => "right",
      Self::Dive => "dive",
      Self::Emerge => "emerge",
    };
    f.write_str(name)
  }
}

/// Error returned when parsing an unknown direction name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseDirectionError(pub String);

impl fmt::Display for ParseDirectionError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "unknown connection direction: {:?}", self.0)
  }
}

impl std::error::Error for ParseDirectionError {}

impl FromStr for Direction {
  type Err = ParseDirectionError;

  /// Accepts both screen names (`up`) and compass names (`north`).
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "up" | "north" => Ok(Self::Up),
      "down" | "south" => Ok(Self::Down),
      "left" | "west" => Ok(Self::Left),
      "right" | "east" => Ok(Self::Right),
      "dive" => Ok(Self::Dive),
      "emerge" => Ok(Self::Emerge),
      _ => Err(ParseDirectionError(s.to_string())),
    }
  }
}

/// Inclusive rectangle of world tiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TileBounds {
  pub min: IVec2,
  pub max: IVec2,
}

impl TileBounds {
  /// Creates bounds from inclusive corners.
  pub const fn new(min: IVec2, max: IVec2) -> Self {
    Self { min, max }
  }

  /// Bounds covering `size` tiles starting at `origin`.
  ///
  /// Sizes below one tile are clamped to one.
  pub fn from_origin_size(origin: IVec2, size: IVec2) -> Self {
    let size = size.max(IVec2::ONE);
    Self {
      min: origin,
      max: origin + size - IVec2::ONE,
    }
  }

  /// Grows the bounds by `margin` tiles on every side.
  pub fn expand(self, margin: i32) -> Self {
    let margin = IVec2::splat(margin.max(0));
    Self {
      min: self.min - margin,
      max: self.max + margin,
    }
  }

  #[inline]
  pub fn contains(&self, tile: IVec2) -> bool {
    tile.cmpge(self.min).all() && tile.cmple(self.max).all()
  }

  /// Overlapping tile rectangle, if any.
  pub fn intersection(&self, other: &TileBounds) -> Option<TileBounds> {
    let min = self.min.max(other.min);
    let max = self.max.min(other.max);
    if min.x > max.x || min.y > max.y {
      return None;
    }
    Some(TileBounds { min, max })
  }

  /// Number of tiles covered.
  pub fn area(&self) -> i64 {
    let w = (self.max.x - self.min.x + 1).max(0) as i64;
    let h = (self.max.y - self.min.y + 1).max(0) as i64;
    w * h
  }

  /// Squared distance from `tile` to the nearest tile inside the bounds.
  ///
  /// Zero when the tile is inside.
  pub fn distance_sq(&self, tile: IVec2) -> i64 {
    let below = (self.min - tile).max(IVec2::ZERO);
    let above = (tile - self.max).max(IVec2::ZERO);
    let d = (below + above).as_i64vec2();
    d.x * d.x + d.y * d.y
  }
}

/// Chebyshev (chessboard) length of a tile vector.
#[inline]
pub fn chebyshev(v: IVec2) -> i32 {
  v.x.abs().max(v.y.abs())
}

/// Computes a neighbor's world offset from its source map's placement.
///
/// `offset` shifts the neighbor along the shared edge. Up places the
/// neighbor above the source (its own height subtracted on Y), down places
/// it below the source, left/right mirror that on X. Returns `None` for
/// non-spatial connections.
pub fn connection_offset(
  source_offset: IVec2,
  source_size: IVec2,
  neighbor_size: IVec2,
  direction: Direction,
  offset: i32,
) -> Option<IVec2> {
  let placed = match direction {
    Direction::Up => IVec2::new(source_offset.x + offset, source_offset.y - neighbor_size.y),
    Direction::Down => IVec2::new(source_offset.x + offset, source_offset.y + source_size.y),
    Direction::Left => IVec2::new(source_offset.x - neighbor_size.x, source_offset.y + offset),
    Direction::Right => IVec2::new(source_offset.x + source_size.x, source_offset.y + offset),
    Direction::Dive | Direction::Emerge => return None,
  };
  Some(placed)
}
