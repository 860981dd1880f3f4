//! Tileset pairs: the unit of host caching and GPU residency.
//!
//! A pair merges one primary and one secondary tileset (images, palettes,
//! metatile definitions, per-metatile attributes and tile animations). Pairs
//! are immutable once decoded and shared via `Arc` by every map that uses
//! them.

use std::fmt;
use std::sync::Arc;

/// Metatile ids at or above this value index the secondary tileset.
pub const SECONDARY_METATILE_OFFSET: u16 = 512;

/// Identity of a tileset pair: (primary tileset id, secondary tileset id).
///
/// Ordering is lexicographic by primary then secondary id, which is the
/// final tie-break of coverage ranking.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
  pub primary: Arc<str>,
  pub secondary: Arc<str>,
}

impl PairKey {
  /// Creates a key from the two tileset ids.
  pub fn new(primary: impl Into<Arc<str>>, secondary: impl Into<Arc<str>>) -> Self {
    Self {
      primary: primary.into(),
      secondary: secondary.into(),
    }
  }
}

impl fmt::Display for PairKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}+{}", self.primary, self.secondary)
  }
}

/// Decoded indexed-color tileset image.
#[derive(Clone, Debug, Default)]
pub struct TilesetImage {
  pub width: u32,
  pub height: u32,
  /// One palette index per pixel.
  pub indices: Vec<u8>,
}

/// 16-color palette, RGB888.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Palette {
  pub colors: [[u8; 3]; 16],
}

impl Default for Palette {
  fn default() -> Self {
    Self {
      colors: [[0; 3]; 16],
    }
  }
}

/// A 2x2 block of 8x8 tiles per layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metatile {
  /// Raw tile references for the bottom and top layers (4 each).
  pub tiles: [u16; 8],
  pub layer_type: u8,
}

/// Gameplay attributes attached to a metatile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetatileAttributes {
  pub behavior: u16,
  pub layer_type: u8,
}

/// A tile animation: frames copied into destination tile indices.
#[derive(Clone, Debug, Default)]
pub struct TileAnimation {
  pub id: String,
  /// Frame images, each covering the destination tile run.
  pub frames: Vec<TilesetImage>,
  /// First tile index overwritten by each destination.
  pub destinations: Vec<u16>,
  /// Frame duration in game ticks.
  pub interval: u16,
}

/// Everything the renderer needs for one (primary, secondary) combination.
#[derive(Clone, Debug)]
pub struct TilesetPair {
  pub key: PairKey,
  pub primary_path: String,
  pub secondary_path: String,
  pub primary_image: TilesetImage,
  pub secondary_image: TilesetImage,
  pub primary_palettes: Vec<Palette>,
  pub secondary_palettes: Vec<Palette>,
  pub primary_metatiles: Vec<Metatile>,
  pub secondary_metatiles: Vec<Metatile>,
  pub primary_attributes: Vec<MetatileAttributes>,
  pub secondary_attributes: Vec<MetatileAttributes>,
  pub animations: Vec<TileAnimation>,
}

impl TilesetPair {
  /// An empty pair carrying only its identity.
  ///
  /// Useful for sources that stream pixel data separately.
  pub fn empty(key: PairKey) -> Self {
    Self {
      key,
      primary_path: String::new(),
      secondary_path: String::new(),
      primary_image: TilesetImage::default(),
      secondary_image: TilesetImage::default(),
      primary_palettes: Vec::new(),
      secondary_palettes: Vec::new(),
      primary_metatiles: Vec::new(),
      secondary_metatiles: Vec::new(),
      primary_attributes: Vec::new(),
      secondary_attributes: Vec::new(),
      animations: Vec::new(),
    }
  }

  /// Attributes of a map metatile id, resolved against the primary or
  /// secondary tileset.
  pub fn attributes(&self, metatile_id: u16) -> Option<MetatileAttributes> {
    if metatile_id >= SECONDARY_METATILE_OFFSET {
      let index = (metatile_id - SECONDARY_METATILE_OFFSET) as usize;
      self.secondary_attributes.get(index).copied()
    } else {
      self.primary_attributes.get(metatile_id as usize).copied()
    }
  }

  /// Total animation frames across all animations.
  pub fn animation_frame_count(&self) -> usize {
    self.animations.iter().map(|a| a.frames.len()).sum()
  }

  /// Total animation destinations across all animations.
  pub fn animation_destination_count(&self) -> usize {
    self.animations.iter().map(|a| a.destinations.len()).sum()
  }
}
