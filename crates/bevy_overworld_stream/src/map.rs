//! Static map metadata and resident map instances.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use bevy::math::IVec2;
use serde::{Deserialize, Serialize};

use crate::coords::{Direction, TileBounds};
use crate::pair::PairKey;

/// Interned map identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapId(Arc<str>);

impl MapId {
  pub fn new(id: impl Into<Arc<str>>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for MapId {
  fn from(id: &str) -> Self {
    Self::new(id)
  }
}

impl Borrow<str> for MapId {
  fn borrow(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for MapId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Edge-to-edge adjacency between two maps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
  pub direction: Direction,
  #[serde(rename = "map")]
  pub neighbor: MapId,
  /// Shift along the shared edge, in tiles.
  #[serde(default)]
  pub offset: i32,
}

/// Immutable, externally supplied description of one map.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapIndexEntry {
  pub id: MapId,
  pub width: i32,
  pub height: i32,
  pub primary_tileset_id: String,
  pub secondary_tileset_id: String,
  #[serde(default)]
  pub primary_tileset_path: String,
  #[serde(default)]
  pub secondary_tileset_path: String,
  #[serde(default)]
  pub layout_path: String,
  #[serde(default)]
  pub connections: Vec<Connection>,
}

impl MapIndexEntry {
  /// Key of the tileset pair this map renders with.
  pub fn pair_key(&self) -> PairKey {
    PairKey::new(
      self.primary_tileset_id.as_str(),
      self.secondary_tileset_id.as_str(),
    )
  }

  #[inline]
  pub fn size(&self) -> IVec2 {
    IVec2::new(self.width, self.height)
  }

  /// Connections with an edge-to-edge placement.
  pub fn spatial_connections(&self) -> impl Iterator<Item = &Connection> {
    self.connections.iter().filter(|c| c.direction.is_spatial())
  }
}

/// Metatile grid of one map, row-major.
#[derive(Clone, Debug, Default)]
pub struct TileLayout {
  pub width: i32,
  pub height: i32,
  pub metatiles: Vec<u16>,
}

impl TileLayout {
  /// Metatile id at a local tile position.
  pub fn get(&self, local: IVec2) -> Option<u16> {
    if local.x < 0 || local.y < 0 || local.x >= self.width || local.y >= self.height {
      return None;
    }
    self
      .metatiles
      .get((local.y * self.width + local.x) as usize)
      .copied()
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WarpEvent {
  pub position: IVec2,
  pub elevation: u8,
  pub dest_map: MapId,
  pub dest_warp_id: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEvent {
  pub local_id: u16,
  pub graphics_id: String,
  pub position: IVec2,
  pub elevation: u8,
  pub script: Option<String>,
  pub flag: Option<String>,
}

/// Step-on trigger; weather triggers carry the weather name as `var`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordEvent {
  pub position: IVec2,
  pub elevation: u8,
  pub script: Option<String>,
  pub var: Option<String>,
}

/// Signs and hidden items.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BgEvent {
  pub position: IVec2,
  pub elevation: u8,
  pub kind: String,
  pub script: Option<String>,
}

/// Per-map event payload read alongside the layout.
#[derive(Clone, Debug, Default)]
pub struct MapEvents {
  pub warps: Vec<WarpEvent>,
  pub objects: Vec<ObjectEvent>,
  pub coords: Vec<CoordEvent>,
  pub bg: Vec<BgEvent>,
  pub weather: Option<String>,
  pub allow_cycling: bool,
}

/// A map placed in world space.
///
/// Heavy payloads are `Arc`-shared so snapshots copy only handles. The world
/// offset changes only when the loader re-anchors.
#[derive(Clone, Debug)]
pub struct LoadedMapInstance {
  pub entry: Arc<MapIndexEntry>,
  pub layout: Arc<TileLayout>,
  pub offset: IVec2,
  /// Index into the owning snapshot's pair list.
  pub pair_index: usize,
  pub border: Arc<[u16]>,
  pub events: Arc<MapEvents>,
}

impl LoadedMapInstance {
  #[inline]
  pub fn id(&self) -> &MapId {
    &self.entry.id
  }

  /// World-space tile rectangle covered by this map.
  pub fn bounds(&self) -> TileBounds {
    TileBounds::from_origin_size(self.offset, self.entry.size())
  }

  #[inline]
  pub fn contains(&self, tile: IVec2) -> bool {
    let local = tile - self.offset;
    local.x >= 0 && local.y >= 0 && local.x < self.entry.width && local.y < self.entry.height
  }

  /// Metatile id at a world tile, if inside this map.
  pub fn metatile_at(&self, tile: IVec2) -> Option<u16> {
    if !self.contains(tile) {
      return None;
    }
    self.layout.get(tile - self.offset)
  }

  pub fn warp_events(&self) -> &[WarpEvent] {
    &self.events.warps
  }

  pub fn object_events(&self) -> &[ObjectEvent] {
    &self.events.objects
  }
}
