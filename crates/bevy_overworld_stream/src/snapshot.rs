//! Immutable point-in-time views of the streamed world.
//!
//! A [`WorldSnapshot`] is cheap to clone: map instances and tileset pairs
//! are shared by `Arc`, and the spatial index is built lazily on the first
//! positional query and then cached for the snapshot's lifetime.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use bevy::math::IVec2;

use crate::coords::TileBounds;
use crate::coverage::{self, CoverageHint, CoverageSummary};
use crate::map::{LoadedMapInstance, MapId};
use crate::pair::{MetatileAttributes, PairKey, TilesetPair};
use crate::scheduler::GpuSlot;
use crate::spatial::SpatialIndex;

/// Shared contents of a [`WorldSnapshot`].
#[derive(Debug)]
pub struct SnapshotData {
  /// World generation this snapshot was taken in.
  pub epoch: u64,
  pub anchor: Option<MapId>,
  /// Resident maps, in load order.
  pub maps: Vec<LoadedMapInstance>,
  /// Distinct pairs; every map's `pair_index` points into this list.
  pub pairs: Vec<Arc<TilesetPair>>,
  pub map_pair_index: HashMap<MapId, usize>,
  /// Anchor's border metatiles, used for tiles outside every map.
  pub anchor_border: Arc<[u16]>,
  pub pair_gpu_slots: HashMap<PairKey, GpuSlot>,
  /// Union of all map rectangles, `None` when no map is resident.
  pub bounds: Option<TileBounds>,
  spatial: OnceLock<SpatialIndex>,
}

/// Read-only view handed to rendering, scripting and save collaborators.
#[derive(Clone, Debug)]
pub struct WorldSnapshot(Arc<SnapshotData>);

impl Default for WorldSnapshot {
  fn default() -> Self {
    Self::new(0, None, Vec::new(), Vec::new(), HashMap::new())
  }
}

impl Deref for WorldSnapshot {
  type Target = SnapshotData;

  fn deref(&self) -> &SnapshotData {
    &self.0
  }
}

impl WorldSnapshot {
  pub(crate) fn new(
    epoch: u64,
    anchor: Option<MapId>,
    maps: Vec<LoadedMapInstance>,
    pairs: Vec<Arc<TilesetPair>>,
    pair_gpu_slots: HashMap<PairKey, GpuSlot>,
  ) -> Self {
    let map_pair_index = maps
      .iter()
      .map(|m| (m.id().clone(), m.pair_index))
      .collect();
    let anchor_border = anchor
      .as_ref()
      .and_then(|id| maps.iter().find(|m| m.id() == id))
      .map(|m| m.border.clone())
      .unwrap_or_else(|| Arc::from(Vec::new()));
    let bounds = maps.iter().map(LoadedMapInstance::bounds).reduce(|acc, b| {
      TileBounds::new(acc.min.min(b.min), acc.max.max(b.max))
    });

    Self(Arc::new(SnapshotData {
      epoch,
      anchor,
      maps,
      pairs,
      map_pair_index,
      anchor_border,
      pair_gpu_slots,
      bounds,
      spatial: OnceLock::new(),
    }))
  }

  /// True when both handles point at the same snapshot.
  pub fn ptr_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }

  fn spatial(&self) -> &SpatialIndex {
    self.spatial.get_or_init(|| SpatialIndex::build(&self.maps))
  }

  pub fn map(&self, id: &MapId) -> Option<&LoadedMapInstance> {
    self.maps.iter().find(|m| m.id() == id)
  }

  pub fn anchor_map(&self) -> Option<&LoadedMapInstance> {
    self.map(self.anchor.as_ref()?)
  }

  pub fn contains_map(&self, id: &MapId) -> bool {
    self.map_pair_index.contains_key(id)
  }

  pub fn map_ids(&self) -> impl Iterator<Item = &MapId> {
    self.maps.iter().map(LoadedMapInstance::id)
  }

  /// Map containing a world tile.
  pub fn map_at(&self, tile: IVec2) -> Option<&LoadedMapInstance> {
    self.spatial().map_at(tile).map(|index| &self.maps[index])
  }

  /// Map containing or closest to a world tile.
  pub fn nearest_map(&self, tile: IVec2) -> Option<&LoadedMapInstance> {
    self.spatial().nearest_map(tile).map(|index| &self.maps[index])
  }

  pub fn pair_for_map(&self, id: &MapId) -> Option<&Arc<TilesetPair>> {
    self.pairs.get(*self.map_pair_index.get(id)?)
  }

  pub fn gpu_slot_of(&self, pair: &PairKey) -> Option<GpuSlot> {
    self.pair_gpu_slots.get(pair).copied()
  }

  /// Metatile id at a world tile.
  ///
  /// Outside every map the anchor's border pattern repeats in 2x2 blocks
  /// aligned to the anchor's origin.
  pub fn metatile_at(&self, tile: IVec2) -> Option<u16> {
    if let Some(map) = self.map_at(tile) {
      return map.metatile_at(tile);
    }
    self.border_metatile(tile)
  }

  fn border_metatile(&self, tile: IVec2) -> Option<u16> {
    if self.anchor_border.is_empty() {
      return None;
    }
    let local = tile - self.anchor_map()?.offset;
    let index = ((local.x & 1) + (local.y & 1) * 2) as usize;
    Some(self.anchor_border[index % self.anchor_border.len()])
  }

  /// Gameplay attributes of the metatile at a world tile.
  pub fn attributes_at(&self, tile: IVec2) -> Option<MetatileAttributes> {
    let (pair, metatile) = match self.map_at(tile) {
      Some(map) => (self.pairs.get(map.pair_index)?, map.metatile_at(tile)?),
      None => {
        let anchor = self.anchor_map()?;
        (self.pairs.get(anchor.pair_index)?, self.border_metatile(tile)?)
      }
    };
    pair.attributes(metatile)
  }

  /// Viewport coverage of this snapshot's maps.
  pub fn coverage(&self, hint: &CoverageHint) -> CoverageSummary {
    coverage::compute_coverage(
      &self.maps,
      |m| self.pairs.get(m.pair_index).map(|p| p.key.clone()),
      hint,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_util::{instance, pair};

  fn snapshot() -> WorldSnapshot {
    let mut anchor = instance("A", IVec2::ZERO, IVec2::new(4, 4), "P1");
    anchor.border = Arc::from(vec![10, 11, 12, 13]);
    Arc::make_mut(&mut anchor.layout).metatiles[5] = 7;
    let mut other = instance("B", IVec2::new(4, 0), IVec2::new(4, 4), "P2");
    other.pair_index = 1;

    let mut p1 = (*pair("P1")).clone();
    p1.primary_attributes = vec![MetatileAttributes::default(); 16];
    p1.primary_attributes[12].behavior = 3;
    let slots = HashMap::from([(pair("P1").key.clone(), 0)]);
    WorldSnapshot::new(
      4,
      Some(MapId::from("A")),
      vec![anchor, other],
      vec![Arc::new(p1), pair("P2")],
      slots,
    )
  }

  #[test]
  fn lookups_by_position_and_id() {
    let snap = snapshot();
    assert_eq!(snap.map_at(IVec2::new(5, 1)).map(|m| m.id().as_str()), Some("B"));
    assert_eq!(snap.metatile_at(IVec2::new(1, 1)), Some(7));
    assert_eq!(
      snap.pair_for_map(&MapId::from("B")).map(|p| p.key.clone()),
      Some(pair("P2").key.clone())
    );
    assert_eq!(snap.gpu_slot_of(&pair("P1").key), Some(0));
    assert_eq!(snap.gpu_slot_of(&pair("P2").key), None);
    assert_eq!(
      snap.bounds,
      Some(TileBounds::new(IVec2::ZERO, IVec2::new(7, 3)))
    );
    assert_eq!(snap.nearest_map(IVec2::new(9, 1)).map(|m| m.id().as_str()), Some("B"));
  }

  #[test]
  fn border_pattern_repeats_outside_maps() {
    let snap = snapshot();
    assert_eq!(snap.metatile_at(IVec2::new(-2, -2)), Some(10));
    assert_eq!(snap.metatile_at(IVec2::new(-1, -2)), Some(11));
    assert_eq!(snap.metatile_at(IVec2::new(-2, -1)), Some(12));
    assert_eq!(snap.metatile_at(IVec2::new(9, 5)), Some(13));
    assert_eq!(snap.attributes_at(IVec2::new(0, 5)).map(|a| a.behavior), Some(3));
  }

  #[test]
  fn clones_share_data() {
    let snap = snapshot();
    let copy = snap.clone();
    assert!(snap.ptr_eq(&copy));
    assert_eq!(copy.epoch, 4);
    assert!(WorldSnapshot::default().map_at(IVec2::ZERO).is_none());
  }
}
