//! Read-only introspection of loader and scheduler internals.
//!
//! Meant for overlays and logs. Gameplay code should read
//! [`WorldSnapshot`](crate::WorldSnapshot) instead.

use std::fmt;

use bevy::math::IVec2;

use crate::boundary::Boundary;
use crate::coords::Direction;
use crate::loader::WorldLoader;
use crate::map::MapId;
use crate::pair::PairKey;
use crate::scheduler::GpuSlot;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedMapInfo {
  pub id: MapId,
  pub offset: IVec2,
  pub size: IVec2,
  pub pair_index: usize,
  pub pair: Option<PairKey>,
  pub in_gpu: bool,
  pub border_tile_count: usize,
}

/// A spatial connection of the observer's map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedConnection {
  pub from: MapId,
  pub direction: Direction,
  pub to: MapId,
  pub loaded: bool,
}

/// Animation counts of the pair bound to one GPU slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotAnimations {
  pub slot: GpuSlot,
  pub pair: PairKey,
  pub animation_ids: Vec<String>,
  pub destination_count: usize,
  pub frame_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntryInfo {
  pub pair: PairKey,
  pub last_access: u64,
  pub gpu_slot: Option<GpuSlot>,
}

/// Point-in-time dump of streaming state around an observer.
#[derive(Clone, Debug)]
pub struct DebugInfo {
  pub observer: IVec2,
  pub current_map: Option<MapId>,
  pub anchor: Option<MapId>,
  pub loaded_maps: Vec<LoadedMapInfo>,
  pub expected_connections: Vec<ExpectedConnection>,
  pub pair_count: usize,
  pub slots: Vec<Option<PairKey>>,
  pub slot_animations: Vec<SlotAnimations>,
  pub boundaries: Vec<Boundary>,
  /// Boundaries within the preload distance of the observer.
  pub nearby_boundary_count: usize,
  /// Most recently used first.
  pub cache: Vec<CacheEntryInfo>,
  pub loading_pairs: Vec<PairKey>,
  pub epoch: u64,
}

impl WorldLoader {
  /// Collects a [`DebugInfo`] for an observer standing at `observer`.
  pub fn debug_info(&self, observer: IVec2) -> DebugInfo {
    let snapshot = self.snapshot();
    let scheduler = self.scheduler();
    let current = snapshot.map_at(observer);

    let loaded_maps = snapshot
      .maps
      .iter()
      .map(|m| {
        let pair = snapshot.pairs.get(m.pair_index).map(|p| p.key.clone());
        LoadedMapInfo {
          id: m.id().clone(),
          offset: m.offset,
          size: m.entry.size(),
          pair_index: m.pair_index,
          in_gpu: pair.as_ref().is_some_and(|key| scheduler.is_in_gpu(key)),
          pair,
          border_tile_count: m.border.len(),
        }
      })
      .collect();

    let expected_connections = current
      .map(|map| {
        map
          .entry
          .spatial_connections()
          .map(|c| ExpectedConnection {
            from: map.id().clone(),
            direction: c.direction,
            to: c.neighbor.clone(),
            loaded: snapshot.contains_map(&c.neighbor),
          })
          .collect()
      })
      .unwrap_or_default();

    let slot_animations = scheduler
      .gpu_slots()
      .iter()
      .enumerate()
      .filter_map(|(slot, key)| {
        let key = key.as_ref()?;
        let pair = snapshot.pairs.iter().find(|p| p.key == *key)?;
        Some(SlotAnimations {
          slot,
          pair: key.clone(),
          animation_ids: pair.animations.iter().map(|a| a.id.clone()).collect(),
          destination_count: pair.animation_destination_count(),
          frame_count: pair.animation_frame_count(),
        })
      })
      .collect();

    let nearby_boundary_count = scheduler
      .nearby_boundaries(observer, self.config().preload_distance)
      .len();

    DebugInfo {
      observer,
      current_map: current.map(|m| m.id().clone()),
      anchor: snapshot.anchor.clone(),
      loaded_maps,
      expected_connections,
      pair_count: snapshot.pairs.len(),
      slots: scheduler.gpu_slots().to_vec(),
      slot_animations,
      boundaries: scheduler.boundaries().to_vec(),
      nearby_boundary_count,
      cache: scheduler
        .cache_entries()
        .into_iter()
        .map(|(pair, entry)| CacheEntryInfo {
          pair,
          last_access: entry.last_access,
          gpu_slot: entry.gpu_slot,
        })
        .collect(),
      loading_pairs: scheduler.loading_pairs().cloned().collect(),
      epoch: snapshot.epoch,
    }
  }
}

impl fmt::Display for DebugInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = |id: &Option<MapId>| id.as_ref().map_or("-".to_string(), MapId::to_string);
    writeln!(
      f,
      "observer {} on {} (anchor {}, epoch {})",
      self.observer,
      name(&self.current_map),
      name(&self.anchor),
      self.epoch
    )?;
    writeln!(
      f,
      "maps {} | pairs {} | cached {} | loading {}",
      self.loaded_maps.len(),
      self.pair_count,
      self.cache.len(),
      self.loading_pairs.len()
    )?;
    for (slot, key) in self.slots.iter().enumerate() {
      match key {
        Some(key) => writeln!(f, "slot {slot}: {key}")?,
        None => writeln!(f, "slot {slot}: empty")?,
      }
    }
    write!(
      f,
      "boundaries {} ({} nearby)",
      self.boundaries.len(),
      self.nearby_boundary_count
    )
  }
}
