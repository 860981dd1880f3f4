//! Tileset pair slot scheduling.
//!
//! Owns a bounded host cache of decoded pairs and a fixed table of GPU
//! slots. Slot 0 always holds the pair the observer stands on; the
//! remaining slots hold the pairs most likely to come into view next.
//!
//! Side effects go through injected callbacks (GPU upload, pair loading),
//! and events are queued in an outbox the owner drains.

mod cache;

use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use bevy::log::{debug, warn};
use bevy::math::IVec2;

pub use self::cache::{CachedPair, GpuSlot};
use self::cache::HostCache;
use crate::boundary::{self, Boundary};
use crate::config::StreamingConfig;
use crate::coords::Direction;
use crate::coverage::PairPriority;
use crate::error::StreamError;
use crate::events::WorldEvent;
use crate::pair::{PairKey, TilesetPair};
use crate::source::BoxFuture;

/// Uploads a pair's textures into a GPU slot.
pub type UploadFn = Box<dyn FnMut(&TilesetPair, GpuSlot)>;

/// Builds a pair that is not in the host cache.
pub type PairLoaderFn =
  Rc<dyn Fn(&PairKey) -> BoxFuture<'static, Result<Arc<TilesetPair>, StreamError>>>;

/// Result of [`TilesetSlotScheduler::update`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotUpdate {
  /// True when any slot binding changed.
  pub needs_rebuild: bool,
  pub slots: Vec<Option<PairKey>>,
}

/// Summary counters for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerStats {
  pub cache_size: usize,
  pub cache_capacity: usize,
  pub slots: Vec<Option<PairKey>>,
  pub boundary_count: usize,
  pub loading_count: usize,
}

struct Preload {
  key: PairKey,
  future: BoxFuture<'static, Result<Arc<TilesetPair>, StreamError>>,
}

/// Decides which tileset pairs are GPU-resident.
pub struct TilesetSlotScheduler {
  cache: HostCache,
  slots: Vec<Option<PairKey>>,
  boundaries: Vec<Boundary>,
  loading: BTreeSet<PairKey>,
  preloads: Vec<Preload>,
  resident: Vec<Arc<TilesetPair>>,
  upload: Option<UploadFn>,
  load_pair: Option<PairLoaderFn>,
  preload_distance: i32,
  outbox: Vec<WorldEvent>,
}

impl TilesetSlotScheduler {
  /// Creates a scheduler sized from the config. No callbacks are set.
  pub fn new(config: &StreamingConfig) -> Self {
    Self {
      cache: HostCache::new(config.host_cache_capacity),
      slots: vec![None; config.gpu_slot_count.max(1)],
      boundaries: Vec::new(),
      loading: BTreeSet::new(),
      preloads: Vec::new(),
      resident: Vec::new(),
      upload: None,
      load_pair: None,
      preload_distance: config.preload_distance,
      outbox: Vec::new(),
    }
  }

  /// Installs the GPU upload sink and the pair loader.
  pub fn set_callbacks(&mut self, upload: UploadFn, load_pair: PairLoaderFn) {
    self.upload = Some(upload);
    self.load_pair = Some(load_pair);
  }

  pub fn set_upload(&mut self, upload: UploadFn) {
    self.upload = Some(upload);
  }

  pub fn set_pair_loader(&mut self, load_pair: PairLoaderFn) {
    self.load_pair = Some(load_pair);
  }

  /// Pairs the owner already holds decoded.
  ///
  /// A cache miss on one of these is refilled from this set instead of
  /// going through the pair loader.
  pub fn set_resident_pairs(&mut self, pairs: Vec<Arc<TilesetPair>>) {
    self.resident = pairs;
  }

  #[inline]
  pub fn slot_count(&self) -> usize {
    self.slots.len()
  }

  /// Inserts or touches a pair, evicting unpinned LRU entries when full.
  pub fn add_to_cache(&mut self, pair: Arc<TilesetPair>) {
    let slot = self.slot_of(&pair.key);
    for key in self.cache.insert(pair, slot) {
      debug!("Evicted tileset pair {key} from host cache");
      self.outbox.push(WorldEvent::PairEvicted(key));
    }
  }

  /// Binds a cached pair to `slot`, unbinding whatever held it before.
  ///
  /// Returns false (and changes nothing) if the pair is not cached or the
  /// slot does not exist.
  pub fn set_gpu_slot(&mut self, key: &PairKey, slot: GpuSlot) -> bool {
    if slot >= self.slots.len() || !self.cache.contains(key) {
      debug!("Refusing to bind {key} to GPU slot {slot}");
      return false;
    }

    if let Some(previous) = self.slots[slot].take() {
      self.cache.set_slot(&previous, None);
    }
    if let Some(old_slot) = self.slot_of(key) {
      self.slots[old_slot] = None;
    }

    self.slots[slot] = Some(key.clone());
    self.cache.set_slot(key, Some(slot));
    self.cache.touch(key);
    self.outbox.push(WorldEvent::GpuSlotsChanged {
      slots: self.slots.clone(),
    });
    true
  }

  /// Unbinds `slot`. The pair stays cached but becomes evictable.
  pub fn clear_gpu_slot(&mut self, slot: GpuSlot) {
    let Some(key) = self.slots.get_mut(slot).and_then(Option::take) else {
      return;
    };
    self.cache.set_slot(&key, None);
    self.outbox.push(WorldEvent::GpuSlotsChanged {
      slots: self.slots.clone(),
    });
  }

  /// Uploads a cached pair into the lowest free slot.
  ///
  /// Returns the slot the pair ends up in, or `None` when every slot is
  /// taken or the pair is not cached.
  pub fn bind_to_free_slot(&mut self, key: &PairKey) -> Option<GpuSlot> {
    if let Some(slot) = self.slot_of(key) {
      return Some(slot);
    }
    if !self.cache.contains(key) {
      return None;
    }
    let slot = self.free_slot()?;
    self.ensure_in_slot(key, slot).then_some(slot)
  }

  /// Lowest slot with no pair bound.
  pub fn free_slot(&self) -> Option<GpuSlot> {
    self.slots.iter().position(Option::is_none)
  }

  #[inline]
  pub fn gpu_slots(&self) -> &[Option<PairKey>] {
    &self.slots
  }

  pub fn slot_of(&self, key: &PairKey) -> Option<GpuSlot> {
    self.slots.iter().position(|s| s.as_ref() == Some(key))
  }

  #[inline]
  pub fn is_in_gpu(&self, key: &PairKey) -> bool {
    self.slot_of(key).is_some()
  }

  /// Cached pair data, marking it most recently used.
  pub fn cached_pair(&mut self, key: &PairKey) -> Option<Arc<TilesetPair>> {
    self.cache.touch(key)
  }

  #[inline]
  pub fn is_cached(&self, key: &PairKey) -> bool {
    self.cache.contains(key)
  }

  pub fn cache_len(&self) -> usize {
    self.cache.len()
  }

  /// Cache entries, most recently used first.
  pub fn cache_entries(&self) -> Vec<(PairKey, CachedPair)> {
    self
      .cache
      .entries_by_recency()
      .into_iter()
      .map(|(key, entry)| (key.clone(), entry.clone()))
      .collect()
  }

  /// Pairs currently being built in the background.
  pub fn loading_pairs(&self) -> impl Iterator<Item = &PairKey> {
    self.loading.iter()
  }

  pub fn has_pending_preloads(&self) -> bool {
    !self.preloads.is_empty()
  }

  /// Replaces the boundary set after the resident map set changed.
  pub fn set_boundaries(&mut self, boundaries: Vec<Boundary>) {
    self.boundaries = boundaries;
  }

  #[inline]
  pub fn boundaries(&self) -> &[Boundary] {
    &self.boundaries
  }

  pub fn nearby_boundaries(&self, tile: IVec2, distance: i32) -> Vec<&Boundary> {
    boundary::nearby_boundaries(&self.boundaries, tile, distance).collect()
  }

  /// Pair across the boundary the observer is walking toward.
  pub fn upcoming_pair(
    &self,
    tile: IVec2,
    current: &PairKey,
    facing: Option<Direction>,
  ) -> Option<PairKey> {
    boundary::upcoming_pair(&self.boundaries, tile, current, facing, self.preload_distance)
  }

  /// Recomputes slot bindings for the observer's position.
  ///
  /// `current` always ends up in slot 0 once it is cached. With coverage
  /// `priorities`, the best other visible pairs fill slots `1..` in rank
  /// order. Without them only the single pair across the approached
  /// boundary is promoted into slot 1. Pairs missing from the cache are
  /// preloaded in the background and bound on a later update.
  pub fn update(
    &mut self,
    tile: IVec2,
    current: &PairKey,
    facing: Option<Direction>,
    priorities: Option<&[PairPriority]>,
  ) -> SlotUpdate {
    let mut needs_rebuild = self.ensure_current(current);

    let candidates: Vec<PairKey> = match priorities {
      Some(priorities) if !priorities.is_empty() => {
        let mut ranked: Vec<&PairPriority> =
          priorities.iter().filter(|p| p.pair != *current).collect();
        ranked.sort_by(|a, b| a.rank(b));
        ranked.dedup_by(|a, b| a.pair == b.pair);
        ranked
          .into_iter()
          .take(self.slots.len().saturating_sub(1))
          .map(|p| p.pair.clone())
          .collect()
      }
      _ => self
        .upcoming_pair(tile, current, facing)
        .filter(|key| key != current && self.slots.len() > 1)
        .into_iter()
        .collect(),
    };

    for (index, key) in candidates.iter().enumerate() {
      needs_rebuild |= self.ensure_in_slot(key, index + 1);
    }

    SlotUpdate {
      needs_rebuild,
      slots: self.slots.clone(),
    }
  }

  fn ensure_current(&mut self, current: &PairKey) -> bool {
    match self.slot_of(current) {
      Some(0) => false,
      Some(from) => {
        // Already resident elsewhere: swap bindings, no upload.
        self.slots.swap(0, from);
        self.cache.set_slot(current, Some(0));
        if let Some(displaced) = self.slots[from].clone() {
          self.cache.set_slot(&displaced, Some(from));
        }
        self.cache.touch(current);
        debug!("Swapped {current} from GPU slot {from} into slot 0");
        self.outbox.push(WorldEvent::GpuSlotsChanged {
          slots: self.slots.clone(),
        });
        true
      }
      None => self.ensure_in_slot(current, 0),
    }
  }

  fn ensure_in_slot(&mut self, key: &PairKey, slot: GpuSlot) -> bool {
    if self.slots.get(slot).and_then(Option::as_ref) == Some(key) {
      return false;
    }
    let Some(pair) = self.cached_or_resident(key) else {
      self.start_preload(key);
      return false;
    };
    if let Some(upload) = self.upload.as_mut() {
      upload(&pair, slot);
    }
    self.set_gpu_slot(key, slot)
  }

  fn cached_or_resident(&mut self, key: &PairKey) -> Option<Arc<TilesetPair>> {
    if let Some(pair) = self.cache.touch(key) {
      return Some(pair);
    }
    let pair = self.resident.iter().find(|p| p.key == *key)?.clone();
    debug!("Restoring resident pair {key} into host cache");
    self.add_to_cache(pair.clone());
    Some(pair)
  }

  fn start_preload(&mut self, key: &PairKey) {
    if self.loading.contains(key) {
      return;
    }
    let Some(load_pair) = self.load_pair.clone() else {
      return;
    };
    self.loading.insert(key.clone());
    self.outbox.push(WorldEvent::PreloadStarted(key.clone()));
    self.preloads.push(Preload {
      key: key.clone(),
      future: load_pair(key),
    });
  }

  /// Advances background preloads, caching the ones that finish.
  ///
  /// Ready once no preload is pending.
  pub fn poll_preloads(&mut self, cx: &mut Context<'_>) -> Poll<()> {
    let mut index = 0;
    while index < self.preloads.len() {
      let Poll::Ready(result) = self.preloads[index].future.as_mut().poll(cx) else {
        index += 1;
        continue;
      };
      let preload = self.preloads.remove(index);
      self.loading.remove(&preload.key);
      match result {
        Ok(pair) => {
          self.add_to_cache(pair);
          self.outbox.push(WorldEvent::PreloadCompleted(preload.key));
        }
        Err(e) => warn!("Failed to preload tileset pair {}: {e}", preload.key),
      }
    }

    if self.preloads.is_empty() {
      Poll::Ready(())
    } else {
      Poll::Pending
    }
  }

  /// Takes every queued event, oldest first.
  pub fn drain_events(&mut self) -> Vec<WorldEvent> {
    std::mem::take(&mut self.outbox)
  }

  pub fn stats(&self) -> SchedulerStats {
    SchedulerStats {
      cache_size: self.cache.len(),
      cache_capacity: self.cache.capacity(),
      slots: self.slots.clone(),
      boundary_count: self.boundaries.len(),
      loading_count: self.loading.len(),
    }
  }

  /// Clears cache, slots, boundaries, resident pairs and preloads; keeps
  /// callbacks.
  ///
  /// Dropping the pending preload futures cancels them.
  pub fn reset(&mut self) {
    self.cache.clear();
    self.slots.iter_mut().for_each(|slot| *slot = None);
    self.boundaries.clear();
    self.loading.clear();
    self.preloads.clear();
    self.resident.clear();
    self.outbox.clear();
  }
}
