//! Host-memory LRU cache of decoded tileset pairs.

use std::collections::HashMap;
use std::sync::Arc;

use crate::pair::{PairKey, TilesetPair};

/// Index of a GPU slot.
pub type GpuSlot = usize;

/// A cached pair with LRU tracking.
#[derive(Clone, Debug)]
pub struct CachedPair {
  pub pair: Arc<TilesetPair>,
  pub last_access: u64,
  /// Slot this pair is bound to. Pinned entries are never evicted.
  pub gpu_slot: Option<GpuSlot>,
}

/// Bounded LRU cache keyed by [`PairKey`].
///
/// Capacity is soft: when every entry is GPU-pinned, insertion grows the
/// cache instead of evicting.
pub(crate) struct HostCache {
  entries: HashMap<PairKey, CachedPair>,
  capacity: usize,
  tick: u64,
}

impl HostCache {
  pub fn new(capacity: usize) -> Self {
    Self {
      entries: HashMap::new(),
      capacity: capacity.max(1),
      tick: 0,
    }
  }

  fn next_tick(&mut self) -> u64 {
    self.tick += 1;
    self.tick
  }

  /// Inserts `pair`, or touches it if already cached.
  ///
  /// Returns the keys evicted to make room, oldest first.
  pub fn insert(&mut self, pair: Arc<TilesetPair>, gpu_slot: Option<GpuSlot>) -> Vec<PairKey> {
    let tick = self.next_tick();
    if let Some(existing) = self.entries.get_mut(&pair.key) {
      existing.last_access = tick;
      return Vec::new();
    }

    let mut evicted = Vec::new();
    while self.entries.len() >= self.capacity {
      let Some(victim) = self.oldest_unpinned() else {
        break;
      };
      self.entries.remove(&victim);
      evicted.push(victim);
    }

    self.entries.insert(
      pair.key.clone(),
      CachedPair {
        pair,
        last_access: tick,
        gpu_slot,
      },
    );
    evicted
  }

  fn oldest_unpinned(&self) -> Option<PairKey> {
    self
      .entries
      .iter()
      .filter(|(_, entry)| entry.gpu_slot.is_none())
      .min_by(|(ka, a), (kb, b)| a.last_access.cmp(&b.last_access).then_with(|| ka.cmp(kb)))
      .map(|(key, _)| key.clone())
  }

  /// Returns the pair and marks it as most recently used.
  pub fn touch(&mut self, key: &PairKey) -> Option<Arc<TilesetPair>> {
    let tick = self.next_tick();
    let entry = self.entries.get_mut(key)?;
    entry.last_access = tick;
    Some(entry.pair.clone())
  }

  #[cfg(test)]
  pub fn get(&self, key: &PairKey) -> Option<&CachedPair> {
    self.entries.get(key)
  }

  #[inline]
  pub fn contains(&self, key: &PairKey) -> bool {
    self.entries.contains_key(key)
  }

  /// Records the slot binding of a cached pair.
  pub fn set_slot(&mut self, key: &PairKey, slot: Option<GpuSlot>) {
    if let Some(entry) = self.entries.get_mut(key) {
      entry.gpu_slot = slot;
    }
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  #[inline]
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Entries ordered most recently used first.
  pub fn entries_by_recency(&self) -> Vec<(&PairKey, &CachedPair)> {
    let mut entries: Vec<_> = self.entries.iter().collect();
    entries.sort_by(|(_, a), (_, b)| b.last_access.cmp(&a.last_access));
    entries
  }

  pub fn clear(&mut self) {
    self.entries.clear();
    self.tick = 0;
  }
}
