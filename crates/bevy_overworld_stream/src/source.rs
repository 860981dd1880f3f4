//! External collaborators consumed by the streaming core.
//!
//! Provides [`MapCatalog`] (static map metadata, synchronous) and
//! [`MapAssetSource`] (async pair decoding and per-map readers) so the
//! loader can run against packed game data, loose files, or test fixtures
//! without changing its own logic.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::SourceError;
use crate::map::{MapEvents, MapId, MapIndexEntry, TileLayout};
use crate::pair::{PairKey, TilesetPair};

/// Boxed future type used by all collaborator methods for object safety.
///
/// Streaming runs on a single thread, so no `Send` is required.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Pre-loaded, immutable map metadata.
pub trait MapCatalog {
  /// Looks up a map by id.
  fn map_entry(&self, id: &MapId) -> Option<Arc<MapIndexEntry>>;

  /// Any map that renders with `pair`, used to build the pair on demand.
  fn entry_for_pair(&self, pair: &PairKey) -> Option<Arc<MapIndexEntry>>;
}

/// Async readers for the heavy per-map and per-pair assets.
pub trait MapAssetSource {
  /// Decodes images, palettes, metatiles, attributes and animations of the
  /// pair `entry` renders with.
  fn decode_pair<'a>(&'a self, entry: &'a MapIndexEntry)
  -> BoxFuture<'a, Result<TilesetPair, SourceError>>;

  /// Reads the metatile grid.
  fn load_layout<'a>(&'a self, entry: &'a MapIndexEntry)
  -> BoxFuture<'a, Result<TileLayout, SourceError>>;

  /// Reads the border metatiles. Failures here are not fatal to a load.
  fn load_border<'a>(&'a self, entry: &'a MapIndexEntry)
  -> BoxFuture<'a, Result<Vec<u16>, SourceError>>;

  /// Reads warp, object, coord and background events.
  fn load_events<'a>(&'a self, entry: &'a MapIndexEntry)
  -> BoxFuture<'a, Result<MapEvents, SourceError>>;
}

/// [`MapCatalog`] backed by a hash map.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
  entries: HashMap<MapId, Arc<MapIndexEntry>>,
}

impl InMemoryCatalog {
  /// Creates a catalog from a list of entries. Later duplicates win.
  pub fn new(entries: impl IntoIterator<Item = MapIndexEntry>) -> Self {
    let mut catalog = Self::default();
    for entry in entries {
      catalog.insert(entry);
    }
    catalog
  }

  pub fn insert(&mut self, entry: MapIndexEntry) {
    self.entries.insert(entry.id.clone(), Arc::new(entry));
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl MapCatalog for InMemoryCatalog {
  fn map_entry(&self, id: &MapId) -> Option<Arc<MapIndexEntry>> {
    self.entries.get(id).cloned()
  }

  fn entry_for_pair(&self, pair: &PairKey) -> Option<Arc<MapIndexEntry>> {
    // Smallest id first so the choice does not depend on hash order.
    self
      .entries
      .values()
      .filter(|entry| entry.pair_key() == *pair)
      .min_by(|a, b| a.id.cmp(&b.id))
      .cloned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(id: &str, primary: &str, secondary: &str) -> MapIndexEntry {
    MapIndexEntry {
      id: MapId::from(id),
      width: 4,
      height: 4,
      primary_tileset_id: primary.into(),
      secondary_tileset_id: secondary.into(),
      primary_tileset_path: String::new(),
      secondary_tileset_path: String::new(),
      layout_path: String::new(),
      connections: Vec::new(),
    }
  }

  #[test]
  fn pair_lookup_is_deterministic() {
    let catalog = InMemoryCatalog::new([
      entry("ZETA", "general", "town"),
      entry("ALPHA", "general", "town"),
      entry("CAVE", "cave", "rock"),
    ]);
    let found = catalog
      .entry_for_pair(&PairKey::new("general", "town"))
      .unwrap();
    assert_eq!(found.id.as_str(), "ALPHA");
    assert!(catalog.entry_for_pair(&PairKey::new("x", "y")).is_none());
    assert_eq!(catalog.len(), 3);
    assert!(catalog.map_entry(&MapId::from("CAVE")).is_some());
  }
}
