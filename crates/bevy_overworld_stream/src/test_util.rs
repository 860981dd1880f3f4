//! Fixtures shared by unit tests.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use bevy::math::IVec2;

use crate::coords::Direction;
use crate::error::{SourceError, StreamError};
use crate::map::{Connection, LoadedMapInstance, MapEvents, MapId, MapIndexEntry, TileLayout};
use crate::pair::{PairKey, TilesetPair};
use crate::scheduler::PairLoaderFn;
use crate::source::{BoxFuture, MapAssetSource};

/// Entry using pair `(primary, "s")` with no connections.
pub fn entry(id: &str, size: IVec2, primary: &str) -> MapIndexEntry {
  MapIndexEntry {
    id: MapId::from(id),
    width: size.x,
    height: size.y,
    primary_tileset_id: primary.into(),
    secondary_tileset_id: "s".into(),
    primary_tileset_path: String::new(),
    secondary_tileset_path: String::new(),
    layout_path: String::new(),
    connections: Vec::new(),
  }
}

/// Adds a one-way connection from `entry` to `to`.
pub fn connect(entry: &mut MapIndexEntry, direction: Direction, to: &str, offset: i32) {
  entry.connections.push(Connection {
    direction,
    neighbor: MapId::from(to),
    offset,
  });
}

/// Resident instance with an all-zero layout.
pub fn instance(id: &str, offset: IVec2, size: IVec2, primary: &str) -> LoadedMapInstance {
  LoadedMapInstance {
    entry: Arc::new(entry(id, size, primary)),
    layout: Arc::new(TileLayout {
      width: size.x,
      height: size.y,
      metatiles: vec![0; (size.x * size.y) as usize],
    }),
    offset,
    pair_index: 0,
    border: Arc::from(Vec::new()),
    events: Arc::new(MapEvents::default()),
  }
}

pub fn pair(primary: &str) -> Arc<TilesetPair> {
  Arc::new(TilesetPair::empty(PairKey::new(primary, "s")))
}

/// Pair loader resolving immediately with `build(key)`.
pub fn ready_loader(
  build: impl Fn(&PairKey) -> Result<Arc<TilesetPair>, StreamError> + 'static,
) -> PairLoaderFn {
  Rc::new(
    move |key: &PairKey| -> BoxFuture<'static, Result<Arc<TilesetPair>, StreamError>> {
      let result = build(key);
      Box::pin(async move { result })
    },
  )
}

/// Asset source whose reads all resolve on first poll.
#[derive(Default)]
pub struct ReadyAssets {
  pub missing_border: HashSet<MapId>,
  pub broken_layout: HashSet<MapId>,
  /// Pairs decoded so far, in order.
  pub decoded: RefCell<Vec<PairKey>>,
}

impl MapAssetSource for ReadyAssets {
  fn decode_pair<'a>(
    &'a self,
    entry: &'a MapIndexEntry,
  ) -> BoxFuture<'a, Result<TilesetPair, SourceError>> {
    self.decoded.borrow_mut().push(entry.pair_key());
    let pair = TilesetPair::empty(entry.pair_key());
    Box::pin(async move { Ok(pair) })
  }

  fn load_layout<'a>(
    &'a self,
    entry: &'a MapIndexEntry,
  ) -> BoxFuture<'a, Result<TileLayout, SourceError>> {
    let result = if self.broken_layout.contains(&entry.id) {
      Err(SourceError::Decode(format!("bad layout for {}", entry.id)))
    } else {
      Ok(TileLayout {
        width: entry.width,
        height: entry.height,
        metatiles: vec![0; (entry.width * entry.height) as usize],
      })
    };
    Box::pin(async move { result })
  }

  fn load_border<'a>(
    &'a self,
    entry: &'a MapIndexEntry,
  ) -> BoxFuture<'a, Result<Vec<u16>, SourceError>> {
    let result = if self.missing_border.contains(&entry.id) {
      Err(SourceError::NotFound(format!("{}/border.bin", entry.id)))
    } else {
      Ok(vec![1, 2, 3, 4])
    };
    Box::pin(async move { result })
  }

  fn load_events<'a>(
    &'a self,
    _entry: &'a MapIndexEntry,
  ) -> BoxFuture<'a, Result<MapEvents, SourceError>> {
    Box::pin(async move { Ok(MapEvents::default()) })
  }
}
