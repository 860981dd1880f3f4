//! Scripted in-memory world shared by the integration tests.
//!
//! Reads resolve immediately unless a map is gated, in which case its
//! layout read waits until the [`Gate`] is opened.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use async_channel::{Receiver, Sender};
use bevy::math::IVec2;
use bevy_overworld_stream::map::Connection;
use bevy_overworld_stream::{
  BoxFuture, Direction, InMemoryCatalog, MapAssetSource, MapEvents, MapId, MapIndexEntry, PairKey,
  SourceError, StreamingConfig, TileLayout, TilesetPair, WorldEvent, WorldLoader,
};

pub fn key(primary: &str) -> PairKey {
  PairKey::new(primary, "common")
}

/// Map entry rendered with `key(primary)`.
pub fn map(id: &str, width: i32, height: i32, primary: &str) -> MapIndexEntry {
  MapIndexEntry {
    id: MapId::from(id),
    width,
    height,
    primary_tileset_id: primary.into(),
    secondary_tileset_id: "common".into(),
    primary_tileset_path: format!("tilesets/{primary}"),
    secondary_tileset_path: "tilesets/common".into(),
    layout_path: format!("layouts/{id}"),
    connections: Vec::new(),
  }
}

/// Connects `a` to `b` in `direction` and `b` back to `a`.
pub fn link(a: &mut MapIndexEntry, direction: Direction, b: &mut MapIndexEntry, offset: i32) {
  a.connections.push(Connection {
    direction,
    neighbor: b.id.clone(),
    offset,
  });
  b.connections.push(Connection {
    direction: direction.opposite(),
    neighbor: a.id.clone(),
    offset: -offset,
  });
}

/// Holds a gated map's layout read until opened.
pub struct Gate(Sender<()>);

impl Gate {
  /// Releases every current and future read of the gated map.
  pub fn open(self) {
    self.0.close();
  }
}

/// Asset source with per-map gates and a read log.
#[derive(Default)]
pub struct ScriptedAssets {
  gates: RefCell<HashMap<MapId, Receiver<()>>>,
  pub decoded: RefCell<Vec<PairKey>>,
  pub layouts_read: RefCell<Vec<MapId>>,
}

impl ScriptedAssets {
  pub fn gate(&self, id: &str) -> Gate {
    let (tx, rx) = async_channel::bounded(1);
    self.gates.borrow_mut().insert(MapId::from(id), rx);
    Gate(tx)
  }

  pub fn layout_reads(&self, id: &str) -> usize {
    let id = MapId::from(id);
    self.layouts_read.borrow().iter().filter(|m| **m == id).count()
  }
}

impl MapAssetSource for ScriptedAssets {
  fn decode_pair<'a>(
    &'a self,
    entry: &'a MapIndexEntry,
  ) -> BoxFuture<'a, Result<TilesetPair, SourceError>> {
    self.decoded.borrow_mut().push(entry.pair_key());
    let mut pair = TilesetPair::empty(entry.pair_key());
    pair.primary_path = entry.primary_tileset_path.clone();
    pair.secondary_path = entry.secondary_tileset_path.clone();
    Box::pin(async move { Ok(pair) })
  }

  fn load_layout<'a>(
    &'a self,
    entry: &'a MapIndexEntry,
  ) -> BoxFuture<'a, Result<TileLayout, SourceError>> {
    self.layouts_read.borrow_mut().push(entry.id.clone());
    let gate = self.gates.borrow().get(&entry.id).cloned();
    let layout = TileLayout {
      width: entry.width,
      height: entry.height,
      metatiles: (0..entry.width * entry.height).map(|i| i as u16).collect(),
    };
    Box::pin(async move {
      if let Some(gate) = gate {
        // Closed means open.
        let _ = gate.recv().await;
      }
      Ok(layout)
    })
  }

  fn load_border<'a>(
    &'a self,
    _entry: &'a MapIndexEntry,
  ) -> BoxFuture<'a, Result<Vec<u16>, SourceError>> {
    Box::pin(async move { Ok(vec![7, 7, 7, 7]) })
  }

  fn load_events<'a>(
    &'a self,
    _entry: &'a MapIndexEntry,
  ) -> BoxFuture<'a, Result<MapEvents, SourceError>> {
    Box::pin(async move { Ok(MapEvents::default()) })
  }
}

/// A loader over `maps` plus handles to its asset source and event log.
pub struct TestWorld {
  pub loader: WorldLoader,
  pub assets: Rc<ScriptedAssets>,
  pub events: Rc<RefCell<Vec<WorldEvent>>>,
}

impl TestWorld {
  pub fn new(config: StreamingConfig, maps: Vec<MapIndexEntry>) -> Self {
    let assets = Rc::new(ScriptedAssets::default());
    let loader = WorldLoader::new(config, Rc::new(InMemoryCatalog::new(maps)), assets.clone());
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    loader.subscribe(move |event| sink.borrow_mut().push(event.clone()));
    Self {
      loader,
      assets,
      events,
    }
  }

  pub fn offset_of(&self, id: &str) -> Option<IVec2> {
    self.loader.snapshot().map(&MapId::from(id)).map(|m| m.offset)
  }

  /// Resident ids, sorted.
  pub fn resident(&self) -> Vec<String> {
    let mut ids: Vec<String> = self
      .loader
      .snapshot()
      .map_ids()
      .map(|id| id.to_string())
      .collect();
    ids.sort();
    ids
  }

  pub fn count_events(&self, matches: impl Fn(&WorldEvent) -> bool) -> usize {
    self.events.borrow().iter().filter(|e| matches(e)).count()
  }
}
