//! E2E tests for world loading through the public loader API.
//!
//! Covers placement from connection metadata, re-anchoring while a load is
//! in flight, and duplicate suppression under concurrent updates.

mod common;

use std::collections::HashSet;

use bevy::math::IVec2;
use bevy_overworld_stream::{Direction, MapId, StreamingConfig, WorldEvent};
use common::{TestWorld, key, link, map};
use futures_lite::future::{self, block_on};

#[test]
fn down_connection_places_neighbor_below() {
  let mut a = map("A", 10, 10, "town");
  let mut b = map("B", 10, 10, "route");
  link(&mut a, Direction::Down, &mut b, 0);
  let world = TestWorld::new(StreamingConfig::default(), vec![a, b]);

  let snapshot = block_on(world.loader.initialize(&MapId::from("A"), 1)).unwrap();

  assert_eq!(world.offset_of("A"), Some(IVec2::ZERO));
  assert_eq!(world.offset_of("B"), Some(IVec2::new(0, 10)));
  assert_eq!(snapshot.anchor, Some(MapId::from("A")));
  assert_eq!(snapshot.anchor_border.as_ref(), &[7, 7, 7, 7]);

  // Local tile (3, 2) of B holds metatile 2 * 10 + 3.
  assert_eq!(snapshot.metatile_at(IVec2::new(3, 12)), Some(23));
  assert_eq!(snapshot.map_at(IVec2::new(3, 12)).map(|m| m.id().as_str()), Some("B"));
  assert!(snapshot.map_at(IVec2::new(3, 20)).is_none());

  let pair_b = snapshot.pair_for_map(&MapId::from("B")).unwrap();
  assert_eq!(pair_b.key, key("route"));
  assert_eq!(pair_b.primary_path, "tilesets/route");
}

#[test]
fn offset_connections_and_depth_limit() {
  // A right-> B (shifted down 4), B up-> C (shifted right 2), C right-> D.
  let mut a = map("A", 10, 10, "town");
  let mut b = map("B", 8, 12, "route");
  let mut c = map("C", 6, 5, "route");
  let mut d = map("D", 6, 5, "cave");
  link(&mut a, Direction::Right, &mut b, 4);
  link(&mut b, Direction::Up, &mut c, 2);
  link(&mut c, Direction::Right, &mut d, 0);
  let world = TestWorld::new(StreamingConfig::default(), vec![a, b, c, d]);

  block_on(world.loader.initialize(&MapId::from("A"), 2)).unwrap();

  assert_eq!(world.resident(), vec!["A", "B", "C"]);
  assert_eq!(world.offset_of("B"), Some(IVec2::new(10, 4)));
  assert_eq!(world.offset_of("C"), Some(IVec2::new(12, -1)));
  assert_eq!(world.loader.snapshot().pairs.len(), 2);
}

#[test]
fn reanchor_during_neighbor_load_uses_moved_source() {
  // A right-> B right-> C, all 10x10.
  let mut a = map("A", 10, 10, "town");
  let mut b = map("B", 10, 10, "route");
  let mut c = map("C", 10, 10, "route");
  link(&mut a, Direction::Right, &mut b, 0);
  link(&mut b, Direction::Right, &mut c, 0);
  let world = TestWorld::new(StreamingConfig::default(), vec![a, b, c]);
  block_on(world.loader.initialize(&MapId::from("A"), 1)).unwrap();
  assert_eq!(world.resident(), vec!["A", "B"]);

  let gate = world.assets.gate("C");
  let loader = world.loader.clone();
  block_on(future::zip(
    world.loader.update(IVec2::new(5, 5), Some(Direction::Right)),
    async move {
      future::yield_now().await;
      assert!(loader.is_loading(&MapId::from("C")));
      assert_eq!(loader.reanchor(&MapId::from("B")).unwrap(), IVec2::new(10, 0));
      gate.open();
    },
  ));

  // C was proposed at (20, 0) but commits next to B's new position.
  assert_eq!(world.offset_of("A"), Some(IVec2::new(-10, 0)));
  assert_eq!(world.offset_of("B"), Some(IVec2::ZERO));
  assert_eq!(world.offset_of("C"), Some(IVec2::new(10, 0)));
  assert_eq!(world.loader.anchor(), Some(MapId::from("B")));
  assert!(!world.loader.is_loading(&MapId::from("C")));
}

#[test]
fn reanchor_shift_matches_event_and_keeps_layout_rigid() {
  let mut a = map("A", 10, 10, "town");
  let mut b = map("B", 10, 10, "route");
  let mut c = map("C", 10, 10, "cave");
  link(&mut a, Direction::Down, &mut b, 0);
  link(&mut b, Direction::Left, &mut c, 3);
  let config = StreamingConfig {
    reanchor_threshold: 12,
    ..Default::default()
  };
  let world = TestWorld::new(config, vec![a, b, c]);
  block_on(world.loader.initialize(&MapId::from("A"), 2)).unwrap();
  let before = world.loader.snapshot();

  // Tile (2, 15) is on B, 15 rows from the origin.
  block_on(world.loader.update(IVec2::new(2, 15), Some(Direction::Down)));

  let shift = world
    .events
    .borrow()
    .iter()
    .find_map(|e| match e {
      WorldEvent::Reanchored { new_anchor, shift } if new_anchor.as_str() == "B" => Some(*shift),
      _ => None,
    })
    .unwrap();
  assert_eq!(shift, IVec2::new(0, 10));

  let after = world.loader.snapshot();
  assert_eq!(after.anchor, Some(MapId::from("B")));
  for map in &before.maps {
    let moved = after.map(map.id()).unwrap();
    assert_eq!(moved.offset, map.offset - shift);
  }
  // Pair indices survive compaction.
  for map in &after.maps {
    assert_eq!(after.pairs[map.pair_index].key, map.entry.pair_key());
  }
}

#[test]
fn concurrent_updates_load_each_map_once() {
  let mut a = map("A", 10, 10, "town");
  let mut b = map("B", 10, 10, "route");
  link(&mut a, Direction::Right, &mut b, 0);
  let world = TestWorld::new(StreamingConfig::default(), vec![a, b]);
  block_on(world.loader.initialize(&MapId::from("A"), 0)).unwrap();

  let gate = world.assets.gate("B");
  block_on(future::zip(
    world.loader.update(IVec2::new(5, 5), None),
    async {
      world.loader.update(IVec2::new(6, 5), None).await;
      gate.open();
    },
  ));

  assert_eq!(world.resident(), vec!["A", "B"]);
  assert_eq!(world.assets.layout_reads("B"), 1);

  let snapshot = world.loader.snapshot();
  let ids: HashSet<_> = snapshot.map_ids().collect();
  assert_eq!(ids.len(), snapshot.maps.len());
  let keys: HashSet<_> = snapshot.pairs.iter().map(|p| p.key.clone()).collect();
  assert_eq!(keys.len(), snapshot.pairs.len());
  assert_eq!(
    world.count_events(|e| matches!(e, WorldEvent::MapsChanged(_))),
    2
  );
}

#[test]
fn shared_pair_is_decoded_once() {
  let mut a = map("A", 10, 10, "town");
  let mut b = map("B", 10, 10, "town");
  let mut c = map("C", 10, 10, "town");
  link(&mut a, Direction::Right, &mut b, 0);
  link(&mut b, Direction::Right, &mut c, 0);
  let world = TestWorld::new(StreamingConfig::default(), vec![a, b, c]);

  let snapshot = block_on(world.loader.initialize(&MapId::from("A"), 2)).unwrap();

  assert_eq!(snapshot.maps.len(), 3);
  assert_eq!(snapshot.pairs.len(), 1);
  assert_eq!(*world.assets.decoded.borrow(), vec![key("town")]);
  assert_eq!(
    world.count_events(|e| matches!(e, WorldEvent::TilesetsChanged { .. })),
    1
  );
}

#[test]
fn reinitialize_reuses_nothing_from_previous_world() {
  let mut a = map("A", 10, 10, "town");
  let mut b = map("B", 10, 10, "route");
  link(&mut a, Direction::Right, &mut b, 0);
  let x = map("X", 4, 4, "cave");
  let world = TestWorld::new(StreamingConfig::default(), vec![a, b, x]);

  block_on(world.loader.initialize(&MapId::from("A"), 1)).unwrap();
  let first_epoch = world.loader.epoch();
  let snapshot = block_on(world.loader.initialize(&MapId::from("X"), 1)).unwrap();

  assert!(world.loader.epoch() > first_epoch);
  assert_eq!(world.resident(), vec!["X"]);
  assert_eq!(snapshot.pairs.len(), 1);
  assert_eq!(snapshot.gpu_slot_of(&key("cave")), Some(0));
  assert_eq!(snapshot.gpu_slot_of(&key("town")), None);
}
