//! World loading around a moving anchor.
//!
//! [`WorldLoader`] owns the resident map set. It walks the connection graph
//! breadth-first from the anchor (on [`initialize`](WorldLoader::initialize))
//! or from the observer's map (on [`update`](WorldLoader::update)), places
//! each neighbor edge-to-edge with its source, and keeps the slot scheduler
//! informed of boundaries and the observer's pair.
//!
//! # Cancellation
//!
//! Every async step captures an [`EpochToken`] and re-checks it after each
//! suspension point and right before every commit. `initialize` advances
//! the epoch, so work started for an older world unwinds without touching
//! the new one.
//!
//! # Borrowing
//!
//! The loader is a cheap `Rc` handle. Internal `RefCell` borrows are never
//! held across an `.await`, and handlers run with no borrow held, so event
//! handlers may freely query the loader. Events raised from inside a
//! handler are queued and delivered after the current one, in order.

mod epoch;

use std::cell::{Cell, Ref, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Waker};

use bevy::log::{debug, info, warn};
use bevy::math::IVec2;
use futures_lite::future;
// WASM compat: std::time::Instant panics on wasm32
use web_time::Instant;

pub use self::epoch::{Epoch, EpochToken};
use crate::boundary;
use crate::config::StreamingConfig;
use crate::coords::{Direction, chebyshev, connection_offset};
use crate::coverage::{CoverageHint, PairPriority};
use crate::error::StreamError;
use crate::events::{EventBus, HandlerId, WorldEvent};
use crate::map::{LoadedMapInstance, MapEvents, MapId, MapIndexEntry, TileLayout};
use crate::pair::{PairKey, TilesetPair};
use crate::scheduler::{PairLoaderFn, TilesetSlotScheduler, UploadFn};
use crate::snapshot::WorldSnapshot;
use crate::source::{BoxFuture, MapAssetSource, MapCatalog};

/// The resident neighbor that triggered a load.
///
/// The committed offset is recomputed from this map's position at commit
/// time, since a re-anchor may have moved it while the load was in flight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLink {
  pub source: MapId,
  pub direction: Direction,
  pub offset: i32,
}

/// How a [`WorldLoader::load_map`] call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
  /// The map was committed to the resident set.
  Loaded,
  /// The map was already resident or being loaded.
  AlreadyResident,
  /// The world was reset while loading; nothing was committed.
  Superseded,
  /// The source map left the resident set before commit.
  SourceGone,
}

#[derive(Default)]
struct LoaderState {
  epoch: Epoch,
  anchor: Option<MapId>,
  current_map: Option<MapId>,
  maps: Vec<LoadedMapInstance>,
  pairs: Vec<Arc<TilesetPair>>,
  /// Map ids with a load in flight.
  loading: HashSet<MapId>,
  /// Last published snapshot, dropped on every mutation.
  snapshot: Option<WorldSnapshot>,
}

impl LoaderState {
  fn map(&self, id: &MapId) -> Option<&LoadedMapInstance> {
    self.maps.iter().find(|m| m.id() == id)
  }

  fn pair_index(&self, key: &PairKey) -> Option<usize> {
    self.pairs.iter().position(|p| p.key == *key)
  }
}

struct Shared {
  config: StreamingConfig,
  catalog: Rc<dyn MapCatalog>,
  assets: Rc<dyn MapAssetSource>,
  state: RefCell<LoaderState>,
  scheduler: RefCell<TilesetSlotScheduler>,
  events: RefCell<EventBus>,
  /// Events waiting for delivery.
  pending: RefCell<VecDeque<WorldEvent>>,
  dispatching: Cell<bool>,
}

/// Streams connected maps around an anchor and publishes snapshots.
///
/// Cloning yields another handle to the same world.
#[derive(Clone)]
pub struct WorldLoader {
  shared: Rc<Shared>,
}

impl WorldLoader {
  /// Creates an empty world.
  ///
  /// The scheduler builds missing pairs through the same `assets`, using
  /// any catalog map that renders with the pair.
  pub fn new(
    config: StreamingConfig,
    catalog: Rc<dyn MapCatalog>,
    assets: Rc<dyn MapAssetSource>,
  ) -> Self {
    let mut scheduler = TilesetSlotScheduler::new(&config);
    scheduler.set_pair_loader(pair_loader(catalog.clone(), assets.clone()));
    Self {
      shared: Rc::new(Shared {
        config,
        catalog,
        assets,
        state: RefCell::new(LoaderState::default()),
        scheduler: RefCell::new(scheduler),
        events: RefCell::new(EventBus::default()),
        pending: RefCell::new(VecDeque::new()),
        dispatching: Cell::new(false),
      }),
    }
  }

  /// Installs the GPU upload sink.
  pub fn set_gpu_upload(&self, upload: UploadFn) {
    self.shared.scheduler.borrow_mut().set_upload(upload);
  }

  #[inline]
  pub fn config(&self) -> &StreamingConfig {
    &self.shared.config
  }

  /// Token of the live world generation.
  pub fn epoch(&self) -> EpochToken {
    self.shared.state.borrow().epoch.token()
  }

  fn is_current(&self, token: EpochToken) -> bool {
    self.shared.state.borrow().epoch.is_current(token)
  }

  /// Map the observer was last found on by `update`.
  pub fn current_map(&self) -> Option<MapId> {
    self.shared.state.borrow().current_map.clone()
  }

  pub fn anchor(&self) -> Option<MapId> {
    self.shared.state.borrow().anchor.clone()
  }

  /// True while `id` is resident.
  pub fn contains_map(&self, id: &MapId) -> bool {
    self.shared.state.borrow().map(id).is_some()
  }

  /// True while a load of `id` is in flight.
  pub fn is_loading(&self, id: &MapId) -> bool {
    self.shared.state.borrow().loading.contains(id)
  }

  /// Latest published view of the world.
  pub fn snapshot(&self) -> WorldSnapshot {
    let cached = self.shared.state.borrow().snapshot.clone();
    if let Some(snapshot) = cached {
      return snapshot;
    }
    let snapshot = self.build_snapshot();
    self.shared.state.borrow_mut().snapshot = Some(snapshot.clone());
    snapshot
  }

  fn build_snapshot(&self) -> WorldSnapshot {
    let state = self.shared.state.borrow();
    let scheduler = self.shared.scheduler.borrow();
    let slots = scheduler
      .gpu_slots()
      .iter()
      .enumerate()
      .filter_map(|(slot, key)| Some((key.clone()?, slot)))
      .filter(|(key, _)| state.pair_index(key).is_some())
      .collect();
    WorldSnapshot::new(
      state.epoch.token().value(),
      state.anchor.clone(),
      state.maps.clone(),
      state.pairs.clone(),
      slots,
    )
  }

  fn invalidate(&self) {
    self.shared.state.borrow_mut().snapshot = None;
  }

  pub fn subscribe(&self, handler: impl FnMut(&WorldEvent) + 'static) -> HandlerId {
    self.shared.events.borrow_mut().subscribe(handler)
  }

  pub fn unsubscribe(&self, id: HandlerId) -> bool {
    self.shared.events.borrow_mut().unsubscribe(id)
  }

  /// Delivers queued scheduler events, then `events`, to every handler.
  fn emit(&self, events: Vec<WorldEvent>) {
    let mut queued = self.shared.scheduler.borrow_mut().drain_events();
    if !queued.is_empty() {
      self.invalidate();
    }
    queued.extend(events);
    self.shared.pending.borrow_mut().extend(queued);
    // A handler emitting again lands here; the outer loop delivers it.
    if self.shared.dispatching.get() {
      return;
    }

    self.shared.dispatching.set(true);
    let mut handlers = self.shared.events.borrow_mut().take_handlers();
    loop {
      let next = self.shared.pending.borrow_mut().pop_front();
      let Some(event) = next else {
        break;
      };
      for (_, handler) in handlers.iter_mut() {
        handler(&event);
      }
    }
    self.shared.events.borrow_mut().restore_handlers(handlers);
    self.shared.dispatching.set(false);
  }

  /// Runs `f` against the slot scheduler, then publishes what it queued.
  pub fn with_scheduler<R>(&self, f: impl FnOnce(&mut TilesetSlotScheduler) -> R) -> R {
    let result = f(&mut self.shared.scheduler.borrow_mut());
    self.invalidate();
    self.emit(Vec::new());
    result
  }

  /// Read access to the scheduler for diagnostics.
  ///
  /// Do not hold the guard across an `.await`.
  pub fn scheduler(&self) -> Ref<'_, TilesetSlotScheduler> {
    self.shared.scheduler.borrow()
  }

  /// Advances background preloads without blocking.
  ///
  /// Returns true while preloads are still pending.
  pub fn pump(&self) -> bool {
    let mut cx = Context::from_waker(Waker::noop());
    let pending = self
      .shared
      .scheduler
      .borrow_mut()
      .poll_preloads(&mut cx)
      .is_pending();
    self.emit(Vec::new());
    pending
  }

  /// Waits for every background preload to finish.
  pub async fn settle_preloads(&self) {
    future::poll_fn(|cx| self.shared.scheduler.borrow_mut().poll_preloads(cx)).await;
    self.emit(Vec::new());
  }

  /// Drops every map and pair and cancels in-flight work.
  pub fn reset(&self) {
    {
      let mut state = self.shared.state.borrow_mut();
      state.epoch.advance();
      state.anchor = None;
      state.current_map = None;
      state.maps.clear();
      state.pairs.clear();
      state.loading.clear();
      state.snapshot = None;
    }
    self.shared.scheduler.borrow_mut().reset();
  }

  /// Resets the world and removes every event handler.
  pub fn dispose(&self) {
    self.reset();
    self.shared.events.borrow_mut().clear();
  }

  /// Replaces the world with the maps around `start`.
  ///
  /// Loads breadth-first up to `depth` connections away. Fails if `start`
  /// is not in the catalog or the start map itself cannot be loaded;
  /// neighbors that fail are skipped. If another `initialize` supersedes
  /// this one while it runs, the newer world's snapshot is returned.
  pub async fn initialize(&self, start: &MapId, depth: u32) -> Result<WorldSnapshot, StreamError> {
    let start_entry = self
      .shared
      .catalog
      .map_entry(start)
      .ok_or_else(|| StreamError::UnknownMap(start.clone()))?;

    let started = Instant::now();
    self.reset();
    let token = {
      let mut state = self.shared.state.borrow_mut();
      state.anchor = Some(start.clone());
      state.epoch.token()
    };
    debug!("Initializing world at {start} (epoch {})", token.value());

    let mut queue = VecDeque::from([(start_entry, IVec2::ZERO, 0u32, None::<SourceLink>)]);
    let mut visited = HashSet::from([start.clone()]);

    while let Some((entry, offset, level, link)) = queue.pop_front() {
      if !self.is_current(token) {
        debug!("Initialize of {start} superseded (epoch {})", token.value());
        return Ok(self.snapshot());
      }

      let is_start = link.is_none();
      if !is_start && self.would_exceed_ceiling(&entry.pair_key()) {
        debug!("Skipping {}: tileset pair limit reached", entry.id);
        continue;
      }

      match self.load_map(entry.clone(), offset, token, link).await {
        Ok(LoadOutcome::Loaded) => {}
        Ok(LoadOutcome::Superseded) => return Ok(self.snapshot()),
        Ok(_) => continue,
        Err(e) if is_start => return Err(e),
        Err(e) => {
          warn!("Failed to load map {}: {e}", entry.id);
          continue;
        }
      }

      if level >= depth {
        continue;
      }
      let Some(placed) = self.map_offset(&entry.id) else {
        continue;
      };
      for connection in entry.spatial_connections() {
        if !visited.insert(connection.neighbor.clone()) {
          continue;
        }
        let Some(neighbor) = self.shared.catalog.map_entry(&connection.neighbor) else {
          warn!("Map {} connects to unknown map {}", entry.id, connection.neighbor);
          continue;
        };
        let Some(offset) = connection_offset(
          placed,
          entry.size(),
          neighbor.size(),
          connection.direction,
          connection.offset,
        ) else {
          continue;
        };
        queue.push_back((
          neighbor,
          offset,
          level + 1,
          Some(SourceLink {
            source: entry.id.clone(),
            direction: connection.direction,
            offset: connection.offset,
          }),
        ));
      }
    }

    if !self.is_current(token) {
      return Ok(self.snapshot());
    }
    self.refresh_boundaries();
    let snapshot = self.snapshot();
    info!(
      "World initialized at {start}: {} maps, {} tileset pairs in {:.1}ms",
      snapshot.maps.len(),
      snapshot.pairs.len(),
      started.elapsed().as_secs_f32() * 1000.0
    );
    Ok(snapshot)
  }

  /// Follows the observer: updates GPU slots, streams in neighbors and
  /// re-anchors when the observer strays too far from the origin.
  ///
  /// Without a coverage hint the scheduler only promotes the pair across
  /// the boundary the observer is approaching.
  pub async fn update(&self, tile: IVec2, facing: Option<Direction>) {
    self.run_update(tile, facing, None).await;
  }

  /// Like [`update`](Self::update), ranking GPU slot candidates by what
  /// `hint` sees.
  pub async fn update_with_coverage(
    &self,
    tile: IVec2,
    facing: Option<Direction>,
    hint: &CoverageHint,
  ) {
    let priorities = self.snapshot().coverage(hint).priorities;
    self.run_update(tile, facing, Some(priorities)).await;
  }

  async fn run_update(
    &self,
    tile: IVec2,
    facing: Option<Direction>,
    priorities: Option<Vec<PairPriority>>,
  ) {
    let token = self.epoch();
    let snapshot = self.snapshot();
    let Some(current) = snapshot.map_at(tile) else {
      if !snapshot.maps.is_empty() {
        debug!("No resident map at {tile}");
      }
      return;
    };
    let current_id = current.id().clone();
    self.shared.state.borrow_mut().current_map = Some(current_id.clone());

    if let Some(pair) = snapshot.pairs.get(current.pair_index) {
      self.update_slots(tile, &pair.key, facing, priorities.as_deref());
    }

    self.load_connected(&current_id, token).await;
    if !self.is_current(token) {
      return;
    }

    let anchored_elsewhere = self.anchor().is_some_and(|anchor| anchor != current_id);
    if anchored_elsewhere && chebyshev(tile) > self.shared.config.reanchor_threshold {
      if let Err(e) = self.reanchor(&current_id) {
        warn!("Re-anchor at {current_id} failed: {e}");
      }
    }
  }

  fn update_slots(
    &self,
    tile: IVec2,
    current: &PairKey,
    facing: Option<Direction>,
    priorities: Option<&[PairPriority]>,
  ) {
    let resident = self.shared.state.borrow().pairs.clone();
    let result = {
      let mut scheduler = self.shared.scheduler.borrow_mut();
      scheduler.set_resident_pairs(resident);
      scheduler.update(tile, current, facing, priorities)
    };
    if !result.needs_rebuild {
      self.emit(Vec::new());
      return;
    }

    self.invalidate();
    let (pair0, pair1) = {
      let mut scheduler = self.shared.scheduler.borrow_mut();
      let mut slotted = |slot: usize| {
        let key = result.slots.get(slot).cloned().flatten()?;
        scheduler.cached_pair(&key)
      };
      (slotted(0), slotted(1))
    };
    let mut events = vec![WorldEvent::GpuSlotsSwapped {
      slots: result.slots,
      needs_rebuild: true,
    }];
    if let Some(pair0) = pair0 {
      events.push(WorldEvent::TilesetsChanged { pair0, pair1 });
    }
    self.emit(events);
  }

  /// Loads unloaded neighbors of `from` up to `update_depth` connections.
  async fn load_connected(&self, from: &MapId, token: EpochToken) {
    let Some(current_pair) = self
      .shared
      .state
      .borrow()
      .map(from)
      .map(|m| m.entry.pair_key())
    else {
      return;
    };
    let depth = self.shared.config.update_depth;
    let mut queue = VecDeque::from([(from.clone(), 0u32)]);
    let mut visited = HashSet::from([from.clone()]);

    while let Some((map_id, level)) = queue.pop_front() {
      if !self.is_current(token) {
        debug!("Connection walk from {from} aborted (epoch {})", token.value());
        return;
      }
      if level >= depth {
        continue;
      }
      let Some((entry, placed)) = self.map_placement(&map_id) else {
        continue;
      };

      for connection in entry.spatial_connections() {
        let neighbor_id = &connection.neighbor;
        if !visited.insert(neighbor_id.clone()) {
          continue;
        }
        if self.contains_map(neighbor_id) {
          queue.push_back((neighbor_id.clone(), level + 1));
          continue;
        }
        if self.is_loading(neighbor_id) {
          continue;
        }
        let Some(neighbor) = self.shared.catalog.map_entry(neighbor_id) else {
          continue;
        };
        let Some(proposed) = connection_offset(
          placed,
          entry.size(),
          neighbor.size(),
          connection.direction,
          connection.offset,
        ) else {
          continue;
        };

        // Immediate neighbors are always attempted.
        let pair = neighbor.pair_key();
        let shares_pair = pair == current_pair || self.has_pair(&pair);
        if !shares_pair && level > 0 && self.would_exceed_ceiling(&pair) {
          continue;
        }

        if !self.is_current(token) {
          return;
        }
        let link = SourceLink {
          source: map_id.clone(),
          direction: connection.direction,
          offset: connection.offset,
        };
        match self.load_map(neighbor, proposed, token, Some(link)).await {
          Ok(LoadOutcome::Loaded) => queue.push_back((neighbor_id.clone(), level + 1)),
          Ok(LoadOutcome::Superseded) => return,
          Ok(_) => {}
          Err(e) => warn!("Failed to load map {neighbor_id}: {e}"),
        }
      }
    }

    if self.is_current(token) {
      self.refresh_boundaries();
    }
  }

  /// Moves the origin onto `new_anchor`.
  ///
  /// Every resident map is translated by minus the new anchor's offset,
  /// then maps farther than twice the re-anchor threshold are dropped
  /// along with pairs no remaining map uses. Returns the applied shift.
  pub fn reanchor(&self, new_anchor: &MapId) -> Result<IVec2, StreamError> {
    let retention = self.shared.config.reanchor_threshold.saturating_mul(2);
    let (shift, evicted) = {
      let mut state = self.shared.state.borrow_mut();
      let shift = state
        .map(new_anchor)
        .map(|m| m.offset)
        .ok_or_else(|| StreamError::UnknownMap(new_anchor.clone()))?;

      for map in &mut state.maps {
        map.offset -= shift;
      }
      let before = state.maps.len();
      state.maps.retain(|m| chebyshev(m.offset) <= retention);
      let evicted = before - state.maps.len();

      compact_pairs(&mut state);
      state.anchor = Some(new_anchor.clone());
      state.snapshot = None;
      (shift, evicted)
    };
    self.release_dropped_slots();

    self.refresh_boundaries();
    info!("Re-anchored world at {new_anchor}: shift {shift}, {evicted} maps dropped");
    let snapshot = self.snapshot();
    self.emit(vec![
      WorldEvent::Reanchored {
        new_anchor: new_anchor.clone(),
        shift,
      },
      WorldEvent::MapsChanged(snapshot),
    ]);
    Ok(shift)
  }

  /// Loads one map and commits it at `offset`.
  ///
  /// The map's pair is taken from the resident set, then the scheduler's
  /// host cache, and only then decoded. A pair that would push the
  /// resident pair count past the ceiling fails the call. Layout, border
  /// and events are read concurrently; a missing border is replaced by an
  /// empty one. With a `link`, the offset is recomputed from the source
  /// map's position at commit time.
  pub async fn load_map(
    &self,
    entry: Arc<MapIndexEntry>,
    offset: IVec2,
    token: EpochToken,
    link: Option<SourceLink>,
  ) -> Result<LoadOutcome, StreamError> {
    if !self.is_current(token) {
      debug!("Skipping {}: stale epoch {}", entry.id, token.value());
      return Ok(LoadOutcome::Superseded);
    }
    {
      let mut state = self.shared.state.borrow_mut();
      if state.map(&entry.id).is_some() || !state.loading.insert(entry.id.clone()) {
        return Ok(LoadOutcome::AlreadyResident);
      }
    }
    debug!("Loading map {} at {offset} (epoch {})", entry.id, token.value());

    let result = self.load_map_inner(&entry, offset, token, link.as_ref()).await;

    // A newer world may be loading the same id.
    let mut state = self.shared.state.borrow_mut();
    if state.epoch.is_current(token) {
      state.loading.remove(&entry.id);
    }
    result
  }

  async fn load_map_inner(
    &self,
    entry: &Arc<MapIndexEntry>,
    offset: IVec2,
    token: EpochToken,
    link: Option<&SourceLink>,
  ) -> Result<LoadOutcome, StreamError> {
    let Some(pair) = self.resolve_pair(entry, token).await? else {
      return Ok(LoadOutcome::Superseded);
    };

    let assets = self.shared.assets.clone();
    let (layout, (border, events)) = future::zip(
      assets.load_layout(entry),
      future::zip(assets.load_border(entry), assets.load_events(entry)),
    )
    .await;
    if !self.is_current(token) {
      debug!("Discarding {}: world reset while loading", entry.id);
      return Ok(LoadOutcome::Superseded);
    }

    let layout =
      layout.map_err(|e| StreamError::source_failure(format!("layout of map {}", entry.id), e))?;
    let events =
      events.map_err(|e| StreamError::source_failure(format!("events of map {}", entry.id), e))?;
    let border = border.unwrap_or_else(|e| {
      debug!("No border tiles for {}: {e}", entry.id);
      Vec::new()
    });

    let offset = match link {
      None => offset,
      Some(link) => {
        let Some(recomputed) = self.recompute_offset(entry, link) else {
          warn!(
            "Source map {} of {} is no longer resident, skipping",
            link.source, entry.id
          );
          return Ok(LoadOutcome::SourceGone);
        };
        if recomputed != offset {
          debug!("Offset of {} moved {offset} -> {recomputed} during load", entry.id);
        }
        recomputed
      }
    };

    self.commit(entry, offset, &pair, layout, border, events)
  }

  /// Finds or builds the pair of `entry`, registering it if new.
  ///
  /// `None` when the world was reset while decoding.
  async fn resolve_pair(
    &self,
    entry: &MapIndexEntry,
    token: EpochToken,
  ) -> Result<Option<Arc<TilesetPair>>, StreamError> {
    let key = entry.pair_key();
    if let Some(pair) = self.resident_pair(&key) {
      return Ok(Some(pair));
    }
    self.check_ceiling(entry, &key)?;

    let cached = self.shared.scheduler.borrow_mut().cached_pair(&key);
    let pair = match cached {
      Some(pair) => pair,
      None => {
        let pair = decode_pair(self.shared.assets.as_ref(), entry).await?;
        if !self.is_current(token) {
          return Ok(None);
        }
        pair
      }
    };

    // Another load may have registered it meanwhile.
    if let Some(existing) = self.resident_pair(&key) {
      return Ok(Some(existing));
    }
    self.check_ceiling(entry, &key)?;
    self.register_pair(pair.clone());
    Ok(Some(pair))
  }

  fn register_pair(&self, pair: Arc<TilesetPair>) {
    let (pair0, pair1) = {
      let mut state = self.shared.state.borrow_mut();
      state.pairs.push(pair.clone());
      state.snapshot = None;
      (state.pairs[0].clone(), state.pairs.get(1).cloned())
    };
    let slot = {
      let mut scheduler = self.shared.scheduler.borrow_mut();
      scheduler.add_to_cache(pair.clone());
      scheduler.bind_to_free_slot(&pair.key)
    };
    debug!("Registered tileset pair {} (GPU slot {slot:?})", pair.key);
    self.emit(vec![WorldEvent::TilesetsChanged { pair0, pair1 }]);
  }

  fn commit(
    &self,
    entry: &Arc<MapIndexEntry>,
    offset: IVec2,
    pair: &Arc<TilesetPair>,
    layout: TileLayout,
    border: Vec<u16>,
    events: MapEvents,
  ) -> Result<LoadOutcome, StreamError> {
    {
      let mut state = self.shared.state.borrow_mut();
      if state.map(&entry.id).is_some() {
        return Ok(LoadOutcome::AlreadyResident);
      }
      // A re-anchor may have compacted the pair away since it was resolved.
      let pair_index = match state.pair_index(&pair.key) {
        Some(index) => index,
        None => {
          if state.pairs.len() >= self.shared.config.max_pairs_in_memory {
            return Err(self.ceiling_error(entry, &pair.key));
          }
          state.pairs.push(pair.clone());
          state.pairs.len() - 1
        }
      };
      state.maps.push(LoadedMapInstance {
        entry: entry.clone(),
        layout: Arc::new(layout),
        offset,
        pair_index,
        border: Arc::from(border),
        events: Arc::new(events),
      });
      state.snapshot = None;
    }

    debug!("Committed map {} at {offset}", entry.id);
    let snapshot = self.snapshot();
    self.emit(vec![WorldEvent::MapsChanged(snapshot)]);
    Ok(LoadOutcome::Loaded)
  }

  fn recompute_offset(&self, entry: &MapIndexEntry, link: &SourceLink) -> Option<IVec2> {
    let state = self.shared.state.borrow();
    let source = state.map(&link.source)?;
    connection_offset(
      source.offset,
      source.entry.size(),
      entry.size(),
      link.direction,
      link.offset,
    )
  }

  /// Unbinds GPU slots holding pairs that left the resident set.
  fn release_dropped_slots(&self) {
    let state = self.shared.state.borrow();
    let mut scheduler = self.shared.scheduler.borrow_mut();
    let dropped: Vec<usize> = scheduler
      .gpu_slots()
      .iter()
      .enumerate()
      .filter(|(_, key)| key.as_ref().is_some_and(|k| state.pair_index(k).is_none()))
      .map(|(slot, _)| slot)
      .collect();
    for slot in dropped {
      debug!("Releasing GPU slot {slot} after compaction");
      scheduler.clear_gpu_slot(slot);
    }
  }

  fn refresh_boundaries(&self) {
    let boundaries = {
      let state = self.shared.state.borrow();
      boundary::detect_boundaries(&state.maps, |m| {
        state.pairs.get(m.pair_index).map(|p| p.key.clone())
      })
    };
    self.shared.scheduler.borrow_mut().set_boundaries(boundaries);
  }

  fn map_offset(&self, id: &MapId) -> Option<IVec2> {
    self.shared.state.borrow().map(id).map(|m| m.offset)
  }

  fn map_placement(&self, id: &MapId) -> Option<(Arc<MapIndexEntry>, IVec2)> {
    self
      .shared
      .state
      .borrow()
      .map(id)
      .map(|m| (m.entry.clone(), m.offset))
  }

  fn resident_pair(&self, key: &PairKey) -> Option<Arc<TilesetPair>> {
    let state = self.shared.state.borrow();
    state.pair_index(key).map(|index| state.pairs[index].clone())
  }

  fn has_pair(&self, key: &PairKey) -> bool {
    self.shared.state.borrow().pair_index(key).is_some()
  }

  fn would_exceed_ceiling(&self, key: &PairKey) -> bool {
    let state = self.shared.state.borrow();
    state.pair_index(key).is_none() && state.pairs.len() >= self.shared.config.max_pairs_in_memory
  }

  fn check_ceiling(&self, entry: &MapIndexEntry, key: &PairKey) -> Result<(), StreamError> {
    if self.would_exceed_ceiling(key) {
      return Err(self.ceiling_error(entry, key));
    }
    Ok(())
  }

  fn ceiling_error(&self, entry: &MapIndexEntry, key: &PairKey) -> StreamError {
    StreamError::PairCeilingExceeded {
      map: entry.id.clone(),
      pair: key.clone(),
      ceiling: self.shared.config.max_pairs_in_memory,
    }
  }
}

/// Drops pairs no resident map uses and rewrites map pair indices.
fn compact_pairs(state: &mut LoaderState) {
  let mut remap = vec![None; state.pairs.len()];
  let mut kept = Vec::new();
  for map in &mut state.maps {
    let Some(slot) = remap.get_mut(map.pair_index) else {
      continue;
    };
    let index = *slot.get_or_insert_with(|| {
      kept.push(state.pairs[map.pair_index].clone());
      kept.len() - 1
    });
    map.pair_index = index;
  }
  state.pairs = kept;
}

async fn decode_pair(
  assets: &dyn MapAssetSource,
  entry: &MapIndexEntry,
) -> Result<Arc<TilesetPair>, StreamError> {
  let key = entry.pair_key();
  let mut pair = assets
    .decode_pair(entry)
    .await
    .map_err(|e| StreamError::source_failure(format!("tileset pair {key}"), e))?;
  // Cache identity follows the catalog.
  pair.key = key;
  Ok(Arc::new(pair))
}

/// Pair builder handed to the scheduler for background preloads.
fn pair_loader(catalog: Rc<dyn MapCatalog>, assets: Rc<dyn MapAssetSource>) -> PairLoaderFn {
  Rc::new(
    move |key: &PairKey| -> BoxFuture<'static, Result<Arc<TilesetPair>, StreamError>> {
      let catalog = catalog.clone();
      let assets = assets.clone();
      let key = key.clone();
      Box::pin(async move {
        let entry = catalog
          .entry_for_pair(&key)
          .ok_or_else(|| StreamError::PairUnavailable(key.clone()))?;
        decode_pair(assets.as_ref(), &entry).await
      })
    },
  )
}
