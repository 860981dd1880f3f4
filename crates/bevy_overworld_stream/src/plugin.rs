//! Bevy integration.
//!
//! The loader is single-threaded, so the app owns it through a non-send
//! [`StreamingDriver`] resource. Each frame the driver feeds the
//! [`StreamingObserver`] position into the loader, polls the in-flight task
//! once, and forwards world events as [`WorldEventMessage`]s.

use std::task::{Context, Waker};

use async_channel::{Receiver, TryRecvError};
use bevy::ecs::message::MessageWriter;
use bevy::prelude::*;

use crate::config::StreamingConfig;
use crate::coords::Direction;
use crate::coverage::CoverageHint;
use crate::events::{HandlerId, WorldEvent, WorldEventMessage};
use crate::loader::WorldLoader;
use crate::map::MapId;
use crate::source::BoxFuture;

/// Registers the streaming systems and messages.
///
/// The app must also insert a [`StreamingDriver`] with
/// `insert_non_send_resource`; until it does the systems are idle.
#[derive(Default)]
pub struct OverworldStreamPlugin {
  pub config: StreamingConfig,
}

impl Plugin for OverworldStreamPlugin {
  fn build(&self, app: &mut App) {
    app
      .insert_resource(self.config.clone())
      .add_message::<WorldEventMessage>()
      .add_systems(Update, (pump_world_loader, forward_world_events).chain());
  }
}

/// Entity whose tile position drives streaming.
#[derive(Component, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamingObserver {
  pub tile: IVec2,
  pub facing: Option<Direction>,
}

/// Owns the loader and its single in-flight task.
pub struct StreamingDriver {
  loader: WorldLoader,
  pending: Option<BoxFuture<'static, ()>>,
  inbox: Receiver<WorldEvent>,
  subscription: HandlerId,
  view_size: Option<IVec2>,
  last_request: Option<(IVec2, Option<Direction>)>,
}

impl StreamingDriver {
  pub fn new(loader: WorldLoader) -> Self {
    let (tx, rx) = async_channel::unbounded();
    let subscription = loader.subscribe(move |event| {
      // Unbounded, so this only fails once the driver is gone.
      let _ = tx.try_send(event.clone());
    });
    Self {
      loader,
      pending: None,
      inbox: rx,
      subscription,
      view_size: None,
      last_request: None,
    }
  }

  /// Ranks GPU slot candidates by a viewport of `view_size` tiles around
  /// the observer instead of boundary lookahead.
  pub fn with_viewport(mut self, view_size: IVec2) -> Self {
    self.view_size = Some(view_size);
    self
  }

  #[inline]
  pub fn loader(&self) -> &WorldLoader {
    &self.loader
  }

  /// True while an initialize or update is in flight.
  pub fn is_busy(&self) -> bool {
    self.pending.is_some()
  }

  /// Starts a world reset at `start`, dropping any in-flight task.
  pub fn request_initialize(&mut self, start: MapId) {
    let loader = self.loader.clone();
    let depth = loader.config().initial_depth;
    self.last_request = None;
    self.pending = Some(Box::pin(async move {
      if let Err(e) = loader.initialize(&start, depth).await {
        error!("World failed to load at {start}: {e}");
      }
    }));
  }

  /// Starts an update for the observer unless a task is in flight or
  /// nothing changed since the last one. Returns true if one was started.
  pub fn request_update(&mut self, tile: IVec2, facing: Option<Direction>) -> bool {
    if self.pending.is_some() || self.last_request == Some((tile, facing)) {
      return false;
    }
    self.last_request = Some((tile, facing));

    let loader = self.loader.clone();
    let hint = self
      .view_size
      .map(|size| CoverageHint::around_observer(tile, size, facing, loader.config()));
    self.pending = Some(Box::pin(async move {
      match hint {
        Some(hint) => loader.update_with_coverage(tile, facing, &hint).await,
        None => loader.update(tile, facing).await,
      }
    }));
    true
  }

  /// Polls the in-flight task once and advances background preloads.
  pub fn poll(&mut self) {
    if let Some(task) = self.pending.as_mut() {
      let mut cx = Context::from_waker(Waker::noop());
      if task.as_mut().poll(&mut cx).is_ready() {
        self.pending = None;
      }
    }
    self.loader.pump();
  }

  /// Takes every event received since the last call.
  pub fn drain_events(&self) -> Vec<WorldEvent> {
    let mut events = Vec::new();
    loop {
      match self.inbox.try_recv() {
        Ok(event) => events.push(event),
        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
      }
    }
    events
  }

  /// Forgets the last requested position so the next request runs.
  fn invalidate_request(&mut self) {
    self.last_request = None;
  }
}

impl Drop for StreamingDriver {
  fn drop(&mut self) {
    self.loader.unsubscribe(self.subscription);
  }
}

/// Requests an update for the first observer and polls the driver.
pub fn pump_world_loader(
  driver: Option<NonSendMut<StreamingDriver>>,
  observers: Query<&StreamingObserver>,
) {
  let Some(mut driver) = driver else {
    return;
  };
  if let Some(observer) = observers.iter().next() {
    driver.request_update(observer.tile, observer.facing);
  }
  driver.poll();
}

/// Publishes world events as messages and keeps observers in step with
/// re-anchoring.
pub fn forward_world_events(
  driver: Option<NonSendMut<StreamingDriver>>,
  mut observers: Query<&mut StreamingObserver>,
  mut messages: MessageWriter<WorldEventMessage>,
) {
  let Some(mut driver) = driver else {
    return;
  };
  for event in driver.drain_events() {
    if let WorldEvent::Reanchored { new_anchor, shift } = &event {
      debug!("Shifting observers by {} after re-anchor at {new_anchor}", -*shift);
      for mut observer in &mut observers {
        observer.tile -= *shift;
      }
      driver.invalidate_request();
    }
    messages.write(WorldEventMessage(event));
  }
}

#[cfg(test)]
mod tests {
  use std::rc::Rc;

  use bevy::ecs::message::MessageReader;

  use super::*;
  use crate::source::InMemoryCatalog;
  use crate::test_util::{ReadyAssets, connect, entry};

  #[derive(Resource, Default)]
  struct Seen(Vec<&'static str>);

  fn record(mut reader: MessageReader<WorldEventMessage>, mut seen: ResMut<Seen>) {
    for WorldEventMessage(event) in reader.read() {
      let tag = match event {
        WorldEvent::MapsChanged(_) => "maps",
        WorldEvent::Reanchored { .. } => "reanchored",
        _ => continue,
      };
      seen.0.push(tag);
    }
  }

  fn driver(config: &StreamingConfig) -> StreamingDriver {
    let mut a = entry("A", IVec2::splat(10), "P1");
    let mut b = entry("B", IVec2::splat(10), "P1");
    connect(&mut a, Direction::Right, "B", 0);
    connect(&mut b, Direction::Left, "A", 0);
    let loader = WorldLoader::new(
      config.clone(),
      Rc::new(InMemoryCatalog::new([a, b])),
      Rc::new(ReadyAssets::default()),
    );
    StreamingDriver::new(loader)
  }

  #[test]
  fn drives_loader_and_forwards_messages() {
    let config = StreamingConfig {
      reanchor_threshold: 12,
      ..Default::default()
    };
    let mut driver = driver(&config);
    driver.request_initialize(MapId::from("A"));

    let mut app = App::new();
    app
      .add_plugins(MinimalPlugins)
      .add_plugins(OverworldStreamPlugin { config })
      .init_resource::<Seen>()
      .add_systems(PostUpdate, record)
      .insert_non_send_resource(driver);
    let observer = app
      .world_mut()
      .spawn(StreamingObserver {
        tile: IVec2::new(15, 5),
        facing: Some(Direction::Right),
      })
      .id();

    app.update();
    let loaded = app.world().non_send_resource::<StreamingDriver>().loader().snapshot();
    assert_eq!(loaded.maps.len(), 2);
    assert_eq!(app.world().resource::<Seen>().0, vec!["maps", "maps"]);

    // The observer sits 15 tiles from the origin, past the threshold.
    app.update();
    let seen = &app.world().resource::<Seen>().0;
    assert_eq!(seen.last(), Some(&"maps"));
    assert!(seen.contains(&"reanchored"));
    let tile = app.world().get::<StreamingObserver>(observer).map(|o| o.tile);
    assert_eq!(tile, Some(IVec2::new(5, 5)));
  }

  #[test]
  fn unchanged_observer_does_not_requeue() {
    let mut driver = driver(&StreamingConfig::default());
    driver.request_initialize(MapId::from("A"));
    driver.poll();
    assert!(!driver.is_busy());

    assert!(driver.request_update(IVec2::new(1, 1), None));
    driver.poll();
    assert!(!driver.request_update(IVec2::new(1, 1), None));
    assert!(driver.request_update(IVec2::new(2, 1), None));
  }
}
