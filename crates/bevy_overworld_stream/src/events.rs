//! World change notifications.
//!
//! - [`WorldEvent`]: Everything consumers can observe
//! - [`EventBus`]: Ordered handler registry, invoked synchronously
//! - [`WorldEventMessage`]: Bevy message wrapper forwarded by the plugin

use std::sync::Arc;

use bevy::math::IVec2;

use crate::map::MapId;
use crate::pair::{PairKey, TilesetPair};
use crate::snapshot::WorldSnapshot;

/// A structural change to the streamed world.
///
/// Events are emitted only after the triggering mutation is complete.
#[derive(Clone, Debug)]
pub enum WorldEvent {
  /// Resident map set changed.
  MapsChanged(WorldSnapshot),
  /// A new pair was registered. Carries the first two resident pairs.
  TilesetsChanged {
    pair0: Arc<TilesetPair>,
    pair1: Option<Arc<TilesetPair>>,
  },
  /// Every map was translated by `-shift` so `new_anchor` sits at the
  /// origin.
  Reanchored { new_anchor: MapId, shift: IVec2 },
  /// An update reshuffled slots; renderers should rebind.
  GpuSlotsSwapped {
    slots: Vec<Option<PairKey>>,
    needs_rebuild: bool,
  },
  /// A single slot binding changed.
  GpuSlotsChanged { slots: Vec<Option<PairKey>> },
  PreloadStarted(PairKey),
  PreloadCompleted(PairKey),
  PairEvicted(PairKey),
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Box<dyn FnMut(&WorldEvent)>;

/// Registry of event handlers, invoked in subscription order.
///
/// Dispatch takes the handler list out for the duration of a call so that
/// handlers may subscribe or unsubscribe re-entrantly.
#[derive(Default)]
pub struct EventBus {
  handlers: Vec<(HandlerId, Handler)>,
  next_id: u64,
  checked_out: bool,
  /// Unsubscribed while the list was checked out.
  removed: Vec<HandlerId>,
}

impl EventBus {
  pub fn subscribe(&mut self, handler: impl FnMut(&WorldEvent) + 'static) -> HandlerId {
    let id = HandlerId(self.next_id);
    self.next_id += 1;
    self.handlers.push((id, Box::new(handler)));
    id
  }

  /// Returns false if the handler is not currently registered. During
  /// dispatch the removal is deferred until the handlers are restored.
  pub fn unsubscribe(&mut self, id: HandlerId) -> bool {
    let before = self.handlers.len();
    self.handlers.retain(|(hid, _)| *hid != id);
    if self.handlers.len() == before {
      if self.checked_out && !self.removed.contains(&id) {
        self.removed.push(id);
      }
      return false;
    }
    true
  }

  /// Drops every handler.
  pub fn clear(&mut self) {
    self.handlers.clear();
    self.removed.clear();
  }

  pub fn len(&self) -> usize {
    self.handlers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.handlers.is_empty()
  }

  /// Checks out the handler list for dispatch.
  pub(crate) fn take_handlers(&mut self) -> Vec<(HandlerId, Handler)> {
    self.checked_out = true;
    std::mem::take(&mut self.handlers)
  }

  /// Returns a checked-out list, keeping handlers added meanwhile after it.
  pub(crate) fn restore_handlers(&mut self, mut handlers: Vec<(HandlerId, Handler)>) {
    handlers.append(&mut self.handlers);
    self.checked_out = false;
    let removed = std::mem::take(&mut self.removed);
    handlers.retain(|(id, _)| !removed.contains(id));
    self.handlers = handlers;
  }

  /// Delivers `event` to every handler.
  pub fn dispatch(&mut self, event: &WorldEvent) {
    for (_, handler) in &mut self.handlers {
      handler(event);
    }
  }
}

/// Bevy message carrying a [`WorldEvent`].
#[derive(bevy::prelude::Message, Clone, Debug)]
pub struct WorldEventMessage(pub WorldEvent);
