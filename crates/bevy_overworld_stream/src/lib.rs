//! Overworld Stream - connected tile map streaming for Bevy.
//!
//! Keeps the maps around an observer resident in a single anchor-relative
//! coordinate space, and schedules the tileset pairs they render with into
//! a bounded host cache and a small set of GPU slots.
//!
//! - [`WorldLoader`]: Map graph expansion, re-anchoring, epoch cancellation
//! - [`TilesetSlotScheduler`]: Pair cache, slot binding, boundary preloads
//! - [`WorldSnapshot`]: Immutable view handed to consumers
//! - [`OverworldStreamPlugin`]: Bevy systems and messages

pub mod boundary;
pub mod config;
pub mod coords;
pub mod coverage;
pub mod debug;
pub mod error;
pub mod events;
pub mod loader;
pub mod map;
pub mod pair;
pub mod plugin;
pub mod scheduler;
pub mod snapshot;
pub mod source;
pub mod spatial;
#[cfg(test)]
mod test_util;

pub use boundary::{Boundary, Orientation};
pub use config::{MAX_GPU_SLOTS, StreamingConfig};
pub use coords::{Direction, TileBounds};
pub use coverage::{CoverageHint, CoverageSummary, PairPriority, compute_coverage};
pub use debug::DebugInfo;
pub use error::{ConfigError, SourceError, StreamError};
pub use events::{EventBus, HandlerId, WorldEvent, WorldEventMessage};
pub use loader::{EpochToken, LoadOutcome, SourceLink, WorldLoader};
pub use map::{Connection, LoadedMapInstance, MapEvents, MapId, MapIndexEntry, TileLayout};
pub use pair::{PairKey, TilesetPair};
pub use plugin::{OverworldStreamPlugin, StreamingDriver, StreamingObserver};
pub use scheduler::{
  GpuSlot, PairLoaderFn, SchedulerStats, SlotUpdate, TilesetSlotScheduler, UploadFn,
};
pub use snapshot::WorldSnapshot;
pub use source::{BoxFuture, InMemoryCatalog, MapAssetSource, MapCatalog};
