//! Streaming configuration.
//!
//! Every tunable of the loader and slot scheduler lives here. The config is
//! plain data: loadable from TOML, insertable as a Bevy resource.

use std::path::Path;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Hard upper bound on GPU slots a renderer can bind.
pub const MAX_GPU_SLOTS: usize = 4;

/// Tunables for [`WorldLoader`](crate::WorldLoader) and
/// [`TilesetSlotScheduler`](crate::TilesetSlotScheduler).
#[derive(Resource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
  /// Connection depth walked by `initialize`.
  pub initial_depth: u32,
  /// Connection depth walked by `update`.
  pub update_depth: u32,
  /// Ceiling of distinct tileset pairs resident in the loader.
  pub max_pairs_in_memory: usize,
  /// Soft capacity of the scheduler's host cache.
  pub host_cache_capacity: usize,
  /// Fixed number of GPU slots.
  pub gpu_slot_count: usize,
  /// Tiles from a boundary at which the fallback lookahead fires.
  pub preload_distance: i32,
  /// Chebyshev distance from the origin that triggers re-anchoring.
  pub reanchor_threshold: i32,
  /// Margin added around the visible rectangle for coverage hints.
  pub preload_margin_tiles: i32,
  /// How far ahead of the observer the coverage focus is projected.
  pub focus_lookahead_tiles: i32,
}

impl Default for StreamingConfig {
  fn default() -> Self {
    Self {
      initial_depth: 2,
      update_depth: 2,
      max_pairs_in_memory: 16,
      host_cache_capacity: 4,
      gpu_slot_count: 3,
      preload_distance: 3,
      reanchor_threshold: 64,
      preload_margin_tiles: 3,
      focus_lookahead_tiles: 2,
    }
  }
}

impl StreamingConfig {
  /// Parses and validates a TOML document. Missing keys take defaults.
  pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(src)?;
    config.validate()?;
    Ok(config)
  }

  /// Reads a TOML config file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Self::from_toml_str(&contents)
  }

  /// Reads a TOML config file, falling back to defaults on any failure.
  pub fn load_or_default(path: impl AsRef<Path>) -> Self {
    let path = path.as_ref();
    match Self::load(path) {
      Ok(config) => {
        info!("Loaded streaming config from {}", path.display());
        config
      }
      Err(e) => {
        warn!("{e}, using defaults");
        Self::default()
      }
    }
  }

  /// Serializes to TOML.
  pub fn to_toml_string(&self) -> String {
    // Only plain scalars, serialization cannot fail.
    toml::to_string_pretty(self).unwrap_or_default()
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.max_pairs_in_memory == 0 {
      return Err(ConfigError::Invalid(
        "max_pairs_in_memory must be at least 1".into(),
      ));
    }
    if self.host_cache_capacity == 0 {
      return Err(ConfigError::Invalid(
        "host_cache_capacity must be at least 1".into(),
      ));
    }
    if self.gpu_slot_count == 0 || self.gpu_slot_count > MAX_GPU_SLOTS {
      return Err(ConfigError::Invalid(format!(
        "gpu_slot_count must be in 1..={MAX_GPU_SLOTS}, got {}",
        self.gpu_slot_count
      )));
    }
    if self.reanchor_threshold <= 0 {
      return Err(ConfigError::Invalid(
        "reanchor_threshold must be positive".into(),
      ));
    }
    if self.preload_distance < 0 || self.preload_margin_tiles < 0 {
      return Err(ConfigError::Invalid(
        "preload distances cannot be negative".into(),
      ));
    }
    Ok(())
  }
}
