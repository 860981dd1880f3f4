//! Error types for world streaming.
//!
//! Only [`StreamError`] escapes to callers, and only from
//! [`WorldLoader::initialize`](crate::WorldLoader::initialize) and direct
//! map loads. Background streaming logs failures and keeps going.

use std::error::Error;
use std::{fmt, io};

use crate::map::MapId;
use crate::pair::PairKey;

/// Failure reported by an external collaborator (decoder or map reader).
#[derive(Debug)]
pub enum SourceError {
  /// Requested asset does not exist.
  NotFound(String),
  /// Asset exists but could not be decoded.
  Decode(String),
  /// Standard I/O error.
  Io(io::Error),
  /// Other collaborator-specific error.
  Other(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for SourceError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NotFound(what) => write!(f, "not found: {what}"),
      Self::Decode(msg) => write!(f, "decode failed: {msg}"),
      Self::Io(e) => write!(f, "I/O error: {e}"),
      Self::Other(e) => write!(f, "{e}"),
    }
  }
}

impl Error for SourceError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      Self::Io(e) => Some(e),
      Self::Other(e) => Some(&**e),
      Self::NotFound(_) | Self::Decode(_) => None,
    }
  }
}

impl From<io::Error> for SourceError {
  fn from(err: io::Error) -> Self {
    Self::Io(err)
  }
}

/// Errors surfaced by the world loader.
#[derive(Debug)]
pub enum StreamError {
  /// Map id missing from the static metadata.
  UnknownMap(MapId),
  /// Loading the map would exceed the resident pair ceiling.
  PairCeilingExceeded {
    map: MapId,
    pair: PairKey,
    ceiling: usize,
  },
  /// No map in the catalog uses this pair, so it cannot be built.
  PairUnavailable(PairKey),
  /// A collaborator failed while loading `context`.
  Source {
    context: String,
    source: SourceError,
  },
}

impl StreamError {
  pub(crate) fn source_failure(context: impl fmt::Display, source: SourceError) -> Self {
    Self::Source {
      context: context.to_string(),
      source,
    }
  }
}

impl fmt::Display for StreamError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::UnknownMap(id) => write!(f, "map not found: {id}"),
      Self::PairCeilingExceeded { map, pair, ceiling } => write!(
        f,
        "cannot load map {map}: tileset pair {pair} would exceed the limit of {ceiling} resident pairs"
      ),
      Self::PairUnavailable(pair) => write!(f, "no map found for tileset pair {pair}"),
      Self::Source { context, source } => write!(f, "{context}: {source}"),
    }
  }
}

impl Error for StreamError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      Self::Source { source, .. } => Some(source),
      _ => None,
    }
  }
}

/// Errors reading or validating a [`StreamingConfig`](crate::StreamingConfig).
#[derive(Debug)]
pub enum ConfigError {
  Io(io::Error),
  Parse(toml::de::Error),
  Invalid(String),
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Io(e) => write!(f, "failed to read streaming config: {e}"),
      Self::Parse(e) => write!(f, "failed to parse streaming config: {e}"),
      Self::Invalid(msg) => write!(f, "invalid streaming config: {msg}"),
    }
  }
}

impl Error for ConfigError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      Self::Io(e) => Some(e),
      Self::Parse(e) => Some(e),
      Self::Invalid(_) => None,
    }
  }
}

impl From<io::Error> for ConfigError {
  fn from(err: io::Error) -> Self {
    Self::Io(err)
  }
}

impl From<toml::de::Error> for ConfigError {
  fn from(err: toml::de::Error) -> Self {
    Self::Parse(err)
  }
}
