//! Viewport coverage planning.
//!
//! Pure functions ranking tileset pairs by how much of the (expanded)
//! viewport they cover. The ranking drives secondary GPU slot assignment:
//! - [`CoverageHint`]: Visible rectangle, preload margin and focus point
//! - [`compute_coverage`]: Per-pair coverage and proximity ranking
//!
//! Facing direction never reorders the ranking directly. It only moves the
//! focus point ahead of the observer, which changes proximity.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use bevy::math::IVec2;

use crate::config::StreamingConfig;
use crate::coords::{Direction, TileBounds};
use crate::map::{LoadedMapInstance, MapId};
use crate::pair::PairKey;

/// What the renderer can see, plus where the observer is heading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoverageHint {
  /// Tiles currently on screen.
  pub visible: TileBounds,
  /// Extra tiles considered visible on every side.
  pub preload_margin: i32,
  /// Point distances are measured from.
  pub focus: IVec2,
  pub direction: Option<Direction>,
}

impl CoverageHint {
  /// Creates a hint. Negative margins are treated as zero.
  pub fn new(
    visible: TileBounds,
    preload_margin: i32,
    focus: IVec2,
    direction: Option<Direction>,
  ) -> Self {
    Self {
      visible,
      preload_margin: preload_margin.max(0),
      focus,
      direction,
    }
  }

  /// Hint for a viewport of `view_size` tiles centered on the observer.
  ///
  /// The focus is projected `focus_lookahead_tiles` along the facing
  /// direction and the margin comes from the config.
  pub fn around_observer(
    observer: IVec2,
    view_size: IVec2,
    facing: Option<Direction>,
    config: &StreamingConfig,
  ) -> Self {
    let view_size = view_size.max(IVec2::ONE);
    let origin = observer - view_size / 2;
    let lookahead = facing
      .map(|d| d.step() * config.focus_lookahead_tiles)
      .unwrap_or(IVec2::ZERO);
    Self::new(
      TileBounds::from_origin_size(origin, view_size),
      config.preload_margin_tiles,
      observer + lookahead,
      facing,
    )
  }

  /// Visible rectangle grown by the preload margin.
  #[inline]
  pub fn expanded_bounds(&self) -> TileBounds {
    self.visible.expand(self.preload_margin)
  }
}

/// Ranking entry for one visible pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairPriority {
  pub pair: PairKey,
  /// Tiles of the expanded viewport covered by maps using this pair.
  pub coverage_tiles: i64,
  /// Smallest squared distance from the focus to any of those maps.
  pub nearest_distance_sq: i64,
}

impl PairPriority {
  /// Coverage descending, then distance ascending, then key ascending.
  pub fn rank(&self, other: &Self) -> Ordering {
    other
      .coverage_tiles
      .cmp(&self.coverage_tiles)
      .then(self.nearest_distance_sq.cmp(&other.nearest_distance_sq))
      .then_with(|| self.pair.cmp(&other.pair))
  }
}

/// Result of [`compute_coverage`].
#[derive(Clone, Debug, Default)]
pub struct CoverageSummary {
  pub visible_maps: BTreeSet<MapId>,
  pub visible_pairs: BTreeSet<PairKey>,
  /// Visible pairs, best first.
  pub priorities: Vec<PairPriority>,
  pub expanded_bounds: TileBounds,
}

/// Ranks the pairs of `maps` against `hint`.
///
/// Maps with no overlap are ignored; maps whose pair cannot be resolved
/// count as visible but contribute no coverage.
pub fn compute_coverage<'a>(
  maps: impl IntoIterator<Item = &'a LoadedMapInstance>,
  resolve_pair: impl Fn(&LoadedMapInstance) -> Option<PairKey>,
  hint: &CoverageHint,
) -> CoverageSummary {
  let expanded = hint.expanded_bounds();
  let mut summary = CoverageSummary {
    expanded_bounds: expanded,
    ..Default::default()
  };
  let mut accum: HashMap<PairKey, PairPriority> = HashMap::new();

  for map in maps {
    let bounds = map.bounds();
    let Some(overlap) = bounds.intersection(&expanded) else {
      continue;
    };
    let area = overlap.area();
    if area <= 0 {
      continue;
    }

    summary.visible_maps.insert(map.id().clone());
    let Some(pair) = resolve_pair(map) else {
      continue;
    };
    summary.visible_pairs.insert(pair.clone());

    let distance_sq = bounds.distance_sq(hint.focus);
    accum
      .entry(pair.clone())
      .and_modify(|p| {
        p.coverage_tiles += area;
        p.nearest_distance_sq = p.nearest_distance_sq.min(distance_sq);
      })
      .or_insert(PairPriority {
        pair,
        coverage_tiles: area,
        nearest_distance_sq: distance_sq,
      });
  }

  let mut priorities: Vec<PairPriority> = accum.into_values().collect();
  priorities.sort_by(PairPriority::rank);
  summary.priorities = priorities;
  summary
}
