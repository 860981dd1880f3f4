//! Tile-to-map lookup over a fixed resident set.
//!
//! Built once per snapshot. Build time and memory scale with the number of
//! occupied rows, not with the area between maps; lookups binary search
//! one row.

use std::collections::BTreeMap;

use bevy::math::IVec2;

use crate::coords::TileBounds;
use crate::map::LoadedMapInstance;

/// Inclusive column range of one map within a row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Span {
  start: i32,
  end: i32,
  map: usize,
}

/// Per-row span lists for a resident map set.
///
/// Spans in a row are disjoint and sorted by column. Where maps overlap
/// the earlier map in the slice wins.
#[derive(Clone, Debug, Default)]
pub struct SpatialIndex {
  bounds: Option<TileBounds>,
  /// Occupied rows only, sorted by y.
  rows: Vec<(i32, Vec<Span>)>,
  map_bounds: Vec<TileBounds>,
}

impl SpatialIndex {
  /// Builds the index for `maps`. Returned indices refer to this slice.
  pub fn build(maps: &[LoadedMapInstance]) -> Self {
    let map_bounds: Vec<TileBounds> = maps.iter().map(LoadedMapInstance::bounds).collect();
    let Some(bounds) = union_bounds(&map_bounds) else {
      return Self::default();
    };

    let mut rows: BTreeMap<i32, Vec<Span>> = BTreeMap::new();
    for (index, rect) in map_bounds.iter().enumerate() {
      for y in rect.min.y..=rect.max.y {
        insert_uncovered(rows.entry(y).or_default(), rect.min.x, rect.max.x, index);
      }
    }

    Self {
      bounds: Some(bounds),
      rows: rows.into_iter().collect(),
      map_bounds,
    }
  }

  /// Union of all map rectangles, `None` when empty.
  #[inline]
  pub fn bounds(&self) -> Option<TileBounds> {
    self.bounds
  }

  /// Index of the map containing `tile`.
  pub fn map_at(&self, tile: IVec2) -> Option<usize> {
    let bounds = self.bounds?;
    if !bounds.contains(tile) {
      return None;
    }
    let row = self
      .rows
      .binary_search_by_key(&tile.y, |(y, _)| *y)
      .ok()
      .map(|at| &self.rows[at].1)?;
    let span = row.get(row.partition_point(|span| span.end < tile.x))?;
    (span.start <= tile.x).then_some(span.map)
  }

  /// Index of the map closest to `tile`; a containing map is at distance 0.
  ///
  /// Ties go to the earlier map.
  pub fn nearest_map(&self, tile: IVec2) -> Option<usize> {
    if let Some(index) = self.map_at(tile) {
      return Some(index);
    }
    self
      .map_bounds
      .iter()
      .enumerate()
      .min_by_key(|(index, rect)| (rect.distance_sq(tile), *index))
      .map(|(index, _)| index)
  }
}

/// Adds the parts of `start..=end` no span in `row` covers yet.
fn insert_uncovered(row: &mut Vec<Span>, start: i32, end: i32, map: usize) {
  let mut pieces = Vec::new();
  let mut cursor = start;
  for span in row.iter() {
    if span.end < cursor {
      continue;
    }
    if span.start > end {
      break;
    }
    if span.start > cursor {
      pieces.push(Span {
        start: cursor,
        end: span.start - 1,
        map,
      });
    }
    cursor = span.end.saturating_add(1);
    if cursor > end {
      break;
    }
  }
  if cursor <= end {
    pieces.push(Span {
      start: cursor,
      end,
      map,
    });
  }
  if pieces.is_empty() {
    return;
  }
  row.extend(pieces);
  row.sort_unstable_by_key(|span| span.start);
}

fn union_bounds(rects: &[TileBounds]) -> Option<TileBounds> {
  let first = *rects.first()?;
  Some(rects.iter().fold(first, |acc, rect| {
    TileBounds::new(acc.min.min(rect.min), acc.max.max(rect.max))
  }))
}
