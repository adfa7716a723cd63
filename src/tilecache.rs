//! Per-tile cache with the three retention strategies.
//!
//! `None` drops everything once a tile is composited (memory stays
//! O(1) in the tile count outside the active batching window),
//! `Image` keeps each tile's composited samples, `All` additionally
//! keeps the tile processor so a later differential update can reuse
//! the cached packet bytes.

use std::collections::BTreeMap;

use crate::image::Image;
use crate::tcd::TileProcessor;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheStrategy {
  #[default]
  None,
  Image,
  All,
}

#[derive(Default)]
pub struct CachedTile {
  pub image: Option<Image>,
  pub processor: Option<TileProcessor>,
  pub success: bool,
}

#[derive(Default)]
pub struct TileCache {
  strategy: CacheStrategy,
  entries: BTreeMap<u16, CachedTile>,
}

impl TileCache {
  pub fn new(strategy: CacheStrategy) -> Self {
    Self {
      strategy,
      entries: BTreeMap::new(),
    }
  }

  pub fn strategy(&self) -> CacheStrategy {
    self.strategy
  }

  /// Stores a decoded tile according to the strategy.
  pub fn put(&mut self, index: u16, image: Option<Image>, processor: Option<TileProcessor>, success: bool) {
    let entry = match self.strategy {
      CacheStrategy::None => CachedTile {
        image: None,
        processor: None,
        success,
      },
      CacheStrategy::Image => CachedTile {
        image,
        processor: None,
        success,
      },
      CacheStrategy::All => CachedTile {
        image,
        processor,
        success,
      },
    };
    self.entries.insert(index, entry);
  }

  pub fn get(&self, index: u16) -> Option<&CachedTile> {
    self.entries.get(&index)
  }

  pub fn take_processor(&mut self, index: u16) -> Option<TileProcessor> {
    self.entries.get_mut(&index).and_then(|e| e.processor.take())
  }

  pub fn is_decoded(&self, index: u16) -> bool {
    self.entries.get(&index).map(|e| e.success).unwrap_or(false)
  }

  /// Releases a tile's retained data, keeping the completion flag.
  pub fn release(&mut self, index: u16) {
    if let Some(entry) = self.entries.get_mut(&index) {
      entry.image = None;
      entry.processor = None;
    }
  }

  /// Releases every tile of a completed tile row.
  pub fn release_row(&mut self, tile_row: u32, grid_width: u32) {
    let start = (tile_row * grid_width) as u16;
    for index in start..start.saturating_add(grid_width as u16) {
      self.release(index);
    }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Bytes retained across all entries, used by the release tests.
  pub fn retained_bytes(&self) -> usize {
    self
      .entries
      .values()
      .map(|e| {
        e.image
          .as_ref()
          .map(|img| {
            img
              .comps
              .iter()
              .map(|c| c.data.as_ref().map(|d| d.len() * 4).unwrap_or(0))
              .sum::<usize>()
          })
          .unwrap_or(0)
      })
      .sum()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::image::ImageComponent;

  fn tile_image() -> Image {
    Image {
      x0: 0,
      y0: 0,
      x1: 8,
      y1: 8,
      comps: vec![ImageComponent {
        w: 8,
        h: 8,
        data: Some(vec![0; 64]),
        ..Default::default()
      }],
    }
  }

  #[test]
  fn none_strategy_retains_nothing() {
    let mut cache = TileCache::new(CacheStrategy::None);
    cache.put(0, Some(tile_image()), None, true);
    cache.put(1, Some(tile_image()), None, true);
    assert!(cache.is_decoded(0));
    assert_eq!(cache.retained_bytes(), 0);
  }

  #[test]
  fn image_strategy_keeps_samples() {
    let mut cache = TileCache::new(CacheStrategy::Image);
    cache.put(0, Some(tile_image()), None, true);
    assert_eq!(cache.retained_bytes(), 64 * 4);
    cache.release(0);
    assert_eq!(cache.retained_bytes(), 0);
    assert!(cache.is_decoded(0));
  }

  #[test]
  fn row_release() {
    let mut cache = TileCache::new(CacheStrategy::Image);
    for t in 0..8u16 {
      cache.put(t, Some(tile_image()), None, true);
    }
    // Release row 1 of a 4-wide grid.
    cache.release_row(1, 4);
    let retained: usize = (0..8u16)
      .filter(|&t| cache.get(t).unwrap().image.is_some())
      .count();
    assert_eq!(retained, 4);
  }
}
