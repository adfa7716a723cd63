//! Public decompression API.
//!
//! A `Codec` owns the stream, the codestream front-end, the thread
//! pool and the tile cache. The synchronous entry points block on the
//! per-tile futures; embedders that want progress mid-decode use the
//! row callback or `wait_for_swath`.

use std::collections::BTreeMap;
use std::sync::{mpsc, Arc, Mutex};

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::event::{EventType, Logger};
use crate::image::{Image, Rect};
use crate::j2k::CodestreamDecoder;
use crate::scheduler::{CoderPool, Pool, RowTracker, TileBatcher, TileFuture};
use crate::stream::Stream;
use crate::tcd::TileProcessor;
use crate::tilecache::{CacheStrategy, TileCache};

bitflags! {
  #[derive(Default)]
  pub struct RandomAccessFlags: u32 {
    const DISABLE_TLM = 0x01;
    const DISABLE_PLT = 0x02;
  }
}

/// Output region in canvas coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionF64 {
  pub x0: f64,
  pub y0: f64,
  pub x1: f64,
  pub y1: f64,
}

pub type RowCallback = Arc<dyn Fn(u32) + Send + Sync>;

#[derive(Clone, Default)]
pub struct DecompressParams {
  /// Discard the `reduce` lowest resolutions (0..=32).
  pub reduce: u32,
  /// 0 decodes every layer.
  pub layers_to_decompress: u16,
  pub disable_random_access: RandomAccessFlags,
  /// Leave the composite image unallocated (caller samples tiles).
  pub skip_allocate_composite: bool,
  pub region: Option<RegionF64>,
  pub cache_strategy: CacheStrategy,
  /// Return tile futures instead of blocking. The synchronous API
  /// resolves them before returning either way.
  pub asynchronous: bool,
  pub simulate_sync: bool,
  /// 0 sizes the pool to the hardware; 1 forces single-threaded.
  pub num_threads: usize,
  /// Invoked with the canvas row up to which samples are complete.
  pub row_cb: Option<RowCallback>,
}

/// Everything known after `read_header`.
#[derive(Clone, Debug)]
pub struct HeaderInfo {
  pub canvas: Rect,
  pub tile_width: u32,
  pub tile_height: u32,
  pub tiles_wide: u32,
  pub tiles_high: u32,
  pub num_comps: usize,
  pub ht: bool,
  pub comments: Vec<Vec<u8>>,
}

/// Per-tile decode progress, exposed for incremental decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressionState {
  pub tile_index: u16,
  pub layers_decoded: u16,
  pub packets_parsed: u64,
  pub truncated: bool,
}

pub struct Codec {
  dec: CodestreamDecoder,
  params: DecompressParams,
  pool: Pool,
  coders: Arc<CoderPool>,
  cache: TileCache,
  rows: Arc<RowTracker>,
  /// Composite destination; the header image in `dec` stays intact so
  /// a failed decode can be retried with different parameters.
  image: Image,
  logger: Logger,
  header_read: bool,
  tile_parts_read: bool,
  /// Some tile-parts were fetched via TLM random access; a later full
  /// scan must restart from the first SOT.
  tlm_partial: bool,
  futures: BTreeMap<u16, TileFuture>,
  states: BTreeMap<u16, ProgressionState>,
}

impl Codec {
  pub fn new(stream: Box<dyn Stream>, params: DecompressParams) -> Self {
    let logger = Logger::new();
    let mut dec = CodestreamDecoder::new(stream, logger.clone());
    dec.cp.reduce = params.reduce.min(32);
    dec.cp.layer_limit = params.layers_to_decompress;
    let pool = Pool::new(params.num_threads);
    let cache = TileCache::new(params.cache_strategy);
    Self {
      dec,
      params,
      pool,
      coders: Arc::new(CoderPool::new()),
      cache,
      rows: Arc::new(RowTracker::new()),
      image: Image::default(),
      logger,
      header_read: false,
      tile_parts_read: false,
      tlm_partial: false,
      futures: BTreeMap::new(),
      states: BTreeMap::new(),
    }
  }

  /// Unwraps a JP2 container and positions the codec at its embedded
  /// codestream. Raw codestreams go straight to `new`.
  pub fn from_jp2(mut stream: Box<dyn Stream>, params: DecompressParams) -> Result<(Self, crate::jp2::Jp2Header)> {
    let file = crate::jp2::read_jp2(&mut *stream)?;
    stream.seek(file.codestream_offset)?;
    Ok((Self::new(stream, params), file.header))
  }

  pub fn read_header(&mut self) -> Result<HeaderInfo> {
    if !self.header_read {
      self.dec.read_header()?;
      self.header_read = true;
      self.image = self.dec.image.clone();
      self.image.apply_reduce(self.params.reduce.min(32));
    }
    let p = &self.dec.cp.image;
    Ok(HeaderInfo {
      canvas: p.canvas,
      tile_width: p.tdx,
      tile_height: p.tdy,
      tiles_wide: p.tw,
      tiles_high: p.th,
      num_comps: p.comps.len(),
      ht: p.ht_capable(),
      comments: p.comments.clone(),
    })
  }

  pub fn image(&self) -> &Image {
    &self.image
  }

  pub fn header_image(&self) -> &Image {
    &self.dec.image
  }

  fn window(&self) -> Option<Rect> {
    let region = self.params.region?;
    let canvas = self.dec.cp.image.canvas;
    let rect = Rect::new(
      (region.x0.floor().max(0.0)) as u32,
      (region.y0.floor().max(0.0)) as u32,
      (region.x1.ceil().max(0.0)) as u32,
      (region.y1.ceil().max(0.0)) as u32,
    )
    .intersection(&canvas);
    if rect.is_empty() {
      None
    } else {
      Some(rect)
    }
  }

  fn ensure_tile_parts(&mut self) -> Result<()> {
    if self.tile_parts_read {
      return Ok(());
    }
    if self.tlm_partial {
      self.dec.reset_tile_scan()?;
      self.tlm_partial = false;
    }
    self.dec.read_tile_parts()?;
    self.tile_parts_read = true;
    Ok(())
  }

  /// Tiles whose rectangles intersect the decode window.
  fn scheduled_tiles(&self) -> Vec<u16> {
    let p = &self.dec.cp.image;
    let window = self.window();
    let mut tiles = Vec::new();
    for ty in 0..p.th {
      for tx in 0..p.tw {
        let rect = p.tile_rect(tx, ty);
        let keep = match window {
          Some(w) => !rect.intersection(&w).is_empty(),
          None => true,
        };
        let index = (ty * p.tw + tx) as u16;
        if keep && !self.cache.is_decoded(index) {
          tiles.push(index);
        }
      }
    }
    tiles
  }

  /// Decodes the whole image or the configured region. Returns false
  /// when any scheduled tile failed; decoded tiles stay usable.
  pub fn decompress(&mut self) -> Result<bool> {
    self.read_header()?;
    self.ensure_tile_parts()?;
    let window = self.window();
    if let Some(w) = window {
      self.image = self.dec.image.clone();
      self.image.apply_reduce(self.params.reduce.min(32));
      self.image.clip_to(w);
    }
    if !self.params.skip_allocate_composite {
      for comp in &mut self.image.comps {
        if comp.data.is_none() {
          comp.alloc_data();
        }
      }
    }
    let tiles = self.scheduled_tiles();
    let mut all_ok = true;
    let mut batcher = TileBatcher::new(tiles);
    while !batcher.is_done() {
      let batch = batcher.next_batch();
      let ok = self.decode_batch(&batch, window)?;
      all_ok &= ok;
      self.advance_rows();
    }
    Ok(all_ok)
  }

  /// Decodes a single tile (whole-tile granularity). Uses TLM random
  /// access when the table is valid and not disabled; otherwise all
  /// intervening tile-parts are parsed sequentially.
  pub fn decompress_tile(&mut self, tile_index: u16) -> Result<bool> {
    self.read_header()?;
    if u32::from(tile_index) >= self.dec.cp.image.num_tiles() {
      return Err(Error::range(
        "tile index",
        tile_index as i64,
        0,
        self.dec.cp.image.num_tiles() as i64 - 1,
      ));
    }
    if self.cache.is_decoded(tile_index) {
      return Ok(true);
    }
    let tlm_allowed = !self
      .params
      .disable_random_access
      .contains(RandomAccessFlags::DISABLE_TLM);
    if !self.tile_parts_read {
      let spans = if tlm_allowed {
        self
          .dec
          .cp
          .tlm
          .tile_part_spans(self.dec.cache.tile_stream_start)
      } else {
        None
      };
      match spans {
        Some(spans) => {
          let mine: Vec<(u64, u32)> = spans
            .iter()
            .filter(|(t, _, _)| *t == tile_index)
            .map(|(_, off, len)| (*off, *len))
            .collect();
          if mine.is_empty() {
            return Err(Error::structural(format!(
              "TLM table has no tile-parts for tile {}",
              tile_index
            )));
          }
          match self.dec.read_tile_parts_at(&mine, tile_index) {
            Ok(()) => self.tlm_partial = true,
            Err(e) => {
              event_msg!(
                self.logger,
                EventType::Warning,
                "TLM random access failed ({}), falling back to sequential parsing",
                e
              );
              self.dec.cp.tlm.invalidate();
              self.tlm_partial = true;
              self.ensure_tile_parts()?;
            }
          }
        }
        None => self.ensure_tile_parts()?,
      }
    }
    let ok = self.decode_batch(&[tile_index], self.window())?;
    self.advance_rows();
    Ok(ok)
  }

  /// Runs one batch of tiles: T2 serially (packed headers are a
  /// shared sequential resource), block decoding and wavelets in
  /// parallel, compositing serialised per tile.
  fn decode_batch(&mut self, batch: &[u16], window: Option<Rect>) -> Result<bool> {
    let mut processors: Vec<(u16, Option<TileProcessor>)> = Vec::with_capacity(batch.len());
    for &t in batch {
      match self.build_processor(t, window) {
        Ok(tp) => processors.push((t, Some(tp))),
        Err(e) => {
          event_msg!(self.logger, EventType::Error, "tile {} failed: {}", t, e);
          processors.push((t, None));
        }
      }
    }

    // T2 packet parse, sequential.
    for (t, tp) in processors.iter_mut() {
      if let Some(proc_) = tp {
        if let Err(e) = proc_.decode_packets(&mut self.dec.cp) {
          event_msg!(
            self.logger,
            EventType::Error,
            "tile {} packet parse failed: {}",
            t,
            e
          );
          *tp = None;
        }
      }
    }

    // T1 + IDWT + MCT per tile, fanned out on the pool.
    let (result_tx, result_rx) = mpsc::channel::<(usize, bool)>();
    {
      let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
      for (slot, (t, tp)) in processors.iter_mut().enumerate() {
        let tx = result_tx.clone();
        let t = *t;
        let logger = self.logger.clone();
        let coders = self.coders.clone();
        match tp {
          Some(proc_) => {
            tasks.push(Box::new(move || {
              let ok = match proc_.decompress(&coders) {
                Ok(()) => true,
                Err(e) => {
                  event_msg!(logger, EventType::Error, "tile {} decode failed: {}", t, e);
                  false
                }
              };
              let _ = tx.send((slot, ok));
            }));
          }
          None => {
            let _ = tx.send((slot, false));
          }
        }
      }
      self.pool.run_all(tasks);
    }
    drop(result_tx);
    let mut ok_flags = vec![false; processors.len()];
    for (slot, ok) in result_rx {
      ok_flags[slot] = ok;
    }

    // Composite and cache.
    let image = Mutex::new(std::mem::take(&mut self.image));
    let mut all_ok = true;
    for ((t, tp), ok) in processors.into_iter().zip(ok_flags) {
      let future = self
        .futures
        .entry(t)
        .or_insert_with(|| TileFuture::new(t))
        .clone();
      match (tp, ok) {
        (Some(tp), true) => {
          if !self.params.skip_allocate_composite {
            let mut img = image.lock().unwrap();
            if let Err(e) = tp.composite_into(&mut img) {
              event_msg!(self.logger, EventType::Error, "tile {} composite failed: {}", t, e);
            }
          }
          self.states.insert(
            t,
            ProgressionState {
              tile_index: t,
              layers_decoded: tp.tcp.num_layers_to_decode,
              packets_parsed: tp.packets_parsed,
              truncated: tp.truncated,
            },
          );
          let tile_image = if matches!(self.cache.strategy(), CacheStrategy::None) {
            None
          } else {
            self.extract_tile_image(&tp)
          };
          let keep_processor = matches!(self.cache.strategy(), CacheStrategy::All);
          self
            .cache
            .put(t, tile_image, keep_processor.then_some(tp), true);
          future.complete(true);
        }
        (tp, _) => {
          all_ok = false;
          self.cache.put(t, None, tp, false);
          future.complete(false);
        }
      }
    }
    self.image = image.into_inner().unwrap();
    Ok(all_ok)
  }

  fn build_processor(&mut self, tile_index: u16, window: Option<Rect>) -> Result<TileProcessor> {
    // A cached processor (strategy All) keeps its packet bytes; a
    // differential update re-parses them with the current selection.
    if let Some(mut tp) = self.cache.take_processor(tile_index) {
      tp.differential_update(window, self.params.layers_to_decompress)?;
      return Ok(tp);
    }
    let mut tcp = self
      .dec
      .cp
      .tcp(tile_index)
      .cloned()
      .ok_or_else(|| Error::structural(format!("no tile-parts seen for tile {}", tile_index)))?;
    self
      .dec
      .resolve_mct(&mut tcp, self.dec.cp.image.comps.len())?;
    let mut tp = TileProcessor::init(&self.dec.cp, tcp, tile_index, &self.dec.image)?;
    tp.window = window;
    tp.logger = self.logger.clone();
    tp.truncated = self.dec.tiles_truncated.contains(&tile_index);
    for data in self.dec.tile_data.remove(&tile_index).unwrap_or_default() {
      tp.append_packet_data(data);
    }
    if tp.packet_data.is_empty() {
      return Err(Error::structural(format!(
        "no packet data cached for tile {}",
        tile_index
      )));
    }
    Ok(tp)
  }

  /// The tile's composited samples as a standalone image.
  fn extract_tile_image(&self, tp: &TileProcessor) -> Option<Image> {
    let mut tile_img = self.dec.image.clone();
    tile_img.apply_reduce(self.params.reduce.min(32));
    tile_img.clip_to(tp.tile.rect);
    for comp in &mut tile_img.comps {
      comp.alloc_data();
    }
    tp.composite_into(&mut tile_img).ok()?;
    Some(tile_img)
  }

  /// Canvas row below which every scheduled tile row has completed.
  fn advance_rows(&mut self) {
    let p = &self.dec.cp.image;
    let mut completed_y = 0;
    'rows: for ty in 0..p.th {
      for tx in 0..p.tw {
        let index = (ty * p.tw + tx) as u16;
        if !self.cache.is_decoded(index) {
          break 'rows;
        }
      }
      completed_y = p.tile_rect(0, ty).y1;
      if matches!(self.cache.strategy(), CacheStrategy::None) {
        self.cache.release_row(ty, p.tw);
      }
    }
    if completed_y > 0 {
      self.rows.advance(completed_y);
      if let Some(cb) = &self.params.row_cb {
        cb(completed_y);
      }
    }
  }

  /// Blocks until samples up to canvas row `y_end` are composited.
  pub fn wait_for_swath(&self, y_end: u32) {
    self.rows.wait(y_end);
  }

  pub fn tile_future(&self, tile_index: u16) -> Option<TileFuture> {
    self.futures.get(&tile_index).cloned()
  }

  /// Composited samples of one tile; `wait` blocks on its future.
  pub fn tile_image(&self, tile_index: u16, wait: bool) -> Option<&Image> {
    if wait {
      if let Some(future) = self.futures.get(&tile_index) {
        if !future.wait() {
          return None;
        }
      }
    }
    self.cache.get(tile_index).and_then(|e| e.image.as_ref())
  }

  pub fn progression_state(&self, tile_index: u16) -> Option<ProgressionState> {
    self.states.get(&tile_index).copied()
  }

  /// Requests a different layer depth for a tile; takes effect on the
  /// next decode of that tile (cached bytes are re-parsed).
  pub fn set_progression_state(&mut self, state: ProgressionState) -> bool {
    if u32::from(state.tile_index) >= self.dec.cp.image.num_tiles() {
      return false;
    }
    self.params.layers_to_decompress = state.layers_decoded;
    self.states.insert(state.tile_index, state);
    true
  }

  pub fn marker_cache(&self) -> &crate::j2k::MarkerCache {
    &self.dec.cache
  }
}
