/*
 * The copyright in this software is being made available under the 2-clauses
 * BSD License, included below. This software may be subject to other third
 * party and contributor rights, including patent rights, and no such rights
 * are granted under this license.
 *
 * Copyright (c) 2002-2014, Universite catholique de Louvain (UCL), Belgium
 * Copyright (c) 2002-2014, Professor Benoit Macq
 * Copyright (c) 2001-2003, David Janssens
 * Copyright (c) 2002-2003, Yannick Verschueren
 * Copyright (c) 2003-2007, Francois-Olivier Devaux
 * Copyright (c) 2003-2014, Antonin Descampe
 * Copyright (c) 2005, Herve Drolon, FreeImage Team
 * Copyright (c) 2008, 2011-2012, Centre National d'Etudes Spatiales (CNES), FR
 * Copyright (c) 2012, CS Systemes d'Information, France
 * All rights reserved.
 *
 * Redistribution and use in source and binary forms, with or without
 * modification, are permitted provided that the following conditions
 * are met:
 * 1. Redistributions of source code must retain the above copyright
 *    notice, this list of conditions and the following disclaimer.
 * 2. Redistributions in binary form must reproduce the above copyright
 *    notice, this list of conditions and the following disclaimer in the
 *    documentation and/or other materials provided with the distribution.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS `AS IS'
 * AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
 * IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE
 * ARE DISCLAIMED.  IN NO EVENT SHALL THE COPYRIGHT OWNER OR CONTRIBUTORS BE
 * LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR
 * CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF
 * SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS
 * INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN
 * CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE)
 * ARISING IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE
 * POSSIBILITY OF SUCH DAMAGE.
 */

//! Tile processing: the tile / component / resolution / band /
//! precinct / code-block tree, its geometry, and the decode pipeline
//! (T2 packet parsing, T1 block decoding, IDWT, MCT, level shift).

use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::event::{EventType, Logger};
use crate::image::{Image, Rect};
use crate::math::*;
use crate::mct;
use crate::params::{CblkStyle, CodingParams, QuantStyle, TileCodingParams};
use crate::pi::{PiComponent, PiResolution};
use crate::scheduler::CoderPool;
use crate::sparse_array::SparseArray;
use crate::t1::{CblkDecodeParams, T1Decoder};
use crate::tgt::TagTree;
use crate::{dwt, ht, t2};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BandOrientation {
  LL,
  HL,
  LH,
  HH,
}

impl BandOrientation {
  /// Log2 gain of the band for reversible coding.
  pub fn gain(self) -> u32 {
    match self {
      BandOrientation::LL => 0,
      BandOrientation::HL | BandOrientation::LH => 1,
      BandOrientation::HH => 2,
    }
  }

  /// (xob, yob) band origin bits in the canvas decomposition.
  fn origin(self) -> (u32, u32) {
    match self {
      BandOrientation::LL => (0, 0),
      BandOrientation::HL => (1, 0),
      BandOrientation::LH => (0, 1),
      BandOrientation::HH => (1, 1),
    }
  }
}

/// One terminated (or running) slice of a code-block's bit stream.
#[derive(Clone, Copy, Debug)]
pub struct Segment {
  /// Length in bytes within the block's accumulated data.
  pub len: usize,
  pub numpasses: u32,
  pub maxpasses: u32,
}

#[derive(Debug, Default)]
pub struct CodeBlock {
  /// Band-coordinate rectangle.
  pub rect: Rect,
  /// Magnitude bit planes, set at first inclusion.
  pub numbps: u32,
  /// Current Lblock for length decoding.
  pub numlenbits: u32,
  /// Passes accumulated over all layers so far.
  pub numpasses: u32,
  pub included: bool,
  /// Concatenated segment bytes, split by `segs[i].len`.
  pub data: Vec<u8>,
  pub segs: SmallVec<[Segment; 4]>,
  /// T1 output in the shared fractional-bit scale.
  pub decoded: Option<Vec<i32>>,
}

impl CodeBlock {
  pub fn segments(&self) -> Vec<(&[u8], u32)> {
    let mut out = Vec::with_capacity(self.segs.len());
    let mut off = 0;
    for seg in &self.segs {
      let end = (off + seg.len).min(self.data.len());
      out.push((&self.data[off..end], seg.numpasses));
      off = end;
    }
    out
  }

  fn reset(&mut self) {
    self.numbps = 0;
    self.numlenbits = 3;
    self.numpasses = 0;
    self.included = false;
    self.data.clear();
    self.segs.clear();
    self.decoded = None;
  }
}

#[derive(Debug)]
pub struct Precinct {
  /// Band-coordinate rectangle.
  pub rect: Rect,
  /// Code-block grid dimensions.
  pub cw: u32,
  pub ch: u32,
  pub cblks: Vec<CodeBlock>,
  pub incl_tree: TagTree,
  pub imsb_tree: TagTree,
}

impl Precinct {
  fn reset(&mut self) {
    self.incl_tree.reset();
    self.imsb_tree.reset();
    for cblk in &mut self.cblks {
      cblk.reset();
    }
  }
}

#[derive(Debug)]
pub struct Band {
  pub orientation: BandOrientation,
  /// Band-coordinate rectangle.
  pub rect: Rect,
  pub stepsize: f32,
  /// Maximum magnitude bit planes for blocks of this band.
  pub numbps: u32,
  pub precincts: Vec<Precinct>,
}

impl Band {
  pub fn is_empty(&self) -> bool {
    self.rect.is_empty()
  }
}

#[derive(Debug)]
pub struct Resolution {
  /// Resolution-coordinate rectangle.
  pub rect: Rect,
  /// Precinct grid and exponents at this resolution.
  pub pw: u32,
  pub ph: u32,
  pub pdx: u32,
  pub pdy: u32,
  pub bands: SmallVec<[Band; 3]>,
}

impl Resolution {
  pub fn num_precincts(&self) -> u64 {
    self.pw as u64 * self.ph as u64
  }
}

#[derive(Debug)]
pub struct TileComponent {
  /// Full tile-component rectangle (subsampled canvas coords).
  pub rect: Rect,
  /// Component subsampling on the canvas.
  pub dx: u32,
  pub dy: u32,
  pub numresolutions: u32,
  /// Resolutions actually decoded (after `reduce`).
  pub minres: u32,
  pub resolutions: Vec<Resolution>,
  /// Whole-tile buffers, Mallat-packed, sized to the reduced rect.
  pub data_i32: Vec<i32>,
  pub data_f32: Vec<f32>,
}

impl TileComponent {
  /// Rectangle after resolution reduction.
  pub fn reduced_rect(&self, reduce: u32) -> Rect {
    self.rect.ceil_div_pow2(reduce.min(self.numresolutions - 1))
  }

  /// Per-resolution rects restricted to what is decoded.
  fn decoded_res_rects(&self, numres: usize) -> Vec<Rect> {
    self.resolutions[..numres].iter().map(|r| r.rect).collect()
  }
}

#[derive(Debug, Default)]
pub struct Tile {
  pub index: u16,
  pub rect: Rect,
  pub comps: Vec<TileComponent>,
}

/// Where a tile-part's packet bytes live.
pub enum PacketData {
  Owned(Vec<u8>),
  /// Zero-copy slice of a memory-backed stream.
  Shared { buf: Arc<[u8]>, range: (usize, usize) },
}

impl PacketData {
  pub fn bytes(&self) -> &[u8] {
    match self {
      PacketData::Owned(v) => v,
      PacketData::Shared { buf, range } => &buf[range.0..range.1],
    }
  }
}

/// Per-tile decode driver.
pub struct TileProcessor {
  pub tile: Tile,
  pub tcp: TileCodingParams,
  /// Tile-part packet data in TPsot order.
  pub packet_data: Vec<PacketData>,
  pub truncated: bool,
  /// Decode restricted to this canvas window when set.
  pub window: Option<Rect>,
  pub reduce: u32,
  pub packets_parsed: u64,
  pub sot_markers_seen: u32,
  pub logger: Logger,
}

impl TileProcessor {
  /// Builds the tile tree for tile `index` from the merged parameters.
  pub fn init(cp: &CodingParams, tcp: TileCodingParams, index: u16, image: &Image) -> Result<Self> {
    let tx = u32::from(index) % cp.image.tw;
    let ty = u32::from(index) / cp.image.tw;
    let tile_rect = cp.image.tile_rect(tx, ty);
    let mut comps = Vec::with_capacity(cp.image.comps.len());
    for (compno, comp) in cp.image.comps.iter().enumerate() {
      let tccp = tcp
        .tccps
        .get(compno)
        .ok_or_else(|| Error::structural("missing component coding parameters"))?;
      let prec = image
        .comps
        .get(compno)
        .map(|c| c.prec)
        .unwrap_or(comp.prec);
      comps.push(init_tile_component(
        tile_rect, comp.dx, comp.dy, prec, tccp,
      )?);
    }
    Ok(Self {
      tile: Tile {
        index,
        rect: tile_rect,
        comps,
      },
      tcp,
      packet_data: Vec::new(),
      truncated: false,
      window: None,
      reduce: cp.reduce,
      packets_parsed: 0,
      sot_markers_seen: 0,
      logger: Logger::new(),
    })
  }

  /// Number of resolutions to decode for component `compno`.
  pub fn numres_to_decode(&self, compno: usize) -> usize {
    let tilec = &self.tile.comps[compno];
    (tilec.numresolutions as usize).saturating_sub(self.reduce as usize).max(1)
  }

  /// Geometry handed to the packet iterator.
  pub fn pi_components(&self) -> Vec<PiComponent> {
    self
      .tile
      .comps
      .iter()
      .zip(&self.tcp.tccps)
      .map(|(tilec, _tccp)| PiComponent {
        dx: tilec.dx,
        dy: tilec.dy,
        resolutions: tilec
          .resolutions
          .iter()
          .map(|r| PiResolution {
            pdx: r.pdx,
            pdy: r.pdy,
            pw: r.pw,
            ph: r.ph,
          })
          .collect(),
      })
      .collect()
  }

  pub fn append_packet_data(&mut self, data: PacketData) {
    self.packet_data.push(data);
  }

  /// Contiguous view of all tile-part packet bytes, in TPsot order.
  pub fn packet_bytes(&self) -> Vec<u8> {
    let total: usize = self.packet_data.iter().map(|d| d.bytes().len()).sum();
    let mut out = Vec::with_capacity(total);
    for d in &self.packet_data {
      out.extend_from_slice(d.bytes());
    }
    out
  }

  /// Reselects the decode when the caller asks for a different window
  /// or more layers on a tile whose bytes are already cached. The
  /// packet parse restarts from the cached bytes with fresh tag-tree
  /// state; previously decoded samples are dropped.
  pub fn differential_update(&mut self, window: Option<Rect>, layers: u16) -> Result<()> {
    self.window = window;
    if layers > 0 {
      self.tcp.num_layers_to_decode = layers.min(self.tcp.num_layers);
    }
    for tilec in &mut self.tile.comps {
      for res in &mut tilec.resolutions {
        for band in &mut res.bands {
          for prec in &mut band.precincts {
            prec.reset();
          }
        }
      }
      tilec.data_i32.clear();
      tilec.data_f32.clear();
    }
    self.packets_parsed = 0;
    Ok(())
  }

  /// Runs T2 over the cached packet bytes.
  pub fn decode_packets(&mut self, cp: &mut CodingParams) -> Result<()> {
    let bytes = self.packet_bytes();
    let parsed = t2::decode_packets(self, cp, &bytes)?;
    self.packets_parsed = parsed;
    Ok(())
  }

  /// Whether a band window intersects the region of interest at this
  /// resolution; everything intersects when no window is set.
  pub fn is_band_area_of_interest(
    &self,
    compno: usize,
    resno: usize,
    band_rect_res: Rect,
  ) -> bool {
    let window = match self.window {
      Some(w) => w,
      None => return true,
    };
    let tilec = &self.tile.comps[compno];
    let numres = self.numres_to_decode(compno);
    let resolutions = tilec.decoded_res_rects(numres);
    if resno >= resolutions.len() {
      return false;
    }
    let comp_window = component_window(window, tilec, self.reduce);
    let margin = if self.tcp.tccps[compno].qmfbid == 1 {
      dwt::MARGIN_53
    } else {
      dwt::MARGIN_97
    };
    let chain = dwt::window_chain(comp_window, &resolutions, numres, margin);
    !chain[resno].intersection(&band_rect_res).is_empty()
  }

  /// T1 over every included code-block, then IDWT and inverse MCT.
  /// Compositing into the destination image happens separately so
  /// tiles can decode concurrently and serialise only the final blit.
  pub fn decompress(&mut self, coders: &CoderPool) -> Result<()> {
    let reversible: Vec<bool> = self.tcp.tccps.iter().map(|t| t.qmfbid == 1).collect();
    for compno in 0..self.tile.comps.len() {
      self.decode_component(compno, reversible[compno], coders)?;
    }
    self.apply_mct()
  }

  fn decode_component(&mut self, compno: usize, reversible: bool, coders: &CoderPool) -> Result<()> {
    let numres = self.numres_to_decode(compno);
    let tccp = self.tcp.tccps[compno].clone();
    let window = self.window;
    let reduce = self.reduce;

    // Decode every included block first; placement differs between
    // the dense and sparse paths. The block coder comes from the
    // shared pool, sized for this component's code-blocks.
    let mut decoder: Option<T1Decoder> = Some(coders.checkout(tccp.cblkw, tccp.cblkh));
    let mut ht_decoder = ht::HtDecoder::new();
    let use_ht = tccp.cblk_style.contains(CblkStyle::HT);

    let tilec = &mut self.tile.comps[compno];
    let top_rect = tilec.resolutions[numres - 1].rect;
    let width = top_rect.width() as usize;
    let height = top_rect.height() as usize;
    if width == 0 || height == 0 {
      return Ok(());
    }

    let windowed = window.is_some();
    let mut canvas_i32: Option<SparseArray<i32>> = None;
    let mut canvas_f32: Option<SparseArray<f32>> = None;
    if windowed {
      if reversible {
        canvas_i32 = SparseArray::new(width as u32, height as u32);
      } else {
        canvas_f32 = SparseArray::new(width as u32, height as u32);
      }
    } else {
      if reversible {
        tilec.data_i32.clear();
        tilec.data_i32.resize(width * height, 0);
      } else {
        tilec.data_f32.clear();
        tilec.data_f32.resize(width * height, 0.0);
      }
    }

    let resolutions: Vec<Rect> = tilec.decoded_res_rects(numres);
    // Windowed decodes skip blocks outside the per-level windows the
    // IDWT will actually read.
    let margin = if reversible {
      dwt::MARGIN_53
    } else {
      dwt::MARGIN_97
    };
    let chain: Option<Vec<Rect>> = window.map(|w| {
      let comp_window = component_window(w, tilec, reduce);
      dwt::window_chain(comp_window, &resolutions, numres, margin)
    });
    for resno in 0..numres {
      let lower_width = if resno == 0 {
        0
      } else {
        resolutions[resno - 1].width()
      };
      let lower_height = if resno == 0 {
        0
      } else {
        resolutions[resno - 1].height()
      };
      let res = &mut tilec.resolutions[resno];
      for band in res.bands.iter_mut() {
        if band.is_empty() {
          continue;
        }
        let (xob, yob) = band.orientation.origin();
        // Mallat quadrant offset of this band in the buffer.
        let off_x = if xob == 1 { lower_width } else { 0 };
        let off_y = if yob == 1 { lower_height } else { 0 };
        let band_rect = band.rect;
        let stepsize = band.stepsize;
        for prec in band.precincts.iter_mut() {
          for cblk in prec.cblks.iter_mut() {
            if cblk.rect.is_empty() || (cblk.segs.is_empty() && cblk.data.is_empty()) {
              continue;
            }
            if let Some(chain) = &chain {
              let cover = band_rect_in_res(cblk.rect, xob, yob, resno);
              if cover.intersection(&chain[resno]).is_empty() {
                continue;
              }
            }
            let w = cblk.rect.width() as usize;
            let h = cblk.rect.height() as usize;
            let samples: Vec<i32> = if use_ht {
              match ht_decoder.decode_cblk(w, h, &cblk.data) {
                Ok(()) => ht_decoder.samples().to_vec(),
                Err(e) => {
                  event_msg!(
                    self.logger,
                    EventType::Warning,
                    "HT block decode failed ({}), falling back to classic coder",
                    e
                  );
                  decode_classic(&mut decoder, cblk, &tccp, band.orientation, &self.logger)
                }
              }
            } else {
              decode_classic(&mut decoder, cblk, &tccp, band.orientation, &self.logger)
            };
            cblk.decoded = Some(samples);

            // Placement window of this block in buffer coordinates.
            let dest = Rect::new(
              cblk.rect.x0 - band_rect.x0 + off_x,
              cblk.rect.y0 - band_rect.y0 + off_y,
              cblk.rect.x1 - band_rect.x0 + off_x,
              cblk.rect.y1 - band_rect.y0 + off_y,
            );
            let decoded = cblk.decoded.as_ref().unwrap();
            if reversible {
              let row: Vec<i32> = decoded.iter().map(|&v| v / 2).collect();
              if let Some(canvas) = canvas_i32.as_mut() {
                canvas.write(dest, &row, w);
              } else {
                blit_i32(&mut tilec.data_i32, width, dest, &row, w);
              }
            } else {
              let factor = 0.5f32 * stepsize;
              let row: Vec<f32> = decoded.iter().map(|&v| v as f32 * factor).collect();
              if let Some(canvas) = canvas_f32.as_mut() {
                canvas.write(dest, &row, w);
              } else {
                blit_f32(&mut tilec.data_f32, width, dest, &row, w);
              }
            }
          }
        }
      }
    }

    // IDWT from the lowest resolution up.
    if windowed {
      let comp_window = component_window(window.unwrap(), tilec, reduce);
      // Window in buffer-relative coordinates for the canvas reads.
      if reversible {
        let canvas = canvas_i32.as_mut().unwrap();
        dwt::decode_window_53(canvas, &resolutions, numres, comp_window);
        let rel = relative_window(comp_window, top_rect);
        let ww = rel.width() as usize;
        let wh = rel.height() as usize;
        tilec.data_i32.clear();
        tilec.data_i32.resize(ww * wh, 0);
        canvas.read(rel, &mut tilec.data_i32, ww);
      } else {
        let canvas = canvas_f32.as_mut().unwrap();
        dwt::decode_window_97(canvas, &resolutions, numres, comp_window);
        let rel = relative_window(comp_window, top_rect);
        let ww = rel.width() as usize;
        let wh = rel.height() as usize;
        tilec.data_f32.clear();
        tilec.data_f32.resize(ww * wh, 0.0);
        canvas.read(rel, &mut tilec.data_f32, ww);
      }
    } else if reversible {
      dwt::decode_tile_53(&mut tilec.data_i32, width, &resolutions, numres);
    } else {
      dwt::decode_tile_97(&mut tilec.data_f32, width, &resolutions, numres);
    }
    let _ = height;
    if let Some(coder) = decoder.take() {
      coders.checkin(tccp.cblkw, tccp.cblkh, coder);
    }
    Ok(())
  }

  fn apply_mct(&mut self) -> Result<()> {
    if self.tcp.mct == 0 {
      return Ok(());
    }
    if self.tile.comps.len() < 3 {
      event_msg!(
        self.logger,
        EventType::Warning,
        "MCT signalled with {} components, skipping",
        self.tile.comps.len()
      );
      return Ok(());
    }
    let same_dims = {
      let len = |c: &TileComponent| (c.data_i32.len(), c.data_f32.len());
      let first = len(&self.tile.comps[0]);
      self.tile.comps[1..3].iter().all(|c| len(c) == first)
    };
    if !same_dims {
      event_msg!(
        self.logger,
        EventType::Warning,
        "MCT components have mismatched dimensions, skipping"
      );
      return Ok(());
    }
    if self.tcp.mct == 2 {
      let matrix = match &self.tcp.mct_matrix {
        Some(m) => m.clone(),
        None => {
          return Err(Error::structural(
            "custom MCT signalled without a decorrelation matrix",
          ))
        }
      };
      let mut bufs: Vec<&mut [i32]> = self
        .tile
        .comps
        .iter_mut()
        .map(|c| c.data_i32.as_mut_slice())
        .collect();
      if !mct::decode_custom(&matrix, &mut bufs) {
        return Err(Error::structural("MCT matrix size does not match components"));
      }
      if let Some(offsets) = self.tcp.mct_offsets.clone() {
        mct::apply_offsets(&offsets, &mut bufs);
      }
      return Ok(());
    }
    let reversible = self.tcp.tccps[0].qmfbid == 1;
    let (a, rest) = self.tile.comps.split_at_mut(1);
    let (b, c) = rest.split_at_mut(1);
    if reversible {
      mct::decode_rct(
        &mut a[0].data_i32,
        &mut b[0].data_i32,
        &mut c[0].data_i32,
      );
    } else {
      mct::decode_ict(
        &mut a[0].data_f32,
        &mut b[0].data_f32,
        &mut c[0].data_f32,
      );
    }
    Ok(())
  }

  /// DC level shift, clamp to the component range, composite into the
  /// destination image.
  pub fn composite_into(&self, image: &mut Image) -> Result<()> {
    for (compno, tilec) in self.tile.comps.iter().enumerate() {
      let comp = match image.comps.get_mut(compno) {
        Some(c) => c,
        None => continue,
      };
      let reversible = self.tcp.tccps[compno].qmfbid == 1;
      let prec = comp.prec.min(31);
      let shift = if comp.sgnd { 0i32 } else { 1i32 << (prec - 1) };
      let (min, max) = if comp.sgnd {
        (-(1i64 << (prec - 1)) as i32, ((1i64 << (prec - 1)) - 1) as i32)
      } else {
        (0i32, ((1i64 << prec) - 1).min(i32::MAX as i64) as i32)
      };

      let numres = (tilec.numresolutions as usize)
        .saturating_sub(self.reduce as usize)
        .max(1);
      let src_rect = match self.window {
        Some(w) => component_window(w, tilec, self.reduce),
        None => tilec.resolutions[numres - 1].rect,
      };
      let sw = src_rect.width() as usize;
      if sw == 0 {
        continue;
      }
      if comp.data.is_none() {
        comp.alloc_data();
      }
      let dest_w = comp.w as usize;
      let data = comp.data.as_mut().unwrap();
      for (row_idx, y) in (src_rect.y0..src_rect.y1).enumerate() {
        let dy = y as i64 - comp.y0 as i64;
        if dy < 0 || dy >= comp.h as i64 {
          continue;
        }
        for (col_idx, x) in (src_rect.x0..src_rect.x1).enumerate() {
          let dx = x as i64 - comp.x0 as i64;
          if dx < 0 || dx >= comp.w as i64 {
            continue;
          }
          let v = if reversible {
            tilec.data_i32[row_idx * sw + col_idx]
          } else {
            tilec.data_f32[row_idx * sw + col_idx].round() as i32
          };
          data[dy as usize * dest_w + dx as usize] = (v + shift).clamp(min, max);
        }
      }
      comp.resno_decoded = numres as u32 - 1;
    }
    Ok(())
  }
}

fn decode_classic(
  decoder: &mut Option<T1Decoder>,
  cblk: &CodeBlock,
  tccp: &crate::params::TileComponentCodingParams,
  orient: BandOrientation,
  logger: &Logger,
) -> Vec<i32> {
  let w = cblk.rect.width() as usize;
  let h = cblk.rect.height() as usize;
  let max_w = 1usize << tccp.cblkw;
  let max_h = 1usize << tccp.cblkh;
  let t1 = decoder.get_or_insert_with(|| T1Decoder::new(max_w, max_h));
  let params = CblkDecodeParams {
    w,
    h,
    numbps: cblk.numbps.min(31),
    orient,
    cblk_style: tccp.cblk_style,
    roi_shift: tccp.roi_shift,
  };
  t1.decode_cblk(&params, &cblk.segments(), logger);
  t1.samples().to_vec()
}

fn blit_i32(dst: &mut [i32], stride: usize, dest: Rect, src: &[i32], src_stride: usize) {
  for (row, y) in (dest.y0..dest.y1).enumerate() {
    let d = y as usize * stride + dest.x0 as usize;
    let s = row * src_stride;
    let run = dest.width() as usize;
    dst[d..d + run].copy_from_slice(&src[s..s + run]);
  }
}

fn blit_f32(dst: &mut [f32], stride: usize, dest: Rect, src: &[f32], src_stride: usize) {
  for (row, y) in (dest.y0..dest.y1).enumerate() {
    let d = y as usize * stride + dest.x0 as usize;
    let s = row * src_stride;
    let run = dest.width() as usize;
    dst[d..d + run].copy_from_slice(&src[s..s + run]);
  }
}

/// Canvas window mapped into a component's top decoded resolution.
fn component_window(window: Rect, tilec: &TileComponent, reduce: u32) -> Rect {
  let numres = (tilec.numresolutions as usize)
    .saturating_sub(reduce as usize)
    .max(1);
  let levels_dropped = tilec.numresolutions as usize - numres;
  let sub = window.ceil_div(tilec.dx, tilec.dy);
  let win = sub.ceil_div_pow2(levels_dropped as u32);
  win.intersection(&tilec.resolutions[numres - 1].rect)
}

/// Covering rectangle of a band-space rect in resolution coordinates.
fn band_rect_in_res(band_rect: Rect, xob: u32, yob: u32, resno: usize) -> Rect {
  if resno == 0 {
    return band_rect;
  }
  Rect::new(
    (2 * band_rect.x0 + xob).saturating_sub(1),
    (2 * band_rect.y0 + yob).saturating_sub(1),
    2 * band_rect.x1 + xob,
    2 * band_rect.y1 + yob,
  )
}

fn relative_window(window: Rect, res: Rect) -> Rect {
  Rect::new(
    window.x0.saturating_sub(res.x0),
    window.y0.saturating_sub(res.y0),
    window.x1.saturating_sub(res.x0),
    window.y1.saturating_sub(res.y0),
  )
}

/// Builds resolutions, bands, precincts and code-blocks for one tile
/// component, with band step sizes and maximum bit planes.
fn init_tile_component(
  tile_rect: Rect,
  dx: u32,
  dy: u32,
  prec: u32,
  tccp: &crate::params::TileComponentCodingParams,
) -> Result<TileComponent> {
  let rect = tile_rect.ceil_div(dx, dy);
  let numres = tccp.num_resolutions as u32;
  if numres == 0 || numres > 33 {
    return Err(Error::range("resolution count", numres as i64, 1, 33));
  }
  let mut resolutions = Vec::with_capacity(numres as usize);
  for resno in 0..numres {
    let levelno = numres - 1 - resno;
    let res_rect = rect.ceil_div_pow2(levelno);
    let pdx = tccp.prcw[resno as usize] as u32;
    let pdy = tccp.prch[resno as usize] as u32;
    if pdx > 15 || pdy > 15 {
      return Err(Error::range("precinct exponent", pdx.max(pdy) as i64, 0, 15));
    }
    let pw = if res_rect.is_empty() {
      0
    } else {
      ceil_div_pow2(res_rect.x1, pdx) - floor_div_pow2(res_rect.x0, pdx)
    };
    let ph = if res_rect.is_empty() {
      0
    } else {
      ceil_div_pow2(res_rect.y1, pdy) - floor_div_pow2(res_rect.y0, pdy)
    };

    // Code-block group (precinct in band space) exponents.
    let (cbg_expn_x, cbg_expn_y) = if resno == 0 {
      (pdx, pdy)
    } else {
      (pdx.saturating_sub(1), pdy.saturating_sub(1))
    };
    let cblk_expn_x = (tccp.cblkw as u32).min(cbg_expn_x);
    let cblk_expn_y = (tccp.cblkh as u32).min(cbg_expn_y);

    let orientations: &[BandOrientation] = if resno == 0 {
      &[BandOrientation::LL]
    } else {
      &[BandOrientation::HL, BandOrientation::LH, BandOrientation::HH]
    };
    let mut bands = SmallVec::new();
    for (bandno_in_res, &orientation) in orientations.iter().enumerate() {
      let bandno = if resno == 0 {
        0
      } else {
        (resno as usize - 1) * 3 + bandno_in_res + 1
      };
      let (xob, yob) = orientation.origin();
      let band_rect = band_bounds(rect, levelno, resno, xob, yob);

      let step = tccp.step_size(bandno);
      let gain = if tccp.qmfbid == 1 {
        orientation.gain()
      } else {
        0
      };
      let numbps_base = prec + gain;
      let stepsize = if tccp.qnt_style == QuantStyle::None {
        1.0
      } else {
        (1.0 + step.mant as f32 / 2048.0)
          * 2f32.powi(numbps_base as i32 - step.expn as i32)
      };
      let band_numbps = tccp.roi_shift as u32
        + (step.expn as u32 + tccp.num_guard_bits as u32).saturating_sub(1);

      // Precincts of this band: the resolution partition halved for
      // r > 0, anchored at the canvas origin.
      let mut precincts = Vec::with_capacity((pw * ph) as usize);
      if !band_rect.is_empty() && pw * ph > 0 {
        let prc_x0 = floor_div_pow2(res_rect.x0, pdx) << pdx;
        let prc_y0 = floor_div_pow2(res_rect.y0, pdy) << pdy;
        for pj in 0..ph {
          for pi in 0..pw {
            let res_prc = Rect::new(
              prc_x0 + (pi << pdx),
              prc_y0 + (pj << pdy),
              prc_x0 + ((pi + 1) << pdx),
              prc_y0 + ((pj + 1) << pdy),
            );
            // Band-space precinct rectangle.
            let band_prc = if resno == 0 {
              res_prc.intersection(&band_rect)
            } else {
              Rect::new(
                ceil_div_pow2(res_prc.x0, 1),
                ceil_div_pow2(res_prc.y0, 1),
                ceil_div_pow2(res_prc.x1, 1),
                ceil_div_pow2(res_prc.y1, 1),
              )
              .intersection(&band_rect)
            };
            precincts.push(build_precinct(band_prc, cblk_expn_x, cblk_expn_y));
          }
        }
      }
      bands.push(Band {
        orientation,
        rect: band_rect,
        stepsize,
        numbps: band_numbps,
        precincts,
      });
    }
    resolutions.push(Resolution {
      rect: res_rect,
      pw,
      ph,
      pdx,
      pdy,
      bands,
    });
  }
  Ok(TileComponent {
    rect,
    dx,
    dy,
    numresolutions: numres,
    minres: 0,
    resolutions,
    data_i32: Vec::new(),
    data_f32: Vec::new(),
  })
}

/// Standard band bounds: tbx0 = ceil((tcx0 - 2^(nb-1) xob) / 2^nb).
fn band_bounds(tilec_rect: Rect, levelno: u32, resno: u32, xob: u32, yob: u32) -> Rect {
  if resno == 0 {
    return tilec_rect.ceil_div_pow2(levelno);
  }
  let nb = levelno + 1;
  let shift = |v: u32, ob: u32| -> u32 {
    let adjusted = v as i64 - ((1i64 << (nb - 1)) * ob as i64);
    int_ceil_div_pow2(adjusted, nb).max(0) as u32
  };
  Rect::new(
    shift(tilec_rect.x0, xob),
    shift(tilec_rect.y0, yob),
    shift(tilec_rect.x1, xob),
    shift(tilec_rect.y1, yob),
  )
}

fn build_precinct(band_prc: Rect, cblk_expn_x: u32, cblk_expn_y: u32) -> Precinct {
  if band_prc.is_empty() {
    return Precinct {
      rect: band_prc,
      cw: 0,
      ch: 0,
      cblks: Vec::new(),
      incl_tree: TagTree::new(0, 0),
      imsb_tree: TagTree::new(0, 0),
    };
  }
  let cw = ceil_div_pow2(band_prc.x1, cblk_expn_x) - floor_div_pow2(band_prc.x0, cblk_expn_x);
  let ch = ceil_div_pow2(band_prc.y1, cblk_expn_y) - floor_div_pow2(band_prc.y0, cblk_expn_y);
  let cblk_x0 = floor_div_pow2(band_prc.x0, cblk_expn_x) << cblk_expn_x;
  let cblk_y0 = floor_div_pow2(band_prc.y0, cblk_expn_y) << cblk_expn_y;
  let mut cblks = Vec::with_capacity((cw * ch) as usize);
  for j in 0..ch {
    for i in 0..cw {
      let rect = Rect::new(
        cblk_x0 + (i << cblk_expn_x),
        cblk_y0 + (j << cblk_expn_y),
        cblk_x0 + ((i + 1) << cblk_expn_x),
        cblk_y0 + ((j + 1) << cblk_expn_y),
      )
      .intersection(&band_prc);
      let mut cblk = CodeBlock::default();
      cblk.rect = rect;
      cblk.numlenbits = 3;
      cblks.push(cblk);
    }
  }
  Precinct {
    rect: band_prc,
    cw,
    ch,
    cblks,
    incl_tree: TagTree::new(cw, ch),
    imsb_tree: TagTree::new(cw, ch),
  }
}
