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

//! Inverse discrete wavelet transforms.
//!
//! The tile-component buffer is Mallat-packed: at every level the
//! lower resolution occupies the top-left corner, with HL to its
//! right, LH below and HH diagonal. Synthesis runs level by level
//! from the lowest resolution: a horizontal pass interleaves each row
//! (low | high halves) and applies the 1-D filter, then a vertical
//! pass does the same per column. Boundary handling clamps band
//! indices, which realises the symmetric mirror extension for these
//! short lifting filters. The starting parity of a level is the
//! output rectangle's origin bit.
//!
//! The windowed variants run the same schedule against a sparse
//! canvas, growing the requested window by the filter footprint at
//! every level and clamping reads against the signalled band ends.

use crate::image::Rect;
use crate::math::ceil_div_pow2;
use crate::sparse_array::SparseArray;

/// 9/7 lifting constants.
const ALPHA: f32 = -1.586_134_342;
const BETA: f32 = -0.052_980_118;
const GAMMA: f32 = 0.882_911_075;
const DELTA: f32 = 0.443_506_852;
const K: f32 = 1.230_174_105;

/// Window margin per level: the filter's maximum footprint.
pub const MARGIN_53: u32 = 2;
pub const MARGIN_97: u32 = 4;

#[inline]
fn clamp_idx(i: isize, len: usize) -> usize {
  i.clamp(0, len as isize - 1) as usize
}

/// 1-D 5/3 synthesis on split bands. `cas` = 1 when the interleaved
/// signal starts on an odd coordinate.
fn synth_53(s: &mut [i32], d: &mut [i32], cas: u32) {
  let (sn, dn) = (s.len(), d.len());
  if sn + dn == 0 {
    return;
  }
  if sn + dn == 1 {
    if cas == 1 && dn == 1 {
      d[0] /= 2;
    }
    return;
  }
  if cas == 0 {
    for i in 0..sn {
      let a = d[clamp_idx(i as isize - 1, dn)];
      let b = d[clamp_idx(i as isize, dn)];
      s[i] -= (a + b + 2) >> 2;
    }
    for i in 0..dn {
      let a = s[clamp_idx(i as isize, sn)];
      let b = s[clamp_idx(i as isize + 1, sn)];
      d[i] += (a + b) >> 1;
    }
  } else {
    for i in 0..sn {
      let a = d[clamp_idx(i as isize, dn)];
      let b = d[clamp_idx(i as isize + 1, dn)];
      s[i] -= (a + b + 2) >> 2;
    }
    for i in 0..dn {
      let a = s[clamp_idx(i as isize - 1, sn)];
      let b = s[clamp_idx(i as isize, sn)];
      d[i] += (a + b) >> 1;
    }
  }
}

/// 1-D 9/7 synthesis: inverse scaling then the four lifting steps
/// undone in reverse order.
fn synth_97(s: &mut [f32], d: &mut [f32], cas: u32) {
  let (sn, dn) = (s.len(), d.len());
  if sn + dn == 0 {
    return;
  }
  if sn + dn == 1 {
    if cas == 1 && dn == 1 {
      d[0] /= 2.0;
    }
    return;
  }
  for v in s.iter_mut() {
    *v *= K;
  }
  for v in d.iter_mut() {
    *v /= K;
  }
  if cas == 0 {
    for i in 0..sn {
      let a = d[clamp_idx(i as isize - 1, dn)];
      let b = d[clamp_idx(i as isize, dn)];
      s[i] -= DELTA * (a + b);
    }
    for i in 0..dn {
      let a = s[clamp_idx(i as isize, sn)];
      let b = s[clamp_idx(i as isize + 1, sn)];
      d[i] -= GAMMA * (a + b);
    }
    for i in 0..sn {
      let a = d[clamp_idx(i as isize - 1, dn)];
      let b = d[clamp_idx(i as isize, dn)];
      s[i] -= BETA * (a + b);
    }
    for i in 0..dn {
      let a = s[clamp_idx(i as isize, sn)];
      let b = s[clamp_idx(i as isize + 1, sn)];
      d[i] -= ALPHA * (a + b);
    }
  } else {
    for i in 0..sn {
      let a = d[clamp_idx(i as isize, dn)];
      let b = d[clamp_idx(i as isize + 1, dn)];
      s[i] -= DELTA * (a + b);
    }
    for i in 0..dn {
      let a = s[clamp_idx(i as isize - 1, sn)];
      let b = s[clamp_idx(i as isize, sn)];
      d[i] -= GAMMA * (a + b);
    }
    for i in 0..sn {
      let a = d[clamp_idx(i as isize, dn)];
      let b = d[clamp_idx(i as isize + 1, dn)];
      s[i] -= BETA * (a + b);
    }
    for i in 0..dn {
      let a = s[clamp_idx(i as isize - 1, sn)];
      let b = s[clamp_idx(i as isize, sn)];
      d[i] -= ALPHA * (a + b);
    }
  }
}

/// One whole-tile synthesis level over a Mallat-packed buffer with
/// row stride `stride`. `lo` and `hi` are the lower and current
/// resolution rectangles.
fn level_pass<T: Copy + Default>(
  data: &mut [T],
  stride: usize,
  lo: Rect,
  hi: Rect,
  synth: &dyn Fn(&mut [T], &mut [T], u32),
) {
  let rw = hi.width() as usize;
  let rh = hi.height() as usize;
  let sn_x = lo.width() as usize;
  let sn_y = lo.height() as usize;
  let cas_x = hi.x0 & 1;
  let cas_y = hi.y0 & 1;

  // Horizontal: every row interleaves (low | high) halves.
  let mut s = vec![T::default(); rw];
  let mut d = vec![T::default(); rw];
  for y in 0..rh {
    let row = &mut data[y * stride..y * stride + rw];
    s[..sn_x].copy_from_slice(&row[..sn_x]);
    d[..rw - sn_x].copy_from_slice(&row[sn_x..rw]);
    synth(&mut s[..sn_x], &mut d[..rw - sn_x], cas_x);
    interleave(&s[..sn_x], &d[..rw - sn_x], row, cas_x);
  }
  // Vertical: every column.
  let mut s = vec![T::default(); rh];
  let mut d = vec![T::default(); rh];
  for x in 0..rw {
    for y in 0..sn_y {
      s[y] = data[y * stride + x];
    }
    for y in sn_y..rh {
      d[y - sn_y] = data[y * stride + x];
    }
    synth(&mut s[..sn_y], &mut d[..rh - sn_y], cas_y);
    let mut col = vec![T::default(); rh];
    interleave(&s[..sn_y], &d[..rh - sn_y], &mut col, cas_y);
    for y in 0..rh {
      data[y * stride + x] = col[y];
    }
  }
}

/// Merges split bands back into the interleaved signal.
fn interleave<T: Copy>(s: &[T], d: &[T], out: &mut [T], cas: u32) {
  if cas == 0 {
    for (i, &v) in s.iter().enumerate() {
      out[2 * i] = v;
    }
    for (i, &v) in d.iter().enumerate() {
      out[2 * i + 1] = v;
    }
  } else {
    for (i, &v) in d.iter().enumerate() {
      out[2 * i] = v;
    }
    for (i, &v) in s.iter().enumerate() {
      out[2 * i + 1] = v;
    }
  }
}

/// Whole-tile reversible synthesis. `resolutions` are the per-level
/// rectangles, lowest first; `numres` limits how many are used.
pub fn decode_tile_53(data: &mut [i32], stride: usize, resolutions: &[Rect], numres: usize) {
  for l in 1..numres.min(resolutions.len()) {
    level_pass(data, stride, resolutions[l - 1], resolutions[l], &synth_53);
  }
}

/// Whole-tile irreversible synthesis over the float buffer.
pub fn decode_tile_97(data: &mut [f32], stride: usize, resolutions: &[Rect], numres: usize) {
  for l in 1..numres.min(resolutions.len()) {
    level_pass(data, stride, resolutions[l - 1], resolutions[l], &synth_97);
  }
}

/// Grows a window by the filter margin at the parent level and clamps
/// it to the parent resolution.
pub fn parent_window(window: Rect, parent: Rect, margin: u32) -> Rect {
  let x0 = ceil_div_pow2(window.x0, 1).saturating_sub(margin).max(parent.x0);
  let y0 = ceil_div_pow2(window.y0, 1).saturating_sub(margin).max(parent.y0);
  let x1 = (ceil_div_pow2(window.x1, 1) + margin).min(parent.x1);
  let y1 = (ceil_div_pow2(window.y1, 1) + margin).min(parent.y1);
  Rect::new(x0, y0, x1, y1)
}

/// Per-level windows needed to synthesize `window` at the top level.
/// Index 0 is the lowest resolution.
pub fn window_chain(window: Rect, resolutions: &[Rect], numres: usize, margin: u32) -> Vec<Rect> {
  let numres = numres.min(resolutions.len());
  let mut chain = vec![Rect::default(); numres];
  if numres == 0 {
    return chain;
  }
  chain[numres - 1] = window.intersection(&resolutions[numres - 1]);
  for l in (0..numres - 1).rev() {
    chain[l] = parent_window(chain[l + 1], resolutions[l], margin);
  }
  chain
}

/// One windowed synthesis level against the sparse canvas. Rows and
/// columns outside the requested window are never materialised; reads
/// fall back to zero where code-blocks were skipped, and the edge
/// clamp uses the signalled band end rather than the slab end.
fn level_pass_window<T: Copy + Default>(
  canvas: &mut SparseArray<T>,
  lo: Rect,
  hi: Rect,
  win_hi: Rect,
  margin: u32,
  synth: &dyn Fn(&mut [T], &mut [T], u32),
) {
  if win_hi.is_empty() {
    return;
  }
  let sn_x = lo.width();
  let sn_y = lo.height();
  let cas_x = hi.x0 & 1;
  let cas_y = hi.y0 & 1;
  let rw = hi.width();
  let rh = hi.height();

  // Buffer-relative output spans, padded by the filter margin.
  let x0 = win_hi.x0.saturating_sub(hi.x0).saturating_sub(margin);
  let x1 = (win_hi.x1.saturating_sub(hi.x0) + margin).min(rw);
  let y0 = win_hi.y0.saturating_sub(hi.y0).saturating_sub(margin);
  let y1 = (win_hi.y1.saturating_sub(hi.y0) + margin).min(rh);

  // Before the vertical pass the rows are still band-split: the
  // vertically-low rows of the output window live at [y0/2 .. y1/2)
  // and the high rows at the same span offset by sn_y. The horizontal
  // pass covers both ranges, padded by the filter margin.
  let lo_rows = (
    (y0 / 2).saturating_sub(margin),
    ((y1 + 1) / 2 + margin).min(sn_y),
  );
  let hi_rows = (
    sn_y + (y0 / 2).saturating_sub(margin),
    (sn_y + (y1 + 1) / 2 + margin).min(rh),
  );

  // Horizontal pass: whole rows are synthesized so the parity
  // bookkeeping stays exact.
  let mut s = vec![T::default(); sn_x as usize];
  let mut d = vec![T::default(); (rw - sn_x) as usize];
  let mut row = vec![T::default(); rw as usize];
  for y in (lo_rows.0..lo_rows.1).chain(hi_rows.0..hi_rows.1) {
    canvas.read(Rect::new(0, y, sn_x, y + 1), &mut s, sn_x as usize);
    if rw > sn_x {
      canvas.read(
        Rect::new(sn_x, y, rw, y + 1),
        &mut d,
        (rw - sn_x) as usize,
      );
    }
    synth(&mut s, &mut d, cas_x);
    interleave(&s, &d, &mut row, cas_x);
    canvas.write(Rect::new(0, y, rw, y + 1), &row, rw as usize);
  }

  // Vertical pass over the needed columns.
  let mut s = vec![T::default(); sn_y as usize];
  let mut d = vec![T::default(); (rh - sn_y) as usize];
  let mut col = vec![T::default(); rh as usize];
  for x in x0..x1 {
    canvas.read(Rect::new(x, 0, x + 1, sn_y), &mut s, 1);
    if rh > sn_y {
      canvas.read(Rect::new(x, sn_y, x + 1, rh), &mut d, 1);
    }
    synth(&mut s, &mut d, cas_y);
    interleave(&s, &d, &mut col, cas_y);
    canvas.write(Rect::new(x, 0, x + 1, rh), &col, 1);
  }
}

/// Windowed reversible synthesis against a sparse canvas holding the
/// Mallat-packed bands. `window` is in top-level coordinates.
pub fn decode_window_53(
  canvas: &mut SparseArray<i32>,
  resolutions: &[Rect],
  numres: usize,
  window: Rect,
) {
  let chain = window_chain(window, resolutions, numres, MARGIN_53);
  for l in 1..numres.min(resolutions.len()) {
    level_pass_window(
      canvas,
      resolutions[l - 1],
      resolutions[l],
      chain[l],
      MARGIN_53,
      &synth_53,
    );
  }
}

/// Windowed irreversible synthesis.
pub fn decode_window_97(
  canvas: &mut SparseArray<f32>,
  resolutions: &[Rect],
  numres: usize,
  window: Rect,
) {
  let chain = window_chain(window, resolutions, numres, MARGIN_97);
  for l in 1..numres.min(resolutions.len()) {
    level_pass_window(
      canvas,
      resolutions[l - 1],
      resolutions[l],
      chain[l],
      MARGIN_97,
      &synth_97,
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::{rngs::StdRng, Rng, SeedableRng};

  /// Forward 5/3 analysis mirror of the synthesis above.
  fn analyze_53(s_out: &mut Vec<i32>, d_out: &mut Vec<i32>, signal: &[i32], cas: u32) {
    let n = signal.len();
    let (sn, dn) = if cas == 0 {
      ((n + 1) / 2, n / 2)
    } else {
      (n / 2, (n + 1) / 2)
    };
    let mut s = vec![0i32; sn];
    let mut d = vec![0i32; dn];
    if cas == 0 {
      for i in 0..sn {
        s[i] = signal[2 * i];
      }
      for i in 0..dn {
        d[i] = signal[2 * i + 1];
      }
    } else {
      for i in 0..dn {
        d[i] = signal[2 * i];
      }
      for i in 0..sn {
        s[i] = signal[2 * i + 1];
      }
    }
    if n == 1 {
      if cas == 1 {
        d[0] *= 2;
      }
    } else if cas == 0 {
      for i in 0..dn {
        let a = s[clamp_idx(i as isize, sn)];
        let b = s[clamp_idx(i as isize + 1, sn)];
        d[i] -= (a + b) >> 1;
      }
      for i in 0..sn {
        let a = d[clamp_idx(i as isize - 1, dn)];
        let b = d[clamp_idx(i as isize, dn)];
        s[i] += (a + b + 2) >> 2;
      }
    } else {
      for i in 0..dn {
        let a = s[clamp_idx(i as isize - 1, sn)];
        let b = s[clamp_idx(i as isize, sn)];
        d[i] -= (a + b) >> 1;
      }
      for i in 0..sn {
        let a = d[clamp_idx(i as isize, dn)];
        let b = d[clamp_idx(i as isize + 1, dn)];
        s[i] += (a + b + 2) >> 2;
      }
    }
    *s_out = s;
    *d_out = d;
  }

  #[test]
  fn synth_53_inverts_analysis_1d() {
    let mut rng = StdRng::seed_from_u64(3);
    for cas in 0..2u32 {
      for n in 1..40usize {
        let signal: Vec<i32> = (0..n).map(|_| rng.gen_range(-500..500)).collect();
        let (mut s, mut d) = (Vec::new(), Vec::new());
        analyze_53(&mut s, &mut d, &signal, cas);
        synth_53(&mut s, &mut d, cas);
        let mut out = vec![0i32; n];
        interleave(&s, &d, &mut out, cas);
        assert_eq!(out, signal, "cas {} n {}", cas, n);
      }
    }
  }

  /// Forward 2-D 5/3: vertical analysis then horizontal, per level
  /// from the top; the exact mirror of `decode_tile_53`.
  fn analyze_tile_53(data: &mut [i32], stride: usize, resolutions: &[Rect], numres: usize) {
    for l in (1..numres).rev() {
      let lo = resolutions[l - 1];
      let hi = resolutions[l];
      let rw = hi.width() as usize;
      let rh = hi.height() as usize;
      let cas_x = hi.x0 & 1;
      let cas_y = hi.y0 & 1;
      // Vertical analysis.
      for x in 0..rw {
        let col: Vec<i32> = (0..rh).map(|y| data[y * stride + x]).collect();
        let (mut s, mut d) = (Vec::new(), Vec::new());
        analyze_53(&mut s, &mut d, &col, cas_y);
        for (y, &v) in s.iter().enumerate() {
          data[y * stride + x] = v;
        }
        for (y, &v) in d.iter().enumerate() {
          data[(s.len() + y) * stride + x] = v;
        }
      }
      // Horizontal analysis.
      for y in 0..rh {
        let row: Vec<i32> = data[y * stride..y * stride + rw].to_vec();
        let (mut s, mut d) = (Vec::new(), Vec::new());
        analyze_53(&mut s, &mut d, &row, cas_x);
        data[y * stride..y * stride + s.len()].copy_from_slice(&s);
        data[y * stride + s.len()..y * stride + rw].copy_from_slice(&d);
      }
      let _ = lo;
    }
  }

  fn res_rects(rect: Rect, numres: usize) -> Vec<Rect> {
    (0..numres)
      .map(|r| rect.ceil_div_pow2((numres - 1 - r) as u32))
      .collect()
  }

  #[test]
  fn round_trip_2d_53() {
    let mut rng = StdRng::seed_from_u64(17);
    for &(x0, y0, x1, y1, numres) in &[
      (0u32, 0u32, 16u32, 16u32, 3usize),
      (0, 0, 37, 23, 4),
      (1, 1, 40, 34, 3),
      (3, 5, 20, 21, 2),
      (0, 0, 8, 1, 2),
    ] {
      let rect = Rect::new(x0, y0, x1, y1);
      let resolutions = res_rects(rect, numres);
      let w = rect.width() as usize;
      let h = rect.height() as usize;
      let original: Vec<i32> = (0..w * h).map(|_| rng.gen_range(-1000..1000)).collect();
      let mut data = original.clone();
      analyze_tile_53(&mut data, w, &resolutions, numres);
      decode_tile_53(&mut data, w, &resolutions, numres);
      assert_eq!(data, original, "rect {:?} numres {}", rect, numres);
    }
  }

  #[test]
  fn round_trip_2d_97_close() {
    let mut rng = StdRng::seed_from_u64(23);
    let rect = Rect::new(0, 0, 32, 24);
    let numres = 3;
    let resolutions = res_rects(rect, numres);
    let w = rect.width() as usize;
    let h = rect.height() as usize;
    let original: Vec<f32> = (0..w * h).map(|_| rng.gen_range(-255.0..255.0)).collect();
    let mut data = original.clone();
    // Forward: invert each synthesis step in reverse.
    for l in (1..numres).rev() {
      let hi = resolutions[l];
      let lo = resolutions[l - 1];
      analyze_level_97(&mut data, w, lo, hi);
    }
    decode_tile_97(&mut data, w, &resolutions, numres);
    for (a, b) in data.iter().zip(&original) {
      assert!((a - b).abs() < 1e-2, "{} vs {}", a, b);
    }
  }

  fn analyze_1d_97(signal: &[f32], cas: u32) -> (Vec<f32>, Vec<f32>) {
    let n = signal.len();
    let (sn, dn) = if cas == 0 {
      ((n + 1) / 2, n / 2)
    } else {
      (n / 2, (n + 1) / 2)
    };
    let mut s = vec![0f32; sn];
    let mut d = vec![0f32; dn];
    if cas == 0 {
      for i in 0..sn {
        s[i] = signal[2 * i];
      }
      for i in 0..dn {
        d[i] = signal[2 * i + 1];
      }
    } else {
      for i in 0..dn {
        d[i] = signal[2 * i];
      }
      for i in 0..sn {
        s[i] = signal[2 * i + 1];
      }
    }
    if n == 1 {
      if cas == 1 {
        d[0] *= 2.0;
      }
      return (s, d);
    }
    // Forward lifting: alpha, beta, gamma, delta, then scaling.
    let steps: [(f32, bool); 4] = [(ALPHA, false), (BETA, true), (GAMMA, false), (DELTA, true)];
    for &(c, on_even) in &steps {
      if on_even {
        for i in 0..sn {
          let (a, b) = if cas == 0 {
            (d[clamp_idx(i as isize - 1, dn)], d[clamp_idx(i as isize, dn)])
          } else {
            (d[clamp_idx(i as isize, dn)], d[clamp_idx(i as isize + 1, dn)])
          };
          s[i] += c * (a + b);
        }
      } else {
        for i in 0..dn {
          let (a, b) = if cas == 0 {
            (s[clamp_idx(i as isize, sn)], s[clamp_idx(i as isize + 1, sn)])
          } else {
            (s[clamp_idx(i as isize - 1, sn)], s[clamp_idx(i as isize, sn)])
          };
          d[i] += c * (a + b);
        }
      }
    }
    for v in &mut s {
      *v /= K;
    }
    for v in &mut d {
      *v *= K;
    }
    (s, d)
  }

  fn analyze_level_97(data: &mut [f32], stride: usize, lo: Rect, hi: Rect) {
    let rw = hi.width() as usize;
    let rh = hi.height() as usize;
    let cas_x = hi.x0 & 1;
    let cas_y = hi.y0 & 1;
    let _ = lo;
    for x in 0..rw {
      let col: Vec<f32> = (0..rh).map(|y| data[y * stride + x]).collect();
      let (s, d) = analyze_1d_97(&col, cas_y);
      for (y, &v) in s.iter().enumerate() {
        data[y * stride + x] = v;
      }
      for (y, &v) in d.iter().enumerate() {
        data[(s.len() + y) * stride + x] = v;
      }
    }
    for y in 0..rh {
      let row: Vec<f32> = data[y * stride..y * stride + rw].to_vec();
      let (s, d) = analyze_1d_97(&row, cas_x);
      data[y * stride..y * stride + s.len()].copy_from_slice(&s);
      data[y * stride + s.len()..y * stride + rw].copy_from_slice(&d);
    }
  }

  #[test]
  fn windowed_matches_whole_tile() {
    let mut rng = StdRng::seed_from_u64(41);
    let rect = Rect::new(0, 0, 64, 48);
    let numres = 4;
    let resolutions = res_rects(rect, numres);
    let w = rect.width() as usize;
    let h = rect.height() as usize;
    let original: Vec<i32> = (0..w * h).map(|_| rng.gen_range(-128..128)).collect();
    let mut packed = original.clone();
    analyze_tile_53(&mut packed, w, &resolutions, numres);

    // Whole-tile reference.
    let mut whole = packed.clone();
    decode_tile_53(&mut whole, w, &resolutions, numres);

    // Windowed: seed a sparse canvas with the packed bands.
    let mut canvas = SparseArray::<i32>::new(w as u32, h as u32).unwrap();
    canvas.write(Rect::new(0, 0, w as u32, h as u32), &packed, w);
    let window = Rect::new(20, 12, 40, 30);
    decode_window_53(&mut canvas, &resolutions, numres, window);

    let ww = window.width() as usize;
    let wh = window.height() as usize;
    let mut out = vec![0i32; ww * wh];
    canvas.read(window, &mut out, ww);
    for y in 0..wh {
      for x in 0..ww {
        let expected = whole[(window.y0 as usize + y) * w + window.x0 as usize + x];
        assert_eq!(out[y * ww + x], expected, "({}, {})", x, y);
      }
    }
  }

  #[test]
  fn window_chain_grows_by_margin() {
    let rect = Rect::new(0, 0, 128, 128);
    let resolutions = res_rects(rect, 3);
    let chain = window_chain(Rect::new(40, 40, 48, 48), &resolutions, 3, MARGIN_53);
    assert_eq!(chain[2], Rect::new(40, 40, 48, 48));
    assert_eq!(chain[1], Rect::new(18, 18, 26, 26));
    assert_eq!(chain[0], Rect::new(7, 7, 15, 15));
  }
}
