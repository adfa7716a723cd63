/*
 * The copyright in this software is being made available under the 2-clauses
 * BSD License, included below. This software may be subject to other third
 * party and contributor rights, including patent rights, and no such rights
 * are granted under this license.
 *
 * Copyright (c) 2017, IntoPix SA <contact@intopix.com>
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

//! Sparse canvas backing windowed decodes: a grid of lazily allocated
//! fixed-size blocks holding subband samples. Reads tolerate holes
//! (unmaterialised blocks read as zero), so a window that touches
//! bands outside the decoded region still resolves.

use crate::image::Rect;
use crate::math::ceil_div;

/// Fixed block edge, matching the usual code-block granularity.
const BLOCK_LEN: u32 = 64;

#[derive(Clone)]
pub struct SparseArray<T = i32> {
  width: u32,
  height: u32,
  block_w: u32,
  block_h: u32,
  grid_w: u32,
  grid_h: u32,
  blocks: Vec<Option<Vec<T>>>,
}

impl<T: Copy + Default> SparseArray<T> {
  pub fn new(width: u32, height: u32) -> Option<Self> {
    Self::with_block_size(width, height, BLOCK_LEN, BLOCK_LEN)
  }

  pub fn with_block_size(width: u32, height: u32, block_w: u32, block_h: u32) -> Option<Self> {
    if width == 0 || height == 0 || block_w == 0 || block_h == 0 {
      return None;
    }
    let grid_w = ceil_div(width, block_w);
    let grid_h = ceil_div(height, block_h);
    let total = (grid_w as usize).checked_mul(grid_h as usize)?;
    Some(Self {
      width,
      height,
      block_w,
      block_h,
      grid_w,
      grid_h,
      blocks: vec![None; total],
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  fn block_index(&self, bx: u32, by: u32) -> usize {
    (by * self.grid_w + bx) as usize
  }

  fn window_in_bounds(&self, window: &Rect) -> bool {
    window.x1 <= self.width && window.y1 <= self.height && !window.is_empty()
  }

  /// Copies `window` into `dest` (row-major with `dest_stride`).
  /// Unmaterialised blocks contribute zeros.
  pub fn read(&self, window: Rect, dest: &mut [T], dest_stride: usize) -> bool {
    if !self.window_in_bounds(&window) {
      return false;
    }
    for y in window.y0..window.y1 {
      let dest_row = (y - window.y0) as usize * dest_stride;
      let mut x = window.x0;
      while x < window.x1 {
        let bx = x / self.block_w;
        let by = y / self.block_h;
        let in_block_x = x % self.block_w;
        let run = (self.block_w - in_block_x).min(window.x1 - x) as usize;
        let dest_off = dest_row + (x - window.x0) as usize;
        match &self.blocks[self.block_index(bx, by)] {
          Some(block) => {
            let src_off = ((y % self.block_h) * self.block_w + in_block_x) as usize;
            dest[dest_off..dest_off + run].copy_from_slice(&block[src_off..src_off + run]);
          }
          None => {
            dest[dest_off..dest_off + run]
              .iter_mut()
              .for_each(|v| *v = T::default());
          }
        }
        x += run as u32;
      }
    }
    true
  }

  /// Writes `window` from `src`, materialising blocks on demand.
  pub fn write(&mut self, window: Rect, src: &[T], src_stride: usize) -> bool {
    if !self.window_in_bounds(&window) {
      return false;
    }
    let (block_w, block_h) = (self.block_w, self.block_h);
    for y in window.y0..window.y1 {
      let src_row = (y - window.y0) as usize * src_stride;
      let mut x = window.x0;
      while x < window.x1 {
        let bx = x / block_w;
        let by = y / block_h;
        let in_block_x = x % block_w;
        let run = (block_w - in_block_x).min(window.x1 - x) as usize;
        let idx = self.block_index(bx, by);
        let block = self.blocks[idx]
          .get_or_insert_with(|| vec![T::default(); (block_w * block_h) as usize]);
        let dst_off = ((y % block_h) * block_w + in_block_x) as usize;
        let src_off = src_row + (x - window.x0) as usize;
        block[dst_off..dst_off + run].copy_from_slice(&src[src_off..src_off + run]);
        x += run as u32;
      }
    }
    true
  }

  /// Whether any block under `window` has been materialised.
  pub fn is_populated(&self, window: Rect) -> bool {
    if !self.window_in_bounds(&window) {
      return false;
    }
    let bx0 = window.x0 / self.block_w;
    let bx1 = ceil_div(window.x1, self.block_w).min(self.grid_w);
    let by0 = window.y0 / self.block_h;
    let by1 = ceil_div(window.y1, self.block_h).min(self.grid_h);
    for by in by0..by1 {
      for bx in bx0..bx1 {
        if self.blocks[self.block_index(bx, by)].is_some() {
          return true;
        }
      }
    }
    false
  }

  /// Drops every block intersecting `window`.
  pub fn release(&mut self, window: Rect) {
    if !self.window_in_bounds(&window) {
      return;
    }
    let bx0 = window.x0 / self.block_w;
    let bx1 = ceil_div(window.x1, self.block_w).min(self.grid_w);
    let by0 = window.y0 / self.block_h;
    let by1 = ceil_div(window.y1, self.block_h).min(self.grid_h);
    for by in by0..by1 {
      for bx in bx0..bx1 {
        let idx = self.block_index(bx, by);
        self.blocks[idx] = None;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn holes_read_as_zero() {
    let sa = SparseArray::<i32>::with_block_size(100, 100, 16, 16).unwrap();
    let mut out = vec![-1i32; 25];
    assert!(sa.read(Rect::new(10, 10, 15, 15), &mut out, 5));
    assert!(out.iter().all(|&v| v == 0));
  }

  #[test]
  fn write_then_read_across_blocks() {
    let mut sa = SparseArray::<i32>::with_block_size(100, 80, 16, 16).unwrap();
    // 20x4 window straddles two block columns.
    let src: Vec<i32> = (0..80).collect();
    assert!(sa.write(Rect::new(10, 14, 30, 18), &src, 20));
    let mut out = vec![0i32; 80];
    assert!(sa.read(Rect::new(10, 14, 30, 18), &mut out, 20));
    assert_eq!(src, out);
    // A partially overlapping read mixes written data and zeros.
    let mut edge = vec![-1i32; 40];
    assert!(sa.read(Rect::new(0, 14, 20, 16), &mut edge, 20));
    assert_eq!(edge[..10], vec![0; 10][..]);
    assert_eq!(edge[10..20], src[..10]);
  }

  #[test]
  fn out_of_bounds_window_rejected() {
    let sa = SparseArray::<i32>::new(32, 32).unwrap();
    let mut out = vec![0i32; 4];
    assert!(!sa.read(Rect::new(30, 30, 34, 31), &mut out, 4));
  }

  #[test]
  fn release_drops_blocks() {
    let mut sa = SparseArray::<i32>::with_block_size(64, 64, 16, 16).unwrap();
    let src = vec![7i32; 16];
    sa.write(Rect::new(0, 0, 4, 4), &src, 4);
    assert!(sa.is_populated(Rect::new(0, 0, 8, 8)));
    sa.release(Rect::new(0, 0, 16, 16));
    assert!(!sa.is_populated(Rect::new(0, 0, 8, 8)));
  }
}
