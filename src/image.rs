/*
 * The copyright in this software is being made available under the 2-clauses
 * BSD License, included below. This software may be subject to other third
 * party and contributor rights, including patent rights, and no such rights
 * are granted under this license.
 *
 * Copyright (c) 2005, Herve Drolon, FreeImage Team
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

use crate::math::*;

/// Axis-aligned rectangle on the canvas, `[x0, x1) x [y0, y1)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
  pub x0: u32,
  pub y0: u32,
  pub x1: u32,
  pub y1: u32,
}

impl Rect {
  pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
    Self { x0, y0, x1, y1 }
  }

  pub fn width(&self) -> u32 {
    self.x1.saturating_sub(self.x0)
  }

  pub fn height(&self) -> u32 {
    self.y1.saturating_sub(self.y0)
  }

  pub fn area(&self) -> u64 {
    self.width() as u64 * self.height() as u64
  }

  pub fn is_empty(&self) -> bool {
    self.x0 >= self.x1 || self.y0 >= self.y1
  }

  pub fn intersection(&self, other: &Rect) -> Rect {
    Rect {
      x0: self.x0.max(other.x0),
      y0: self.y0.max(other.y0),
      x1: self.x1.min(other.x1),
      y1: self.y1.min(other.y1),
    }
  }

  pub fn union(&self, other: &Rect) -> Rect {
    if self.is_empty() {
      return *other;
    }
    if other.is_empty() {
      return *self;
    }
    Rect {
      x0: self.x0.min(other.x0),
      y0: self.y0.min(other.y0),
      x1: self.x1.max(other.x1),
      y1: self.y1.max(other.y1),
    }
  }

  pub fn contains(&self, other: &Rect) -> bool {
    other.x0 >= self.x0 && other.y0 >= self.y0 && other.x1 <= self.x1 && other.y1 <= self.y1
  }

  /// Applies the DWT bounds formula: each level halves with ceiling.
  pub fn ceil_div_pow2(&self, n: u32) -> Rect {
    Rect {
      x0: ceil_div_pow2(self.x0, n),
      y0: ceil_div_pow2(self.y0, n),
      x1: ceil_div_pow2(self.x1, n),
      y1: ceil_div_pow2(self.y1, n),
    }
  }

  pub fn ceil_div(&self, dx: u32, dy: u32) -> Rect {
    Rect {
      x0: ceil_div(self.x0, dx),
      y0: ceil_div(self.y0, dy),
      x1: ceil_div(self.x1, dx),
      y1: ceil_div(self.y1, dy),
    }
  }
}

/// Channel semantics carried by CDEF boxes (JP2) or left unset (J2K).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelType {
  #[default]
  Unspecified,
  Colour,
  Opacity,
  PremultipliedOpacity,
}

#[derive(Clone, Debug, Default)]
pub struct ImageComponent {
  /// Horizontal / vertical subsampling on the canvas grid.
  pub dx: u32,
  pub dy: u32,
  /// Sample dimensions after subsampling and resolution reduction.
  pub w: u32,
  pub h: u32,
  /// Canvas origin of the first sample.
  pub x0: u32,
  pub y0: u32,
  /// Bit depth, 1..=38.
  pub prec: u32,
  pub sgnd: bool,
  /// Highest resolution number actually decoded for this component.
  pub resno_decoded: u32,
  /// Resolution reduction applied (the `reduce` decode parameter).
  pub factor: u32,
  pub channel_type: ChannelType,
  /// CMAP/CDEF association, 0 when unset.
  pub association: u16,
  pub data: Option<Vec<i32>>,
}

impl ImageComponent {
  /// Copies the geometry of `other` without touching sample data.
  pub fn copy_props(&mut self, other: &ImageComponent) {
    let data = self.data.take();
    *self = other.clone();
    self.data = data;
  }

  pub fn alloc_data(&mut self) -> bool {
    match (self.w as usize).checked_mul(self.h as usize) {
      Some(len) => {
        self.data = Some(vec![0i32; len]);
        true
      }
      None => false,
    }
  }

  pub fn clear_data(&mut self) {
    self.data = None;
  }
}

/// Decoded image: canvas rectangle plus an ordered component list.
#[derive(Clone, Debug, Default)]
pub struct Image {
  pub x0: u32,
  pub y0: u32,
  pub x1: u32,
  pub y1: u32,
  pub comps: Vec<ImageComponent>,
}

impl Image {
  pub fn rect(&self) -> Rect {
    Rect::new(self.x0, self.y0, self.x1, self.y1)
  }

  pub fn num_comps(&self) -> usize {
    self.comps.len()
  }

  /// Recomputes component dimensions for a `reduce` factor, the same
  /// bounds arithmetic the tile tree uses.
  pub fn apply_reduce(&mut self, reduce: u32) {
    for comp in &mut self.comps {
      let rect = Rect::new(
        ceil_div(self.x0, comp.dx),
        ceil_div(self.y0, comp.dy),
        ceil_div(self.x1, comp.dx),
        ceil_div(self.y1, comp.dy),
      )
      .ceil_div_pow2(reduce);
      comp.x0 = rect.x0;
      comp.y0 = rect.y0;
      comp.w = rect.width();
      comp.h = rect.height();
      comp.factor = reduce;
    }
  }

  /// Clips the image to a canvas window, shrinking component buffers'
  /// expected dimensions accordingly.
  pub fn clip_to(&mut self, window: Rect) {
    let clipped = self.rect().intersection(&window);
    self.x0 = clipped.x0;
    self.y0 = clipped.y0;
    self.x1 = clipped.x1;
    self.y1 = clipped.y1;
    for comp in &mut self.comps {
      let r = Rect::new(
        ceil_div(clipped.x0, comp.dx),
        ceil_div(clipped.y0, comp.dy),
        ceil_div(clipped.x1, comp.dx),
        ceil_div(clipped.y1, comp.dy),
      )
      .ceil_div_pow2(comp.factor);
      comp.x0 = r.x0;
      comp.y0 = r.y0;
      comp.w = r.width();
      comp.h = r.height();
    }
  }
}
