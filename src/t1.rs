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

//! Tier-1 code-block decoding: significance, refinement and cleanup
//! passes over 4-row stripes, honouring the code-block style flags
//! (bypass, reset, termall, vertically-causal, segment symbols).
//!
//! Decoded samples carry one fractional bit (values are twice the
//! coefficient plus the midpoint offset); the tile processor divides
//! by two for the reversible path and folds the half into the step
//! size for the irreversible one.

use crate::event::{EventType, Logger};
use crate::mqc::{MqDecoder, CTX_AGG, CTX_UNI};
use crate::params::CblkStyle;
use crate::t1_luts::{ctxno_mag, ctxno_sc, ctxno_zc};
use crate::tcd::BandOrientation;

const F_SIG: u8 = 0x01;
const F_NEG: u8 = 0x02;
const F_VISITED: u8 = 0x04;
const F_REFINED: u8 = 0x08;

/// Decode-time description of one code-block.
pub struct CblkDecodeParams {
  pub w: usize,
  pub h: usize,
  /// Magnitude bit planes present (band max minus zero bit planes).
  pub numbps: u32,
  pub orient: BandOrientation,
  pub cblk_style: CblkStyle,
  pub roi_shift: u8,
}

/// Reusable block decoder; pooled per code-block size so the hot path
/// never allocates.
pub struct T1Decoder {
  max_w: usize,
  max_h: usize,
  w: usize,
  h: usize,
  pub data: Vec<i32>,
  /// (w + 2) x (h + 2) state grid with a border of never-significant
  /// samples standing in for outside-block neighbours.
  flags: Vec<u8>,
  mqc: MqDecoder,
}

impl T1Decoder {
  pub fn new(max_w: usize, max_h: usize) -> Self {
    Self {
      max_w,
      max_h,
      w: 0,
      h: 0,
      data: vec![0; max_w * max_h],
      flags: vec![0; (max_w + 2) * (max_h + 2)],
      mqc: MqDecoder::default(),
    }
  }

  pub fn max_dims(&self) -> (usize, usize) {
    (self.max_w, self.max_h)
  }

  #[inline]
  fn fidx(&self, x: usize, y: usize) -> usize {
    // Flags grid is offset by one in both directions.
    (y + 1) * (self.w + 2) + x + 1
  }

  #[inline]
  fn flag_at(&self, x: isize, y: isize) -> u8 {
    let idx = (y + 1) as usize * (self.w + 2) + (x + 1) as usize;
    self.flags[idx]
  }

  /// Significant-neighbour counts (h, v, d) around (x, y). In
  /// vertically-causal mode the row below a stripe boundary does not
  /// contribute.
  fn neighbour_counts(&self, x: usize, y: usize, vsc: bool) -> (u32, u32, u32) {
    let (x, y) = (x as isize, y as isize);
    let masked_below = vsc && (y & 3) == 3;
    let sig = |fx: isize, fy: isize| -> u32 {
      if masked_below && fy == y + 1 {
        return 0;
      }
      u32::from(self.flag_at(fx, fy) & F_SIG != 0)
    };
    let h = sig(x - 1, y) + sig(x + 1, y);
    let v = sig(x, y - 1) + sig(x, y + 1);
    let d = sig(x - 1, y - 1) + sig(x + 1, y - 1) + sig(x - 1, y + 1) + sig(x + 1, y + 1);
    (h, v, d)
  }

  /// Clamped sign contributions for the sign-coding context.
  fn sign_contrib(&self, x: usize, y: usize, vsc: bool) -> (i32, i32) {
    let (x, y) = (x as isize, y as isize);
    let masked_below = vsc && (y & 3) == 3;
    let contrib = |fx: isize, fy: isize| -> i32 {
      if masked_below && fy == y + 1 {
        return 0;
      }
      let f = self.flag_at(fx, fy);
      if f & F_SIG == 0 {
        0
      } else if f & F_NEG != 0 {
        -1
      } else {
        1
      }
    };
    let h = (contrib(x - 1, y) + contrib(x + 1, y)).clamp(-1, 1);
    let v = (contrib(x, y - 1) + contrib(x, y + 1)).clamp(-1, 1);
    (h, v)
  }

  fn set_sample(&mut self, x: usize, y: usize, value: i32, negative: bool) {
    self.data[y * self.w + x] = if negative { -value } else { value };
    let idx = self.fidx(x, y);
    self.flags[idx] |= F_SIG | if negative { F_NEG } else { 0 };
  }

  fn decode_sign(&mut self, x: usize, y: usize, vsc: bool) -> bool {
    let (h, v) = self.sign_contrib(x, y, vsc);
    let (ctx, xorbit) = ctxno_sc(h, v);
    (self.mqc.decode_ctx(ctx) ^ xorbit) != 0
  }

  fn sig_pass(&mut self, bpno: u32, params: &CblkDecodeParams, raw: bool) {
    let vsc = params.cblk_style.contains(CblkStyle::VSC);
    let one = 1i32 << (bpno + 1);
    let oneplushalf = one | (one >> 1);
    for y0 in (0..self.h).step_by(4) {
      for x in 0..self.w {
        for y in y0..(y0 + 4).min(self.h) {
          let idx = self.fidx(x, y);
          if self.flags[idx] & F_SIG != 0 {
            continue;
          }
          let (h, v, d) = self.neighbour_counts(x, y, vsc);
          if h + v + d == 0 {
            continue;
          }
          let bit = if raw {
            self.mqc.raw_decode()
          } else {
            self.mqc.decode_ctx(ctxno_zc(params.orient, h, v, d))
          };
          if bit != 0 {
            let negative = if raw {
              self.mqc.raw_decode() != 0
            } else {
              self.decode_sign(x, y, vsc)
            };
            self.set_sample(x, y, oneplushalf, negative);
          }
          let idx = self.fidx(x, y);
          self.flags[idx] |= F_VISITED;
        }
      }
    }
  }

  fn ref_pass(&mut self, bpno: u32, params: &CblkDecodeParams, raw: bool) {
    let vsc = params.cblk_style.contains(CblkStyle::VSC);
    let poshalf = 1i32 << bpno;
    for y0 in (0..self.h).step_by(4) {
      for x in 0..self.w {
        for y in y0..(y0 + 4).min(self.h) {
          let idx = self.fidx(x, y);
          let f = self.flags[idx];
          if f & F_SIG == 0 || f & F_VISITED != 0 {
            continue;
          }
          let bit = if raw {
            self.mqc.raw_decode()
          } else {
            let (h, v, d) = self.neighbour_counts(x, y, vsc);
            let first = f & F_REFINED == 0;
            self.mqc.decode_ctx(ctxno_mag(first, h + v + d > 0))
          };
          let t = if bit != 0 { poshalf } else { -poshalf };
          let sample = &mut self.data[y * self.w + x];
          *sample += if *sample < 0 { -t } else { t };
          self.flags[idx] |= F_REFINED;
        }
      }
    }
  }

  fn cln_pass(&mut self, bpno: u32, params: &CblkDecodeParams) {
    let vsc = params.cblk_style.contains(CblkStyle::VSC);
    let one = 1i32 << (bpno + 1);
    let oneplushalf = one | (one >> 1);
    for y0 in (0..self.h).step_by(4) {
      for x in 0..self.w {
        let full_stripe = y0 + 4 <= self.h;
        // Run-length mode: a full stripe column whose samples are all
        // uncoded with empty neighbourhoods.
        let mut start = y0;
        if full_stripe && self.stripe_is_quiet(x, y0, vsc) {
          if self.mqc.decode_ctx(CTX_AGG) == 0 {
            continue;
          }
          let runlen =
            (self.mqc.decode_ctx(CTX_UNI) << 1) | self.mqc.decode_ctx(CTX_UNI);
          let y = y0 + runlen as usize;
          let negative = self.decode_sign(x, y, vsc);
          self.set_sample(x, y, oneplushalf, negative);
          start = y + 1;
        }
        for y in start..(y0 + 4).min(self.h) {
          let idx = self.fidx(x, y);
          let f = self.flags[idx];
          if f & (F_SIG | F_VISITED) != 0 {
            continue;
          }
          let (h, v, d) = self.neighbour_counts(x, y, vsc);
          if self.mqc.decode_ctx(ctxno_zc(params.orient, h, v, d)) != 0 {
            let negative = self.decode_sign(x, y, vsc);
            self.set_sample(x, y, oneplushalf, negative);
          }
        }
      }
    }
    // Pass membership resets for the next bit plane.
    for f in &mut self.flags {
      *f &= !F_VISITED;
    }
  }

  fn stripe_is_quiet(&self, x: usize, y0: usize, vsc: bool) -> bool {
    for y in y0..y0 + 4 {
      let f = self.flag_at(x as isize, y as isize);
      if f & (F_SIG | F_VISITED) != 0 {
        return false;
      }
      let (h, v, d) = self.neighbour_counts(x, y, vsc);
      if h + v + d != 0 {
        return false;
      }
    }
    true
  }

  /// Runs the pass sequence over the block's segments. `segments` are
  /// (data, pass-count) in codestream order.
  pub fn decode_cblk(
    &mut self,
    params: &CblkDecodeParams,
    segments: &[(&[u8], u32)],
    logger: &Logger,
  ) {
    debug_assert!(params.w <= self.max_w && params.h <= self.max_h);
    self.w = params.w;
    self.h = params.h;
    self.data[..self.w * self.h].iter_mut().for_each(|v| *v = 0);
    self.flags.truncate(0);
    self.flags.resize((self.w + 2) * (self.h + 2), 0);
    self.mqc.reset_contexts();

    if params.numbps == 0 {
      return;
    }
    let lazy = params.cblk_style.contains(CblkStyle::LAZY);
    let reset = params.cblk_style.contains(CblkStyle::RESET);
    let segsym = params.cblk_style.contains(CblkStyle::SEGSYM);

    let mut bpno = params.numbps as i32 - 1;
    let mut passtype = 2u8;
    for &(data, numpasses) in segments {
      let first_raw = lazy && passtype < 2 && bpno < params.numbps as i32 - 4;
      if first_raw {
        self.mqc.init_raw(data);
      } else {
        self.mqc.init(data);
      }
      for _ in 0..numpasses {
        if bpno < 0 {
          return;
        }
        let raw = lazy && passtype < 2 && bpno < params.numbps as i32 - 4;
        if reset && !raw {
          self.mqc.reset_contexts();
        }
        match passtype {
          0 => self.sig_pass(bpno as u32, params, raw),
          1 => self.ref_pass(bpno as u32, params, raw),
          _ => {
            self.cln_pass(bpno as u32, params);
            if segsym {
              let mut sym = 0u32;
              for _ in 0..4 {
                sym = (sym << 1) | self.mqc.decode_ctx(CTX_UNI);
              }
              if sym != 0xa {
                event_msg!(
                  logger,
                  EventType::Warning,
                  "segmentation symbol 0x{:x} corrupt, block may be damaged",
                  sym
                );
              }
            }
          }
        }
        if passtype == 2 {
          passtype = 0;
          bpno -= 1;
        } else {
          passtype += 1;
        }
      }
    }

    if params.roi_shift > 0 {
      self.shift_roi(params.roi_shift);
    }
  }

  /// Region-of-interest samples were up-shifted by the encoder; undo
  /// the shift on everything at or above the threshold.
  fn shift_roi(&mut self, roi_shift: u8) {
    let thresh = 1i32 << roi_shift;
    for v in &mut self.data[..self.w * self.h] {
      let mag = v.abs();
      if mag >= thresh {
        let mag = mag >> roi_shift;
        *v = if *v < 0 { -mag } else { mag };
      }
    }
  }

  /// Decoded samples of the current block, row-major.
  pub fn samples(&self) -> &[i32] {
    &self.data[..self.w * self.h]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mqc::MqEncoder;
  use rand::{rngs::StdRng, Rng, SeedableRng};

  /// Minimal encoder mirror (default mode flags, single segment) so
  /// the decoder can be exercised against real pass sequences.
  struct MiniEncoder {
    w: usize,
    h: usize,
    coeffs: Vec<i32>,
    flags: Vec<u8>,
    mqc: MqEncoder,
    orient: BandOrientation,
  }

  impl MiniEncoder {
    fn new(w: usize, h: usize, coeffs: &[i32], orient: BandOrientation) -> Self {
      Self {
        w,
        h,
        coeffs: coeffs.to_vec(),
        flags: vec![0; (w + 2) * (h + 2)],
        mqc: MqEncoder::new(),
        orient,
      }
    }

    fn fidx(&self, x: usize, y: usize) -> usize {
      (y + 1) * (self.w + 2) + x + 1
    }

    fn flag_at(&self, x: isize, y: isize) -> u8 {
      self.flags[(y + 1) as usize * (self.w + 2) + (x + 1) as usize]
    }

    fn counts(&self, x: usize, y: usize) -> (u32, u32, u32) {
      let (x, y) = (x as isize, y as isize);
      let sig = |fx: isize, fy: isize| u32::from(self.flag_at(fx, fy) & F_SIG != 0);
      (
        sig(x - 1, y) + sig(x + 1, y),
        sig(x, y - 1) + sig(x, y + 1),
        sig(x - 1, y - 1) + sig(x + 1, y - 1) + sig(x - 1, y + 1) + sig(x + 1, y + 1),
      )
    }

    fn sign_contrib(&self, x: usize, y: usize) -> (i32, i32) {
      let (x, y) = (x as isize, y as isize);
      let c = |fx: isize, fy: isize| -> i32 {
        let f = self.flag_at(fx, fy);
        if f & F_SIG == 0 {
          0
        } else if f & F_NEG != 0 {
          -1
        } else {
          1
        }
      };
      (
        (c(x - 1, y) + c(x + 1, y)).clamp(-1, 1),
        (c(x, y - 1) + c(x, y + 1)).clamp(-1, 1),
      )
    }

    fn encode_sign(&mut self, x: usize, y: usize) {
      let (h, v) = self.sign_contrib(x, y);
      let (ctx, xorbit) = ctxno_sc(h, v);
      let negative = self.coeffs[y * self.w + x] < 0;
      self.mqc.encode(u32::from(negative) ^ xorbit, ctx);
      let idx = self.fidx(x, y);
      self.flags[idx] |= F_SIG | if negative { F_NEG } else { 0 };
    }

    fn mag(&self, x: usize, y: usize) -> u32 {
      self.coeffs[y * self.w + x].unsigned_abs()
    }

    fn sig_pass(&mut self, bpno: u32) {
      for y0 in (0..self.h).step_by(4) {
        for x in 0..self.w {
          for y in y0..(y0 + 4).min(self.h) {
            let idx = self.fidx(x, y);
            if self.flags[idx] & F_SIG != 0 {
              continue;
            }
            let (h, v, d) = self.counts(x, y);
            if h + v + d == 0 {
              continue;
            }
            let v_bit = (self.mag(x, y) >> bpno) & 1;
            self.mqc.encode(v_bit, ctxno_zc(self.orient, h, v, d));
            if v_bit != 0 {
              self.encode_sign(x, y);
            }
            let idx = self.fidx(x, y);
            self.flags[idx] |= F_VISITED;
          }
        }
      }
    }

    fn ref_pass(&mut self, bpno: u32) {
      for y0 in (0..self.h).step_by(4) {
        for x in 0..self.w {
          for y in y0..(y0 + 4).min(self.h) {
            let idx = self.fidx(x, y);
            let f = self.flags[idx];
            if f & F_SIG == 0 || f & F_VISITED != 0 {
              continue;
            }
            let (h, v, d) = self.counts(x, y);
            let ctx = ctxno_mag(f & F_REFINED == 0, h + v + d > 0);
            self.mqc.encode((self.mag(x, y) >> bpno) & 1, ctx);
            self.flags[idx] |= F_REFINED;
          }
        }
      }
    }

    fn stripe_is_quiet(&self, x: usize, y0: usize) -> bool {
      for y in y0..y0 + 4 {
        if self.flag_at(x as isize, y as isize) & (F_SIG | F_VISITED) != 0 {
          return false;
        }
        let (h, v, d) = self.counts(x, y);
        if h + v + d != 0 {
          return false;
        }
      }
      true
    }

    fn cln_pass(&mut self, bpno: u32) {
      for y0 in (0..self.h).step_by(4) {
        for x in 0..self.w {
          let mut start = y0;
          if y0 + 4 <= self.h && self.stripe_is_quiet(x, y0) {
            let first_sig =
              (y0..y0 + 4).find(|&y| (self.mag(x, y) >> bpno) & 1 != 0);
            match first_sig {
              None => {
                self.mqc.encode(0, CTX_AGG);
                continue;
              }
              Some(y) => {
                self.mqc.encode(1, CTX_AGG);
                let runlen = (y - y0) as u32;
                self.mqc.encode((runlen >> 1) & 1, CTX_UNI);
                self.mqc.encode(runlen & 1, CTX_UNI);
                self.encode_sign(x, y);
                start = y + 1;
              }
            }
          }
          for y in start..(y0 + 4).min(self.h) {
            let idx = self.fidx(x, y);
            if self.flags[idx] & (F_SIG | F_VISITED) != 0 {
              continue;
            }
            let (h, v, d) = self.counts(x, y);
            let bit = (self.mag(x, y) >> bpno) & 1;
            self.mqc.encode(bit, ctxno_zc(self.orient, h, v, d));
            if bit != 0 {
              self.encode_sign(x, y);
            }
          }
        }
      }
      for f in &mut self.flags {
        *f &= !F_VISITED;
      }
    }

    fn encode(mut self, numbps: u32) -> (Vec<u8>, u32) {
      let mut numpasses = 0;
      let mut bpno = numbps as i32 - 1;
      let mut passtype = 2u8;
      while bpno >= 0 {
        match passtype {
          0 => self.sig_pass(bpno as u32),
          1 => self.ref_pass(bpno as u32),
          _ => self.cln_pass(bpno as u32),
        }
        numpasses += 1;
        if passtype == 2 {
          passtype = 0;
          bpno -= 1;
        } else {
          passtype += 1;
        }
      }
      (self.mqc.flush(), numpasses)
    }
  }

  fn round_trip(w: usize, h: usize, coeffs: &[i32], orient: BandOrientation) {
    let max_mag = coeffs.iter().map(|c| c.unsigned_abs()).max().unwrap_or(0);
    let numbps = crate::math::num_bits(max_mag).max(1);
    let enc = MiniEncoder::new(w, h, coeffs, orient);
    let (bytes, numpasses) = enc.encode(numbps);

    let mut dec = T1Decoder::new(w, h);
    let params = CblkDecodeParams {
      w,
      h,
      numbps,
      orient,
      cblk_style: CblkStyle::empty(),
      roi_shift: 0,
    };
    dec.decode_cblk(&params, &[(&bytes, numpasses)], &Logger::new());
    for (i, &expected) in coeffs.iter().enumerate() {
      // One fractional bit: integer halving recovers the coefficient.
      assert_eq!(dec.samples()[i] / 2, expected, "sample {}", i);
    }
  }

  #[test]
  fn single_sample() {
    round_trip(1, 1, &[5], BandOrientation::LL);
    round_trip(1, 1, &[-3], BandOrientation::LL);
    round_trip(1, 1, &[0], BandOrientation::LL);
  }

  #[test]
  fn small_blocks_all_orientations() {
    let coeffs = [3, 0, -7, 1, 0, 0, 2, -1, 0, 4, 0, 0, -2, 0, 1, 6];
    for orient in [
      BandOrientation::LL,
      BandOrientation::HL,
      BandOrientation::LH,
      BandOrientation::HH,
    ] {
      round_trip(4, 4, &coeffs, orient);
    }
  }

  #[test]
  fn random_blocks() {
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..25 {
      let w = rng.gen_range(1..17);
      let h = rng.gen_range(1..17);
      let coeffs: Vec<i32> = (0..w * h).map(|_| rng.gen_range(-255..256)).collect();
      round_trip(w, h, &coeffs, BandOrientation::HH);
    }
  }

  #[test]
  fn sparse_blocks_exercise_run_length() {
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..10 {
      let w = 8;
      let h = 12;
      let coeffs: Vec<i32> = (0..w * h)
        .map(|_| {
          if rng.gen_range(0..10) == 0 {
            rng.gen_range(-31..32)
          } else {
            0
          }
        })
        .collect();
      round_trip(w, h, &coeffs, BandOrientation::LH);
    }
  }

  #[test]
  fn roi_shift_restores_magnitudes() {
    let mut dec = T1Decoder::new(2, 1);
    dec.w = 2;
    dec.h = 1;
    dec.data[0] = 40;
    dec.data[1] = -3;
    dec.shift_roi(3);
    assert_eq!(dec.data[0], 5);
    assert_eq!(dec.data[1], -3);
  }
}
