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

//! Context selection for the three coding passes (tables D-1 to D-3 of
//! the standard), computed from neighbourhood counts.

use crate::mqc::{CTX_MAG, CTX_SC, CTX_ZC};
use crate::tcd::BandOrientation;

/// Zero-coding context from significant-neighbour counts: `h`
/// horizontal (0..=2), `v` vertical (0..=2), `d` diagonal (0..=4).
pub fn ctxno_zc(orient: BandOrientation, h: u32, v: u32, d: u32) -> usize {
  let (h, v) = match orient {
    // HL prefers vertical neighbours: roles swap.
    BandOrientation::HL => (v, h),
    _ => (h, v),
  };
  let ctx = match orient {
    BandOrientation::HH => match (d, h + v) {
      (d, _) if d >= 3 => 8,
      (2, hv) if hv >= 1 => 7,
      (2, _) => 6,
      (1, hv) if hv >= 2 => 5,
      (1, 1) => 4,
      (1, _) => 3,
      (0, hv) if hv >= 2 => 2,
      (0, 1) => 1,
      _ => 0,
    },
    _ => match (h, v, d) {
      (2, _, _) => 8,
      (1, v, _) if v >= 1 => 7,
      (1, 0, d) if d >= 1 => 6,
      (1, 0, 0) => 5,
      (0, 2, _) => 4,
      (0, 1, _) => 3,
      (0, 0, d) if d >= 2 => 2,
      (0, 0, 1) => 1,
      _ => 0,
    },
  };
  CTX_ZC + ctx
}

/// Sign-coding context and XOR bit from the clamped horizontal and
/// vertical sign contributions (-1, 0, or 1 each).
pub fn ctxno_sc(h: i32, v: i32) -> (usize, u32) {
  let (ctx, xor) = match (h, v) {
    (1, 1) => (4, 0),
    (1, 0) => (3, 0),
    (1, -1) => (2, 0),
    (0, 1) => (1, 0),
    (0, 0) => (0, 0),
    (0, -1) => (1, 1),
    (-1, 1) => (2, 1),
    (-1, 0) => (3, 1),
    (-1, -1) => (4, 1),
    _ => (0, 0),
  };
  (CTX_SC + ctx, xor)
}

/// Magnitude-refinement context: first refinement splits on whether
/// any neighbour is significant.
pub fn ctxno_mag(first_refinement: bool, any_sig_neighbour: bool) -> usize {
  if !first_refinement {
    CTX_MAG + 2
  } else if any_sig_neighbour {
    CTX_MAG + 1
  } else {
    CTX_MAG
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zc_table_extremes() {
    assert_eq!(ctxno_zc(BandOrientation::LL, 0, 0, 0), CTX_ZC);
    assert_eq!(ctxno_zc(BandOrientation::LL, 2, 0, 0), CTX_ZC + 8);
    assert_eq!(ctxno_zc(BandOrientation::HH, 4, 4, 4), CTX_ZC + 8);
    // HL swaps the roles of h and v.
    assert_eq!(
      ctxno_zc(BandOrientation::HL, 0, 2, 0),
      ctxno_zc(BandOrientation::LH, 2, 0, 0)
    );
  }

  #[test]
  fn sc_symmetry() {
    // Mirrored sign neighbourhoods share a context and flip the bit.
    for (h, v) in [(1, 1), (1, 0), (0, 1), (1, -1)] {
      let (ctx_pos, xor_pos) = ctxno_sc(h, v);
      let (ctx_neg, xor_neg) = ctxno_sc(-h, -v);
      assert_eq!(ctx_pos, ctx_neg);
      assert_eq!(xor_pos ^ xor_neg, 1);
    }
    assert_eq!(ctxno_sc(0, 0), (CTX_SC, 0));
  }

  #[test]
  fn mag_contexts() {
    assert_eq!(ctxno_mag(true, false), CTX_MAG);
    assert_eq!(ctxno_mag(true, true), CTX_MAG + 1);
    assert_eq!(ctxno_mag(false, true), CTX_MAG + 2);
    assert_eq!(ctxno_mag(false, false), CTX_MAG + 2);
  }
}
