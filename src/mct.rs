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

//! Inverse multi-component transforms, applied after the IDWT.

/// Inverse reversible colour transform (RCT), in place over the first
/// three components.
pub fn decode_rct(c0: &mut [i32], c1: &mut [i32], c2: &mut [i32]) {
  let n = c0.len().min(c1.len()).min(c2.len());
  for i in 0..n {
    let y = c0[i];
    let u = c1[i];
    let v = c2[i];
    let g = y - ((u + v) >> 2);
    let r = v + g;
    let b = u + g;
    c0[i] = r;
    c1[i] = g;
    c2[i] = b;
  }
}

/// Inverse irreversible colour transform (ICT) on the float path.
pub fn decode_ict(c0: &mut [f32], c1: &mut [f32], c2: &mut [f32]) {
  let n = c0.len().min(c1.len()).min(c2.len());
  for i in 0..n {
    let y = c0[i];
    let u = c1[i];
    let v = c2[i];
    c0[i] = y + 1.402f32 * v;
    c1[i] = y - 0.344_13f32 * u - 0.714_14f32 * v;
    c2[i] = y + 1.772f32 * u;
  }
}

/// Custom decorrelation matrix from an MCT marker, row-major
/// `n x n`, applied to `n` equally sized component buffers.
pub fn decode_custom(matrix: &[f32], comps: &mut [&mut [i32]]) -> bool {
  let n = comps.len();
  if matrix.len() != n * n || n == 0 {
    return false;
  }
  let samples = comps.iter().map(|c| c.len()).min().unwrap_or(0);
  let mut src = vec![0f32; n];
  for i in 0..samples {
    for (k, comp) in comps.iter().enumerate() {
      src[k] = comp[i] as f32;
    }
    for (k, comp) in comps.iter_mut().enumerate() {
      let row = &matrix[k * n..(k + 1) * n];
      let acc: f32 = row.iter().zip(&src).map(|(m, v)| m * v).sum();
      comp[i] = acc.round() as i32;
    }
  }
  true
}

/// Per-component DC offsets signalled alongside a custom MCT.
pub fn apply_offsets(offsets: &[i32], comps: &mut [&mut [i32]]) {
  for (comp, &off) in comps.iter_mut().zip(offsets) {
    for v in comp.iter_mut() {
      *v += off;
    }
  }
}
