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

//! High-throughput (HT) code-block decoding.
//!
//! The cleanup segment carries three interleaved bit streams: MagSgn
//! (magnitudes and signs, growing forward), and the MEL and VLC
//! streams sharing the segment tail whose length `scup` is framed in
//! the final two bytes. Samples are decoded quad by quad: an adaptive
//! MEL run-coder skips runs of quads with no significant context, a
//! VLC codeword yields the quad significance pattern, and MagSgn
//! supplies exponent-bounded magnitude bits and signs.
//!
//! Output uses the same fractional-bit scale as the classic Tier-1
//! decoder so the dequantization path downstream is shared.

use crate::bio::BitReader;
use crate::error::{Error, Result};

/// MEL state automaton exponents.
const MEL_E: [u32; 13] = [0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 4, 5];

/// Adaptive run-length decoder for quads with an all-zero context.
pub struct MelDecoder<'a> {
  bits: BitReader<'a>,
  k: usize,
  run: u32,
  /// A pending one-event terminating the current partial run.
  one_pending: bool,
}

impl<'a> MelDecoder<'a> {
  pub fn new(data: &'a [u8]) -> Self {
    Self {
      bits: BitReader::new(data),
      k: 0,
      run: 0,
      one_pending: false,
    }
  }

  /// Next MEL event: `true` marks a significant quad.
  pub fn decode(&mut self) -> bool {
    if self.run > 0 {
      self.run -= 1;
      return false;
    }
    if self.one_pending {
      self.one_pending = false;
      return true;
    }
    let e = MEL_E[self.k];
    if self.bits.read_bit() == 1 {
      // Complete run of 2^e zero events, no terminating one.
      self.k = (self.k + 1).min(12);
      self.run = (1 << e) - 1;
      self.one_pending = false;
      false
    } else {
      // Partial run: e bits give the zero count, then a one event.
      let m = self.bits.read_bits(e);
      self.k = self.k.saturating_sub(1);
      if m == 0 {
        return true;
      }
      self.run = m - 1;
      self.one_pending = true;
      false
    }
  }

  fn reader(&mut self) -> &mut BitReader<'a> {
    &mut self.bits
  }
}

/// VLC codeword table for quad significance patterns: (prefix bits,
/// prefix length, rho). Frequent patterns take the short codes.
#[rustfmt::skip]
const VLC_QUAD: [(u32, u32, u8); 16] = [
  (0b0,     1, 0x1), (0b100,   3, 0x2), (0b101,   3, 0x4), (0b1100,  4, 0x8),
  (0b1101,  4, 0x3), (0b11100, 5, 0x5), (0b11101, 5, 0xa), (0b111100, 6, 0xc),
  (0b111101, 6, 0x6), (0b111110, 6, 0x9), (0b1111110, 7, 0x7), (0b11111110, 8, 0xb),
  (0b111111110, 9, 0xd), (0b1111111110, 10, 0xe), (0b11111111110, 11, 0xf),
  (0b11111111111, 11, 0x0),
];

fn vlc_decode_rho(bits: &mut BitReader<'_>) -> u8 {
  let mut code = 0u32;
  let mut len = 0u32;
  loop {
    code = (code << 1) | bits.read_bit();
    len += 1;
    for &(cwd, cwd_len, rho) in &VLC_QUAD {
      if cwd_len == len && cwd == code {
        return rho;
      }
    }
    if len >= 11 {
      return 0;
    }
  }
}

#[cfg(test)]
fn vlc_encode_rho(bits: &mut crate::bio::BitWriter, rho: u8) {
  for &(cwd, cwd_len, r) in &VLC_QUAD {
    if r == rho {
      bits.write_bits(cwd, cwd_len);
      return;
    }
  }
}

/// Unsigned magnitude-exponent code: short unary prefix, 5-bit escape.
fn uvlc_decode(bits: &mut BitReader<'_>) -> u32 {
  if bits.read_bit() == 0 {
    return 1;
  }
  if bits.read_bit() == 0 {
    return 2;
  }
  if bits.read_bit() == 0 {
    return 3;
  }
  4 + bits.read_bits(5)
}

#[cfg(test)]
fn uvlc_encode(bits: &mut crate::bio::BitWriter, u: u32) {
  match u {
    1 => bits.write_bits(0b0, 1),
    2 => bits.write_bits(0b10, 2),
    3 => bits.write_bits(0b110, 3),
    _ => {
      bits.write_bits(0b111, 3);
      bits.write_bits(u - 4, 5);
    }
  }
}

/// Splits a cleanup segment into its MagSgn region and the MEL/VLC
/// tail, whose length is framed in the final two bytes.
fn split_segment(data: &[u8]) -> Result<(&[u8], &[u8])> {
  if data.len() < 2 {
    return Err(Error::truncated("HT cleanup segment shorter than 2 bytes"));
  }
  let len = data.len();
  let scup = ((data[len - 1] as usize) << 4) | (data[len - 2] as usize & 0x0f);
  if scup < 2 || scup > len || scup > 4079 {
    return Err(Error::structural(format!(
      "HT cleanup segment tail length {} out of range",
      scup
    )));
  }
  Ok((&data[..len - scup], &data[len - scup..len - 2]))
}

pub struct HtDecoder {
  w: usize,
  h: usize,
  pub data: Vec<i32>,
}

impl HtDecoder {
  pub fn new() -> Self {
    Self {
      w: 0,
      h: 0,
      data: Vec::new(),
    }
  }

  fn significant(&self, x: isize, y: isize) -> bool {
    if x < 0 || y < 0 || x >= self.w as isize || y >= self.h as isize {
      return false;
    }
    self.data[y as usize * self.w + x as usize] != 0
  }

  /// Quad context: whether any already-decoded neighbour quad touched
  /// this quad's border. Zero-context quads are MEL-coded.
  fn quad_context(&self, qx: usize, qy: usize) -> u8 {
    let (qx, qy) = (qx as isize, qy as isize);
    let above = (qx - 1..=qx + 2).any(|x| self.significant(x, qy - 1));
    let left = self.significant(qx - 1, qy) || self.significant(qx - 1, qy + 1);
    u8::from(above || left)
  }

  /// Decodes one HT cleanup segment into the block samples. Values are
  /// in the shared fractional-bit scale of the Tier-1 path.
  pub fn decode_cblk(&mut self, w: usize, h: usize, cleanup: &[u8]) -> Result<()> {
    self.w = w;
    self.h = h;
    self.data.clear();
    self.data.resize(w * h, 0);
    if cleanup.is_empty() {
      return Ok(());
    }
    let (magsgn, tail) = split_segment(cleanup)?;
    let mut magsgn = BitReader::new(magsgn);
    let mut mel = MelDecoder::new(tail);

    for qy in (0..h).step_by(2) {
      for qx in (0..w).step_by(2) {
        let ctx = self.quad_context(qx, qy);
        // Zero-context quads go through the MEL run coder; quads with
        // significant neighbours always carry a VLC codeword.
        if ctx == 0 && !mel.decode() {
          continue;
        }
        let rho = vlc_decode_rho(mel.reader());
        if rho == 0 {
          continue;
        }
        let u = uvlc_decode(mel.reader());
        for (i, &(dx, dy)) in [(0, 0), (0, 1), (1, 0), (1, 1)].iter().enumerate() {
          if (rho >> i) & 1 == 0 {
            continue;
          }
          let (x, y) = (qx + dx, qy + dy);
          if x >= w || y >= h {
            // Pattern bits outside the block are a stream error.
            return Err(Error::structural(
              "HT quad pattern addresses samples outside the block",
            ));
          }
          let negative = magsgn.read_bit() == 1;
          let mag = magsgn.read_bits(u.min(31)) as i32;
          let stored = 2 * mag + 1;
          self.data[y * w + x] = if negative { -stored } else { stored };
        }
        if magsgn.exhausted() {
          return Err(Error::truncated("HT MagSgn stream exhausted"));
        }
      }
    }
    Ok(())
  }

  pub fn samples(&self) -> &[i32] {
    &self.data[..self.w * self.h]
  }
}

impl Default for HtDecoder {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bio::BitWriter;
  use rand::{rngs::StdRng, Rng, SeedableRng};

  /// Encoder mirror used to exercise the decoder.
  struct HtEncoder {
    w: usize,
    h: usize,
    coeffs: Vec<i32>,
    magsgn: BitWriter,
    melvlc: BitWriter,
    k: usize,
    pending_zeros: u32,
  }

  impl HtEncoder {
    fn new(w: usize, h: usize, coeffs: &[i32]) -> Self {
      Self {
        w,
        h,
        coeffs: coeffs.to_vec(),
        magsgn: BitWriter::new(),
        melvlc: BitWriter::new(),
        k: 0,
        pending_zeros: 0,
      }
    }

    fn mel_emit(&mut self, significant: bool) {
      if !significant {
        self.pending_zeros += 1;
        self.flush_complete_runs();
        return;
      }
      // Terminate the open partial run with a 0 bit + e-bit count.
      let e = MEL_E[self.k];
      self.melvlc.write_bit(0);
      self.melvlc.write_bits(self.pending_zeros, e);
      self.k = self.k.saturating_sub(1);
      self.pending_zeros = 0;
    }

    fn flush_complete_runs(&mut self) {
      loop {
        let e = MEL_E[self.k];
        let run = 1u32 << e;
        if self.pending_zeros < run {
          return;
        }
        self.melvlc.write_bit(1);
        self.pending_zeros -= run;
        self.k = (self.k + 1).min(12);
      }
    }

    fn significant(&self, x: isize, y: isize) -> bool {
      // The encoder sees the final significance map; quads are visited
      // in the same order as the decoder so causal context matches.
      if x < 0 || y < 0 || x >= self.w as isize || y >= self.h as isize {
        return false;
      }
      self.coeffs[y as usize * self.w + x as usize] != 0
    }

    fn quad_context(&self, qx: usize, qy: usize) -> u8 {
      let (qx, qy) = (qx as isize, qy as isize);
      let above = (qx - 1..=qx + 2).any(|x| self.significant(x, qy - 1));
      let left = self.significant(qx - 1, qy) || self.significant(qx - 1, qy + 1);
      u8::from(above || left)
    }

    fn encode(mut self) -> Vec<u8> {
      for qy in (0..self.h).step_by(2) {
        for qx in (0..self.w).step_by(2) {
          let mut rho = 0u8;
          let mut maxmag = 0u32;
          for (i, &(dx, dy)) in [(0, 0), (0, 1), (1, 0), (1, 1)].iter().enumerate() {
            let (x, y) = (qx + dx, qy + dy);
            if x >= self.w || y >= self.h {
              continue;
            }
            let mag = self.coeffs[y * self.w + x].unsigned_abs();
            if mag != 0 {
              rho |= 1 << i;
              maxmag = maxmag.max(mag);
            }
          }
          let ctx = self.quad_context(qx, qy);
          if ctx == 0 {
            self.mel_emit(rho != 0);
            if rho == 0 {
              continue;
            }
          } else if rho == 0 {
            vlc_encode_rho(&mut self.melvlc, 0);
            continue;
          }
          vlc_encode_rho(&mut self.melvlc, rho);
          let u = crate::math::num_bits(maxmag);
          uvlc_encode(&mut self.melvlc, u);
          for (i, &(dx, dy)) in [(0, 0), (0, 1), (1, 0), (1, 1)].iter().enumerate() {
            if (rho >> i) & 1 == 0 {
              continue;
            }
            let (x, y) = (qx + dx, qy + dy);
            let coeff = self.coeffs[y * self.w + x];
            self.magsgn.write_bit(u32::from(coeff < 0));
            self.magsgn.write_bits(coeff.unsigned_abs(), u);
          }
        }
      }
      // Close any open run so the decoder's counts resolve.
      if self.pending_zeros > 0 {
        let e = MEL_E[self.k];
        self.melvlc.write_bit(0);
        self.melvlc.write_bits(self.pending_zeros, e);
      }
      let magsgn = self.magsgn.align();
      let melvlc = self.melvlc.align();
      let mut segment = magsgn;
      segment.extend_from_slice(&melvlc);
      let scup = melvlc.len() + 2;
      assert!(scup <= 4079);
      segment.push((scup & 0x0f) as u8);
      segment.push((scup >> 4) as u8);
      segment
    }
  }

  fn round_trip(w: usize, h: usize, coeffs: &[i32]) {
    let bytes = HtEncoder::new(w, h, coeffs).encode();
    let mut dec = HtDecoder::new();
    dec.decode_cblk(w, h, &bytes).unwrap();
    for (i, &expected) in coeffs.iter().enumerate() {
      assert_eq!(dec.samples()[i] / 2, expected, "sample {}", i);
    }
  }

  #[test]
  fn mel_runs_round_trip() {
    // Significance pattern driving the MEL automaton through growing
    // and shrinking run lengths.
    let events = [
      false, false, false, true, false, true, true, false, false, false, false, false, false,
      false, false, false, true, false,
    ];
    let mut enc = HtEncoder::new(2, 2, &[0; 4]);
    for &e in &events {
      enc.mel_emit(e);
    }
    if enc.pending_zeros > 0 {
      let e = MEL_E[enc.k];
      enc.melvlc.write_bit(0);
      enc.melvlc.write_bits(enc.pending_zeros, e);
    }
    let bytes = enc.melvlc.align();
    let mut mel = MelDecoder::new(&bytes);
    for (i, &e) in events.iter().enumerate() {
      assert_eq!(mel.decode(), e, "event {}", i);
    }
  }

  #[test]
  fn uvlc_round_trip() {
    for u in 1..=35 {
      let mut w = BitWriter::new();
      uvlc_encode(&mut w, u);
      let bytes = w.align();
      let mut r = BitReader::new(&bytes);
      assert_eq!(uvlc_decode(&mut r), u);
    }
  }

  #[test]
  fn empty_block() {
    round_trip(4, 4, &[0; 16]);
  }

  #[test]
  fn dense_block() {
    let coeffs = [5, -3, 1, 7, -1, 2, -9, 4, 6, 0, 0, -2, 3, 1, -1, 8];
    round_trip(4, 4, &coeffs);
  }

  #[test]
  fn random_blocks() {
    let mut rng = StdRng::seed_from_u64(31);
    for _ in 0..20 {
      let w = rng.gen_range(1..13);
      let h = rng.gen_range(1..13);
      let coeffs: Vec<i32> = (0..w * h)
        .map(|_| {
          if rng.gen_bool(0.3) {
            rng.gen_range(-100..100)
          } else {
            0
          }
        })
        .collect();
      round_trip(w, h, &coeffs);
    }
  }

  #[test]
  fn rejects_bad_tail_length() {
    // scup of 0 is outside the legal 2..=4079 range.
    let segment = [0u8, 0u8];
    let mut dec = HtDecoder::new();
    assert!(dec.decode_cblk(2, 2, &segment).is_err());
  }
}
