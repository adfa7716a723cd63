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

//! MQ context-adaptive arithmetic decoder (ISO 15444-1 Annex C
//! software conventions), plus the raw bit reader used by selective
//! bypass segments.

/// (Qe, NMPS, NLPS, SWITCH) probability automaton.
#[rustfmt::skip]
const QE_TABLE: [(u32, u8, u8, u8); 47] = [
  (0x5601,  1,  1, 1), (0x3401,  2,  6, 0), (0x1801,  3,  9, 0), (0x0AC1,  4, 12, 0),
  (0x0521,  5, 29, 0), (0x0221, 38, 33, 0), (0x5601,  7,  6, 1), (0x5401,  8, 14, 0),
  (0x4801,  9, 14, 0), (0x3801, 10, 14, 0), (0x3001, 11, 17, 0), (0x2401, 12, 18, 0),
  (0x1C01, 13, 20, 0), (0x1601, 29, 21, 0), (0x5601, 15, 14, 1), (0x5401, 16, 14, 0),
  (0x5101, 17, 15, 0), (0x4801, 18, 16, 0), (0x3801, 19, 17, 0), (0x3401, 20, 18, 0),
  (0x3001, 21, 19, 0), (0x2801, 22, 19, 0), (0x2401, 23, 20, 0), (0x2201, 24, 21, 0),
  (0x1C01, 25, 22, 0), (0x1801, 26, 23, 0), (0x1601, 27, 24, 0), (0x1401, 28, 25, 0),
  (0x1201, 29, 26, 0), (0x1101, 30, 27, 0), (0x0AC1, 31, 28, 0), (0x09C1, 32, 29, 0),
  (0x08A1, 33, 30, 0), (0x0521, 34, 31, 0), (0x0441, 35, 32, 0), (0x02A1, 36, 33, 0),
  (0x0221, 37, 34, 0), (0x0141, 38, 35, 0), (0x0111, 39, 36, 0), (0x0085, 40, 37, 0),
  (0x0049, 41, 38, 0), (0x0025, 42, 39, 0), (0x0015, 43, 40, 0), (0x0009, 44, 41, 0),
  (0x0005, 45, 42, 0), (0x0001, 45, 43, 0), (0x5601, 46, 46, 0),
];

/// Context numbering shared with the T1 LUTs.
pub const CTX_ZC: usize = 0;
pub const CTX_SC: usize = 9;
pub const CTX_MAG: usize = 14;
pub const CTX_AGG: usize = 17;
pub const CTX_UNI: usize = 18;
pub const NUM_CTXS: usize = 19;

#[derive(Clone, Copy, Default)]
struct CtxState {
  index: u8,
  mps: u8,
}

pub struct MqDecoder {
  data: Vec<u8>,
  bp: usize,
  c: u32,
  a: u32,
  ct: u32,
  ctxs: [CtxState; NUM_CTXS],
  cur: usize,
  /// Raw-mode state for bypass segments.
  raw_c: u32,
  raw_ct: u32,
}

impl MqDecoder {
  pub fn new() -> Self {
    Self {
      data: Vec::new(),
      bp: 0,
      c: 0,
      a: 0,
      ct: 0,
      ctxs: [CtxState::default(); NUM_CTXS],
      cur: 0,
      raw_c: 0,
      raw_ct: 0,
    }
  }

  pub fn reset_contexts(&mut self) {
    self.ctxs = [CtxState::default(); NUM_CTXS];
    self.ctxs[CTX_UNI].index = 46;
    self.ctxs[CTX_AGG].index = 3;
    self.ctxs[CTX_ZC].index = 4;
  }

  fn byte_at(&self, i: usize) -> u32 {
    // Bytes past the segment behave as 0xFF (marker territory).
    self.data.get(i).copied().map_or(0xff, u32::from)
  }

  fn bytein(&mut self) {
    if self.byte_at(self.bp) == 0xff {
      if self.byte_at(self.bp + 1) > 0x8f {
        self.c += 0xff00;
        self.ct = 8;
      } else {
        self.bp += 1;
        self.c += self.byte_at(self.bp) << 9;
        self.ct = 7;
      }
    } else {
      self.bp += 1;
      self.c += self.byte_at(self.bp) << 8;
      self.ct = 8;
    }
  }

  /// (Re-)initializes on a segment. Context states persist across
  /// segments unless `reset_contexts` is called.
  pub fn init(&mut self, data: &[u8]) {
    self.data.clear();
    self.data.extend_from_slice(data);
    self.bp = 0;
    self.c = self.byte_at(0) << 16;
    self.bytein();
    self.c <<= 7;
    self.ct -= 7;
    self.a = 0x8000;
  }

  pub fn set_context(&mut self, ctx: usize) {
    self.cur = ctx;
  }

  pub fn decode_ctx(&mut self, ctx: usize) -> u32 {
    self.cur = ctx;
    self.decode()
  }

  pub fn decode(&mut self) -> u32 {
    let state = self.ctxs[self.cur];
    let (qe, nmps, nlps, switch) = QE_TABLE[state.index as usize];
    let d;
    self.a = self.a.wrapping_sub(qe);
    if (self.c >> 16) >= qe {
      self.c -= qe << 16;
      if self.a & 0x8000 == 0 {
        // MPS exchange.
        if self.a < qe {
          d = 1 - u32::from(state.mps);
          if switch == 1 {
            self.ctxs[self.cur].mps = 1 - state.mps;
          }
          self.ctxs[self.cur].index = nlps;
        } else {
          d = u32::from(state.mps);
          self.ctxs[self.cur].index = nmps;
        }
        self.renorm();
      } else {
        d = u32::from(state.mps);
      }
    } else {
      // LPS exchange.
      if self.a < qe {
        d = u32::from(state.mps);
        self.ctxs[self.cur].index = nmps;
      } else {
        d = 1 - u32::from(state.mps);
        if switch == 1 {
          self.ctxs[self.cur].mps = 1 - state.mps;
        }
        self.ctxs[self.cur].index = nlps;
      }
      self.a = qe;
      self.renorm();
    }
    d
  }

  fn renorm(&mut self) {
    loop {
      if self.ct == 0 {
        self.bytein();
      }
      self.a <<= 1;
      self.c <<= 1;
      self.ct -= 1;
      if self.a & 0x8000 != 0 {
        break;
      }
    }
  }

  /// Switches to raw (bypass) reading on the same segment data,
  /// starting at a byte boundary.
  pub fn init_raw(&mut self, data: &[u8]) {
    self.data.clear();
    self.data.extend_from_slice(data);
    self.bp = 0;
    self.raw_c = 0;
    self.raw_ct = 0;
  }

  pub fn raw_decode(&mut self) -> u32 {
    if self.raw_ct == 0 {
      let width = if self.raw_c == 0xff { 7 } else { 8 };
      self.raw_c = if self.bp < self.data.len() {
        let b = u32::from(self.data[self.bp]);
        self.bp += 1;
        b
      } else {
        0xff
      };
      self.raw_ct = width;
    }
    self.raw_ct -= 1;
    (self.raw_c >> self.raw_ct) & 1
  }
}

impl Default for MqDecoder {
  fn default() -> Self {
    let mut mqc = Self::new();
    mqc.reset_contexts();
    mqc
  }
}

/// Annex C encoder, kept for round-trip tests only.
#[cfg(test)]
pub(crate) struct MqEncoder {
  out: Vec<u8>,
  bp: usize,
  c: u32,
  a: u32,
  ct: u32,
  ctxs: [CtxState; NUM_CTXS],
}

#[cfg(test)]
impl MqEncoder {
  pub fn new() -> Self {
    let mut ctxs = [CtxState::default(); NUM_CTXS];
    ctxs[CTX_UNI].index = 46;
    ctxs[CTX_AGG].index = 3;
    ctxs[CTX_ZC].index = 4;
    Self {
      // out[0] stands in for the byte before the buffer.
      out: vec![0],
      bp: 0,
      c: 0,
      a: 0x8000,
      ct: 12,
      ctxs,
    }
  }

  pub fn encode(&mut self, d: u32, ctx: usize) {
    let state = self.ctxs[ctx];
    let (qe, nmps, nlps, switch) = QE_TABLE[state.index as usize];
    if d == u32::from(state.mps) {
      self.a -= qe;
      if self.a & 0x8000 == 0 {
        if self.a < qe {
          self.a = qe;
        } else {
          self.c += qe;
        }
        self.ctxs[ctx].index = nmps;
        self.renorm();
      } else {
        self.c += qe;
      }
    } else {
      self.a -= qe;
      if self.a < qe {
        self.c += qe;
      } else {
        self.a = qe;
      }
      if switch == 1 {
        self.ctxs[ctx].mps = 1 - state.mps;
      }
      self.ctxs[ctx].index = nlps;
      self.renorm();
    }
  }

  fn renorm(&mut self) {
    loop {
      self.a <<= 1;
      self.c <<= 1;
      self.ct -= 1;
      if self.ct == 0 {
        self.byteout();
      }
      if self.a & 0x8000 != 0 {
        break;
      }
    }
  }

  fn byteout(&mut self) {
    if self.out[self.bp] == 0xff {
      self.bp += 1;
      self.push_at_bp((self.c >> 20) as u8);
      self.c &= 0xf_ffff;
      self.ct = 7;
    } else if self.c < 0x800_0000 {
      self.bp += 1;
      self.push_at_bp((self.c >> 19) as u8);
      self.c &= 0x7_ffff;
      self.ct = 8;
    } else {
      self.out[self.bp] += 1;
      if self.out[self.bp] == 0xff {
        self.c &= 0x7ff_ffff;
        self.bp += 1;
        self.push_at_bp((self.c >> 20) as u8);
        self.c &= 0xf_ffff;
        self.ct = 7;
      } else {
        self.bp += 1;
        self.push_at_bp((self.c >> 19) as u8);
        self.c &= 0x7_ffff;
        self.ct = 8;
      }
    }
  }

  fn push_at_bp(&mut self, byte: u8) {
    if self.bp == self.out.len() {
      self.out.push(byte);
    } else {
      self.out[self.bp] = byte;
    }
  }

  pub fn flush(mut self) -> Vec<u8> {
    // SETBITS
    let tempc = self.c + self.a;
    self.c |= 0xffff;
    if self.c >= tempc {
      self.c -= 0x8000;
    }
    self.c <<= self.ct;
    self.byteout();
    self.c <<= self.ct;
    self.byteout();
    if self.out[self.bp] != 0xff {
      self.bp += 1;
    }
    self.out.truncate(self.bp);
    self.out.drain(..1);
    self.out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::{rngs::StdRng, Rng, SeedableRng};

  #[test]
  fn round_trip_single_context() {
    let bits = [1u32, 0, 1, 1, 0, 0, 0, 1, 0, 1, 1, 1, 1, 0];
    let mut enc = MqEncoder::new();
    for &b in &bits {
      enc.encode(b, CTX_UNI);
    }
    let bytes = enc.flush();

    let mut dec = MqDecoder::default();
    dec.init(&bytes);
    for &b in &bits {
      assert_eq!(dec.decode_ctx(CTX_UNI), b);
    }
  }

  #[test]
  fn round_trip_random_contexts() {
    let mut rng = StdRng::seed_from_u64(1234);
    for trial in 0..20 {
      let n = rng.gen_range(16..512);
      let stream: Vec<(u32, usize)> = (0..n)
        .map(|_| (rng.gen_range(0..2u32), rng.gen_range(0..NUM_CTXS)))
        .collect();
      let mut enc = MqEncoder::new();
      for &(b, ctx) in &stream {
        enc.encode(b, ctx);
      }
      let bytes = enc.flush();

      let mut dec = MqDecoder::default();
      dec.init(&bytes);
      for (i, &(b, ctx)) in stream.iter().enumerate() {
        assert_eq!(dec.decode_ctx(ctx), b, "trial {} bit {}", trial, i);
      }
    }
  }

  #[test]
  fn raw_mode_reads_stuffed_bits() {
    let mut dec = MqDecoder::default();
    dec.init_raw(&[0b1010_1010, 0xff, 0b0101_0101]);
    let first: Vec<u32> = (0..8).map(|_| dec.raw_decode()).collect();
    assert_eq!(first, vec![1, 0, 1, 0, 1, 0, 1, 0]);
    let ff: Vec<u32> = (0..8).map(|_| dec.raw_decode()).collect();
    assert_eq!(ff, vec![1; 8]);
    // Byte after 0xFF carries 7 bits.
    let tail: Vec<u32> = (0..7).map(|_| dec.raw_decode()).collect();
    assert_eq!(tail, vec![1, 0, 1, 0, 1, 0, 1]);
  }
}
