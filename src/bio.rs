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

/*
==========================================================
   Packet-header bit I/O
==========================================================
*/

//! MSB-first bit reading with the packet-header stuffing rule: a byte
//! following 0xFF carries only 7 payload bits (its MSB is a stuffed 0).

pub struct BitReader<'a> {
  buf: &'a [u8],
  pos: usize,
  /// Last byte loaded, low 8 bits.
  last: u32,
  /// Bits of `last` not yet handed out.
  ct: u32,
  exhausted: bool,
}

impl<'a> BitReader<'a> {
  pub fn new(buf: &'a [u8]) -> Self {
    Self {
      buf,
      pos: 0,
      last: 0,
      ct: 0,
      exhausted: false,
    }
  }

  fn bytein(&mut self) {
    let width = if self.last == 0xff { 7 } else { 8 };
    if self.pos < self.buf.len() {
      self.last = u32::from(self.buf[self.pos]);
      self.pos += 1;
    } else {
      // Past the end of the header the standard behaves as if 0xFF
      // bytes followed; the caller checks `exhausted` afterwards.
      self.last = 0xff;
      self.exhausted = true;
    }
    self.ct = width;
  }

  pub fn read_bit(&mut self) -> u32 {
    if self.ct == 0 {
      self.bytein();
    }
    self.ct -= 1;
    (self.last >> self.ct) & 1
  }

  pub fn read_bits(&mut self, n: u32) -> u32 {
    let mut v = 0;
    for _ in 0..n {
      v = (v << 1) | self.read_bit();
    }
    v
  }

  /// Aligns to the next byte boundary. If the last header byte was
  /// 0xFF its stuffed follower still belongs to the header and is
  /// consumed here.
  pub fn align(&mut self) {
    self.ct = 0;
    if self.last == 0xff {
      self.bytein();
      self.ct = 0;
    }
  }

  /// Bytes consumed so far, including a trailing stuffed byte.
  pub fn num_bytes_read(&self) -> usize {
    self.pos
  }

  pub fn exhausted(&self) -> bool {
    self.exhausted
  }
}

/// Encoder-side dual of [`BitReader`], kept for round-trip tests.
#[cfg(test)]
pub(crate) struct BitWriter {
  out: Vec<u8>,
  cur: u32,
  /// Bits still free in `cur`.
  free: u32,
  width: u32,
}

#[cfg(test)]
impl BitWriter {
  pub fn new() -> Self {
    Self {
      out: Vec::new(),
      cur: 0,
      free: 8,
      width: 8,
    }
  }

  pub fn write_bit(&mut self, bit: u32) {
    self.cur = (self.cur << 1) | (bit & 1);
    self.free -= 1;
    if self.free == 0 {
      self.out.push(self.cur as u8);
      self.width = if self.cur == 0xff { 7 } else { 8 };
      self.free = self.width;
      self.cur = 0;
    }
  }

  pub fn write_bits(&mut self, v: u32, n: u32) {
    for i in (0..n).rev() {
      self.write_bit((v >> i) & 1);
    }
  }

  pub fn align(&mut self) -> Vec<u8> {
    while self.free != self.width {
      self.write_bit(0);
    }
    if self.out.last() == Some(&0xff) {
      self.out.push(0);
    }
    std::mem::take(&mut self.out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trip_with_stuffing() {
    let mut w = BitWriter::new();
    // 16 one-bits force a 0xFF byte and a stuffed follower.
    for _ in 0..16 {
      w.write_bit(1);
    }
    w.write_bits(0b1011, 4);
    let bytes = w.align();
    assert_eq!(bytes[0], 0xff);
    // Stuffed byte has a 0 MSB.
    assert_eq!(bytes[1] & 0x80, 0);

    let mut r = BitReader::new(&bytes);
    for _ in 0..16 {
      assert_eq!(r.read_bit(), 1);
    }
    assert_eq!(r.read_bits(4), 0b1011);
    assert!(!r.exhausted());
  }

  #[test]
  fn align_consumes_stuffed_byte() {
    // Header ending in 0xFF: align must swallow the stuffed follower.
    let bytes = [0xffu8, 0x00, 0xab];
    let mut r = BitReader::new(&bytes);
    assert_eq!(r.read_bits(8), 0xff);
    r.align();
    assert_eq!(r.num_bytes_read(), 2);
  }

  #[test]
  fn reading_past_end_sets_exhausted() {
    let mut r = BitReader::new(&[0x80]);
    assert_eq!(r.read_bit(), 1);
    r.read_bits(12);
    assert!(r.exhausted());
  }
}
