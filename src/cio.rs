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

//! Big-endian reads over a borrowed marker-segment body.
//!
//! All codestream integers are big-endian; marker handlers read their
//! fields through a `ByteReader` so a short segment surfaces as a
//! truncation error instead of a panic.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

pub struct ByteReader<'a> {
  buf: &'a [u8],
  pos: usize,
}

impl<'a> ByteReader<'a> {
  pub fn new(buf: &'a [u8]) -> Self {
    Self { buf, pos: 0 }
  }

  pub fn remaining(&self) -> usize {
    self.buf.len() - self.pos
  }

  pub fn pos(&self) -> usize {
    self.pos
  }

  fn take(&mut self, n: usize) -> Result<&'a [u8]> {
    if self.remaining() < n {
      return Err(Error::truncated(format!(
        "marker body ends after {} of {} bytes",
        self.remaining(),
        n
      )));
    }
    let slice = &self.buf[self.pos..self.pos + n];
    self.pos += n;
    Ok(slice)
  }

  pub fn read_u8(&mut self) -> Result<u8> {
    Ok(self.take(1)?[0])
  }

  pub fn read_u16(&mut self) -> Result<u16> {
    Ok(BigEndian::read_u16(self.take(2)?))
  }

  pub fn read_u32(&mut self) -> Result<u32> {
    Ok(BigEndian::read_u32(self.take(4)?))
  }

  pub fn read_u64(&mut self) -> Result<u64> {
    Ok(BigEndian::read_u64(self.take(8)?))
  }

  /// Reads an integer of 1, 2 or 4 bytes, as several markers size
  /// their fields by a preceding flag bit.
  pub fn read_sized(&mut self, n: usize) -> Result<u32> {
    match n {
      1 => self.read_u8().map(u32::from),
      2 => self.read_u16().map(u32::from),
      4 => self.read_u32(),
      _ => Err(Error::structural(format!("bad field width {}", n))),
    }
  }

  pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
    self.take(n)
  }

  pub fn skip(&mut self, n: usize) -> Result<()> {
    self.take(n).map(|_| ())
  }

  pub fn rest(&mut self) -> &'a [u8] {
    let slice = &self.buf[self.pos..];
    self.pos = self.buf.len();
    slice
  }
}
