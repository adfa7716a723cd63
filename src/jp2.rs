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

//! JP2 container reading: just enough box structure to validate the
//! signature, collect the JP2H image metadata and hand the embedded
//! codestream to the J2K front-end.

use crate::cio::ByteReader;
use crate::error::{Error, Result};
use crate::image::ChannelType;
use crate::stream::Stream;

const BOX_SIGNATURE: u32 = 0x6a50_2020; // 'jP  '
const BOX_FTYP: u32 = 0x6674_7970;
const BOX_JP2H: u32 = 0x6a70_3268;
const BOX_IHDR: u32 = 0x6968_6472;
const BOX_BPCC: u32 = 0x6270_6363;
const BOX_COLR: u32 = 0x636f_6c72;
const BOX_PCLR: u32 = 0x7063_6c72;
const BOX_CMAP: u32 = 0x636d_6170;
const BOX_CDEF: u32 = 0x6364_6566;
const BOX_RES: u32 = 0x7265_7320;
const BOX_JP2C: u32 = 0x6a70_3263;

const SIGNATURE_MAGIC: u32 = 0x0d0a_870a;

#[derive(Clone, Copy, Debug)]
pub struct BoxHeader {
  pub box_type: u32,
  /// Payload length; `None` means "extends to end of stream".
  pub data_len: Option<u64>,
}

/// Reads one box header: 4-byte size, 4-byte type, 8-byte extended
/// size when size == 1, to-end-of-stream when size == 0.
fn read_box_header(stream: &mut dyn Stream) -> Result<Option<BoxHeader>> {
  if stream.num_bytes_left() == 0 {
    return Ok(None);
  }
  if stream.num_bytes_left() < 8 {
    return Err(Error::truncated("box header shorter than 8 bytes"));
  }
  let mut buf = [0u8; 8];
  stream.read_exact(&mut buf)?;
  let lbox = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
  let tbox = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
  let data_len = match lbox {
    0 => None,
    1 => {
      let mut ext = [0u8; 8];
      stream.read_exact(&mut ext)?;
      let xlbox = u64::from_be_bytes(ext);
      if xlbox < 16 {
        return Err(Error::structural("extended box size below header size"));
      }
      Some(xlbox - 16)
    }
    2..=7 => {
      return Err(Error::structural(format!("illegal box size {}", lbox)));
    }
    n => Some(u64::from(n) - 8),
  };
  Ok(Some(BoxHeader {
    box_type: tbox,
    data_len,
  }))
}

#[derive(Clone, Debug, PartialEq)]
pub enum ColourSpec {
  /// Enumerated colourspace code (16 = sRGB, 17 = grey, 18 = sYCC).
  Enumerated(u32),
  /// Restricted or full ICC profile, handed off unparsed.
  Icc(Vec<u8>),
}

#[derive(Clone, Debug, Default)]
pub struct ChannelDefinition {
  pub channel: u16,
  pub typ: u16,
  pub association: u16,
}

/// Image metadata from the JP2H super-box.
#[derive(Clone, Debug, Default)]
pub struct Jp2Header {
  pub width: u32,
  pub height: u32,
  pub num_comps: u16,
  /// 0xFF means per-component depths in BPCC.
  pub bpc: u8,
  pub bpcc: Vec<u8>,
  pub colour: Option<ColourSpec>,
  pub palette_present: bool,
  pub cmap_present: bool,
  pub channel_defs: Vec<ChannelDefinition>,
  /// Capture/display resolution boxes, raw.
  pub resolution: Option<Vec<u8>>,
}

impl Jp2Header {
  /// CDEF semantics for one component index.
  pub fn channel_type(&self, compno: u16) -> ChannelType {
    for def in &self.channel_defs {
      if def.channel == compno {
        return match def.typ {
          0 => ChannelType::Colour,
          1 => ChannelType::Opacity,
          2 => ChannelType::PremultipliedOpacity,
          _ => ChannelType::Unspecified,
        };
      }
    }
    ChannelType::Unspecified
  }
}

/// Result of walking the container: header metadata plus the span of
/// the embedded codestream.
pub struct Jp2File {
  pub header: Jp2Header,
  pub codestream_offset: u64,
  pub codestream_len: Option<u64>,
}

/// Walks boxes from the current stream position until JP2C.
pub fn read_jp2(stream: &mut dyn Stream) -> Result<Jp2File> {
  // Signature box must come first and match exactly.
  let sig = read_box_header(stream)?
    .ok_or_else(|| Error::structural("empty JP2 file"))?;
  if sig.box_type != BOX_SIGNATURE || sig.data_len != Some(4) {
    return Err(Error::structural("missing JP2 signature box"));
  }
  let mut magic = [0u8; 4];
  stream.read_exact(&mut magic)?;
  if u32::from_be_bytes(magic) != SIGNATURE_MAGIC {
    return Err(Error::structural("corrupt JP2 signature"));
  }

  let ftyp = read_box_header(stream)?
    .ok_or_else(|| Error::structural("JP2 ends after signature"))?;
  if ftyp.box_type != BOX_FTYP {
    return Err(Error::structural("expected ftyp after signature"));
  }
  skip_box(stream, ftyp.data_len)?;

  let mut header: Option<Jp2Header> = None;
  loop {
    let hdr = match read_box_header(stream)? {
      Some(h) => h,
      None => return Err(Error::structural("JP2 file has no codestream box")),
    };
    match hdr.box_type {
      BOX_JP2H => {
        let len = hdr
          .data_len
          .ok_or_else(|| Error::structural("jp2h cannot extend to end of stream"))?;
        let mut body = vec![0u8; len as usize];
        stream.read_exact(&mut body)?;
        header = Some(read_jp2h(&body)?);
      }
      BOX_JP2C => {
        let header =
          header.ok_or_else(|| Error::structural("jp2c before jp2h"))?;
        return Ok(Jp2File {
          header,
          codestream_offset: stream.tell(),
          codestream_len: hdr.data_len,
        });
      }
      _ => skip_box(stream, hdr.data_len)?,
    }
  }
}

fn skip_box(stream: &mut dyn Stream, data_len: Option<u64>) -> Result<()> {
  match data_len {
    Some(len) => {
      if stream.num_bytes_left() < len {
        return Err(Error::truncated("box payload beyond end of stream"));
      }
      stream.skip(len)
    }
    None => {
      let left = stream.num_bytes_left();
      stream.skip(left)
    }
  }
}

/// Parses the JP2H children out of the super-box payload.
fn read_jp2h(body: &[u8]) -> Result<Jp2Header> {
  let mut header = Jp2Header::default();
  let mut seen_ihdr = false;
  let mut pos = 0usize;
  while pos + 8 <= body.len() {
    let lbox = u32::from_be_bytes([body[pos], body[pos + 1], body[pos + 2], body[pos + 3]]);
    let tbox =
      u32::from_be_bytes([body[pos + 4], body[pos + 5], body[pos + 6], body[pos + 7]]);
    if lbox < 8 {
      return Err(Error::structural("malformed box inside jp2h"));
    }
    let end = pos + lbox as usize;
    if end > body.len() {
      return Err(Error::truncated("jp2h child overruns the super-box"));
    }
    let payload = &body[pos + 8..end];
    match tbox {
      BOX_IHDR => {
        let mut r = ByteReader::new(payload);
        header.height = r.read_u32()?;
        header.width = r.read_u32()?;
        header.num_comps = r.read_u16()?;
        header.bpc = r.read_u8()?;
        let compression = r.read_u8()?;
        if compression != 7 {
          return Err(Error::unsupported(format!(
            "JP2 compression type {}",
            compression
          )));
        }
        seen_ihdr = true;
      }
      BOX_BPCC => {
        header.bpcc = payload.to_vec();
      }
      BOX_COLR => {
        let mut r = ByteReader::new(payload);
        let meth = r.read_u8()?;
        let _prec = r.read_u8()?;
        let _approx = r.read_u8()?;
        // First COLR wins per the standard's reader guidance.
        if header.colour.is_none() {
          header.colour = Some(match meth {
            1 => ColourSpec::Enumerated(r.read_u32()?),
            2 | 3 => ColourSpec::Icc(r.rest().to_vec()),
            other => {
              return Err(Error::unsupported(format!(
                "COLR method {}",
                other
              )))
            }
          });
        }
      }
      BOX_PCLR => header.palette_present = true,
      BOX_CMAP => header.cmap_present = true,
      BOX_CDEF => {
        let mut r = ByteReader::new(payload);
        let n = r.read_u16()?;
        for _ in 0..n {
          header.channel_defs.push(ChannelDefinition {
            channel: r.read_u16()?,
            typ: r.read_u16()?,
            association: r.read_u16()?,
          });
        }
      }
      BOX_RES => header.resolution = Some(payload.to_vec()),
      _ => {}
    }
    pos = end;
  }
  if !seen_ihdr {
    return Err(Error::structural("jp2h is missing ihdr"));
  }
  Ok(header)
}
