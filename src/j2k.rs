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

//! Codestream front-end: marker tokenisation, the header state
//! machine, and the per-marker readers populating `CodingParams`.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::cio::ByteReader;
use crate::error::{Error, Result};
use crate::event::{EventType, Logger};
use crate::image::{Image, ImageComponent, Rect};
use crate::params::*;
use crate::stream::Stream;
use crate::tcd::PacketData;

bitflags! {
  /// Decoder states in which a marker is legal.
  pub struct J2KState: u32 {
    const NONE   = 0x0000;
    /// Expecting SOC.
    const MHSOC  = 0x0001;
    /// Expecting SIZ.
    const MHSIZ  = 0x0002;
    /// Main header.
    const MH     = 0x0004;
    /// Start of a tile-part header (SOT legal).
    const TPHSOT = 0x0008;
    /// Tile-part header.
    const TPH    = 0x0010;
    /// Past EOC.
    const MT     = 0x0020;
    /// Inside tile-part data.
    const DATA   = 0x0080;
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
  SOC,
  SOT,
  SOD,
  EOC,
  CAP,
  SIZ,
  COD,
  COC,
  RGN,
  QCD,
  QCC,
  POC,
  TLM,
  PLM,
  PLT,
  PPM,
  PPT,
  SOP,
  EPH,
  CRG,
  COM,
  CBD,
  MCT,
  MCC,
  MCO,
  UNK(u16),
}

impl From<u16> for Marker {
  fn from(num: u16) -> Self {
    match num {
      0xff4f => Self::SOC,
      0xff90 => Self::SOT,
      0xff93 => Self::SOD,
      0xffd9 => Self::EOC,
      0xff50 => Self::CAP,
      0xff51 => Self::SIZ,
      0xff52 => Self::COD,
      0xff53 => Self::COC,
      0xff5e => Self::RGN,
      0xff5c => Self::QCD,
      0xff5d => Self::QCC,
      0xff5f => Self::POC,
      0xff55 => Self::TLM,
      0xff57 => Self::PLM,
      0xff58 => Self::PLT,
      0xff60 => Self::PPM,
      0xff61 => Self::PPT,
      0xff91 => Self::SOP,
      0xff92 => Self::EPH,
      0xff63 => Self::CRG,
      0xff64 => Self::COM,
      0xff78 => Self::CBD,
      0xff75 => Self::MCC,
      0xff74 => Self::MCT,
      0xff77 => Self::MCO,
      num => Self::UNK(num),
    }
  }
}

impl Marker {
  pub fn as_u16(&self) -> u16 {
    match self {
      Self::SOC => 0xff4f,
      Self::SOT => 0xff90,
      Self::SOD => 0xff93,
      Self::EOC => 0xffd9,
      Self::CAP => 0xff50,
      Self::SIZ => 0xff51,
      Self::COD => 0xff52,
      Self::COC => 0xff53,
      Self::RGN => 0xff5e,
      Self::QCD => 0xff5c,
      Self::QCC => 0xff5d,
      Self::POC => 0xff5f,
      Self::TLM => 0xff55,
      Self::PLM => 0xff57,
      Self::PLT => 0xff58,
      Self::PPM => 0xff60,
      Self::PPT => 0xff61,
      Self::SOP => 0xff91,
      Self::EPH => 0xff92,
      Self::CRG => 0xff63,
      Self::COM => 0xff64,
      Self::CBD => 0xff78,
      Self::MCC => 0xff75,
      Self::MCT => 0xff74,
      Self::MCO => 0xff77,
      Self::UNK(num) => *num,
    }
  }

  /// Markers always start 0xFFxx; anything below is stream corruption
  /// rather than an unknown-but-skippable marker.
  pub fn is_invalid(&self) -> bool {
    self.as_u16() < 0xff00
  }

  /// No length field follows these.
  pub fn is_delimiter(&self) -> bool {
    matches!(self, Self::SOC | Self::SOD | Self::EOC | Self::EPH)
  }

  /// Where this marker may legally appear.
  pub fn states(&self) -> J2KState {
    match self {
      Self::SOC => J2KState::MHSOC,
      Self::SIZ => J2KState::MHSIZ,
      Self::SOT => J2KState::MH | J2KState::TPHSOT,
      Self::SOD => J2KState::TPH,
      Self::EOC => J2KState::MH | J2KState::TPHSOT,
      Self::CAP | Self::TLM | Self::PLM | Self::PPM | Self::CRG | Self::CBD => J2KState::MH,
      Self::PLT | Self::PPT => J2KState::TPH,
      Self::COD | Self::COC | Self::RGN | Self::QCD | Self::QCC | Self::POC => {
        J2KState::MH | J2KState::TPH
      }
      Self::COM | Self::MCT | Self::MCC | Self::MCO => J2KState::MH | J2KState::TPH,
      Self::SOP | Self::EPH => J2KState::NONE,
      Self::UNK(_) => J2KState::MH | J2KState::TPH,
    }
  }
}

/// (id, offset, length) of every marker segment seen, append-only
/// during the header scans.
#[derive(Debug, Default)]
pub struct MarkerCache {
  pub records: Vec<MarkerRecord>,
  /// Offset of SOC.
  pub main_header_start: u64,
  /// Offset just past the last main-header marker.
  pub main_header_end: u64,
  /// Offset of the first SOT.
  pub tile_stream_start: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarkerRecord {
  pub id: u16,
  pub offset: u64,
  pub length: u32,
}

impl MarkerCache {
  fn push(&mut self, id: u16, offset: u64, length: u32) {
    self.records.push(MarkerRecord { id, offset, length });
  }
}

/// Raw MCT/MCC/MCO records kept until tile init resolves them.
#[derive(Debug, Default, Clone)]
pub struct MctRecords {
  /// (index, array type, element type, payload).
  pub mct: Vec<(u8, u8, u8, Vec<u8>)>,
  pub mcc_seen: bool,
  pub mco_seen: bool,
}

const MCT_ARRAY_DECORRELATION: u8 = 0;
const MCT_ARRAY_OFFSET: u8 = 2;

/// J2K codestream decompressor front-end: walks markers, fills in the
/// coding parameters and caches per-tile packet bytes.
pub struct CodestreamDecoder {
  stream: Box<dyn Stream>,
  pub cp: CodingParams,
  pub image: Image,
  pub cache: MarkerCache,
  pub logger: Logger,
  state: J2KState,
  /// Tile index of the tile-part being parsed.
  cur_tile: u16,
  /// Offset of the current SOT marker.
  sot_start: u64,
  /// Psot of the current tile-part (0 = run to next SOT/EOC).
  cur_psot: u64,
  /// Packet bytes per tile, in TPsot order.
  pub tile_data: BTreeMap<u16, Vec<PacketData>>,
  pub tiles_truncated: Vec<u16>,
  /// Tiles whose tile-parts were structurally corrupt.
  pub tiles_failed: Vec<u16>,
  pub mct_records: MctRecords,
  pub crg: Vec<(u16, u16)>,
  /// Component depths from CBD (multi-component collections).
  pub cbd_depths: Vec<u8>,
  header_done: bool,
}

impl CodestreamDecoder {
  pub fn new(stream: Box<dyn Stream>, logger: Logger) -> Self {
    Self {
      stream,
      cp: CodingParams::default(),
      image: Image::default(),
      cache: MarkerCache::default(),
      logger,
      state: J2KState::MHSOC,
      cur_tile: 0,
      sot_start: 0,
      cur_psot: 0,
      tile_data: BTreeMap::new(),
      tiles_truncated: Vec::new(),
      tiles_failed: Vec::new(),
      mct_records: MctRecords::default(),
      crg: Vec::new(),
      cbd_depths: Vec::new(),
      header_done: false,
    }
  }

  pub fn stream_mut(&mut self) -> &mut dyn Stream {
    &mut *self.stream
  }

  fn read_marker_id(&mut self) -> Result<Marker> {
    let mut buf = [0u8; 2];
    self.stream.read_exact(&mut buf)?;
    let id = u16::from_be_bytes(buf);
    let marker = Marker::from(id);
    if marker.is_invalid() {
      return Err(Error::InvalidMarker(id));
    }
    Ok(marker)
  }

  /// Reads the segment body of a non-delimiter marker: a 2-byte
  /// length (inclusive of itself) followed by `length - 2` bytes.
  fn read_segment_body(&mut self) -> Result<Vec<u8>> {
    let mut buf = [0u8; 2];
    self.stream.read_exact(&mut buf)?;
    let length = u16::from_be_bytes(buf);
    if length < 2 {
      return Err(Error::structural(format!(
        "marker segment with illegal length {}",
        length
      )));
    }
    let mut body = vec![0u8; length as usize - 2];
    self.stream.read_exact(&mut body)?;
    Ok(body)
  }

  /// Main-header scan: SOC, SIZ, then every marker up to the first
  /// SOT. Verifies that COD and QCD were present.
  pub fn read_header(&mut self) -> Result<()> {
    if self.header_done {
      return Ok(());
    }
    self.cache.main_header_start = self.stream.tell();
    let soc = self.read_marker_id()?;
    if soc != Marker::SOC {
      return Err(Error::structural("expected SOC at start of codestream"));
    }
    self.cache.push(soc.as_u16(), self.cache.main_header_start, 2);
    self.state = J2KState::MHSIZ;

    let offset = self.stream.tell();
    let marker = self.read_marker_id()?;
    if marker != Marker::SIZ {
      return Err(Error::structural("expected SIZ immediately after SOC"));
    }
    let body = self.read_segment_body()?;
    self.cache.push(marker.as_u16(), offset, body.len() as u32 + 4);
    self.read_siz(&body)?;
    self.state = J2KState::MH;

    loop {
      let offset = self.stream.tell();
      let marker = self.read_marker_id()?;
      if marker == Marker::SOT {
        if !self.cp.default_tcp.cod_seen {
          return Err(Error::structural("main header is missing a COD marker"));
        }
        if !self.cp.default_tcp.qcd_seen {
          return Err(Error::structural("main header is missing a QCD marker"));
        }
        self.cache.main_header_end = offset;
        self.cache.tile_stream_start = offset;
        // Rewind so the tile-part scan sees the SOT again.
        self.stream.seek(offset)?;
        self.state = J2KState::TPHSOT;
        self.header_done = true;
        return Ok(());
      }
      if marker == Marker::EOC {
        return Err(Error::structural("EOC before any tile-part"));
      }
      if !marker.states().contains(J2KState::MH) {
        return Err(Error::structural(format!(
          "marker 0x{:04x} is not legal in the main header",
          marker.as_u16()
        )));
      }
      let body = self.read_segment_body()?;
      self.cache.push(marker.as_u16(), offset, body.len() as u32 + 4);
      self.dispatch(marker, &body, None)?;
    }
  }

  /// Tile-part scan from the current position to EOC (or stream end).
  /// Caches every tile's packet bytes for later decoding.
  pub fn read_tile_parts(&mut self) -> Result<()> {
    loop {
      if self.stream.num_bytes_left() < 2 {
        // Missing EOC: tolerated, everything cached so far stands.
        event_msg!(self.logger, EventType::Warning, "stream ends without EOC");
        return Ok(());
      }
      let offset = self.stream.tell();
      let marker = match self.read_marker_id() {
        Ok(m) => m,
        Err(Error::InvalidMarker(id)) => {
          return Err(Error::InvalidMarker(id));
        }
        Err(e) => return Err(e),
      };
      match marker {
        Marker::EOC => {
          self.cache.push(marker.as_u16(), offset, 2);
          self.state = J2KState::MT;
          return Ok(());
        }
        Marker::SOT => {
          self.sot_start = offset;
          let body = self.read_segment_body()?;
          self.cache.push(marker.as_u16(), offset, body.len() as u32 + 4);
          match self.read_sot(&body) {
            Ok(()) => {
              self.state = J2KState::TPH;
              self.read_tile_part_header()?;
            }
            Err(e) => {
              // A corrupt SOT fails its tile only: when the tile-part
              // length is readable the scan skips past it and other
              // tiles decode normally.
              event_msg!(self.logger, EventType::Error, "{}", e);
              let psot = if body.len() >= 6 {
                u32::from_be_bytes([body[2], body[3], body[4], body[5]]) as u64
              } else {
                0
              };
              let tile = if body.len() >= 2 {
                u16::from_be_bytes([body[0], body[1]])
              } else {
                0
              };
              if !self.tiles_failed.contains(&tile) {
                self.tiles_failed.push(tile);
              }
              if psot < 12 {
                return Err(e);
              }
              let consumed = self.stream.tell() - offset;
              let remaining = psot.saturating_sub(consumed);
              if remaining > self.stream.num_bytes_left() {
                return Err(e);
              }
              self.stream.skip(remaining)?;
              self.state = J2KState::TPHSOT;
            }
          }
        }
        other => {
          return Err(Error::structural(format!(
            "expected SOT or EOC in the tile stream, found 0x{:04x}",
            other.as_u16()
          )));
        }
      }
    }
  }

  /// TLM random access: parses only the tile-parts at the given
  /// (offset, length) spans, all belonging to `expect_tile`. Reads
  /// exactly the spanned bytes.
  pub fn read_tile_parts_at(&mut self, spans: &[(u64, u32)], expect_tile: u16) -> Result<()> {
    for &(offset, length) in spans {
      self.stream.seek(offset)?;
      let marker = self.read_marker_id()?;
      if marker != Marker::SOT {
        return Err(Error::CorruptTlm(format!(
          "TLM span at {} does not start with SOT",
          offset
        )));
      }
      self.sot_start = offset;
      let body = self.read_segment_body()?;
      self.cache.push(marker.as_u16(), offset, body.len() as u32 + 4);
      self.read_sot(&body)?;
      if self.cur_tile != expect_tile {
        return Err(Error::CorruptTlm(format!(
          "TLM span at {} belongs to tile {}, expected {}",
          offset, self.cur_tile, expect_tile
        )));
      }
      // Cross-check the signalled span length against Psot.
      if self.cur_psot != 0 && self.cur_psot != u64::from(length) {
        event_msg!(
          self.logger,
          EventType::Warning,
          "TLM length {} disagrees with Psot {} for tile {}",
          length,
          self.cur_psot,
          self.cur_tile
        );
        self.cur_psot = self.cur_psot.min(u64::from(length));
      }
      self.state = J2KState::TPH;
      self.read_tile_part_header()?;
    }
    Ok(())
  }

  /// Forgets all tile-part state so a sequential scan can restart
  /// from the first SOT (used when random access is abandoned).
  pub fn reset_tile_scan(&mut self) -> Result<()> {
    self.stream.seek(self.cache.tile_stream_start)?;
    self.tile_data.clear();
    self.tiles_truncated.clear();
    self.tiles_failed.clear();
    let n = self.cp.tcps.len();
    self.cp.tcps = vec![None; n];
    self.cp.plt = PacketLengthCache::new();
    self.state = J2KState::TPHSOT;
    Ok(())
  }

  /// TPH loop: dispatch markers until SOD, then capture packet data.
  fn read_tile_part_header(&mut self) -> Result<()> {
    loop {
      let offset = self.stream.tell();
      let marker = self.read_marker_id()?;
      if marker == Marker::SOD {
        self.cache.push(marker.as_u16(), offset, 2);
        self.state = J2KState::DATA;
        return self.read_tile_part_data();
      }
      if !marker.states().contains(J2KState::TPH) {
        return Err(Error::structural(format!(
          "marker 0x{:04x} is not legal in a tile-part header",
          marker.as_u16()
        )));
      }
      let body = self.read_segment_body()?;
      self.cache.push(marker.as_u16(), offset, body.len() as u32 + 4);
      let tile = self.cur_tile;
      self.dispatch(marker, &body, Some(tile))?;
    }
  }

  /// Packet data spans from past SOD to the Psot boundary, or to the
  /// next SOT/EOC when Psot is zero.
  fn read_tile_part_data(&mut self) -> Result<()> {
    let data_start = self.stream.tell();
    let len = if self.cur_psot == 0 {
      self.scan_to_next_marker()?
    } else {
      let consumed = data_start - self.sot_start;
      if (self.cur_psot) < consumed {
        return Err(Error::CorruptSot(format!(
          "Psot {} smaller than tile-part header",
          self.cur_psot
        )));
      }
      self.cur_psot - consumed
    };
    let available = self.stream.num_bytes_left();
    let truncated = available < len;
    let take = len.min(available);
    let data = if let Some(buf) = self.stream.as_memory() {
      let range = (data_start as usize, (data_start + take) as usize);
      let buf = buf.clone();
      self.stream.skip(take)?;
      PacketData::Shared { buf, range }
    } else {
      let mut owned = vec![0u8; take as usize];
      self.stream.read_exact(&mut owned)?;
      PacketData::Owned(owned)
    };
    self.tile_data.entry(self.cur_tile).or_default().push(data);
    if truncated {
      event_msg!(
        self.logger,
        EventType::Warning,
        "tile {} truncated inside a tile-part ({} of {} bytes)",
        self.cur_tile,
        take,
        len
      );
      if !self.tiles_truncated.contains(&self.cur_tile) {
        self.tiles_truncated.push(self.cur_tile);
      }
    }
    self.state = J2KState::TPHSOT;
    Ok(())
  }

  /// Distance from the current position to the next SOT or EOC.
  /// Packet bodies cannot contain 0xFF followed by a byte above 0x8F,
  /// so scanning for the marker pattern is unambiguous.
  fn scan_to_next_marker(&mut self) -> Result<u64> {
    let start = self.stream.tell();
    if let Some(buf) = self.stream.as_memory() {
      let bytes = &buf[start as usize..];
      for i in 0..bytes.len().saturating_sub(1) {
        if bytes[i] == 0xff && (bytes[i + 1] == 0x90 || bytes[i + 1] == 0xd9) {
          return Ok(i as u64);
        }
      }
      return Ok(bytes.len() as u64);
    }
    let mut len = 0u64;
    let mut prev = 0u8;
    let mut chunk = [0u8; 4096];
    loop {
      let n = self.stream.read(&mut chunk)?;
      if n == 0 {
        self.stream.seek(start)?;
        return Ok(len);
      }
      for (i, &b) in chunk[..n].iter().enumerate() {
        if prev == 0xff && (b == 0x90 || b == 0xd9) {
          let found = len + i as u64 - 1;
          self.stream.seek(start)?;
          return Ok(found);
        }
        prev = b;
      }
      len += n as u64;
    }
  }

  fn dispatch(&mut self, marker: Marker, body: &[u8], tile: Option<u16>) -> Result<()> {
    match marker {
      Marker::CAP => self.read_cap(body),
      Marker::COD => self.read_cod(body, tile),
      Marker::COC => self.read_coc(body, tile),
      Marker::QCD => self.read_qcd(body, tile),
      Marker::QCC => self.read_qcc(body, tile),
      Marker::RGN => self.read_rgn(body, tile),
      Marker::POC => self.read_poc(body, tile),
      Marker::COM => self.read_com(body),
      Marker::CRG => self.read_crg(body),
      Marker::CBD => self.read_cbd(body),
      Marker::TLM => self.read_tlm(body),
      Marker::PLM => self.read_plm(body),
      Marker::PLT => self.read_plt(body, tile),
      Marker::PPM => self.read_ppm(body),
      Marker::PPT => self.read_ppt(body, tile),
      Marker::MCT => self.read_mct(body),
      Marker::MCC => self.read_mcc(body),
      Marker::MCO => self.read_mco(body),
      Marker::UNK(id) => {
        event_msg!(
          self.logger,
          EventType::Warning,
          "skipping unknown marker 0x{:04x}",
          id
        );
        Ok(())
      }
      _ => Ok(()),
    }
  }

  fn read_siz(&mut self, body: &[u8]) -> Result<()> {
    let mut r = ByteReader::new(body);
    let _rsiz = r.read_u16()?;
    let xsiz = r.read_u32()?;
    let ysiz = r.read_u32()?;
    let xosiz = r.read_u32()?;
    let yosiz = r.read_u32()?;
    let xtsiz = r.read_u32()?;
    let ytsiz = r.read_u32()?;
    let xtosiz = r.read_u32()?;
    let ytosiz = r.read_u32()?;
    let csiz = r.read_u16()?;
    if xsiz <= xosiz || ysiz <= yosiz {
      return Err(Error::structural("SIZ: empty image area"));
    }
    if xtsiz == 0 || ytsiz == 0 {
      return Err(Error::structural("SIZ: zero tile size"));
    }
    if csiz == 0 || csiz > 16384 {
      return Err(Error::range("component count", csiz as i64, 1, 16384));
    }
    if xtosiz > xosiz || ytosiz > yosiz {
      return Err(Error::structural("SIZ: tile origin beyond image origin"));
    }
    let mut comps = Vec::with_capacity(csiz as usize);
    let mut image_comps = Vec::with_capacity(csiz as usize);
    for _ in 0..csiz {
      let ssiz = r.read_u8()?;
      let dx = r.read_u8()? as u32;
      let dy = r.read_u8()? as u32;
      let prec = (ssiz as u32 & 0x7f) + 1;
      let sgnd = ssiz & 0x80 != 0;
      if prec > 38 {
        return Err(Error::range("component depth", prec as i64, 1, 38));
      }
      if dx == 0 || dy == 0 {
        return Err(Error::structural("SIZ: zero component subsampling"));
      }
      comps.push(ComponentParams {
        dx,
        dy,
        prec,
        sgnd,
      });
      image_comps.push(ImageComponent {
        dx,
        dy,
        prec,
        sgnd,
        ..Default::default()
      });
    }
    let tw = crate::math::ceil_div(xsiz - xtosiz, xtsiz);
    let th = crate::math::ceil_div(ysiz - ytosiz, ytsiz);
    if tw as u64 * th as u64 > 65535 {
      return Err(Error::range("tile count", tw as i64 * th as i64, 1, 65535));
    }
    self.cp.image = ImageParams {
      canvas: Rect::new(xosiz, yosiz, xsiz, ysiz),
      tx0: xtosiz,
      ty0: ytosiz,
      tdx: xtsiz,
      tdy: ytsiz,
      tw,
      th,
      comps,
      cap: 0,
      comments: Vec::new(),
    };
    self.cp.tcps = vec![None; (tw * th) as usize];
    self.image = Image {
      x0: xosiz,
      y0: yosiz,
      x1: xsiz,
      y1: ysiz,
      comps: image_comps,
    };
    self.image.apply_reduce(0);
    Ok(())
  }

  fn read_cap(&mut self, body: &[u8]) -> Result<()> {
    let mut r = ByteReader::new(body);
    let pcap = r.read_u32()?;
    self.cp.image.cap = pcap;
    // One 16-bit ccap field per set Pcap bit.
    for _ in 0..pcap.count_ones() {
      let _ccap = r.read_u16()?;
    }
    Ok(())
  }

  fn tcp_target(&mut self, tile: Option<u16>) -> &mut TileCodingParams {
    match tile {
      Some(t) => self.cp.tcp_mut(t),
      None => &mut self.cp.default_tcp,
    }
  }

  fn num_comps(&self) -> usize {
    self.cp.image.comps.len()
  }

  fn read_cod(&mut self, body: &[u8], tile: Option<u16>) -> Result<()> {
    let num_comps = self.num_comps();
    let ht_capable = self.cp.image.ht_capable();
    let layer_limit = self.cp.layer_limit;
    let mut r = ByteReader::new(body);
    let scod = r.read_u8()?;
    if scod & !0x07 != 0 {
      return Err(Error::structural("COD: unknown Scod bits"));
    }
    let prog = r.read_u8()?;
    let numlayers = r.read_u16()?;
    let mct = r.read_u8()?;
    if numlayers == 0 {
      return Err(Error::range("layer count", 0, 1, 65535));
    }
    if mct > 2 {
      return Err(Error::structural("COD: invalid MCT value"));
    }
    let prg = ProgressionOrder::from_u8(prog)
      .ok_or_else(|| Error::structural("COD: unknown progression order"))?;
    let tccp = read_sp_cod(&mut r, scod)?;
    if tccp.cblk_style.contains(CblkStyle::HT) && !ht_capable {
      event_msg!(
        self.logger,
        EventType::Warning,
        "COD asserts HT blocks without the CAP HT bit; decoding as HT anyway"
      );
    }
    let tcp = self.tcp_target(tile);
    tcp.cod_seen = true;
    tcp.csty = CodingStyle::from_bits_truncate(scod);
    tcp.prg = prg;
    tcp.num_layers = numlayers;
    tcp.num_layers_to_decode = if layer_limit == 0 {
      numlayers
    } else {
      layer_limit.min(numlayers)
    };
    tcp.mct = mct;
    // COD applies to every component until a COC overrides it.
    tcp.tccps = vec![tccp; num_comps];
    Ok(())
  }

  fn read_coc(&mut self, body: &[u8], tile: Option<u16>) -> Result<()> {
    let num_comps = self.num_comps();
    let mut r = ByteReader::new(body);
    let compno = if num_comps <= 256 {
      r.read_u8()? as usize
    } else {
      r.read_u16()? as usize
    };
    if compno >= num_comps {
      return Err(Error::range("COC component", compno as i64, 0, num_comps as i64 - 1));
    }
    let scoc = r.read_u8()?;
    let tccp = read_sp_cod(&mut r, scoc)?;
    let tcp = self.tcp_target(tile);
    let slot = &mut tcp.tccps[compno];
    let qnt = (slot.qnt_style, slot.step_sizes.clone(), slot.num_guard_bits, slot.roi_shift);
    *slot = tccp;
    // COC does not carry quantization; keep what QCD/QCC set.
    slot.qnt_style = qnt.0;
    slot.step_sizes = qnt.1;
    slot.num_guard_bits = qnt.2;
    slot.roi_shift = qnt.3;
    Ok(())
  }

  fn read_qcd(&mut self, body: &[u8], tile: Option<u16>) -> Result<()> {
    let mut r = ByteReader::new(body);
    let quant = read_sq_cd(&mut r)?;
    let tcp = self.tcp_target(tile);
    tcp.qcd_seen = true;
    for tccp in &mut tcp.tccps {
      tccp.qnt_style = quant.0;
      tccp.num_guard_bits = quant.1;
      tccp.step_sizes = quant.2.clone();
    }
    Ok(())
  }

  fn read_qcc(&mut self, body: &[u8], tile: Option<u16>) -> Result<()> {
    let num_comps = self.num_comps();
    let mut r = ByteReader::new(body);
    let compno = if num_comps <= 256 {
      r.read_u8()? as usize
    } else {
      r.read_u16()? as usize
    };
    if compno >= num_comps {
      return Err(Error::range("QCC component", compno as i64, 0, num_comps as i64 - 1));
    }
    let quant = read_sq_cd(&mut r)?;
    // The last QCC seen for a component wins.
    let tcp = self.tcp_target(tile);
    let tccp = &mut tcp.tccps[compno];
    tccp.qnt_style = quant.0;
    tccp.num_guard_bits = quant.1;
    tccp.step_sizes = quant.2;
    Ok(())
  }

  fn read_rgn(&mut self, body: &[u8], tile: Option<u16>) -> Result<()> {
    let num_comps = self.num_comps();
    let mut r = ByteReader::new(body);
    let compno = if num_comps <= 256 {
      r.read_u8()? as usize
    } else {
      r.read_u16()? as usize
    };
    if compno >= num_comps {
      return Err(Error::range("RGN component", compno as i64, 0, num_comps as i64 - 1));
    }
    let srgn = r.read_u8()?;
    if srgn != 0 {
      return Err(Error::unsupported("RGN style other than implicit"));
    }
    let shift = r.read_u8()?;
    self.tcp_target(tile).tccps[compno].roi_shift = shift;
    Ok(())
  }

  fn read_poc(&mut self, body: &[u8], tile: Option<u16>) -> Result<()> {
    let num_comps = self.num_comps();
    let comp_bytes = if num_comps <= 256 { 1 } else { 2 };
    let entry_len = 1 + comp_bytes + 2 + 1 + comp_bytes + 1;
    if body.is_empty() || body.len() % entry_len != 0 {
      return Err(Error::structural("POC: malformed entry list"));
    }
    let mut r = ByteReader::new(body);
    let mut pocs = Vec::with_capacity(body.len() / entry_len);
    while r.remaining() >= entry_len {
      let res_start = r.read_u8()?;
      let comp_start = r.read_sized(comp_bytes)? as u16;
      let layer_end = r.read_u16()?;
      let res_end = r.read_u8()?;
      let comp_end = r.read_sized(comp_bytes)? as u16;
      let order = ProgressionOrder::from_u8(r.read_u8()?)
        .ok_or_else(|| Error::structural("POC: unknown progression order"))?;
      if res_end <= res_start || comp_end <= comp_start || layer_end == 0 {
        return Err(Error::structural("POC: empty progression volume"));
      }
      pocs.push(Poc {
        res_start,
        comp_start,
        layer_end,
        res_end,
        comp_end,
        order,
      });
    }
    self.tcp_target(tile).pocs.extend(pocs);
    Ok(())
  }

  fn read_com(&mut self, body: &[u8]) -> Result<()> {
    let mut r = ByteReader::new(body);
    let _rcom = r.read_u16()?;
    self.cp.image.comments.push(r.rest().to_vec());
    Ok(())
  }

  fn read_crg(&mut self, body: &[u8]) -> Result<()> {
    let mut r = ByteReader::new(body);
    self.crg.clear();
    for _ in 0..self.cp.image.comps.len() {
      let x = r.read_u16()?;
      let y = r.read_u16()?;
      self.crg.push((x, y));
    }
    Ok(())
  }

  fn read_cbd(&mut self, body: &[u8]) -> Result<()> {
    let mut r = ByteReader::new(body);
    let ncbd = r.read_u16()?;
    if ncbd & 0x8000 != 0 {
      // Identical depth for all components.
      let depth = r.read_u8()?;
      self.cbd_depths = vec![depth; self.cp.image.comps.len()];
    } else {
      let mut depths = Vec::with_capacity(ncbd as usize);
      for _ in 0..ncbd {
        depths.push(r.read_u8()?);
      }
      self.cbd_depths = depths;
    }
    Ok(())
  }

  fn read_tlm(&mut self, body: &[u8]) -> Result<()> {
    let mut r = ByteReader::new(body);
    let ztlm = r.read_u8()?;
    let stlm = r.read_u8()?;
    let st = (stlm >> 4) & 0x3;
    let sp = (stlm >> 6) & 0x1;
    if st == 3 {
      self.cp.tlm.invalidate();
      return Err(Error::CorruptTlm("illegal ST field".into()));
    }
    let tile_bytes = st as usize;
    let len_bytes = if sp == 1 { 4 } else { 2 };
    let entry_len = tile_bytes + len_bytes;
    if entry_len == 0 || r.remaining() % entry_len != 0 {
      self.cp.tlm.invalidate();
      return Err(Error::CorruptTlm("entry list length mismatch".into()));
    }
    let mut entries = Vec::with_capacity(r.remaining() / entry_len);
    let mut implied_index = self.cp.tlm.entries().len() as u16;
    while r.remaining() >= entry_len {
      let tile = if tile_bytes == 0 {
        let t = implied_index;
        implied_index += 1;
        t
      } else {
        r.read_sized(tile_bytes)? as u16
      };
      let len = r.read_sized(len_bytes)?;
      entries.push((tile, len));
    }
    self.cp.tlm.push_marker(ztlm, &entries)
  }

  /// Packet-length varints: 7 data bits per byte, top bit continues.
  fn read_packet_lengths(r: &mut ByteReader<'_>) -> Result<Vec<u32>> {
    let mut lengths = Vec::new();
    let mut acc = 0u32;
    while r.remaining() > 0 {
      let b = r.read_u8()?;
      acc = (acc << 7) | (b as u32 & 0x7f);
      if b & 0x80 == 0 {
        lengths.push(acc);
        acc = 0;
      }
    }
    Ok(lengths)
  }

  fn read_plm(&mut self, body: &[u8]) -> Result<()> {
    let mut r = ByteReader::new(body);
    let _zplm = r.read_u8()?;
    // PLM carries per-tile-part sublists; without random access into
    // them the cache only benefits from PLT, so PLM is recorded and
    // otherwise ignored.
    let _ = Self::read_packet_lengths(&mut r)?;
    Ok(())
  }

  fn read_plt(&mut self, body: &[u8], tile: Option<u16>) -> Result<()> {
    let tile = tile.ok_or_else(|| Error::structural("PLT outside a tile-part"))?;
    let mut r = ByteReader::new(body);
    let zplt = r.read_u8()?;
    match Self::read_packet_lengths(&mut r) {
      Ok(lengths) => {
        self.cp.plt.push(tile, zplt, lengths);
        Ok(())
      }
      Err(_) => {
        self.cp.plt.invalidate();
        event_msg!(
          self.logger,
          EventType::Warning,
          "invalid PLT in tile {}; packet-length cache disabled",
          tile
        );
        Ok(())
      }
    }
  }

  fn read_ppm(&mut self, body: &[u8]) -> Result<()> {
    let mut r = ByteReader::new(body);
    let zppm = r.read_u8()?;
    self.cp.ppm.push(zppm, r.rest())
  }

  fn read_ppt(&mut self, body: &[u8], tile: Option<u16>) -> Result<()> {
    let tile = tile.ok_or_else(|| Error::structural("PPT outside a tile-part"))?;
    let mut r = ByteReader::new(body);
    let zppt = r.read_u8()?;
    let data = r.rest().to_vec();
    self.cp.tcp_mut(tile).ppt.push(zppt, &data)
  }

  fn read_mct(&mut self, body: &[u8]) -> Result<()> {
    let mut r = ByteReader::new(body);
    let _zmct = r.read_u16()?;
    let imct = r.read_u16()?;
    let _ymct = r.read_u16()?;
    let index = (imct & 0xff) as u8;
    let array_type = ((imct >> 8) & 0x3) as u8;
    let element_type = ((imct >> 10) & 0x3) as u8;
    self
      .mct_records
      .mct
      .push((index, array_type, element_type, r.rest().to_vec()));
    Ok(())
  }

  fn read_mcc(&mut self, body: &[u8]) -> Result<()> {
    // Component collections are resolved implicitly: the first
    // decorrelation array applies to the full component set.
    let _ = body;
    self.mct_records.mcc_seen = true;
    Ok(())
  }

  fn read_mco(&mut self, body: &[u8]) -> Result<()> {
    let _ = body;
    self.mct_records.mco_seen = true;
    Ok(())
  }

  /// Resolves raw MCT records into the tile's decorrelation matrix
  /// and offsets when a custom transform was signalled.
  pub fn resolve_mct(&self, tcp: &mut TileCodingParams, num_comps: usize) -> Result<()> {
    if tcp.mct != 2 {
      return Ok(());
    }
    for (_, array_type, element_type, data) in &self.mct_records.mct {
      match *array_type {
        MCT_ARRAY_DECORRELATION => {
          let matrix = parse_mct_elements(data, *element_type)?;
          if matrix.len() != num_comps * num_comps {
            return Err(Error::structural(format!(
              "MCT matrix has {} elements for {} components",
              matrix.len(),
              num_comps
            )));
          }
          tcp.mct_matrix = Some(matrix);
        }
        MCT_ARRAY_OFFSET => {
          let offsets = parse_mct_elements(data, *element_type)?;
          tcp.mct_offsets = Some(offsets.iter().map(|&v| v as i32).collect());
        }
        _ => {}
      }
    }
    if tcp.mct_matrix.is_none() {
      return Err(Error::structural(
        "custom MCT signalled but no decorrelation array was found",
      ));
    }
    Ok(())
  }

  fn read_sot(&mut self, body: &[u8]) -> Result<()> {
    if body.len() != 8 {
      return Err(Error::CorruptSot(format!(
        "SOT body is {} bytes, expected 8",
        body.len()
      )));
    }
    let mut r = ByteReader::new(body);
    let tile = r.read_u16()?;
    let psot = r.read_u32()?;
    let tpsot = r.read_u8()?;
    let tnsot = r.read_u8()?;
    let num_tiles = self.cp.image.num_tiles();
    if u32::from(tile) >= num_tiles {
      return Err(Error::CorruptSot(format!(
        "tile index {} outside the {}-tile grid",
        tile, num_tiles
      )));
    }
    if psot != 0 && psot < 12 {
      return Err(Error::CorruptSot(format!("illegal Psot {}", psot)));
    }
    {
      let tcp = self.cp.tcp_mut(tile);
      if let Some(expected) = tcp.num_tile_parts_expected {
        if tpsot >= expected {
          return Err(Error::CorruptSot(format!(
            "TPsot {} not below the signalled tile-part count {}",
            tpsot, expected
          )));
        }
      }
      if tpsot != tcp.num_tile_parts_read {
        return Err(Error::ordering(format!(
          "tile {} tile-part {} arrived out of order (expected {})",
          tile, tpsot, tcp.num_tile_parts_read
        )));
      }
      tcp.num_tile_parts_read += 1;
      if tnsot != 0 {
        tcp.num_tile_parts_expected = Some(tnsot);
      }
    }
    self.cur_tile = tile;
    self.cur_psot = psot as u64;
    Ok(())
  }
}

/// SPcod/SPcoc fields shared by COD and COC.
fn read_sp_cod(r: &mut ByteReader<'_>, scod: u8) -> Result<TileComponentCodingParams> {
  let mut tccp = TileComponentCodingParams::default();
  tccp.csty = CodingStyle::from_bits_truncate(scod & 0x01);
  let numres = r.read_u8()? as u32 + 1;
  if numres > 33 {
    return Err(Error::range("resolution count", numres as i64, 1, 33));
  }
  tccp.num_resolutions = numres as u8;
  let cblkw = r.read_u8()? as u32 + 2;
  let cblkh = r.read_u8()? as u32 + 2;
  if !(2..=10).contains(&cblkw) || !(2..=10).contains(&cblkh) || cblkw + cblkh > 12 {
    return Err(Error::range(
      "code-block size exponent",
      (cblkw + cblkh) as i64,
      4,
      12,
    ));
  }
  tccp.cblkw = cblkw as u8;
  tccp.cblkh = cblkh as u8;
  tccp.cblk_style = CblkStyle::from_bits_truncate(r.read_u8()?);
  let qmfbid = r.read_u8()?;
  if qmfbid > 1 {
    return Err(Error::structural("unknown wavelet filter id"));
  }
  tccp.qmfbid = qmfbid;
  if tccp.csty.contains(CodingStyle::PRECINCTS) {
    for resno in 0..numres as usize {
      let pp = r.read_u8()?;
      tccp.prcw[resno] = pp & 0x0f;
      tccp.prch[resno] = pp >> 4;
      if resno > 0 && (tccp.prcw[resno] == 0 || tccp.prch[resno] == 0) {
        return Err(Error::structural("zero precinct exponent above resolution 0"));
      }
    }
  }
  Ok(tccp)
}

/// Sqcd/Sqcc plus the step-size list.
fn read_sq_cd(
  r: &mut ByteReader<'_>,
) -> Result<(QuantStyle, u8, smallvec::SmallVec<[StepSize; 16]>)> {
  let sqcd = r.read_u8()?;
  let guard_bits = sqcd >> 5;
  let style = match sqcd & 0x1f {
    0 => QuantStyle::None,
    1 => QuantStyle::ScalarDerived,
    2 => QuantStyle::ScalarExpounded,
    other => {
      return Err(Error::structural(format!(
        "unknown quantization style {}",
        other
      )))
    }
  };
  let mut steps = smallvec::SmallVec::new();
  match style {
    QuantStyle::None => {
      while r.remaining() > 0 {
        let v = r.read_u8()?;
        steps.push(StepSize {
          expn: v >> 3,
          mant: 0,
        });
      }
    }
    QuantStyle::ScalarDerived => {
      let v = r.read_u16()?;
      steps.push(StepSize {
        expn: (v >> 11) as u8,
        mant: v & 0x7ff,
      });
    }
    QuantStyle::ScalarExpounded => {
      while r.remaining() >= 2 {
        let v = r.read_u16()?;
        steps.push(StepSize {
          expn: (v >> 11) as u8,
          mant: v & 0x7ff,
        });
      }
    }
  }
  if steps.is_empty() {
    return Err(Error::structural("quantization marker without step sizes"));
  }
  Ok((style, guard_bits, steps))
}

fn parse_mct_elements(data: &[u8], element_type: u8) -> Result<Vec<f32>> {
  let mut r = ByteReader::new(data);
  let mut out = Vec::new();
  match element_type {
    // 16-bit integers.
    0 => {
      while r.remaining() >= 2 {
        out.push(r.read_u16()? as i16 as f32);
      }
    }
    // 32-bit integers.
    1 => {
      while r.remaining() >= 4 {
        out.push(r.read_u32()? as i32 as f32);
      }
    }
    // 32-bit floats.
    2 => {
      while r.remaining() >= 4 {
        out.push(f32::from_bits(r.read_u32()?));
      }
    }
    // 64-bit floats.
    3 => {
      while r.remaining() >= 8 {
        out.push(f64::from_bits(r.read_u64()?) as f32);
      }
    }
    _ => return Err(Error::structural("unknown MCT element type")),
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::stream::MemStream;

  pub(crate) fn marker(id: u16, body: &[u8]) -> Vec<u8> {
    let mut out = id.to_be_bytes().to_vec();
    out.extend(((body.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
  }

  pub(crate) fn siz_body(w: u32, h: u32, tw: u32, th: u32, comps: u16) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend(0u16.to_be_bytes()); // Rsiz
    b.extend(w.to_be_bytes());
    b.extend(h.to_be_bytes());
    b.extend(0u32.to_be_bytes());
    b.extend(0u32.to_be_bytes());
    b.extend(tw.to_be_bytes());
    b.extend(th.to_be_bytes());
    b.extend(0u32.to_be_bytes());
    b.extend(0u32.to_be_bytes());
    b.extend(comps.to_be_bytes());
    for _ in 0..comps {
      b.push(7); // 8-bit unsigned
      b.push(1);
      b.push(1);
    }
    b
  }

  pub(crate) fn cod_body(numres: u8, layers: u16) -> Vec<u8> {
    let mut b = Vec::new();
    b.push(0); // Scod
    b.push(0); // LRCP
    b.extend(layers.to_be_bytes());
    b.push(0); // no MCT
    b.push(numres - 1);
    b.push(4); // 64 wide
    b.push(4); // 64 high
    b.push(0); // no mode flags
    b.push(1); // 5/3
    b
  }

  pub(crate) fn qcd_body() -> Vec<u8> {
    // No quantization, 2 guard bits, one exponent per band of a
    // 6-resolution 5/3 decomposition.
    let mut b = vec![(2u8 << 5) | 0];
    for _ in 0..16 {
      b.push(9 << 3);
    }
    b
  }

  pub(crate) fn header_bytes() -> Vec<u8> {
    let mut cs = vec![0xff, 0x4f];
    cs.extend(marker(0xff51, &siz_body(64, 64, 64, 64, 1)));
    cs.extend(marker(0xff52, &cod_body(3, 1)));
    cs.extend(marker(0xff5c, &qcd_body()));
    cs
  }

  fn decoder_for(bytes: Vec<u8>) -> CodestreamDecoder {
    CodestreamDecoder::new(Box::new(MemStream::new(bytes)), Logger::new())
  }

  fn sot(tile: u16, psot: u32, tpsot: u8, tnsot: u8) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend(tile.to_be_bytes());
    b.extend(psot.to_be_bytes());
    b.push(tpsot);
    b.push(tnsot);
    marker(0xff90, &b)
  }

  #[test]
  fn header_parses() {
    let mut cs = header_bytes();
    cs.extend(sot(0, 0, 0, 1));
    cs.extend([0xff, 0x93]);
    cs.extend([0u8; 4]);
    cs.extend([0xff, 0xd9]);
    let mut dec = decoder_for(cs);
    dec.read_header().unwrap();
    assert_eq!(dec.cp.image.canvas, Rect::new(0, 0, 64, 64));
    assert_eq!(dec.cp.image.num_tiles(), 1);
    assert!(dec.cp.default_tcp.cod_seen);
    assert_eq!(dec.cp.default_tcp.tccps[0].num_resolutions, 3);
    assert_eq!(dec.cp.default_tcp.tccps[0].num_guard_bits, 2);
    dec.read_tile_parts().unwrap();
    assert_eq!(dec.tile_data.len(), 1);
    assert_eq!(dec.tile_data[&0][0].bytes().len(), 4);
    // The marker cache preserved the structure.
    let ids: Vec<u16> = dec.cache.records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![0xff4f, 0xff51, 0xff52, 0xff5c, 0xff90, 0xff93, 0xffd9]);
  }

  #[test]
  fn missing_siz_is_fatal() {
    let mut cs = vec![0xff, 0x4f];
    cs.extend(marker(0xff52, &cod_body(3, 1)));
    let mut dec = decoder_for(cs);
    assert!(matches!(dec.read_header(), Err(Error::Structural(_))));
  }

  #[test]
  fn missing_cod_is_fatal() {
    let mut cs = vec![0xff, 0x4f];
    cs.extend(marker(0xff51, &siz_body(64, 64, 64, 64, 1)));
    cs.extend(marker(0xff5c, &qcd_body()));
    cs.extend(sot(0, 0, 0, 1));
    let mut dec = decoder_for(cs);
    assert!(matches!(dec.read_header(), Err(Error::Structural(_))));
  }

  #[test]
  fn out_of_order_tpsot_fails_the_tile_only() {
    let mut cs = header_bytes();
    // TPsot 1 arrives first: the tile-part is skipped via its Psot
    // and the tile is marked failed without aborting the scan.
    cs.extend(sot(0, 14, 1, 2));
    cs.extend([0xff, 0x93]);
    cs.extend([0xff, 0xd9]);
    let mut dec = decoder_for(cs);
    dec.read_header().unwrap();
    dec.read_tile_parts().unwrap();
    assert_eq!(dec.tiles_failed, vec![0]);
    assert!(dec.tile_data.is_empty());
  }

  #[test]
  fn tpsot_beyond_tnsot_rejected() {
    let mut cs = header_bytes();
    cs.extend(sot(0, 14, 0, 1));
    cs.extend([0xff, 0x93]);
    // Psot 14 = SOT(12) + SOD(2): zero data bytes.
    let mut dec = decoder_for(cs.clone());
    dec.read_header().unwrap();
    dec.read_tile_parts().unwrap();
    let tcp = dec.cp.tcp(0).unwrap();
    assert_eq!(tcp.num_tile_parts_read, 1);

    // A second tile-part with TPsot 1 when TNsot said 1 is corrupt:
    // the tile fails, the scan completes.
    let mut cs2 = cs;
    cs2.extend(sot(0, 14, 1, 1));
    cs2.extend([0xff, 0x93]);
    cs2.extend([0xff, 0xd9]);
    let mut dec = decoder_for(cs2);
    dec.read_header().unwrap();
    dec.read_tile_parts().unwrap();
    assert_eq!(dec.tiles_failed, vec![0]);
  }

  #[test]
  fn unknown_marker_skipped_and_cached() {
    let mut cs = vec![0xff, 0x4f];
    cs.extend(marker(0xff51, &siz_body(64, 64, 64, 64, 1)));
    cs.extend(marker(0xff70, &[1, 2, 3])); // unknown but well-formed
    cs.extend(marker(0xff52, &cod_body(3, 1)));
    cs.extend(marker(0xff5c, &qcd_body()));
    cs.extend(sot(0, 0, 0, 1));
    cs.extend([0xff, 0x93]);
    let mut dec = decoder_for(cs);
    dec.read_header().unwrap();
    assert!(dec.cache.records.iter().any(|r| r.id == 0xff70));
  }

  #[test]
  fn invalid_marker_is_fatal() {
    let mut cs = vec![0xff, 0x4f];
    cs.extend([0x12, 0x34]);
    let mut dec = decoder_for(cs);
    assert!(matches!(dec.read_header(), Err(Error::InvalidMarker(0x1234))));
  }

  #[test]
  fn zero_length_segment_is_fatal() {
    let mut cs = vec![0xff, 0x4f];
    cs.extend([0xff, 0x51, 0x00, 0x01]);
    let mut dec = decoder_for(cs);
    assert!(dec.read_header().is_err());
  }

  #[test]
  fn qcc_last_one_wins() {
    let mut cs = vec![0xff, 0x4f];
    cs.extend(marker(0xff51, &siz_body(64, 64, 64, 64, 1)));
    cs.extend(marker(0xff52, &cod_body(3, 1)));
    cs.extend(marker(0xff5c, &qcd_body()));
    // Two QCCs for component 0: guard bits 1 then guard bits 3.
    let qcc = |guard: u8| -> Vec<u8> {
      let mut b = vec![0u8];
      b.push(guard << 5);
      b.push(9 << 3);
      b
    };
    cs.extend(marker(0xff5d, &qcc(1)));
    cs.extend(marker(0xff5d, &qcc(3)));
    cs.extend(sot(0, 0, 0, 1));
    cs.extend([0xff, 0x93]);
    let mut dec = decoder_for(cs);
    dec.read_header().unwrap();
    assert_eq!(dec.cp.default_tcp.tccps[0].num_guard_bits, 3);
  }

  #[test]
  fn tlm_entries_accumulate() {
    let mut cs = vec![0xff, 0x4f];
    cs.extend(marker(0xff51, &siz_body(128, 64, 64, 64, 1)));
    cs.extend(marker(0xff52, &cod_body(3, 1)));
    cs.extend(marker(0xff5c, &qcd_body()));
    // TLM: Ztlm 0, ST=1 (u8 tile ids), SP=0 (u16 lengths).
    let mut tlm = vec![0u8, 0b0001_0000];
    tlm.extend([0u8, 0, 100]); // tile 0, len 100
    tlm.extend([1u8, 0, 50]); // tile 1, len 50
    cs.extend(marker(0xff55, &tlm));
    cs.extend(sot(0, 0, 0, 1));
    cs.extend([0xff, 0x93]);
    let mut dec = decoder_for(cs);
    dec.read_header().unwrap();
    assert!(dec.cp.tlm.is_usable());
    assert_eq!(dec.cp.tlm.entries(), &[(0, 100), (1, 50)]);
  }

  #[test]
  fn psot_zero_runs_to_next_sot() {
    let mut cs = header_bytes();
    cs.extend(sot(0, 0, 0, 0));
    cs.extend([0xff, 0x93]);
    cs.extend([1, 2, 3, 4, 5]);
    cs.extend([0xff, 0xd9]);
    let mut dec = decoder_for(cs);
    dec.read_header().unwrap();
    dec.read_tile_parts().unwrap();
    assert_eq!(dec.tile_data[&0][0].bytes(), &[1, 2, 3, 4, 5]);
  }
}
