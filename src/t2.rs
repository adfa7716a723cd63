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

//! Tier-2: packet header parsing and code-block segment binding.
//!
//! Packets arrive in the progression order generated by `pi`; each
//! packet contributes at most one chunk per code-block of its
//! precinct. Headers may live inline before each packet body or
//! out-of-band in PPM/PPT marker data.

use crate::bio::BitReader;
use crate::error::{Error, Result};
use crate::event::EventType;
use crate::math::floor_log2;
use crate::params::{CblkStyle, CodingParams, CodingStyle};
use crate::pi::PacketIter;
use crate::tcd::{CodeBlock, Segment, TileProcessor};

const SOP_MARKER: [u8; 2] = [0xff, 0x91];
const EPH_MARKER: [u8; 2] = [0xff, 0x92];

/// Pass capacity of a new segment under the block's mode flags.
fn segment_maxpasses(cblk_style: CblkStyle, cblk: &CodeBlock) -> u32 {
  if cblk_style.contains(CblkStyle::TERMALL) {
    1
  } else if cblk_style.contains(CblkStyle::LAZY) {
    match cblk.segs.last().map(|s| s.maxpasses) {
      // First segment: the MQ passes of the top four bit planes.
      None => 10,
      // Raw segments hold a significance+refinement pair, MQ
      // segments a single cleanup pass.
      Some(1) | Some(10) => 2,
      Some(_) => 1,
    }
  } else {
    109
  }
}

/// Pass-count prefix code.
fn decode_numpasses(bio: &mut BitReader<'_>) -> u32 {
  if bio.read_bit() == 0 {
    return 1;
  }
  if bio.read_bit() == 0 {
    return 2;
  }
  let n = bio.read_bits(2);
  if n != 3 {
    return 3 + n;
  }
  let n = bio.read_bits(5);
  if n != 31 {
    return 6 + n;
  }
  37 + bio.read_bits(7)
}

/// One chunk of packet body bytes bound to a code-block segment.
struct Chunk {
  bandno: usize,
  cblkno: usize,
  seg_index: usize,
  len: usize,
}

/// Everything a packet contributes to its precinct's code-blocks.
struct PacketBody {
  compno: u16,
  resno: u8,
  precno: u64,
  chunks: Vec<Chunk>,
}

pub fn decode_packets(
  tp: &mut TileProcessor,
  cp: &mut CodingParams,
  bytes: &[u8],
) -> Result<u64> {
  let tcp = tp.tcp.clone();
  let pi = PacketIter::new(tp.tile.rect, &tp.pi_components(), &tcp);
  let use_sop = tcp.csty.contains(CodingStyle::SOP);
  let use_eph = tcp.csty.contains(CodingStyle::EPH);

  // Out-of-band packet headers: PPT wins over PPM when both exist.
  let ppt_present = !tp.tcp.ppt.is_empty();
  let header_stream: Option<Vec<u8>> = if ppt_present {
    Some(tp.tcp.ppt.merge().to_vec())
  } else if cp.ppm.is_present() {
    cp.ppm.merge()?;
    let mut merged = Vec::new();
    for _ in 0..tp.packet_data.len().max(1) {
      merged.extend_from_slice(&cp.ppm.take_record()?);
    }
    Some(merged)
  } else {
    None
  };

  let mut body_pos = 0usize;
  let mut header_pos = 0usize;
  let mut packets = 0u64;
  let layer_limit = if tcp.num_layers_to_decode == 0 {
    tcp.num_layers
  } else {
    tcp.num_layers_to_decode
  };

  for pos in pi {
    let seq = packets;

    // SOP marker lives in the body stream.
    if use_sop && bytes[body_pos..].starts_with(&SOP_MARKER) {
      if body_pos + 6 > bytes.len() {
        tp.truncated = true;
        break;
      }
      let nsop = u16::from_be_bytes([bytes[body_pos + 4], bytes[body_pos + 5]]) as u64;
      if nsop != seq % 65536 {
        return Err(Error::ordering(format!(
          "packet sequence number {} does not match expected {}",
          nsop,
          seq % 65536
        )));
      }
      body_pos += 6;
    }

    let (header_bytes, mut header_off) = match &header_stream {
      Some(stream) => (&stream[..], header_pos),
      None => (bytes, body_pos),
    };
    if header_off >= header_bytes.len() {
      if header_stream.is_some() {
        return Err(Error::structural(
          "packed packet headers exhausted before all packets were parsed",
        ));
      }
      tp.truncated = true;
      break;
    }

    let mut bio = BitReader::new(&header_bytes[header_off..]);
    let body = parse_packet_header(tp, &pos, &mut bio)?;
    bio.align();
    let exhausted = bio.exhausted();
    header_off += bio.num_bytes_read();
    if exhausted {
      tp.truncated = true;
      break;
    }

    // EPH terminates the header in whichever stream holds it.
    if use_eph {
      if header_bytes[header_off..].starts_with(&EPH_MARKER) {
        header_off += 2;
      } else {
        event_msg!(
          tp.logger,
          EventType::Warning,
          "expected EPH marker after packet header {}",
          seq
        );
      }
    }

    if header_stream.is_some() {
      header_pos = header_off;
    } else {
      body_pos = header_off;
    }

    // Body bytes: bind segment chunks to their code-blocks.
    if let Some(body) = body {
      let keep = u32::from(pos.layno) < u32::from(layer_limit);
      let total: usize = body.chunks.iter().map(|c| c.len).sum();
      let available = bytes.len().saturating_sub(body_pos);
      if total > available {
        tp.truncated = true;
        append_body(tp, &body, &bytes[body_pos..], keep);
        packets += 1;
        break;
      }
      append_body(tp, &body, &bytes[body_pos..body_pos + total], keep);
      body_pos += total;
    }
    packets += 1;
  }
  Ok(packets)
}

/// Parses one packet header, mutating tag trees and code-block state.
/// Returns `None` for a zero-length packet.
fn parse_packet_header(
  tp: &mut TileProcessor,
  pos: &crate::pi::PacketPos,
  bio: &mut BitReader<'_>,
) -> Result<Option<PacketBody>> {
  let cblk_style = tp.tcp.tccps[pos.compno as usize].cblk_style;
  if bio.read_bit() == 0 {
    return Ok(None);
  }
  let mut body = PacketBody {
    compno: pos.compno,
    resno: pos.resno,
    precno: pos.precno,
    chunks: Vec::new(),
  };
  let tilec = &mut tp.tile.comps[pos.compno as usize];
  let res = &mut tilec.resolutions[pos.resno as usize];
  for (bandno, band) in res.bands.iter_mut().enumerate() {
    if band.is_empty() {
      continue;
    }
    let band_numbps = band.numbps;
    let prec = match band.precincts.get_mut(pos.precno as usize) {
      Some(p) => p,
      None => continue,
    };
    for cblkno in 0..prec.cblks.len() {
      if prec.cblks[cblkno].rect.is_empty() {
        continue;
      }
      let included = if !prec.cblks[cblkno].included {
        prec
          .incl_tree
          .decode(bio, cblkno as u32, i32::from(pos.layno) + 1)
      } else {
        bio.read_bit() != 0
      };
      if !included {
        continue;
      }
      if !prec.cblks[cblkno].included {
        let zbp = prec.imsb_tree.decode_value(bio, cblkno as u32);
        let cblk = &mut prec.cblks[cblkno];
        cblk.included = true;
        cblk.numbps = band_numbps.saturating_sub(zbp.max(0) as u32);
        cblk.numlenbits = 3;
      }
      let cblk = &mut prec.cblks[cblkno];
      let mut numpasses = decode_numpasses(bio);
      while bio.read_bit() == 1 {
        cblk.numlenbits += 1;
      }
      // Distribute the new passes over segments, one length per chunk.
      while numpasses > 0 {
        let need_new_seg = match cblk.segs.last() {
          None => true,
          Some(seg) => seg.numpasses >= seg.maxpasses,
        };
        if need_new_seg {
          let maxpasses = segment_maxpasses(cblk_style, cblk);
          cblk.segs.push(Segment {
            len: 0,
            numpasses: 0,
            maxpasses,
          });
        }
        let seg_index = cblk.segs.len() - 1;
        let seg = cblk.segs[seg_index];
        let inc = numpasses.min(seg.maxpasses - seg.numpasses);
        let len_bits = cblk.numlenbits + floor_log2(inc);
        let len = bio.read_bits(len_bits) as usize;
        body.chunks.push(Chunk {
          bandno,
          cblkno,
          seg_index,
          len,
        });
        cblk.segs[seg_index].numpasses += inc;
        cblk.numpasses += inc;
        numpasses -= inc;
      }
    }
  }
  if body.chunks.is_empty() {
    Ok(None)
  } else {
    Ok(Some(body))
  }
}

fn append_body(tp: &mut TileProcessor, body: &PacketBody, bytes: &[u8], keep: bool) {
  let tilec = &mut tp.tile.comps[body.compno as usize];
  let res = &mut tilec.resolutions[body.resno as usize];
  let mut off = 0usize;
  for chunk in &body.chunks {
    let end = (off + chunk.len).min(bytes.len());
    if keep {
      let band = &mut res.bands[chunk.bandno];
      let prec = &mut band.precincts[body.precno as usize];
      let cblk = &mut prec.cblks[chunk.cblkno];
      cblk.data.extend_from_slice(&bytes[off..end]);
      if let Some(seg) = cblk.segs.get_mut(chunk.seg_index) {
        seg.len += end - off;
      }
    }
    off = end;
  }
}
