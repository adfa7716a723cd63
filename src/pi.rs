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

//! Packet (progression) iteration.
//!
//! The packet sequence of a tile is fully determined by the coding
//! parameters; T2 compares the generated index against what the
//! codestream delivers. The spatial orders sort precinct origins in
//! canvas coordinates, which reproduces the standard's lattice walk:
//! a precinct that starts before the tile edge keys on the tile edge.

use crate::image::Rect;
use crate::math::*;
use crate::params::{Poc, ProgressionOrder, TileCodingParams};

/// Geometry the iterator needs per (component, resolution).
#[derive(Clone, Copy, Debug, Default)]
pub struct PiResolution {
  /// Precinct exponents at this resolution.
  pub pdx: u32,
  pub pdy: u32,
  /// Precinct grid dimensions.
  pub pw: u32,
  pub ph: u32,
}

#[derive(Clone, Debug)]
pub struct PiComponent {
  pub dx: u32,
  pub dy: u32,
  pub resolutions: Vec<PiResolution>,
}

/// One packet's coordinates in the progression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PacketPos {
  pub compno: u16,
  pub resno: u8,
  pub precno: u64,
  pub layno: u16,
}

pub struct PacketIter {
  order: Vec<PacketPos>,
  next: usize,
}

impl PacketIter {
  /// Builds the packet order for one tile. POC entries override the
  /// default progression when present.
  pub fn new(tile_rect: Rect, comps: &[PiComponent], tcp: &TileCodingParams) -> Self {
    let mut order = Vec::new();
    if tcp.pocs.is_empty() {
      let max_res = comps
        .iter()
        .map(|c| c.resolutions.len())
        .max()
        .unwrap_or(0) as u8;
      let default = Poc {
        res_start: 0,
        comp_start: 0,
        layer_end: tcp.num_layers,
        res_end: max_res,
        comp_end: comps.len() as u16,
        order: tcp.prg,
      };
      emit_poc(&mut order, tile_rect, comps, &default);
    } else {
      for poc in &tcp.pocs {
        emit_poc(&mut order, tile_rect, comps, poc);
      }
    }
    Self { order, next: 0 }
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  /// Sequence number of the packet about to be returned.
  pub fn sequence_number(&self) -> usize {
    self.next
  }
}

impl Iterator for PacketIter {
  type Item = PacketPos;

  fn next(&mut self) -> Option<PacketPos> {
    let pos = self.order.get(self.next).copied();
    if pos.is_some() {
      self.next += 1;
    }
    pos
  }
}

/// Canvas origin of precinct (prci, prcj) for (comp, res), clamped to
/// the tile edge for the partial first precinct.
fn precinct_origin(
  tile_rect: Rect,
  comp: &PiComponent,
  resno: u8,
  res: &PiResolution,
  prci: u32,
  prcj: u32,
) -> (u64, u64) {
  let levelno = comp.resolutions.len() as u32 - 1 - resno as u32;
  let trx0 = ceil_div(ceil_div(tile_rect.x0, comp.dx), 1 << levelno);
  let try0 = ceil_div(ceil_div(tile_rect.y0, comp.dy), 1 << levelno);
  let px0 = floor_div_pow2(trx0, res.pdx) << res.pdx;
  let py0 = floor_div_pow2(try0, res.pdy) << res.pdy;
  let rx = (px0 as u64 + ((prci as u64) << res.pdx)).max(trx0 as u64);
  let ry = (py0 as u64 + ((prcj as u64) << res.pdy)).max(try0 as u64);
  // Back to canvas coordinates.
  let x = rx * comp.dx as u64 * (1u64 << levelno);
  let y = ry * comp.dy as u64 * (1u64 << levelno);
  (x.max(tile_rect.x0 as u64), y.max(tile_rect.y0 as u64))
}

fn emit_poc(order: &mut Vec<PacketPos>, tile_rect: Rect, comps: &[PiComponent], poc: &Poc) {
  let comp_range = poc.comp_start..poc.comp_end.min(comps.len() as u16);
  let layers = 0..poc.layer_end;

  match poc.order {
    ProgressionOrder::Lrcp => {
      for layno in layers.clone() {
        for resno in poc.res_start..poc.res_end {
          for compno in comp_range.clone() {
            let comp = &comps[compno as usize];
            if (resno as usize) >= comp.resolutions.len() {
              continue;
            }
            let res = &comp.resolutions[resno as usize];
            for precno in 0..res.pw as u64 * res.ph as u64 {
              order.push(PacketPos {
                compno,
                resno,
                precno,
                layno,
              });
            }
          }
        }
      }
    }
    ProgressionOrder::Rlcp => {
      for resno in poc.res_start..poc.res_end {
        for layno in layers.clone() {
          for compno in comp_range.clone() {
            let comp = &comps[compno as usize];
            if (resno as usize) >= comp.resolutions.len() {
              continue;
            }
            let res = &comp.resolutions[resno as usize];
            for precno in 0..res.pw as u64 * res.ph as u64 {
              order.push(PacketPos {
                compno,
                resno,
                precno,
                layno,
              });
            }
          }
        }
      }
    }
    ProgressionOrder::Rpcl | ProgressionOrder::Pcrl | ProgressionOrder::Cprl => {
      // (sort key, packet without layer): key encodes the nesting of
      // the chosen order with position expressed in canvas space.
      let mut keyed: Vec<([u64; 4], PacketPos)> = Vec::new();
      for compno in comp_range.clone() {
        let comp = &comps[compno as usize];
        for resno in poc.res_start..poc.res_end.min(comp.resolutions.len() as u8) {
          let res = &comp.resolutions[resno as usize];
          for prcj in 0..res.ph {
            for prci in 0..res.pw {
              let precno = prci as u64 + prcj as u64 * res.pw as u64;
              let (x, y) = precinct_origin(tile_rect, comp, resno, res, prci, prcj);
              let key = match poc.order {
                ProgressionOrder::Rpcl => [resno as u64, y, x, compno as u64],
                ProgressionOrder::Pcrl => [y, x, compno as u64, resno as u64],
                ProgressionOrder::Cprl => [compno as u64, y, x, resno as u64],
                _ => unreachable!(),
              };
              keyed.push((
                key,
                PacketPos {
                  compno,
                  resno,
                  precno,
                  layno: 0,
                },
              ));
            }
          }
        }
      }
      keyed.sort_by_key(|(key, _)| *key);
      for (_, pos) in keyed {
        for layno in layers.clone() {
          order.push(PacketPos { layno, ..pos });
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::{rngs::StdRng, Rng, SeedableRng};
  use std::collections::HashSet;

  fn make_comps(rng: &mut StdRng, num_comps: usize, num_res: usize) -> Vec<PiComponent> {
    (0..num_comps)
      .map(|_| {
        let dx = 1 << rng.gen_range(0..2);
        let dy = 1 << rng.gen_range(0..2);
        let resolutions = (0..num_res)
          .map(|_| {
            let pw = rng.gen_range(1..4);
            let ph = rng.gen_range(1..4);
            PiResolution {
              pdx: rng.gen_range(5..8),
              pdy: rng.gen_range(5..8),
              pw,
              ph,
            }
          })
          .collect();
        PiComponent { dx, dy, resolutions }
      })
      .collect()
  }

  fn tcp_with_order(order: ProgressionOrder, num_layers: u16) -> TileCodingParams {
    TileCodingParams {
      prg: order,
      num_layers,
      ..Default::default()
    }
  }

  #[test]
  fn every_packet_visited_exactly_once() {
    let orders = [
      ProgressionOrder::Lrcp,
      ProgressionOrder::Rlcp,
      ProgressionOrder::Rpcl,
      ProgressionOrder::Pcrl,
      ProgressionOrder::Cprl,
    ];
    let mut rng = StdRng::seed_from_u64(42);
    for &order in &orders {
      for _ in 0..10 {
        let num_comps = rng.gen_range(1..4);
        let num_res = rng.gen_range(1..5);
        let num_layers = rng.gen_range(1..4);
        let comps = make_comps(&mut rng, num_comps, num_res);
        let tile_rect = Rect::new(0, 0, 1024, 1024);
        let tcp = tcp_with_order(order, num_layers);
        let pi = PacketIter::new(tile_rect, &comps, &tcp);

        let expected: usize = comps
          .iter()
          .map(|c| {
            c.resolutions
              .iter()
              .map(|r| (r.pw * r.ph) as usize * num_layers as usize)
              .sum::<usize>()
          })
          .sum();
        let visited: Vec<PacketPos> = pi.collect();
        assert_eq!(visited.len(), expected, "{:?}", order);
        let unique: HashSet<PacketPos> = visited.iter().copied().collect();
        assert_eq!(unique.len(), expected, "duplicates under {:?}", order);
      }
    }
  }

  #[test]
  fn lrcp_layers_outermost() {
    let comps = vec![PiComponent {
      dx: 1,
      dy: 1,
      resolutions: vec![
        PiResolution {
          pdx: 15,
          pdy: 15,
          pw: 1,
          ph: 1,
        };
        2
      ],
    }];
    let tcp = tcp_with_order(ProgressionOrder::Lrcp, 2);
    let order: Vec<PacketPos> = PacketIter::new(Rect::new(0, 0, 64, 64), &comps, &tcp).collect();
    assert_eq!(order.len(), 4);
    assert_eq!((order[0].layno, order[0].resno), (0, 0));
    assert_eq!((order[1].layno, order[1].resno), (0, 1));
    assert_eq!((order[2].layno, order[2].resno), (1, 0));
    assert_eq!((order[3].layno, order[3].resno), (1, 1));
  }

  #[test]
  fn rpcl_orders_by_resolution_then_position() {
    let comps = vec![PiComponent {
      dx: 1,
      dy: 1,
      resolutions: vec![
        PiResolution {
          pdx: 6,
          pdy: 6,
          pw: 1,
          ph: 1,
        },
        PiResolution {
          pdx: 6,
          pdy: 6,
          pw: 2,
          ph: 2,
        },
      ],
    }];
    let tcp = tcp_with_order(ProgressionOrder::Rpcl, 1);
    let order: Vec<PacketPos> = PacketIter::new(Rect::new(0, 0, 128, 128), &comps, &tcp).collect();
    assert_eq!(order.len(), 5);
    assert_eq!(order[0].resno, 0);
    assert!(order[1..].iter().all(|p| p.resno == 1));
    // Raster order over the 2x2 precinct grid.
    let precnos: Vec<u64> = order[1..].iter().map(|p| p.precno).collect();
    assert_eq!(precnos, vec![0, 1, 2, 3]);
  }

  #[test]
  fn poc_override_restricts_ranges() {
    let comps = vec![
      PiComponent {
        dx: 1,
        dy: 1,
        resolutions: vec![
          PiResolution {
            pdx: 15,
            pdy: 15,
            pw: 1,
            ph: 1,
          };
          3
        ],
      };
      2
    ];
    let mut tcp = tcp_with_order(ProgressionOrder::Lrcp, 2);
    tcp.pocs.push(Poc {
      res_start: 1,
      comp_start: 1,
      layer_end: 1,
      res_end: 2,
      comp_end: 2,
      order: ProgressionOrder::Lrcp,
    });
    let order: Vec<PacketPos> = PacketIter::new(Rect::new(0, 0, 64, 64), &comps, &tcp).collect();
    assert_eq!(order.len(), 1);
    assert_eq!(
      (order[0].compno, order[0].resno, order[0].layno),
      (1, 1, 0)
    );
  }
}
