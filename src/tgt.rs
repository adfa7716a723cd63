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
   Tag-tree coder interface
==========================================================
*/

use crate::bio::BitReader;

/// Sentinel for "not yet decoded".
const UNKNOWN: i32 = 999;

#[derive(Clone, Copy, Debug)]
struct Node {
  parent: u32,
  value: i32,
  low: i32,
}

const NO_PARENT: u32 = u32::MAX;

/// A tag tree transmits a grid of integers by coding minima over
/// nested 2x2 groups. Decoding is resumable: every visit continues
/// from the per-node threshold already proven.
#[derive(Clone, Debug)]
pub struct TagTree {
  num_leafs_h: u32,
  num_leafs_v: u32,
  nodes: Vec<Node>,
}

impl TagTree {
  pub fn new(num_leafs_h: u32, num_leafs_v: u32) -> Self {
    let mut tree = Self {
      num_leafs_h: 0,
      num_leafs_v: 0,
      nodes: Vec::new(),
    };
    tree.init(num_leafs_h, num_leafs_v);
    tree
  }

  /// Rebuilds for new dimensions, reusing the allocation when the
  /// shape is unchanged.
  pub fn init(&mut self, num_leafs_h: u32, num_leafs_v: u32) {
    if self.num_leafs_h == num_leafs_h && self.num_leafs_v == num_leafs_v && !self.nodes.is_empty()
    {
      self.reset();
      return;
    }
    self.num_leafs_h = num_leafs_h;
    self.num_leafs_v = num_leafs_v;
    self.nodes.clear();
    if num_leafs_h == 0 || num_leafs_v == 0 {
      return;
    }
    // Level sizes: leaves, then repeated ceil-halving up to a 1x1 root.
    let mut dims = vec![(num_leafs_h, num_leafs_v)];
    while dims.last() != Some(&(1, 1)) {
      let &(w, h) = dims.last().unwrap();
      dims.push(((w + 1) / 2, (h + 1) / 2));
    }
    let mut level_offset = Vec::with_capacity(dims.len());
    let mut total = 0u32;
    for &(w, h) in &dims {
      level_offset.push(total);
      total += w * h;
    }
    self.nodes.reserve(total as usize);
    for (level, &(w, h)) in dims.iter().enumerate() {
      for y in 0..h {
        for x in 0..w {
          let parent = if level + 1 < dims.len() {
            let (pw, _) = dims[level + 1];
            level_offset[level + 1] + (y / 2) * pw + x / 2
          } else {
            NO_PARENT
          };
          self.nodes.push(Node {
            parent,
            value: UNKNOWN,
            low: 0,
          });
        }
      }
    }
    self.reset();
  }

  pub fn reset(&mut self) {
    for node in &mut self.nodes {
      node.value = UNKNOWN;
      node.low = 0;
    }
  }

  fn path_to_root(&self, leaf: u32) -> Vec<u32> {
    let mut path = Vec::new();
    let mut idx = leaf;
    loop {
      path.push(idx);
      let parent = self.nodes[idx as usize].parent;
      if parent == NO_PARENT {
        break;
      }
      idx = parent;
    }
    path.reverse();
    path
  }

  /// Decodes whether `leaf`'s value is below `threshold`, consuming
  /// exactly the bits the encoder emitted for this visit.
  pub fn decode(&mut self, bio: &mut BitReader<'_>, leaf: u32, threshold: i32) -> bool {
    let path = self.path_to_root(leaf);
    let mut low = 0i32;
    for &idx in &path {
      let node = &mut self.nodes[idx as usize];
      if low > node.low {
        node.low = low;
      } else {
        low = node.low;
      }
      while low < threshold && low < node.value {
        if bio.read_bit() != 0 {
          node.value = low;
        } else {
          low += 1;
        }
      }
      node.low = low;
    }
    self.nodes[leaf as usize].value < threshold
  }

  /// Fully decodes `leaf`'s value by raising the threshold until the
  /// node resolves. Used for zero-bit-plane counts.
  pub fn decode_value(&mut self, bio: &mut BitReader<'_>, leaf: u32) -> i32 {
    let mut threshold = 1;
    while !self.decode(bio, leaf, threshold) {
      threshold += 1;
    }
    self.nodes[leaf as usize].value
  }

  pub fn leaf_value(&self, leaf: u32) -> Option<i32> {
    let v = self.nodes.get(leaf as usize)?.value;
    if v == UNKNOWN {
      None
    } else {
      Some(v)
    }
  }
}

/// Encoder-side tag tree, only exercised by round-trip tests.
#[cfg(test)]
pub(crate) struct TagTreeEncoder {
  tree: TagTree,
  known: Vec<bool>,
}

#[cfg(test)]
impl TagTreeEncoder {
  pub fn new(num_leafs_h: u32, num_leafs_v: u32) -> Self {
    let mut tree = TagTree::new(num_leafs_h, num_leafs_v);
    for node in &mut tree.nodes {
      node.value = UNKNOWN;
      node.low = 0;
    }
    let len = tree.nodes.len();
    Self {
      tree,
      known: vec![false; len],
    }
  }

  pub fn set_value(&mut self, leaf: u32, value: i32) {
    let mut idx = leaf;
    loop {
      let node = &mut self.tree.nodes[idx as usize];
      if node.value != UNKNOWN && node.value <= value {
        break;
      }
      node.value = value;
      if node.parent == NO_PARENT {
        break;
      }
      idx = node.parent;
    }
  }

  pub fn encode(&mut self, bio: &mut crate::bio::BitWriter, leaf: u32, threshold: i32) {
    let path = self.tree.path_to_root(leaf);
    let mut low = 0i32;
    for &idx in &path {
      let node = &mut self.tree.nodes[idx as usize];
      if low > node.low {
        node.low = low;
      } else {
        low = node.low;
      }
      while low < threshold {
        if low >= node.value {
          if !self.known[idx as usize] {
            bio.write_bit(1);
            self.known[idx as usize] = true;
          }
          break;
        }
        bio.write_bit(0);
        low += 1;
      }
      node.low = low;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bio::BitWriter;
  use rand::{rngs::StdRng, Rng, SeedableRng};

  fn round_trip(w: u32, h: u32, values: &[i32], max_threshold: i32) {
    let mut enc = TagTreeEncoder::new(w, h);
    for (leaf, &v) in values.iter().enumerate() {
      enc.set_value(leaf as u32, v);
    }
    let mut bw = BitWriter::new();
    for t in 1..=max_threshold {
      for leaf in 0..values.len() as u32 {
        enc.encode(&mut bw, leaf, t);
      }
    }
    let bytes = bw.align();

    let mut dec = TagTree::new(w, h);
    let mut br = BitReader::new(&bytes);
    let mut decoded = vec![None; values.len()];
    for t in 1..=max_threshold {
      for leaf in 0..values.len() as u32 {
        if dec.decode(&mut br, leaf, t) && decoded[leaf as usize].is_none() {
          decoded[leaf as usize] = dec.leaf_value(leaf);
        }
      }
    }
    for (leaf, &v) in values.iter().enumerate() {
      if v < max_threshold {
        assert_eq!(decoded[leaf], Some(v), "leaf {}", leaf);
      } else {
        assert_eq!(decoded[leaf], None, "leaf {}", leaf);
      }
    }
  }

  #[test]
  fn single_leaf() {
    round_trip(1, 1, &[3], 8);
  }

  #[test]
  fn grid_round_trip() {
    round_trip(3, 2, &[0, 1, 2, 3, 2, 1], 6);
  }

  #[test]
  fn random_grids_monotone() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..50 {
      let w = rng.gen_range(1..8);
      let h = rng.gen_range(1..8);
      let values: Vec<i32> = (0..w * h).map(|_| rng.gen_range(0..10)).collect();
      round_trip(w, h, &values, 10);
    }
  }

  #[test]
  fn decode_never_lowers_a_leaf() {
    // Monotonicity: once a leaf resolves, repeat visits at higher
    // thresholds keep the same value.
    let mut enc = TagTreeEncoder::new(2, 2);
    for (leaf, v) in [(0u32, 1), (1, 2), (2, 0), (3, 3)] {
      enc.set_value(leaf, v);
    }
    let mut bw = BitWriter::new();
    for t in 1..=5 {
      for leaf in 0..4 {
        enc.encode(&mut bw, leaf, t);
      }
    }
    let bytes = bw.align();
    let mut dec = TagTree::new(2, 2);
    let mut br = BitReader::new(&bytes);
    let mut first_seen = [None; 4];
    for t in 1..=5 {
      for leaf in 0..4u32 {
        dec.decode(&mut br, leaf, t);
        if let Some(v) = dec.leaf_value(leaf) {
          if let Some(prev) = first_seen[leaf as usize] {
            assert_eq!(prev, v);
          }
          first_seen[leaf as usize] = Some(v);
        }
      }
    }
  }
}
