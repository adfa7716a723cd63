//! Synthetic codestream builders shared by the integration tests.
//!
//! These produce structurally conforming codestreams whose packets are
//! all empty (the zero-length packet bit), which exercises the full
//! marker / T2 / IDWT / composite pipeline without a compressor.

pub fn marker(id: u16, body: &[u8]) -> Vec<u8> {
  let mut out = id.to_be_bytes().to_vec();
  out.extend(((body.len() + 2) as u16).to_be_bytes());
  out.extend_from_slice(body);
  out
}

pub struct CodestreamSpec {
  pub width: u32,
  pub height: u32,
  pub tile_width: u32,
  pub tile_height: u32,
  pub num_comps: u16,
  pub num_resolutions: u8,
  pub num_layers: u16,
  pub with_tlm: bool,
}

impl Default for CodestreamSpec {
  fn default() -> Self {
    Self {
      width: 64,
      height: 64,
      tile_width: 64,
      tile_height: 64,
      num_comps: 1,
      num_resolutions: 3,
      num_layers: 1,
      with_tlm: false,
    }
  }
}

pub fn siz_body(spec: &CodestreamSpec) -> Vec<u8> {
  let mut b = Vec::new();
  b.extend(0u16.to_be_bytes());
  b.extend(spec.width.to_be_bytes());
  b.extend(spec.height.to_be_bytes());
  b.extend(0u32.to_be_bytes());
  b.extend(0u32.to_be_bytes());
  b.extend(spec.tile_width.to_be_bytes());
  b.extend(spec.tile_height.to_be_bytes());
  b.extend(0u32.to_be_bytes());
  b.extend(0u32.to_be_bytes());
  b.extend(spec.num_comps.to_be_bytes());
  for _ in 0..spec.num_comps {
    b.push(7); // 8-bit unsigned
    b.push(1);
    b.push(1);
  }
  b
}

pub fn cod_body(spec: &CodestreamSpec) -> Vec<u8> {
  let mut b = Vec::new();
  b.push(0); // Scod
  b.push(0); // LRCP
  b.extend(spec.num_layers.to_be_bytes());
  b.push(0); // no MCT
  b.push(spec.num_resolutions - 1);
  b.push(4); // 64-wide code-blocks
  b.push(4);
  b.push(0);
  b.push(1); // 5/3
  b
}

pub fn qcd_body(spec: &CodestreamSpec) -> Vec<u8> {
  let mut b = vec![2u8 << 5]; // no quantization, 2 guard bits
  let bands = 1 + 3 * (spec.num_resolutions as usize - 1);
  for _ in 0..bands {
    b.push(9 << 3);
  }
  b
}

/// Packet bytes for one tile: every packet empty. One packet per
/// (layer, resolution, component); the default precincts put one
/// precinct at each resolution of a small tile.
pub fn empty_packets(spec: &CodestreamSpec) -> Vec<u8> {
  let packets = spec.num_layers as usize
    * spec.num_resolutions as usize
    * spec.num_comps as usize;
  // A zero bit per packet, each padded to its own byte.
  vec![0u8; packets]
}

fn num_tiles(spec: &CodestreamSpec) -> u32 {
  let tw = (spec.width + spec.tile_width - 1) / spec.tile_width;
  let th = (spec.height + spec.tile_height - 1) / spec.tile_height;
  tw * th
}

pub fn sot_body(tile: u16, psot: u32, tpsot: u8, tnsot: u8) -> Vec<u8> {
  let mut b = Vec::new();
  b.extend(tile.to_be_bytes());
  b.extend(psot.to_be_bytes());
  b.push(tpsot);
  b.push(tnsot);
  b
}

/// Builds a complete codestream with one tile-part per tile.
pub fn build_codestream(spec: &CodestreamSpec) -> Vec<u8> {
  let tiles = num_tiles(spec);
  let packets = empty_packets(spec);
  // SOT(12) + SOD(2) + data.
  let psot = 12 + 2 + packets.len() as u32;

  let mut cs = vec![0xff, 0x4f];
  cs.extend(marker(0xff51, &siz_body(spec)));
  cs.extend(marker(0xff52, &cod_body(spec)));
  cs.extend(marker(0xff5c, &qcd_body(spec)));
  if spec.with_tlm {
    // Ztlm 0, ST=1 (u8 tile indices), SP=0 (u16 lengths).
    let mut tlm = vec![0u8, 0b0001_0000];
    for t in 0..tiles {
      tlm.push(t as u8);
      tlm.extend((psot as u16).to_be_bytes());
    }
    cs.extend(marker(0xff55, &tlm));
  }
  for t in 0..tiles {
    cs.extend(marker(0xff90, &sot_body(t as u16, psot, 0, 1)));
    cs.extend([0xff, 0x93]);
    cs.extend(&packets);
  }
  cs.extend([0xff, 0xd9]);
  cs
}
