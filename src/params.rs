//! Coding parameters decoded from the codestream markers.
//!
//! `ImageParams` holds the per-image state from SIZ/CAP. Each tile gets
//! a `TileCodingParams` cloned from the main-header default and then
//! overridden by tile-part-header markers. The out-of-band tables
//! (TLM, PLM/PLT, PPM/PPT) live here too so both the marker reader and
//! the T2 layer can reach them.

use std::collections::BTreeMap;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::image::Rect;

pub const MAX_RESOLUTIONS: usize = 33;

bitflags! {
  /// Scod / Scoc coding-style bits.
  pub struct CodingStyle: u8 {
    /// Precinct sizes are signalled explicitly.
    const PRECINCTS = 0x01;
    /// SOP markers precede every packet.
    const SOP = 0x02;
    /// EPH markers terminate every packet header.
    const EPH = 0x04;
  }
}

bitflags! {
  /// Code-block style bits (SPcod/SPcoc).
  pub struct CblkStyle: u8 {
    /// Selective arithmetic bypass (lazy mode).
    const LAZY = 0x01;
    /// Context reset on each pass boundary.
    const RESET = 0x02;
    /// Termination after every pass.
    const TERMALL = 0x04;
    /// Vertically causal context formation.
    const VSC = 0x08;
    /// Predictable termination.
    const PTERM = 0x10;
    /// Segmentation symbols after each cleanup pass.
    const SEGSYM = 0x20;
    /// High-throughput code-blocks.
    const HT = 0x40;
    /// Mixed HT and classic code-blocks.
    const HT_MIXED = 0x80;
  }
}

/// CAP Pcap bit advertising HT (Part 15) support.
pub const CAP_HT: u32 = 1 << (32 - 15);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressionOrder {
  Lrcp,
  Rlcp,
  Rpcl,
  Pcrl,
  Cprl,
}

impl ProgressionOrder {
  pub fn from_u8(v: u8) -> Option<Self> {
    match v {
      0 => Some(Self::Lrcp),
      1 => Some(Self::Rlcp),
      2 => Some(Self::Rpcl),
      3 => Some(Self::Pcrl),
      4 => Some(Self::Cprl),
      _ => None,
    }
  }
}

/// One POC marker entry: a progression override over half-open ranges.
#[derive(Clone, Copy, Debug)]
pub struct Poc {
  pub res_start: u8,
  pub comp_start: u16,
  pub layer_end: u16,
  pub res_end: u8,
  pub comp_end: u16,
  pub order: ProgressionOrder,
}

/// Quantization style from Sqcd/Sqcc.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuantStyle {
  /// No quantization: exponents only, reversible path.
  None,
  /// Scalar derived: one (expn, mant), others derived per level.
  ScalarDerived,
  /// Scalar expounded: one (expn, mant) per subband.
  ScalarExpounded,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepSize {
  pub expn: u8,
  pub mant: u16,
}

/// Per-(tile, component) coding parameters (merged COD/COC/QCD/QCC/RGN).
#[derive(Clone, Debug)]
pub struct TileComponentCodingParams {
  pub csty: CodingStyle,
  pub num_resolutions: u8,
  /// log2 code-block width/height, 2..=10, sum <= 12.
  pub cblkw: u8,
  pub cblkh: u8,
  pub cblk_style: CblkStyle,
  /// 1 = reversible 5/3, 0 = irreversible 9/7.
  pub qmfbid: u8,
  pub qnt_style: QuantStyle,
  pub step_sizes: SmallVec<[StepSize; 16]>,
  pub num_guard_bits: u8,
  pub roi_shift: u8,
  /// Per-resolution precinct exponents; 15 means "no partition".
  pub prcw: [u8; MAX_RESOLUTIONS],
  pub prch: [u8; MAX_RESOLUTIONS],
}

impl Default for TileComponentCodingParams {
  fn default() -> Self {
    Self {
      csty: CodingStyle::empty(),
      num_resolutions: 6,
      cblkw: 6,
      cblkh: 6,
      cblk_style: CblkStyle::empty(),
      qmfbid: 1,
      qnt_style: QuantStyle::None,
      step_sizes: SmallVec::new(),
      num_guard_bits: 2,
      roi_shift: 0,
      prcw: [15; MAX_RESOLUTIONS],
      prch: [15; MAX_RESOLUTIONS],
    }
  }
}

impl TileComponentCodingParams {
  /// Step size for band `bandno` of the decomposition, resolving the
  /// scalar-derived style. `bandno` 0 is the LL band, then 3 per level.
  pub fn step_size(&self, bandno: usize) -> StepSize {
    match self.qnt_style {
      QuantStyle::ScalarDerived => {
        let base = self.step_sizes.first().copied().unwrap_or_default();
        // eps_b = eps_0 + n_b - N_L: one less per resolution above 1.
        let drop = if bandno == 0 { 0 } else { (bandno - 1) / 3 } as i32;
        let expn = (base.expn as i32 - drop).max(0);
        StepSize {
          expn: expn as u8,
          mant: base.mant,
        }
      }
      _ => self
        .step_sizes
        .get(bandno)
        .copied()
        .unwrap_or_else(|| self.step_sizes.last().copied().unwrap_or_default()),
    }
  }
}

/// PPT fragments for one tile, merged lazily in Zppt order.
#[derive(Clone, Debug, Default)]
pub struct PptState {
  fragments: BTreeMap<u8, Vec<u8>>,
  merged: Option<Vec<u8>>,
}

impl PptState {
  pub fn push(&mut self, zppt: u8, data: &[u8]) -> Result<()> {
    if self.merged.is_some() {
      return Err(Error::structural("PPT after headers were merged"));
    }
    if self.fragments.insert(zppt, data.to_vec()).is_some() {
      return Err(Error::structural(format!("duplicate PPT index {}", zppt)));
    }
    Ok(())
  }

  pub fn is_empty(&self) -> bool {
    self.fragments.is_empty() && self.merged.is_none()
  }

  /// Concatenates fragments in Zppt order into one header stream.
  pub fn merge(&mut self) -> &[u8] {
    if self.merged.is_none() {
      let mut merged = Vec::new();
      for data in self.fragments.values() {
        merged.extend_from_slice(data);
      }
      self.fragments.clear();
      self.merged = Some(merged);
    }
    self.merged.as_deref().unwrap_or(&[])
  }
}

/// Per-tile parameters, populated from the default then overridden.
#[derive(Clone, Debug)]
pub struct TileCodingParams {
  pub csty: CodingStyle,
  pub prg: ProgressionOrder,
  pub num_layers: u16,
  pub num_layers_to_decode: u16,
  /// 0 = none, 1 = standard RCT/ICT, 2 = custom matrix via MCT/MCC.
  pub mct: u8,
  pub pocs: Vec<Poc>,
  pub tccps: Vec<TileComponentCodingParams>,
  pub ppt: PptState,
  /// Custom decorrelation matrix (row-major, comps x comps), from MCT.
  pub mct_matrix: Option<Vec<f32>>,
  /// DC offsets per component, from MCT offset arrays.
  pub mct_offsets: Option<Vec<i32>>,
  pub cod_seen: bool,
  pub qcd_seen: bool,
  /// Number of tile-parts seen so far; next TPsot must equal this.
  pub num_tile_parts_read: u8,
  /// TNsot when signalled non-zero.
  pub num_tile_parts_expected: Option<u8>,
}

impl Default for TileCodingParams {
  fn default() -> Self {
    Self {
      csty: CodingStyle::empty(),
      prg: ProgressionOrder::Lrcp,
      num_layers: 1,
      num_layers_to_decode: 1,
      mct: 0,
      pocs: Vec::new(),
      tccps: Vec::new(),
      ppt: PptState::default(),
      mct_matrix: None,
      mct_offsets: None,
      cod_seen: false,
      qcd_seen: false,
      num_tile_parts_read: 0,
      num_tile_parts_expected: None,
    }
  }
}

#[derive(Clone, Debug, Default)]
pub struct ComponentParams {
  pub dx: u32,
  pub dy: u32,
  pub prec: u32,
  pub sgnd: bool,
}

/// Per-image parameters from SIZ and CAP.
#[derive(Clone, Debug, Default)]
pub struct ImageParams {
  pub canvas: Rect,
  /// Tile grid origin and cell size.
  pub tx0: u32,
  pub ty0: u32,
  pub tdx: u32,
  pub tdy: u32,
  /// Grid dimensions in tiles.
  pub tw: u32,
  pub th: u32,
  pub comps: Vec<ComponentParams>,
  /// Pcap bit field; bit 15 advertises HT.
  pub cap: u32,
  pub comments: Vec<Vec<u8>>,
}

impl ImageParams {
  pub fn num_tiles(&self) -> u32 {
    self.tw * self.th
  }

  pub fn ht_capable(&self) -> bool {
    self.cap & CAP_HT != 0
  }

  /// Canvas rectangle of tile `(tx, ty)`, clipped to the image.
  pub fn tile_rect(&self, tx: u32, ty: u32) -> Rect {
    let x0 = (self.tx0 + tx * self.tdx).max(self.canvas.x0);
    let y0 = (self.ty0 + ty * self.tdy).max(self.canvas.y0);
    let x1 = (self.tx0 + (tx + 1) * self.tdx).min(self.canvas.x1);
    let y1 = (self.ty0 + (ty + 1) * self.tdy).min(self.canvas.y1);
    Rect::new(x0, y0, x1, y1)
  }
}

/// TLM table: (tile index, tile-part length) in marker order. Any
/// validation failure poisons the whole table and the decoder falls
/// back to sequential tile-part parsing.
#[derive(Debug)]
pub struct TlmManager {
  entries: Vec<(u16, u32)>,
  last_marker_id: i32,
  valid: bool,
}

impl Default for TlmManager {
  fn default() -> Self {
    Self::new()
  }
}

impl TlmManager {
  pub fn new() -> Self {
    Self {
      entries: Vec::new(),
      last_marker_id: -1,
      valid: true,
    }
  }

  /// Ingests one TLM marker body's entries. `ztlm` is the marker id.
  pub fn push_marker(&mut self, ztlm: u8, entries: &[(u16, u32)]) -> Result<()> {
    if !self.valid {
      return Ok(());
    }
    if (ztlm as i32) <= self.last_marker_id {
      self.invalidate();
      return Err(Error::CorruptTlm(format!(
        "TLM marker id {} not strictly increasing (last {})",
        ztlm, self.last_marker_id
      )));
    }
    self.last_marker_id = ztlm as i32;
    for &(tile, len) in entries {
      if len == 0 {
        self.invalidate();
        return Err(Error::CorruptTlm(format!(
          "TLM entry for tile {} has zero length",
          tile
        )));
      }
      self.entries.push((tile, len));
    }
    Ok(())
  }

  pub fn invalidate(&mut self) {
    self.valid = false;
    self.entries.clear();
  }

  pub fn is_usable(&self) -> bool {
    self.valid && !self.entries.is_empty()
  }

  pub fn entries(&self) -> &[(u16, u32)] {
    &self.entries
  }

  /// Absolute (offset, length) of every tile-part, given the offset of
  /// the first SOT. Returns `None` when the table is unusable.
  pub fn tile_part_spans(&self, first_sot: u64) -> Option<Vec<(u16, u64, u32)>> {
    if !self.is_usable() {
      return None;
    }
    let mut spans = Vec::with_capacity(self.entries.len());
    let mut offset = first_sot;
    for &(tile, len) in &self.entries {
      spans.push((tile, offset, len));
      offset += len as u64;
    }
    Some(spans)
  }
}

/// Packet lengths signalled out-of-band, keyed (tile, tile-part).
#[derive(Debug)]
pub struct PacketLengthCache {
  per_tile_part: BTreeMap<(u16, u8), Vec<u32>>,
  valid: bool,
}

impl Default for PacketLengthCache {
  fn default() -> Self {
    Self::new()
  }
}

impl PacketLengthCache {
  pub fn new() -> Self {
    Self {
      per_tile_part: BTreeMap::new(),
      valid: true,
    }
  }

  pub fn push(&mut self, tile: u16, tile_part: u8, lengths: Vec<u32>) {
    if !self.valid {
      return;
    }
    self
      .per_tile_part
      .entry((tile, tile_part))
      .or_default()
      .extend(lengths);
  }

  pub fn invalidate(&mut self) {
    self.valid = false;
    self.per_tile_part.clear();
  }

  pub fn lengths(&self, tile: u16) -> Option<Vec<u32>> {
    if !self.valid {
      return None;
    }
    let mut out = Vec::new();
    let mut found = false;
    for ((t, _), lens) in &self.per_tile_part {
      if *t == tile {
        found = true;
        out.extend_from_slice(lens);
      }
    }
    if found {
      Some(out)
    } else {
      None
    }
  }
}

/// PPM state: fragments merge in Zppm order into a record stream; each
/// record (a 4-byte length plus that many header bytes) is consumed by
/// the next tile-part that needs packed headers.
#[derive(Debug, Default)]
pub struct PpmState {
  fragments: BTreeMap<u8, Vec<u8>>,
  records: Vec<Vec<u8>>,
  next_record: usize,
  merged: bool,
}

impl PpmState {
  pub fn push(&mut self, zppm: u8, data: &[u8]) -> Result<()> {
    if self.merged {
      return Err(Error::structural("PPM after headers were merged"));
    }
    if self.fragments.insert(zppm, data.to_vec()).is_some() {
      return Err(Error::structural(format!("duplicate PPM index {}", zppm)));
    }
    Ok(())
  }

  pub fn is_present(&self) -> bool {
    !self.fragments.is_empty() || self.merged
  }

  pub fn merge(&mut self) -> Result<()> {
    if self.merged {
      return Ok(());
    }
    let mut merged = Vec::new();
    for data in self.fragments.values() {
      merged.extend_from_slice(data);
    }
    self.fragments.clear();
    let mut pos = 0;
    while pos < merged.len() {
      if pos + 4 > merged.len() {
        return Err(Error::structural("PPM record length field truncated"));
      }
      let len = u32::from_be_bytes([merged[pos], merged[pos + 1], merged[pos + 2], merged[pos + 3]])
        as usize;
      pos += 4;
      if pos + len > merged.len() {
        return Err(Error::structural("PPM record body truncated"));
      }
      self.records.push(merged[pos..pos + len].to_vec());
      pos += len;
    }
    self.merged = true;
    Ok(())
  }

  /// Next packed-header record, erroring when the records are spent
  /// while packets still need headers.
  pub fn take_record(&mut self) -> Result<Vec<u8>> {
    let record = self.records.get(self.next_record).cloned();
    self.next_record += 1;
    record.ok_or_else(|| Error::structural("PPM data exhausted before all packets were parsed"))
  }
}

/// The merged per-codestream parameter set the decoder reads from.
#[derive(Debug, Default)]
pub struct CodingParams {
  pub image: ImageParams,
  /// Main-header defaults applied to each tile at its first SOT.
  pub default_tcp: TileCodingParams,
  /// Lazily populated per tile index.
  pub tcps: Vec<Option<TileCodingParams>>,
  pub tlm: TlmManager,
  pub plt: PacketLengthCache,
  pub ppm: PpmState,
  /// `layers_to_decompress` decode parameter (0 = all).
  pub layer_limit: u16,
  /// `reduce` decode parameter.
  pub reduce: u32,
}

impl CodingParams {
  pub fn tcp(&self, tile: u16) -> Option<&TileCodingParams> {
    self.tcps.get(tile as usize).and_then(|t| t.as_ref())
  }

  pub fn tcp_mut(&mut self, tile: u16) -> &mut TileCodingParams {
    let slot = &mut self.tcps[tile as usize];
    if slot.is_none() {
      *slot = Some(self.default_tcp.clone());
    }
    slot.as_mut().unwrap()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tlm_rejects_reused_marker_id() {
    let mut tlm = TlmManager::new();
    tlm.push_marker(0, &[(0, 100), (1, 200)]).unwrap();
    assert!(tlm.push_marker(0, &[(2, 300)]).is_err());
    assert!(!tlm.is_usable());
  }

  #[test]
  fn tlm_spans_accumulate() {
    let mut tlm = TlmManager::new();
    tlm.push_marker(0, &[(0, 100), (1, 200)]).unwrap();
    tlm.push_marker(1, &[(0, 50)]).unwrap();
    let spans = tlm.tile_part_spans(1000).unwrap();
    assert_eq!(spans, vec![(0, 1000, 100), (1, 1100, 200), (0, 1300, 50)]);
  }

  #[test]
  fn ppm_records_split_on_length() {
    let mut ppm = PpmState::default();
    // Two records: 2 bytes then 1 byte, split across fragments.
    ppm.push(0, &[0, 0, 0, 2, 0xaa]).unwrap();
    ppm.push(1, &[0xbb, 0, 0, 0, 1, 0xcc]).unwrap();
    ppm.merge().unwrap();
    assert_eq!(ppm.take_record().unwrap(), vec![0xaa, 0xbb]);
    assert_eq!(ppm.take_record().unwrap(), vec![0xcc]);
    assert!(ppm.take_record().is_err());
  }

  #[test]
  fn derived_step_size_drops_per_level() {
    let mut tccp = TileComponentCodingParams::default();
    tccp.qnt_style = QuantStyle::ScalarDerived;
    tccp.num_resolutions = 3;
    tccp.step_sizes.push(StepSize { expn: 10, mant: 0 });
    assert_eq!(tccp.step_size(0).expn, 10);
    assert_eq!(tccp.step_size(1).expn, 10);
    assert_eq!(tccp.step_size(4).expn, 9);
  }

  #[test]
  fn tile_rect_clips_to_canvas() {
    let p = ImageParams {
      canvas: Rect::new(2, 2, 100, 60),
      tx0: 0,
      ty0: 0,
      tdx: 64,
      tdy: 64,
      tw: 2,
      th: 1,
      ..Default::default()
    };
    assert_eq!(p.tile_rect(0, 0), Rect::new(2, 2, 64, 60));
    assert_eq!(p.tile_rect(1, 0), Rect::new(64, 2, 100, 60));
  }
}
