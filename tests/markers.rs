//! Header-level behaviour through the public API.

mod common;

use common::{build_codestream, marker, CodestreamSpec};
use jp2k::{Codec, DecompressParams, MemStream};

fn codec(bytes: Vec<u8>, params: DecompressParams) -> Codec {
  Codec::new(Box::new(MemStream::new(bytes)), params)
}

#[test]
fn header_info_reflects_siz() {
  let spec = CodestreamSpec {
    width: 128,
    height: 96,
    tile_width: 64,
    tile_height: 64,
    num_comps: 3,
    ..Default::default()
  };
  let mut c = codec(build_codestream(&spec), DecompressParams::default());
  let info = c.read_header().unwrap();
  assert_eq!(info.canvas.width(), 128);
  assert_eq!(info.canvas.height(), 96);
  assert_eq!(info.tiles_wide, 2);
  assert_eq!(info.tiles_high, 2);
  assert_eq!(info.num_comps, 3);
  assert!(!info.ht);
}

#[test]
fn header_survives_data_failure() {
  // Corrupt the tile stream: the header image must stay usable so a
  // caller can retry with different parameters.
  let spec = CodestreamSpec::default();
  let mut bytes = build_codestream(&spec);
  let len = bytes.len();
  bytes.truncate(len - 8);
  // Rewrite the final bytes with garbage that breaks the tile-part.
  bytes.extend([0x00; 8]);
  let mut c = codec(bytes, DecompressParams::default());
  let info = c.read_header().unwrap();
  assert_eq!(info.canvas.width(), 64);
  let _ = c.decompress();
  assert_eq!(c.header_image().x1, 64);
}

#[test]
fn comments_are_collected() {
  let spec = CodestreamSpec::default();
  let mut cs = vec![0xff, 0x4f];
  cs.extend(marker(0xff51, &common::siz_body(&spec)));
  cs.extend(marker(0xff52, &common::cod_body(&spec)));
  cs.extend(marker(0xff5c, &common::qcd_body(&spec)));
  let mut com = vec![0u8, 1];
  com.extend(b"made by a test");
  cs.extend(marker(0xff64, &com));
  let packets = common::empty_packets(&spec);
  let psot = 14 + packets.len() as u32;
  cs.extend(marker(0xff90, &common::sot_body(0, psot, 0, 1)));
  cs.extend([0xff, 0x93]);
  cs.extend(&packets);
  cs.extend([0xff, 0xd9]);
  let mut c = codec(cs, DecompressParams::default());
  let info = c.read_header().unwrap();
  assert_eq!(info.comments.len(), 1);
  assert_eq!(info.comments[0].as_slice(), b"made by a test");
}

#[test]
fn marker_cache_spans_header_and_tiles() {
  let spec = CodestreamSpec::default();
  let mut c = codec(build_codestream(&spec), DecompressParams::default());
  c.read_header().unwrap();
  c.decompress().unwrap();
  let cache = c.marker_cache();
  let ids: Vec<u16> = cache.records.iter().map(|r| r.id).collect();
  assert!(ids.starts_with(&[0xff4f, 0xff51, 0xff52, 0xff5c]));
  assert!(ids.contains(&0xff90));
  assert!(ids.contains(&0xffd9));
  assert_eq!(cache.main_header_start, 0);
  assert!(cache.tile_stream_start > 0);
}

#[test]
fn bad_tile_index_rejected() {
  let spec = CodestreamSpec::default();
  let mut c = codec(build_codestream(&spec), DecompressParams::default());
  c.read_header().unwrap();
  assert!(c.decompress_tile(5).is_err());
}
