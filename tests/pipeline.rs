//! End-to-end decode scenarios over synthetic codestreams.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::{build_codestream, CodestreamSpec};
use jp2k::codec::{RandomAccessFlags, RegionF64};
use jp2k::{CacheStrategy, Codec, DecompressParams, MemStream};

fn codec(bytes: Vec<u8>, params: DecompressParams) -> Codec {
  Codec::new(Box::new(MemStream::new(bytes)), params)
}

/// Empty packets decode every sample to the DC level (128 for 8-bit
/// unsigned data).
#[test]
fn empty_tile_decodes_to_dc_level() {
  let spec = CodestreamSpec::default();
  let mut c = codec(build_codestream(&spec), DecompressParams::default());
  assert!(c.decompress().unwrap());
  let image = c.image();
  let comp = &image.comps[0];
  assert_eq!((comp.w, comp.h), (64, 64));
  let data = comp.data.as_ref().unwrap();
  assert_eq!(data.len(), 64 * 64);
  assert!(data.iter().all(|&v| v == 128));
}

#[test]
fn single_resolution_no_wavelet() {
  let spec = CodestreamSpec {
    num_resolutions: 1,
    ..Default::default()
  };
  let mut c = codec(build_codestream(&spec), DecompressParams::default());
  assert!(c.decompress().unwrap());
  assert_eq!(c.image().comps[0].w, 64);
}

#[test]
fn multi_tile_grid_completes_rows() {
  let spec = CodestreamSpec {
    width: 128,
    height: 128,
    tile_width: 32,
    tile_height: 32,
    ..Default::default()
  };
  let last_row = Arc::new(AtomicU32::new(0));
  let seen = last_row.clone();
  let params = DecompressParams {
    row_cb: Some(Arc::new(move |y| {
      // Row completion is monotonic.
      let prev = seen.swap(y, Ordering::SeqCst);
      assert!(y >= prev);
    })),
    ..Default::default()
  };
  let mut c = codec(build_codestream(&spec), params);
  assert!(c.decompress().unwrap());
  assert_eq!(last_row.load(Ordering::SeqCst), 128);
  c.wait_for_swath(128);
}

#[test]
fn reduce_halves_output() {
  let spec = CodestreamSpec::default();
  let params = DecompressParams {
    reduce: 1,
    ..Default::default()
  };
  let mut c = codec(build_codestream(&spec), params);
  assert!(c.decompress().unwrap());
  let comp = &c.image().comps[0];
  assert_eq!((comp.w, comp.h), (32, 32));
  assert!(comp.data.as_ref().unwrap().iter().all(|&v| v == 128));
}

#[test]
fn region_decode_clips_output() {
  let spec = CodestreamSpec::default();
  let params = DecompressParams {
    region: Some(RegionF64 {
      x0: 16.0,
      y0: 16.0,
      x1: 48.0,
      y1: 48.0,
    }),
    ..Default::default()
  };
  let mut c = codec(build_codestream(&spec), params);
  assert!(c.decompress().unwrap());
  let comp = &c.image().comps[0];
  assert_eq!((comp.w, comp.h), (32, 32));
  assert!(comp.data.as_ref().unwrap().iter().all(|&v| v == 128));
}

#[test]
fn region_decode_is_idempotent() {
  let spec = CodestreamSpec::default();
  let region = Some(RegionF64 {
    x0: 8.0,
    y0: 8.0,
    x1: 40.0,
    y1: 24.0,
  });
  let decode = || {
    let params = DecompressParams {
      region,
      cache_strategy: CacheStrategy::Image,
      ..Default::default()
    };
    let mut c = codec(build_codestream(&spec), params);
    assert!(c.decompress().unwrap());
    c.image().comps[0].data.clone().unwrap()
  };
  assert_eq!(decode(), decode());
}

#[test]
fn tlm_random_access_matches_sequential() {
  let spec = CodestreamSpec {
    width: 128,
    height: 128,
    tile_width: 32,
    tile_height: 32,
    with_tlm: true,
    ..Default::default()
  };
  let bytes = build_codestream(&spec);

  // Random access to tile 11 only.
  let params = DecompressParams {
    cache_strategy: CacheStrategy::Image,
    ..Default::default()
  };
  let mut random = codec(bytes.clone(), params.clone());
  random.read_header().unwrap();
  assert!(random.decompress_tile(11).unwrap());
  let tile_img = random.tile_image(11, true).expect("tile image");

  // Sequential decode with TLM disabled.
  let params = DecompressParams {
    cache_strategy: CacheStrategy::Image,
    disable_random_access: RandomAccessFlags::DISABLE_TLM,
    ..Default::default()
  };
  let mut sequential = codec(bytes, params);
  sequential.read_header().unwrap();
  assert!(sequential.decompress_tile(11).unwrap());
  let seq_img = sequential.tile_image(11, true).expect("tile image");

  assert_eq!(tile_img.comps[0].w, seq_img.comps[0].w);
  assert_eq!(tile_img.comps[0].data, seq_img.comps[0].data);
}

#[test]
fn truncated_tile_part_degrades_gracefully() {
  let spec = CodestreamSpec::default();
  let mut bytes = build_codestream(&spec);
  // Drop the EOC and the last two packet bytes: the tile-part body
  // ends early and the tile is marked truncated.
  bytes.truncate(bytes.len() - 4);
  let mut c = codec(bytes, DecompressParams::default());
  let ok = c.decompress().unwrap();
  assert!(ok);
  let state = c.progression_state(0).expect("tile state");
  assert!(state.truncated);
}

#[test]
fn layer_limit_is_accepted() {
  let spec = CodestreamSpec {
    num_layers: 3,
    ..Default::default()
  };
  let params = DecompressParams {
    layers_to_decompress: 1,
    ..Default::default()
  };
  let mut c = codec(build_codestream(&spec), params);
  assert!(c.decompress().unwrap());
  let state = c.progression_state(0).unwrap();
  assert_eq!(state.layers_decoded, 1);
  // All packets of every layer were still walked.
  assert_eq!(state.packets_parsed, 9);
}

#[test]
fn cache_strategy_none_retains_no_tile_images() {
  let spec = CodestreamSpec {
    width: 128,
    height: 64,
    tile_width: 32,
    tile_height: 32,
    ..Default::default()
  };
  let mut c = codec(build_codestream(&spec), DecompressParams::default());
  assert!(c.decompress().unwrap());
  assert!(c.tile_image(0, false).is_none());
  // The composite image still holds every sample.
  assert_eq!(c.image().comps[0].data.as_ref().unwrap().len(), 128 * 64);
}

#[test]
fn cache_strategy_image_keeps_tiles() {
  let spec = CodestreamSpec {
    width: 64,
    height: 64,
    tile_width: 32,
    tile_height: 32,
    ..Default::default()
  };
  let params = DecompressParams {
    cache_strategy: CacheStrategy::Image,
    ..Default::default()
  };
  let mut c = codec(build_codestream(&spec), params);
  assert!(c.decompress().unwrap());
  let tile = c.tile_image(3, true).expect("cached tile");
  assert_eq!((tile.comps[0].w, tile.comps[0].h), (32, 32));
}

#[test]
fn single_threaded_mode_matches_parallel() {
  let spec = CodestreamSpec {
    width: 96,
    height: 96,
    tile_width: 32,
    tile_height: 32,
    ..Default::default()
  };
  let decode = |threads: usize| {
    let params = DecompressParams {
      num_threads: threads,
      ..Default::default()
    };
    let mut c = codec(build_codestream(&spec), params);
    assert!(c.decompress().unwrap());
    c.image().comps[0].data.clone().unwrap()
  };
  assert_eq!(decode(1), decode(0));
}

#[test]
fn tile_futures_resolve() {
  let spec = CodestreamSpec {
    width: 64,
    height: 64,
    tile_width: 32,
    tile_height: 32,
    ..Default::default()
  };
  let mut c = codec(build_codestream(&spec), DecompressParams::default());
  assert!(c.decompress().unwrap());
  for t in 0..4 {
    let future = c.tile_future(t).expect("future");
    assert!(future.wait());
  }
}
