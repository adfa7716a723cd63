//! JPEG 2000 decompression core.
//!
//! The decode pipeline runs codestream bytes through marker parsing
//! ([`j2k`]), Tier-2 packet parsing ([`t2`]), Tier-1 entropy decoding
//! ([`t1`], [`ht`]), inverse quantization and the inverse wavelet
//! transform ([`dwt`]), orchestrated per tile by [`tcd`] and driven by
//! the public [`codec::Codec`] API. JP2 containers are unwrapped by
//! [`jp2`]; raw codestreams go straight to the front-end.

#[macro_use]
mod event;

mod bio;
mod cio;
mod math;
mod t1_luts;

pub mod codec;
pub mod dwt;
pub mod error;
#[cfg(feature = "remote")]
pub mod fetch;
pub mod ht;
pub mod image;
pub mod j2k;
pub mod jp2;
pub mod mct;
pub mod mqc;
pub mod params;
pub mod pi;
pub mod scheduler;
pub mod sparse_array;
pub mod stream;
pub mod t1;
pub mod t2;
pub mod tcd;
pub mod tgt;
pub mod tilecache;

pub use codec::{Codec, DecompressParams, HeaderInfo, ProgressionState};
pub use error::{Error, Result};
pub use event::{EventType, Logger};
pub use image::{Image, ImageComponent, Rect};
pub use stream::{BufferedStream, FileStream, MemStream, Stream};
pub use tilecache::CacheStrategy;

/// Magic bytes for JP2 RFC3745.
pub const JP2_RFC3745_MAGIC: &[u8] = &[
  0x00, 0x00, 0x00, 0x0c, 0x6a, 0x50, 0x20, 0x20, 0x0d, 0x0a, 0x87, 0x0a,
];
pub const JP2_MAGIC: &[u8] = &[0x0d, 0x0a, 0x87, 0x0a];
/// Magic bytes for a raw J2K codestream.
pub const J2K_CODESTREAM_MAGIC: &[u8] = &[0xff, 0x4f, 0xff, 0x51];

/// Supported input framings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
  Jp2,
  J2k,
}

/// Detects the input framing from magic bytes.
pub fn detect_format(buf: &[u8]) -> Result<Format> {
  if buf.starts_with(JP2_RFC3745_MAGIC) || buf.starts_with(JP2_MAGIC) {
    Ok(Format::Jp2)
  } else if buf.starts_with(J2K_CODESTREAM_MAGIC) {
    Ok(Format::J2k)
  } else {
    Err(Error::structural("cannot detect image format from bytes"))
  }
}

/// Detects the framing from a file extension.
pub fn detect_format_from_extension(ext: Option<&std::ffi::OsStr>) -> Result<Format> {
  let lower_ext = ext.and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase());
  match lower_ext.as_deref() {
    Some("jp2") => Ok(Format::Jp2),
    Some("j2k") | Some("j2c") | Some("jpc") => Ok(Format::J2k),
    // HTJ2K framings.
    Some("jph") => Ok(Format::Jp2),
    Some("jhc") => Ok(Format::J2k),
    Some(ext) => Err(Error::structural(format!("unknown file extension: {}", ext))),
    None => Err(Error::structural("no file extension")),
  }
}
