//! Random-access byte sources feeding the codestream parser.
//!
//! `MemStream` is the zero-copy backing used by the tile processors:
//! packet data captured from it is shared as `Arc` slices instead of
//! being copied per tile-part.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::error::{Error, Result};

/// OS paging hint, forwarded where the backing supports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessPattern {
  Normal,
  Sequential,
  Random,
  WillNeed,
}

pub trait Stream: Send {
  /// Reads up to `dst.len()` bytes, returning how many were read.
  fn read(&mut self, dst: &mut [u8]) -> Result<usize>;

  fn seek(&mut self, offset: u64) -> Result<()>;

  fn tell(&self) -> u64;

  fn num_bytes_left(&self) -> u64;

  fn skip(&mut self, n: u64) -> Result<()> {
    let pos = self.tell();
    self.seek(pos + n)
  }

  fn mem_advise(&mut self, _offset: u64, _len: u64, _pattern: AccessPattern) {}

  /// Zero-copy view of the whole stream when the backing is memory.
  fn as_memory(&self) -> Option<&Arc<[u8]>> {
    None
  }

  fn read_exact(&mut self, dst: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < dst.len() {
      let n = self.read(&mut dst[filled..])?;
      if n == 0 {
        return Err(Error::truncated(format!(
          "unexpected end of stream at offset {}",
          self.tell()
        )));
      }
      filled += n;
    }
    Ok(())
  }
}

pub struct MemStream {
  buf: Arc<[u8]>,
  pos: u64,
}

impl MemStream {
  pub fn new(buf: impl Into<Arc<[u8]>>) -> Self {
    Self {
      buf: buf.into(),
      pos: 0,
    }
  }

  pub fn share(&self) -> Arc<[u8]> {
    self.buf.clone()
  }
}

impl Stream for MemStream {
  fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
    let avail = self.buf.len().saturating_sub(self.pos as usize);
    let n = avail.min(dst.len());
    dst[..n].copy_from_slice(&self.buf[self.pos as usize..self.pos as usize + n]);
    self.pos += n as u64;
    Ok(n)
  }

  fn seek(&mut self, offset: u64) -> Result<()> {
    if offset > self.buf.len() as u64 {
      return Err(Error::truncated(format!(
        "seek to {} past end of {}-byte buffer",
        offset,
        self.buf.len()
      )));
    }
    self.pos = offset;
    Ok(())
  }

  fn tell(&self) -> u64 {
    self.pos
  }

  fn num_bytes_left(&self) -> u64 {
    self.buf.len() as u64 - self.pos
  }

  fn as_memory(&self) -> Option<&Arc<[u8]>> {
    Some(&self.buf)
  }
}

pub struct FileStream {
  file: File,
  len: u64,
  pos: u64,
}

impl FileStream {
  pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    Ok(Self { file, len, pos: 0 })
  }
}

impl Stream for FileStream {
  fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
    let n = self.file.read(dst)?;
    self.pos += n as u64;
    Ok(n)
  }

  fn seek(&mut self, offset: u64) -> Result<()> {
    self.file.seek(SeekFrom::Start(offset))?;
    self.pos = offset;
    Ok(())
  }

  fn tell(&self) -> u64 {
    self.pos
  }

  fn num_bytes_left(&self) -> u64 {
    self.len.saturating_sub(self.pos)
  }
}

/// Default read-ahead window.
const BUFFER_LEN: usize = 1 << 20;

/// Bounded read-ahead over any inner stream. Seeks inside the buffered
/// window are served without touching the inner stream; seeks outside
/// it drop the window.
pub struct BufferedStream<S> {
  inner: S,
  window: Vec<u8>,
  /// Stream offset of `window[0]`.
  window_start: u64,
  /// Logical position, always inside or at the end of the window.
  pos: u64,
  capacity: usize,
}

impl<S: Stream> BufferedStream<S> {
  pub fn new(inner: S) -> Self {
    Self::with_capacity(inner, BUFFER_LEN)
  }

  pub fn with_capacity(inner: S, capacity: usize) -> Self {
    let pos = inner.tell();
    Self {
      inner,
      window: Vec::new(),
      window_start: pos,
      pos,
      capacity: capacity.max(1),
    }
  }

  pub fn into_inner(self) -> S {
    self.inner
  }

  fn window_end(&self) -> u64 {
    self.window_start + self.window.len() as u64
  }

  fn refill(&mut self) -> Result<usize> {
    self.window_start = self.pos;
    self.window.clear();
    self.window.resize(self.capacity, 0);
    if self.inner.tell() != self.pos {
      self.inner.seek(self.pos)?;
    }
    let n = self.inner.read(&mut self.window)?;
    self.window.truncate(n);
    Ok(n)
  }
}

impl<S: Stream> Stream for BufferedStream<S> {
  fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
    if self.pos >= self.window_end() || self.pos < self.window_start {
      if self.refill()? == 0 {
        return Ok(0);
      }
    }
    let off = (self.pos - self.window_start) as usize;
    let n = (self.window.len() - off).min(dst.len());
    dst[..n].copy_from_slice(&self.window[off..off + n]);
    self.pos += n as u64;
    Ok(n)
  }

  fn seek(&mut self, offset: u64) -> Result<()> {
    if offset < self.window_start || offset > self.window_end() {
      self.window.clear();
      self.window_start = offset;
      self.inner.seek(offset)?;
    }
    self.pos = offset;
    Ok(())
  }

  fn tell(&self) -> u64 {
    self.pos
  }

  fn num_bytes_left(&self) -> u64 {
    let inner_end = self.inner.tell() + self.inner.num_bytes_left();
    inner_end.saturating_sub(self.pos)
  }

  fn mem_advise(&mut self, offset: u64, len: u64, pattern: AccessPattern) {
    self.inner.mem_advise(offset, len, pattern)
  }

  fn as_memory(&self) -> Option<&Arc<[u8]>> {
    self.inner.as_memory()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn mem(len: usize) -> MemStream {
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    MemStream::new(data)
  }

  #[test]
  fn mem_stream_read_seek() {
    let mut s = mem(100);
    let mut buf = [0u8; 10];
    s.read_exact(&mut buf).unwrap();
    assert_eq!(buf[9], 9);
    s.seek(95).unwrap();
    assert_eq!(s.num_bytes_left(), 5);
    assert_eq!(s.read(&mut buf).unwrap(), 5);
  }

  #[test]
  fn buffered_serves_in_window_seeks() {
    let mut s = BufferedStream::with_capacity(mem(1000), 64);
    let mut buf = [0u8; 32];
    s.read_exact(&mut buf).unwrap();
    // Back inside the 64-byte window: no invalidation, same bytes.
    s.seek(4).unwrap();
    let mut again = [0u8; 4];
    s.read_exact(&mut again).unwrap();
    assert_eq!(&again, &[4, 5, 6, 7]);
    // Far seek drops the window.
    s.seek(900).unwrap();
    s.read_exact(&mut again).unwrap();
    assert_eq!(again[0], (900 % 251) as u8);
  }

  #[test]
  fn buffered_reports_bytes_left() {
    let mut s = BufferedStream::with_capacity(mem(256), 64);
    let mut buf = [0u8; 16];
    s.read_exact(&mut buf).unwrap();
    assert_eq!(s.num_bytes_left(), 240);
  }
}
