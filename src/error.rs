use thiserror::Error;

/// Decode errors, grouped the way they propagate.
///
/// Everything except [`Error::Io`] is local to the tile or marker
/// segment that produced it; the scheduler's conditional stages stop
/// downstream work for that tile and other tiles continue.
#[derive(Error, Debug)]
pub enum Error {
  #[error("structural error: {0}")]
  Structural(String),

  #[error("invalid marker 0x{0:04x}")]
  InvalidMarker(u16),

  #[error("{field} out of range: {value} not in [{min}, {max}]")]
  Range {
    field: &'static str,
    value: i64,
    min: i64,
    max: i64,
  },

  #[error("ordering error: {0}")]
  Ordering(String),

  #[error("corrupt TLM marker: {0}")]
  CorruptTlm(String),

  #[error("corrupt SOT marker: {0}")]
  CorruptSot(String),

  #[error("stream truncated: {0}")]
  Truncated(String),

  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("fetch failed: {0}")]
  Fetch(String),

  #[error("allocation of {0} bytes failed")]
  Resource(usize),

  #[error("unsupported: {0}")]
  Unsupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  pub(crate) fn structural(msg: impl Into<String>) -> Self {
    Error::Structural(msg.into())
  }

  pub(crate) fn ordering(msg: impl Into<String>) -> Self {
    Error::Ordering(msg.into())
  }

  pub(crate) fn truncated(msg: impl Into<String>) -> Self {
    Error::Truncated(msg.into())
  }

  pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
    Error::Unsupported(msg.into())
  }

  pub(crate) fn range(field: &'static str, value: i64, min: i64, max: i64) -> Self {
    Error::Range {
      field,
      value,
      min,
      max,
    }
  }

  /// Truncation degrades quality but never fails a decode on its own.
  pub fn is_truncation(&self) -> bool {
    matches!(self, Error::Truncated(_))
  }
}
