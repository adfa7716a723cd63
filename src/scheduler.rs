//! Thread pool, coder pool and tile batching.
//!
//! The pool wraps a work-stealing thread pool of `threads - 1`
//! workers; the caller thread participates by running the scope body.
//! Single-threaded mode is first-class: every task runs inline on the
//! caller and no pool is built. Tasks never block except when waiting
//! on a tile future or a fetch batch.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::t1::T1Decoder;

/// Initial number of tiles decoded concurrently; the window grows by
/// the same amount as batches complete, bounding peak memory on large
/// grids.
pub const TILE_BATCH_START: usize = 2;
pub const TILE_BATCH_GROW: usize = 2;

pub struct Pool {
  inner: Option<rayon_core::ThreadPool>,
  threads: usize,
}

impl Pool {
  /// `num_threads` 0 sizes to the hardware; 1 forces single-threaded.
  /// `JP2K_SINGLE_THREAD=1` overrides everything.
  pub fn new(num_threads: usize) -> Self {
    let forced_single = std::env::var("JP2K_SINGLE_THREAD")
      .map(|v| v == "1")
      .unwrap_or(false);
    let threads = if forced_single {
      1
    } else if num_threads == 0 {
      std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
    } else {
      num_threads
    };
    let inner = if threads > 1 {
      rayon_core::ThreadPoolBuilder::new()
        .num_threads(threads - 1)
        .build()
        .ok()
    } else {
      None
    };
    Self { inner, threads }
  }

  pub fn num_threads(&self) -> usize {
    self.threads
  }

  pub fn is_single_threaded(&self) -> bool {
    self.inner.is_none()
  }

  /// Runs the closures concurrently, returning when all complete. In
  /// single-threaded mode they run sequentially on the caller.
  pub fn run_all<'a>(&self, tasks: Vec<Box<dyn FnOnce() + Send + 'a>>) {
    match &self.inner {
      None => {
        for task in tasks {
          task();
        }
      }
      Some(pool) => {
        pool.scope(|scope| {
          for task in tasks {
            scope.spawn(move |_| task());
          }
        });
      }
    }
  }
}

impl Default for Pool {
  fn default() -> Self {
    Self::new(0)
  }
}

/// Block decoders cached by code-block size so workers draw a coder
/// without allocating on the hot path.
#[derive(Default)]
pub struct CoderPool {
  coders: Mutex<HashMap<(u8, u8), Vec<T1Decoder>>>,
}

impl CoderPool {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn checkout(&self, cblkw_exp: u8, cblkh_exp: u8) -> T1Decoder {
    let mut map = self.coders.lock().unwrap();
    map
      .entry((cblkw_exp, cblkh_exp))
      .or_default()
      .pop()
      .unwrap_or_else(|| T1Decoder::new(1 << cblkw_exp, 1 << cblkh_exp))
  }

  pub fn checkin(&self, cblkw_exp: u8, cblkh_exp: u8, coder: T1Decoder) {
    let mut map = self.coders.lock().unwrap();
    map.entry((cblkw_exp, cblkh_exp)).or_default().push(coder);
  }
}

/// Completion handle for one tile's decode.
#[derive(Clone)]
pub struct TileFuture {
  state: Arc<(Mutex<Option<bool>>, Condvar)>,
  pub tile_index: u16,
}

impl TileFuture {
  pub fn new(tile_index: u16) -> Self {
    Self {
      state: Arc::new((Mutex::new(None), Condvar::new())),
      tile_index,
    }
  }

  pub fn complete(&self, success: bool) {
    let (lock, cvar) = &*self.state;
    *lock.lock().unwrap() = Some(success);
    cvar.notify_all();
  }

  /// Blocks until the tile resolves; `false` means the tile failed.
  pub fn wait(&self) -> bool {
    let (lock, cvar) = &*self.state;
    let mut state = lock.lock().unwrap();
    while state.is_none() {
      state = cvar.wait(state).unwrap();
    }
    state.unwrap()
  }

  pub fn try_result(&self) -> Option<bool> {
    *self.state.0.lock().unwrap()
  }
}

/// Row-completion tracking backing the swath-wait API.
#[derive(Default)]
pub struct RowTracker {
  state: Mutex<u32>,
  cvar: Condvar,
}

impl RowTracker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Marks pixel rows up to `y_end` (canvas coords) complete.
  pub fn advance(&self, y_end: u32) {
    let mut done = self.state.lock().unwrap();
    if y_end > *done {
      *done = y_end;
      self.cvar.notify_all();
    }
  }

  /// Blocks until rows up to `y_end` have been composited.
  pub fn wait(&self, y_end: u32) {
    let mut done = self.state.lock().unwrap();
    while *done < y_end {
      done = self.cvar.wait(done).unwrap();
    }
  }

  pub fn completed(&self) -> u32 {
    *self.state.lock().unwrap()
  }
}

/// The growing concurrency window over a tile list.
pub struct TileBatcher {
  remaining: Vec<u16>,
  batch: usize,
}

impl TileBatcher {
  pub fn new(mut tiles: Vec<u16>) -> Self {
    tiles.reverse();
    Self {
      remaining: tiles,
      batch: TILE_BATCH_START,
    }
  }

  /// Next batch of tiles to decode concurrently.
  pub fn next_batch(&mut self) -> Vec<u16> {
    let take = self.batch.min(self.remaining.len());
    let batch: Vec<u16> = self
      .remaining
      .split_off(self.remaining.len() - take)
      .into_iter()
      .rev()
      .collect();
    self.batch += TILE_BATCH_GROW;
    batch
  }

  pub fn is_done(&self) -> bool {
    self.remaining.is_empty()
  }
}
