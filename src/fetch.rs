//! Range-request streaming for remote codestreams.
//!
//! One background worker owns the HTTP client and two FIFO queues
//! (whole-tile jobs and ad-hoc chunk jobs). Requests are issued in
//! bounded batches; each request retries on transport failure or a
//! non-206 response before its chunk is reported failed.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Requests in flight at once per batch.
const BATCH_LEN: usize = 30;
const DEFAULT_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
  pub offset: u64,
  pub len: u64,
}

pub struct ChunkResult {
  pub range: ByteRange,
  pub data: Result<Vec<u8>>,
}

/// One tile-part's byte range, tagged with its owning tile.
#[derive(Clone, Copy, Debug)]
pub struct TilePartRequest {
  pub tile_index: u16,
  pub part_index: usize,
  pub range: ByteRange,
}

#[derive(Default)]
struct FetchState {
  remaining: usize,
  failed: bool,
  parts: Vec<Option<Vec<u8>>>,
}

/// Resolves once every tile-part of the fetch has arrived.
pub struct FetchFuture {
  state: Arc<(Mutex<FetchState>, Condvar)>,
}

impl FetchFuture {
  /// Blocks until the fetch completes, returning the tile-part
  /// buffers indexed as submitted. `None` entries are failed parts.
  pub fn wait(self) -> Result<Vec<Option<Vec<u8>>>> {
    let (lock, cvar) = &*self.state;
    let mut st = lock.lock().unwrap();
    while st.remaining > 0 {
      st = cvar.wait(st).unwrap();
    }
    if st.failed {
      return Err(Error::Fetch("one or more tile-parts failed".into()));
    }
    Ok(std::mem::take(&mut st.parts))
  }
}

type PartCallback = Box<dyn Fn(usize) + Send>;

enum Job {
  Chunks {
    ranges: Vec<ByteRange>,
    reply: mpsc::Sender<Vec<ChunkResult>>,
  },
  Tiles {
    parts: Vec<TilePartRequest>,
    cb: PartCallback,
    state: Arc<(Mutex<FetchState>, Condvar)>,
  },
  Shutdown,
}

/// Credentials and addressing resolved from the environment, the way
/// the VSI-style S3 readers do it.
#[derive(Clone, Default)]
struct RemoteConfig {
  region: Option<String>,
  access_key: Option<String>,
  secret_key: Option<String>,
  session_token: Option<String>,
  endpoint: Option<String>,
  virtual_hosting: bool,
  https: bool,
  no_sign: bool,
  timeout: Duration,
}

impl RemoteConfig {
  fn from_env() -> Self {
    let flag = |name: &str| {
      std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "TRUE" | "true" | "YES" | "yes"))
        .unwrap_or(false)
    };
    let timeout = std::env::var("CPL_VSIL_CURL_TIMEOUT")
      .ok()
      .and_then(|v| v.parse::<u64>().ok())
      .map(Duration::from_secs)
      .unwrap_or(Duration::from_secs(30));
    Self {
      region: std::env::var("AWS_REGION").ok(),
      access_key: std::env::var("AWS_ACCESS_KEY_ID").ok(),
      secret_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
      session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
      endpoint: std::env::var("AWS_S3_ENDPOINT").ok(),
      virtual_hosting: flag("AWS_VIRTUAL_HOSTING"),
      https: std::env::var("AWS_HTTPS")
        .map(|v| v != "NO" && v != "0")
        .unwrap_or(true),
      no_sign: flag("AWS_NO_SIGN_REQUEST"),
      timeout,
    }
  }
}

pub struct Fetcher {
  queue: mpsc::Sender<Job>,
  worker: Option<thread::JoinHandle<()>>,
}

impl Fetcher {
  /// `url` may be `http(s)://...` or `s3://bucket/key`.
  pub fn new(url: &str) -> Result<Self> {
    let config = RemoteConfig::from_env();
    let url = resolve_url(url, &config)?;
    let client = reqwest::blocking::Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(|e| Error::Fetch(e.to_string()))?;
    let (tx, rx) = mpsc::channel();
    let worker = thread::Builder::new()
      .name("jp2k-fetch".into())
      .spawn(move || worker_loop(rx, client, url, config))
      .map_err(Error::Io)?;
    Ok(Self {
      queue: tx,
      worker: Some(worker),
    })
  }

  /// Pulls a set of byte ranges concurrently, preserving order.
  pub fn fetch_chunks(&self, ranges: Vec<ByteRange>) -> Result<Vec<ChunkResult>> {
    let (reply, rx) = mpsc::channel();
    self
      .queue
      .send(Job::Chunks { ranges, reply })
      .map_err(|_| Error::Fetch("fetch worker is gone".into()))?;
    rx.recv()
      .map_err(|_| Error::Fetch("fetch worker dropped the reply".into()))
  }

  /// Issues range requests for every tile-part of the slated tiles.
  /// `cb(part_index)` fires as each part's bytes complete.
  pub fn fetch_tiles(
    &self,
    all_tile_parts: &[TilePartRequest],
    slated_tiles: &[u16],
    cb: impl Fn(usize) + Send + 'static,
  ) -> Result<FetchFuture> {
    let parts: Vec<TilePartRequest> = all_tile_parts
      .iter()
      .filter(|p| slated_tiles.contains(&p.tile_index))
      .copied()
      .collect();
    let state = Arc::new((
      Mutex::new(FetchState {
        remaining: parts.len(),
        failed: false,
        parts: vec![None; parts.len()],
      }),
      Condvar::new(),
    ));
    self
      .queue
      .send(Job::Tiles {
        parts,
        cb: Box::new(cb),
        state: state.clone(),
      })
      .map_err(|_| Error::Fetch("fetch worker is gone".into()))?;
    Ok(FetchFuture { state })
  }
}

impl Drop for Fetcher {
  fn drop(&mut self) {
    let _ = self.queue.send(Job::Shutdown);
    if let Some(worker) = self.worker.take() {
      let _ = worker.join();
    }
  }
}

struct ResolvedUrl {
  url: String,
  /// s3 key parts kept for request signing.
  s3: Option<(String, String)>,
}

fn resolve_url(url: &str, config: &RemoteConfig) -> Result<ResolvedUrl> {
  if let Some(rest) = url.strip_prefix("s3://") {
    let (bucket, key) = rest
      .split_once('/')
      .ok_or_else(|| Error::Fetch(format!("s3 url without key: {}", url)))?;
    let scheme = if config.https { "https" } else { "http" };
    let endpoint = config
      .endpoint
      .clone()
      .unwrap_or_else(|| "s3.amazonaws.com".into());
    let url = if config.virtual_hosting {
      format!("{}://{}.{}/{}", scheme, bucket, endpoint, key)
    } else {
      format!("{}://{}/{}/{}", scheme, endpoint, bucket, key)
    };
    Ok(ResolvedUrl {
      url,
      s3: Some((bucket.to_string(), key.to_string())),
    })
  } else if url.starts_with("http://") || url.starts_with("https://") {
    Ok(ResolvedUrl {
      url: url.to_string(),
      s3: None,
    })
  } else {
    Err(Error::Fetch(format!("unsupported url scheme: {}", url)))
  }
}

fn worker_loop(rx: mpsc::Receiver<Job>, client: reqwest::blocking::Client, url: ResolvedUrl, config: RemoteConfig) {
  // Tile jobs are drained before chunk jobs of the same arrival burst.
  let mut tile_jobs = VecDeque::new();
  let mut chunk_jobs = VecDeque::new();
  loop {
    match rx.recv() {
      Ok(Job::Shutdown) | Err(_) => return,
      Ok(job @ Job::Tiles { .. }) => tile_jobs.push_back(job),
      Ok(job @ Job::Chunks { .. }) => chunk_jobs.push_back(job),
    }
    while let Ok(job) = rx.try_recv() {
      match job {
        Job::Shutdown => return,
        job @ Job::Tiles { .. } => tile_jobs.push_back(job),
        job @ Job::Chunks { .. } => chunk_jobs.push_back(job),
      }
    }
    for job in tile_jobs.drain(..).chain(chunk_jobs.drain(..)) {
      run_job(job, &client, &url, &config);
    }
  }
}

fn run_job(job: Job, client: &reqwest::blocking::Client, url: &ResolvedUrl, config: &RemoteConfig) {
  match job {
    Job::Chunks { ranges, reply } => {
      let mut results: Vec<ChunkResult> = Vec::with_capacity(ranges.len());
      for batch in ranges.chunks(BATCH_LEN) {
        let fetched = fetch_batch(batch, client, url, config);
        results.extend(fetched);
      }
      let _ = reply.send(results);
    }
    Job::Tiles { parts, cb, state } => {
      let ranges: Vec<ByteRange> = parts.iter().map(|p| p.range).collect();
      let mut idx = 0;
      for batch in ranges.chunks(BATCH_LEN) {
        for chunk in fetch_batch(batch, client, url, config) {
          let (lock, cvar) = &*state;
          {
            let mut st = lock.lock().unwrap();
            match chunk.data {
              Ok(data) => st.parts[idx] = Some(data),
              Err(_) => st.failed = true,
            }
            st.remaining -= 1;
            if st.remaining == 0 {
              cvar.notify_all();
            }
          }
          cb(parts[idx].part_index);
          idx += 1;
        }
      }
    }
    Job::Shutdown => {}
  }
}

fn fetch_batch(
  ranges: &[ByteRange],
  client: &reqwest::blocking::Client,
  url: &ResolvedUrl,
  config: &RemoteConfig,
) -> Vec<ChunkResult> {
  thread::scope(|scope| {
    let handles: Vec<_> = ranges
      .iter()
      .map(|&range| scope.spawn(move || fetch_one(range, client, url, config)))
      .collect();
    handles
      .into_iter()
      .zip(ranges)
      .map(|(h, &range)| ChunkResult {
        range,
        data: h.join().unwrap_or_else(|_| Err(Error::Fetch("request panicked".into()))),
      })
      .collect()
  })
}

fn fetch_one(
  range: ByteRange,
  client: &reqwest::blocking::Client,
  url: &ResolvedUrl,
  config: &RemoteConfig,
) -> Result<Vec<u8>> {
  let range_header = format!("bytes={}-{}", range.offset, range.offset + range.len - 1);
  let mut last_err = None;
  for attempt in 0..DEFAULT_RETRIES {
    if attempt > 0 {
      thread::sleep(RETRY_BACKOFF);
    }
    let mut req = client.get(&url.url).header("Range", &range_header);
    if let (Some((_, _)), false) = (&url.s3, config.no_sign) {
      match sign_request(&url.url, &range_header, config) {
        Ok(headers) => {
          for (k, v) in headers {
            req = req.header(k, v);
          }
        }
        Err(e) => return Err(e),
      }
    }
    match req.send() {
      Ok(resp) if resp.status().as_u16() == 206 => {
        return resp
          .bytes()
          .map(|b| b.to_vec())
          .map_err(|e| Error::Fetch(e.to_string()));
      }
      Ok(resp) => {
        last_err = Some(Error::Fetch(format!(
          "range request returned {}",
          resp.status()
        )));
      }
      Err(e) => last_err = Some(Error::Fetch(e.to_string())),
    }
  }
  Err(last_err.unwrap_or_else(|| Error::Fetch("request failed".into())))
}

/// Minimal SigV4 header signing (unsigned payload). Skipped entirely
/// when `AWS_NO_SIGN_REQUEST` is set or no credentials are present.
fn sign_request(
  url: &str,
  range_header: &str,
  config: &RemoteConfig,
) -> Result<Vec<(&'static str, String)>> {
  let (access_key, secret_key) = match (&config.access_key, &config.secret_key) {
    (Some(a), Some(s)) => (a, s),
    _ => return Ok(Vec::new()),
  };
  let region = config.region.as_deref().unwrap_or("us-east-1");
  let (date, datetime) = amz_date(SystemTime::now());
  let host = url
    .split("//")
    .nth(1)
    .and_then(|rest| rest.split('/').next())
    .ok_or_else(|| Error::Fetch(format!("malformed url: {}", url)))?;
  let path: String = {
    let after_host = url.split("//").nth(1).unwrap();
    match after_host.find('/') {
      Some(i) => after_host[i..].to_string(),
      None => "/".into(),
    }
  };

  const PAYLOAD: &str = "UNSIGNED-PAYLOAD";
  let mut signed_headers = String::from("host;range;x-amz-content-sha256;x-amz-date");
  let mut canonical_headers = format!(
    "host:{}\nrange:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
    host, range_header, PAYLOAD, datetime
  );
  if let Some(token) = &config.session_token {
    signed_headers.push_str(";x-amz-security-token");
    canonical_headers.push_str(&format!("x-amz-security-token:{}\n", token));
  }
  let canonical_request = format!(
    "GET\n{}\n\n{}\n{}\n{}",
    path, canonical_headers, signed_headers, PAYLOAD
  );
  let scope = format!("{}/{}/s3/aws4_request", date, region);
  let string_to_sign = format!(
    "AWS4-HMAC-SHA256\n{}\n{}\n{:x}",
    datetime,
    scope,
    Sha256::digest(canonical_request.as_bytes())
  );

  let hmac = |key: &[u8], data: &[u8]| -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
  };
  let k_date = hmac(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes());
  let k_region = hmac(&k_date, region.as_bytes());
  let k_service = hmac(&k_region, b"s3");
  let k_signing = hmac(&k_service, b"aws4_request");
  let signature = hmac(&k_signing, string_to_sign.as_bytes());
  let signature_hex: String = signature.iter().map(|b| format!("{:02x}", b)).collect();

  let mut headers = vec![
    ("x-amz-content-sha256", PAYLOAD.to_string()),
    ("x-amz-date", datetime),
    (
      "authorization",
      format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        access_key, scope, signed_headers, signature_hex
      ),
    ),
  ];
  if let Some(token) = &config.session_token {
    headers.push(("x-amz-security-token", token.clone()));
  }
  Ok(headers)
}

/// (YYYYMMDD, YYYYMMDDTHHMMSSZ) without pulling in a calendar crate.
fn amz_date(now: SystemTime) -> (String, String) {
  let secs = now
    .duration_since(UNIX_EPOCH)
    .unwrap_or(Duration::ZERO)
    .as_secs();
  let days = secs / 86_400;
  let (h, m, s) = (secs % 86_400 / 3600, secs % 3600 / 60, secs % 60);
  // Civil-from-days (Hinnant's algorithm).
  let z = days as i64 + 719_468;
  let era = z.div_euclid(146_097);
  let doe = z.rem_euclid(146_097);
  let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
  let y = yoe + era * 400;
  let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
  let mp = (5 * doy + 2) / 153;
  let d = doy - (153 * mp + 2) / 5 + 1;
  let mo = if mp < 10 { mp + 3 } else { mp - 9 };
  let y = if mo <= 2 { y + 1 } else { y };
  let date = format!("{:04}{:02}{:02}", y, mo, d);
  let datetime = format!("{}T{:02}{:02}{:02}Z", date, h, m, s);
  (date, datetime)
}
