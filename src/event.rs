//! Message routing for the codec.
//!
//! Embedders can install per-level callbacks; anything without a
//! callback goes through the `log` crate. `JP2K_DEBUG=1..5` raises the
//! verbosity of the fallback path (1 = errors only, 5 = trace).

use std::sync::Arc;

pub type MsgCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventType {
  Error = 1,
  Warning = 2,
  Info = 3,
  Debug = 4,
  Trace = 5,
}

#[derive(Clone, Default)]
pub struct Logger {
  error_handler: Option<MsgCallback>,
  warning_handler: Option<MsgCallback>,
  info_handler: Option<MsgCallback>,
  verbosity: Option<u8>,
}

impl Logger {
  pub fn new() -> Self {
    let verbosity = std::env::var("JP2K_DEBUG")
      .ok()
      .and_then(|v| v.parse::<u8>().ok())
      .map(|v| v.clamp(1, 5));
    Self {
      verbosity,
      ..Self::default()
    }
  }

  pub fn set_error_handler(&mut self, cb: MsgCallback) {
    self.error_handler = Some(cb);
  }

  pub fn set_warning_handler(&mut self, cb: MsgCallback) {
    self.warning_handler = Some(cb);
  }

  pub fn set_info_handler(&mut self, cb: MsgCallback) {
    self.info_handler = Some(cb);
  }

  fn handler(&self, event_type: EventType) -> Option<&MsgCallback> {
    match event_type {
      EventType::Error => self.error_handler.as_ref(),
      EventType::Warning => self.warning_handler.as_ref(),
      EventType::Info => self.info_handler.as_ref(),
      _ => None,
    }
  }

  pub fn msg_write(&self, event_type: EventType, msg: &str) {
    if let Some(handler) = self.handler(event_type) {
      handler(msg);
      return;
    }
    if let Some(verbosity) = self.verbosity {
      if (event_type as u8) > verbosity {
        return;
      }
    }
    match event_type {
      EventType::Error => log::error!("{}", msg),
      EventType::Warning => log::warn!("{}", msg),
      EventType::Info => log::info!("{}", msg),
      EventType::Debug => log::debug!("{}", msg),
      EventType::Trace => log::trace!("{}", msg),
    }
  }
}

macro_rules! event_msg {
  ($logger:expr, $event_type:expr, $($arg:tt)*) => {
    $logger.msg_write($event_type, &format!($($arg)*))
  };
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  #[test]
  fn callback_takes_priority() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let mut logger = Logger::new();
    let sink = seen.clone();
    logger.set_error_handler(Arc::new(move |msg| {
      sink.lock().unwrap().push(msg.to_string())
    }));
    event_msg!(logger, EventType::Error, "tile {} failed", 3);
    event_msg!(logger, EventType::Info, "ignored by callback path");
    assert_eq!(seen.lock().unwrap().as_slice(), ["tile 3 failed"]);
  }
}
