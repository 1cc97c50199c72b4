//! Console logging from the configured level. `RUST_LOG` wins when set.

use curator_core::LogLevel;
use tracing_subscriber::EnvFilter;

pub fn init(level: LogLevel) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_directive()));
  tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn levels_map_to_directives() {
    assert_eq!(LogLevel::Debug.as_directive(), "debug");
    assert_eq!(LogLevel::Error.as_directive(), "error");
    // A directive string must parse as a filter.
    for level in [
      LogLevel::Trace,
      LogLevel::Debug,
      LogLevel::Info,
      LogLevel::Warn,
      LogLevel::Error,
    ] {
      assert!(level.as_directive().parse::<EnvFilter>().is_ok());
    }
  }
}
