pub mod config;
pub mod error;

pub use config::{
  BUILTIN_HANDLERS, Config, DEFAULT_BUFFER_SIZE, LogLevel, Processor, WatchedPath, expand_home, expand_home_str,
  is_builtin,
};
pub use error::{ConfigError, Result};
