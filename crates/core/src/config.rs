//! Daemon configuration: watched paths, processors, and global knobs.
//!
//! The YAML schema keeps the camelCase key spelling users already have in
//! their config files. Loading normalizes everything the rest of the daemon
//! relies on: `~/` expansion, processor negation, plugin path resolution,
//! and defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{ConfigError, Result};

/// Handlers implemented inside the daemon. Anything else configured as a
/// `handler` is resolved as a plugin script under `pluginDirectory`.
pub const BUILTIN_HANDLERS: &[&str] = &["copy", "move", "extract", "install", "delete"];

/// Job channel capacity (and worker count) per watched path when the config
/// does not set `bufferSize`.
pub const DEFAULT_BUFFER_SIZE: usize = 50;

/// Test if the given handler name is one of the built-in actions.
pub fn is_builtin(handler: &str) -> bool {
  BUILTIN_HANDLERS.iter().any(|h| h.eq_ignore_ascii_case(handler))
}

/// Log threshold from the `logLevel` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Trace,
  Debug,
  #[default]
  Info,
  Warn,
  Error,
}

impl LogLevel {
  /// The `tracing_subscriber::EnvFilter` directive for this level.
  pub fn as_directive(self) -> &'static str {
    match self {
      LogLevel::Trace => "trace",
      LogLevel::Debug => "debug",
      LogLevel::Info => "info",
      LogLevel::Warn => "warn",
      LogLevel::Error => "error",
    }
  }
}

/// A routing rule binding a MIME type (or category, or `*`) to a handler
/// and a destination template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Processor {
  /// MIME type, category, or `*`. A leading `!` in the config marks the
  /// rule negated; the prefix is stripped during normalization.
  #[serde(rename = "type")]
  pub mime_type: String,

  /// Destination template. May contain `{{.ext}}`, `{{.ucext}}`, `{{.date}}`.
  pub path: String,

  /// One of [`BUILTIN_HANDLERS`], or a plugin filename resolved against
  /// `pluginDirectory` at load time.
  pub handler: String,

  /// Free-form knobs consumed by the pipeline. Ordered so the
  /// post-processing walk is deterministic.
  #[serde(default)]
  pub properties: BTreeMap<String, String>,

  /// Set when the configured type carried a leading `!`. Negated rules
  /// never match.
  #[serde(skip)]
  pub negated: bool,
}

impl std::fmt::Display for Processor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} ({})", self.handler, self.mime_type)
  }
}

/// A directory to watch plus its ordered processor list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedPath {
  pub path: PathBuf,
  #[serde(default)]
  pub processors: Vec<Processor>,
}

/// Full daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
  pub paths: Vec<WatchedPath>,

  /// Debounce delay: a path must be quiet this many seconds before its job
  /// is dispatched.
  pub delay_in_seconds: u64,

  /// Delete zero-byte files instead of processing them.
  pub cleanup_zero_byte: bool,

  /// Directory where non-built-in handlers are resolved.
  pub plugin_directory: Option<PathBuf>,

  /// Workers (and job channel capacity) per watched path.
  pub buffer_size: usize,

  pub log_level: LogLevel,

  /// Roots of shared-mime-info database trees, e.g. `/usr/share/mime`.
  pub mime_directories: Vec<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      paths: Vec::new(),
      delay_in_seconds: 5,
      cleanup_zero_byte: false,
      plugin_directory: None,
      buffer_size: DEFAULT_BUFFER_SIZE,
      log_level: LogLevel::default(),
      mime_directories: vec![PathBuf::from("/usr/share/mime")],
    }
  }
}

impl Config {
  /// Load and normalize the config file.
  pub fn load(path: &Path) -> Result<Self> {
    info!(path = %path.display(), "Loading config file");
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let mut config: Config = serde_yaml::from_str(&contents)?;
    config.normalize();
    Ok(config)
  }

  /// Apply home expansion, negation parsing, plugin resolution, and
  /// defaults. Idempotent; called by [`Config::load`].
  pub fn normalize(&mut self) {
    if self.buffer_size == 0 {
      self.buffer_size = DEFAULT_BUFFER_SIZE;
    }

    for dir in &mut self.mime_directories {
      *dir = expand_home(dir);
    }
    self.plugin_directory = self.plugin_directory.as_deref().map(|p| expand_home(p));
    let plugin_directory = self.plugin_directory.clone();

    for watched in &mut self.paths {
      watched.path = expand_home(&watched.path);
      for processor in &mut watched.processors {
        if let Some(stripped) = processor.mime_type.strip_prefix('!') {
          processor.mime_type = stripped.to_string();
          processor.negated = true;
        }
        processor.path = expand_home_str(&processor.path);
        for value in processor.properties.values_mut() {
          *value = expand_home_str(value);
        }
        if let Some(ref plugin_dir) = plugin_directory
          && !is_builtin(&processor.handler)
        {
          let candidate = plugin_dir.join(&processor.handler);
          if candidate.exists() {
            processor.handler = candidate.to_string_lossy().into_owned();
          }
        }
      }
    }
  }
}

/// Expand a leading `~/` to the invoking user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
  if let Ok(rest) = path.strip_prefix("~")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

/// [`expand_home`] for template strings, which are not yet paths.
pub fn expand_home_str(value: &str) -> String {
  if let Some(rest) = value.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return format!("{}/{}", home.display(), rest);
  }
  value.to_string()
}
