//! Load-time detection of recursive processor configurations.
//!
//! A config where the processor for path A writes into path B and B's
//! processor writes back into A would ping-pong real files forever. The
//! validator drives the full resolver+pipeline with `dry_run` details for
//! one synthetic file per indexed MIME type, recording would-be
//! destinations instead of touching the filesystem. Re-registering a live
//! `(type, path)` pair under a watched directory is the recursion signal.
//!
//! The detector is not complete — deeply nested cycles can escape it — but
//! it catches direct ping-pongs before the daemon starts moving files.

use curator_core::{Config, WatchedPath};
use curator_mime::MimeIndex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::process::{PipelineContext, ProcessError, handle};

#[derive(Error, Debug)]
#[error("Recursive configuration detected on path {path} (type {mime_type})")]
pub struct RecursiveConfig {
  pub mime_type: String,
  pub path: PathBuf,
}

/// The set of would-be destinations registered during one validation run.
/// Lives only for the duration of [`validate`].
pub struct DryRunSet {
  watched: Vec<PathBuf>,
  paths: Mutex<HashMap<PathBuf, String>>,
}

impl DryRunSet {
  pub fn new(watched: Vec<PathBuf>) -> Self {
    Self {
      watched,
      paths: Mutex::new(HashMap::new()),
    }
  }

  /// Register a would-be destination. Registering a `(type, path)` pair
  /// that is already live is the recursion signal. Paths outside every
  /// watched directory are ignored: the daemon will never pick them up
  /// again.
  pub fn add(&self, mime_type: &str, path: &Path) -> Result<(), RecursiveConfig> {
    let mut paths = self.paths.lock().expect("dry-run set lock");
    if paths.get(path).is_some_and(|t| t == mime_type) {
      return Err(RecursiveConfig {
        mime_type: mime_type.to_string(),
        path: path.to_path_buf(),
      });
    }
    if !self.watched.iter().any(|w| path.starts_with(w)) {
      return Ok(());
    }
    paths.insert(path.to_path_buf(), mime_type.to_string());
    Ok(())
  }

  pub fn remove(&self, path: &Path) {
    self.paths.lock().expect("dry-run set lock").remove(path);
  }

  /// A registered path for this type under `prefix` carrying `extension`.
  pub fn find_registered(&self, mime_type: &str, prefix: &Path, extension: &str) -> Option<PathBuf> {
    let paths = self.paths.lock().expect("dry-run set lock");
    paths
      .iter()
      .find(|(path, tpe)| {
        tpe.as_str() == mime_type && path.starts_with(prefix) && path.to_string_lossy().ends_with(extension)
      })
      .map(|(path, _)| path.clone())
  }

  /// Registered paths under `prefix` matching a processor type query:
  /// exact type, category prefix, or wildcard.
  pub fn paths_under(&self, prefix: &Path, type_query: &str) -> Vec<PathBuf> {
    let paths = self.paths.lock().expect("dry-run set lock");
    paths
      .iter()
      .filter(|(path, tpe)| {
        path.starts_with(prefix) && (tpe.as_str() == type_query || tpe.starts_with(type_query) || type_query == "*")
      })
      .map(|(path, _)| path.clone())
      .collect()
  }

  pub fn clear(&self) {
    self.paths.lock().expect("dry-run set lock").clear();
  }
}

fn synthetic_stem() -> String {
  uuid::Uuid::new_v4().simple().to_string()[..10].to_string()
}

/// Run a dry pipeline step, keeping only the recursion signal fatal. Other
/// failures (e.g. a template rejecting a synthetic name) are diagnostics,
/// not config errors.
async fn run_dry(
  source: &Path,
  processors: &[curator_core::Processor],
  ctx: &PipelineContext<'_>,
) -> Result<(), RecursiveConfig> {
  let Some(mut details) = ctx.index.find_best_match(&source.to_string_lossy()) else {
    return Ok(());
  };
  details.dry_run = true;

  match handle(source, &details, processors, ctx).await {
    Ok(()) => Ok(()),
    Err(ProcessError::Recursive(recursive)) => Err(recursive),
    Err(other) => {
      debug!(source = %source.display(), error = %other, "Dry run step failed");
      Ok(())
    }
  }
}

/// Simulate every other watched path's reaction to the destinations the
/// current validator just produced.
async fn cross_check(
  current: &WatchedPath,
  config: &Config,
  set: &DryRunSet,
  ctx: &PipelineContext<'_>,
) -> Result<(), RecursiveConfig> {
  for other in config.paths.iter().filter(|p| p.path != current.path) {
    for processor in &other.processors {
      for item in set.paths_under(&other.path, &processor.mime_type) {
        run_dry(&item, &other.processors, ctx).await?;
        set.remove(&item);
      }
    }
  }
  Ok(())
}

/// Validate a loaded config against recursive processor chains. Runs once
/// per successful load, before any watcher starts.
pub async fn validate(config: &Config, index: &MimeIndex) -> Result<(), RecursiveConfig> {
  let watched: Vec<PathBuf> = config.paths.iter().map(|w| w.path.clone()).collect();
  info!(paths = watched.len(), "Validating configuration for recursive processors");

  let set = DryRunSet::new(watched);
  let ctx = PipelineContext {
    index,
    dry_run: Some(&set),
  };

  for watched_path in &config.paths {
    debug!(path = %watched_path.path.display(), "Starting validator");
    for (_, record) in index.records() {
      let extension = record.first_glob_extension();

      // A previously registered path of this type means a similar
      // extension was already exercised; retire it first.
      if let Some(previous) = set.find_registered(&record.mime_type, &watched_path.path, &extension) {
        set.remove(&previous);
      }

      let test_path = watched_path.path.join(format!("{}{}", synthetic_stem(), extension));
      set.add(&record.mime_type, &test_path)?;

      run_dry(&test_path, &watched_path.processors, &ctx).await?;
      cross_check(watched_path, config, &set, &ctx).await?;
    }
    set.clear();
  }

  Ok(())
}
