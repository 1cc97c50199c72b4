//! Watcher lifecycle management: keep the set of live engines equal to
//! the set of configured paths.
//!
//! The supervisor owns no global state. It reads the current config and
//! MIME index through `watch` channels and reconciles on every change and
//! on a one-second tick: start engines for new paths, stop engines for
//! removed paths, restart engines whose effective settings changed.
//! Engines pick the index up per job, so an index swap needs no restart.

use curator_core::Config;
use curator_mime::MimeIndex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{EngineConfig, WatchEngine};

const RECONCILE_TICK: Duration = Duration::from_secs(1);

struct LiveWatcher {
  config: EngineConfig,
  cancel: CancellationToken,
  join: tokio::task::JoinHandle<()>,
}

pub struct Supervisor {
  config_rx: watch::Receiver<Arc<Config>>,
  index_rx: watch::Receiver<Arc<MimeIndex>>,
  notifications: mpsc::Sender<String>,
  cancel: CancellationToken,
}

impl Supervisor {
  pub fn new(
    config_rx: watch::Receiver<Arc<Config>>,
    index_rx: watch::Receiver<Arc<MimeIndex>>,
    notifications: mpsc::Sender<String>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      config_rx,
      index_rx,
      notifications,
      cancel,
    }
  }

  pub fn spawn(self) -> tokio::task::JoinHandle<()> {
    tokio::spawn(self.run())
  }

  /// Run until the global cancellation fires, then stop every live
  /// watcher and wait for their in-flight jobs to finish.
  pub async fn run(self) {
    let Supervisor {
      mut config_rx,
      index_rx,
      notifications,
      cancel,
    } = self;

    let mut live: HashMap<PathBuf, LiveWatcher> = HashMap::new();
    // Paths already warned about, so a missing directory logs once.
    let mut failed: HashSet<PathBuf> = HashSet::new();
    let mut tick = tokio::time::interval(RECONCILE_TICK);

    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => break,

        changed = config_rx.changed() => {
          if changed.is_err() {
            break;
          }
          reconcile(&config_rx, &index_rx, &notifications, &mut live, &mut failed).await;
        }

        _ = tick.tick() => {
          reconcile(&config_rx, &index_rx, &notifications, &mut live, &mut failed).await;
        }
      }
    }

    info!(watchers = live.len(), "Stopping all watchers");
    for (path, watcher) in live.drain() {
      watcher.cancel.cancel();
      let _ = watcher.join.await;
      debug!(path = %path.display(), "Watcher stopped");
    }
    info!("Supervisor finished");
  }
}

async fn reconcile(
  config_rx: &watch::Receiver<Arc<Config>>,
  index_rx: &watch::Receiver<Arc<MimeIndex>>,
  notifications: &mpsc::Sender<String>,
  live: &mut HashMap<PathBuf, LiveWatcher>,
  failed: &mut HashSet<PathBuf>,
) {
  let config = config_rx.borrow().clone();
  let desired: HashMap<PathBuf, EngineConfig> = config
    .paths
    .iter()
    .map(|watched| (watched.path.clone(), EngineConfig::for_path(watched, &config)))
    .collect();

  // Stop watchers for removed paths and for paths whose settings changed.
  let stale: Vec<PathBuf> = live
    .iter()
    .filter(|(path, watcher)| desired.get(*path) != Some(&watcher.config))
    .map(|(path, _)| path.clone())
    .collect();
  for path in stale {
    if let Some(watcher) = live.remove(&path) {
      info!(path = %path.display(), "Removing watcher");
      watcher.cancel.cancel();
      let _ = watcher.join.await;
    }
  }

  failed.retain(|path| desired.contains_key(path));

  for (path, engine_config) in desired {
    if live.contains_key(&path) {
      continue;
    }
    let engine_cancel = CancellationToken::new();
    match WatchEngine::spawn(
      engine_config.clone(),
      index_rx.clone(),
      engine_cancel.clone(),
      notifications.clone(),
    ) {
      Ok(join) => {
        info!(path = %path.display(), "Adding watcher");
        failed.remove(&path);
        live.insert(
          path,
          LiveWatcher {
            config: engine_config,
            cancel: engine_cancel,
            join,
          },
        );
      }
      Err(err) => {
        // Retried every tick; the directory may appear later.
        if failed.insert(path.clone()) {
          warn!(path = %path.display(), error = %err, "Unable to start watcher");
        }
      }
    }
  }
}
