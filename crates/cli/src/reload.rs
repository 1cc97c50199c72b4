//! Hot reload of the config file.
//!
//! Watches the config file's parent directory — editors replace files by
//! rename, which breaks a watch on the file itself — and reloads when the
//! file settles after a change. A reload rebuilds the MIME index, runs the
//! recursion validator, and publishes both over the supervisor's watch
//! channels; the supervisor diffs and reconciles from there. A reload
//! that fails to parse or validate keeps the previous config running.

use curator_core::Config;
use curator_mime::MimeIndex;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SETTLE: Duration = Duration::from_millis(250);

pub struct ConfigReloader {
  config_path: PathBuf,
  config_tx: watch::Sender<Arc<Config>>,
  index_tx: watch::Sender<Arc<MimeIndex>>,
  cancel: CancellationToken,
}

impl ConfigReloader {
  pub fn new(
    config_path: PathBuf,
    config_tx: watch::Sender<Arc<Config>>,
    index_tx: watch::Sender<Arc<MimeIndex>>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      config_path,
      config_tx,
      index_tx,
      cancel,
    }
  }

  pub fn spawn(self) -> tokio::task::JoinHandle<()> {
    tokio::spawn(self.run())
  }

  pub async fn run(self) {
    info!(path = %self.config_path.display(), "Setting up watch for config file");

    let watch_root = match self.config_path.parent() {
      Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
      Some(parent) => parent.to_path_buf(),
      None => PathBuf::from("/"),
    };

    let (event_tx, mut event_rx) = mpsc::channel::<Result<Event, notify::Error>>(8);
    let mut watcher = match RecommendedWatcher::new(
      move |res| {
        let _ = event_tx.blocking_send(res);
      },
      notify::Config::default(),
    ) {
      Ok(watcher) => watcher,
      Err(err) => {
        error!(error = %err, "Unable to create config watcher; hot reload disabled");
        return;
      }
    };
    if let Err(err) = watcher.watch(&watch_root, RecursiveMode::NonRecursive) {
      error!(error = %err, "Unable to watch config directory; hot reload disabled");
      return;
    }

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => break,

        event = event_rx.recv() => {
          let Some(event) = event else { break };
          match event {
            Ok(event) if event.paths.iter().any(|p| p == &self.config_path) => {
              // Let the editor finish its rename/write dance.
              tokio::time::sleep(SETTLE).await;
              while event_rx.try_recv().is_ok() {}
              if self.config_path.exists() {
                self.reload().await;
              } else {
                debug!(path = %self.config_path.display(), "Config file missing; waiting for it to return");
              }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "Config watch error"),
          }
        }
      }
    }

    debug!("Config reloader stopped");
  }

  async fn reload(&self) {
    info!(path = %self.config_path.display(), "Reloading config file");
    let config = match Config::load(&self.config_path) {
      Ok(config) => config,
      Err(err) => {
        error!(error = %err, "Unable to load config file; keeping previous configuration");
        return;
      }
    };

    let index = MimeIndex::load(&config.mime_directories);
    if let Err(err) = curator_pipeline::validate(&config, &index).await {
      error!(error = %err, "Rejecting reloaded config; keeping previous configuration");
      return;
    }

    // Index first so engines never classify with a stale database against
    // the new processor set.
    let _ = self.index_tx.send(Arc::new(index));
    let _ = self.config_tx.send(Arc::new(config));
    info!("Done loading config file");
  }
}
