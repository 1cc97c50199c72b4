use anyhow::{Context, Result, bail};
use clap::Parser;
use curator_core::Config;
use curator_mime::MimeIndex;
use curator_watch::Supervisor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

mod logging;
mod reload;

use reload::ConfigReloader;

#[derive(Parser)]
#[command(name = "curator")]
#[command(about = "Watches inbox directories and routes incoming files by MIME type")]
struct Cli {
  /// Path to the YAML config file
  #[arg(long)]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  if !cli.config.exists() {
    bail!("config file must be provided and must exist: {}", cli.config.display());
  }
  // The reloader compares notify's absolute event paths against this.
  let config_path = cli.config.canonicalize().context("unable to resolve config path")?;

  let config = Config::load(&config_path).context("config file is invalid")?;
  logging::init(config.log_level);

  let index = MimeIndex::load(&config.mime_directories);
  curator_pipeline::validate(&config, &index)
    .await
    .context("refusing to start")?;

  let (config_tx, config_rx) = watch::channel(Arc::new(config));
  let (index_tx, index_rx) = watch::channel(Arc::new(index));
  let (notification_tx, mut notification_rx) = mpsc::channel::<String>(64);
  let cancel = CancellationToken::new();

  info!("Starting watchers");
  let supervisor = Supervisor::new(config_rx, index_rx, notification_tx, cancel.clone()).spawn();
  let reloader = ConfigReloader::new(config_path, config_tx, index_tx, cancel.clone()).spawn();

  // Single sink for "processing complete" messages; a desktop notifier
  // would hook in here.
  tokio::spawn(async move {
    while let Some(message) = notification_rx.recv().await {
      info!("{message}");
    }
  });

  tokio::signal::ctrl_c().await.context("unable to listen for SIGINT")?;
  info!("Shutting down listeners");
  cancel.cancel();

  let _ = supervisor.await;
  let _ = reloader.await;
  info!("Done");
  Ok(())
}
