//! External plugin handlers.
//!
//! A processor whose handler is not built-in names a script under the
//! configured plugin directory. The script receives one positional
//! argument: a JSON object with the source, expanded destination,
//! classification details, and the processor's properties. If the last
//! line it prints names an existing path — the literal last line, so a
//! trailing blank line publishes nothing — that path is post-processed
//! as the handler's final destination.

use curator_core::Processor;
use curator_mime::Details;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum PluginError {
  #[error("Plugin file has been moved or deleted from disk: {0}")]
  Missing(PathBuf),

  #[error("Invalid plugin filetype: {0}")]
  InvalidFiletype(String),

  #[error("IO: {0}")]
  Io(#[from] std::io::Error),

  #[error("Plugin {plugin} exited with {status}: {stderr}")]
  Exit {
    plugin: PathBuf,
    status: std::process::ExitStatus,
    stderr: String,
  },
}

#[derive(Serialize)]
struct PluginArgs<'a> {
  source: &'a Path,
  destination: &'a Path,
  details: &'a Details,
  properties: &'a BTreeMap<String, String>,
}

fn interpreter_for(plugin: &Path) -> Result<&'static str, PluginError> {
  let ext = plugin
    .extension()
    .map(|e| e.to_string_lossy().to_lowercase())
    .unwrap_or_default();
  match ext.as_str() {
    "py" => Ok("python"),
    "sh" => Ok("sh"),
    "bash" => Ok("bash"),
    other => Err(PluginError::InvalidFiletype(other.to_string())),
  }
}

/// Run the plugin named by the processor's handler. Output is streamed to
/// the log as it arrives; the last stdout line becomes the final path
/// when it exists on disk.
pub async fn run(
  source: &Path,
  dest: &Path,
  details: &Details,
  processor: &Processor,
) -> Result<Option<PathBuf>, PluginError> {
  let plugin = PathBuf::from(&processor.handler);
  if !plugin.exists() {
    return Err(PluginError::Missing(plugin));
  }
  let interpreter = interpreter_for(&plugin)?;

  let args = serde_json::to_string(&PluginArgs {
    source,
    destination: dest,
    details,
    properties: &processor.properties,
  })
  .expect("plugin arguments are always serializable");

  info!(plugin = %plugin.display(), interpreter, "Triggering plugin");
  let mut child = Command::new(interpreter)
    .arg(&plugin)
    .arg(&args)
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .spawn()?;

  let stdout = child.stdout.take().expect("stdout was piped");
  let stderr = child.stderr.take().expect("stderr was piped");

  let plugin_name = plugin.display().to_string();
  let stderr_task = tokio::spawn(async move {
    let mut tail: Vec<String> = Vec::new();
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
      warn!(plugin = %plugin_name, "{line}");
      tail.push(line);
      if tail.len() > 5 {
        tail.remove(0);
      }
    }
    tail.join("\n")
  });

  let mut last_line = String::new();
  let mut lines = BufReader::new(stdout).lines();
  while let Ok(Some(line)) = lines.next_line().await {
    info!(plugin = %plugin.display(), "{line}");
    last_line = line;
  }

  let status = child.wait().await?;
  let stderr_tail = stderr_task.await.unwrap_or_default();

  if !status.success() {
    return Err(PluginError::Exit {
      plugin,
      status,
      stderr: stderr_tail,
    });
  }

  let final_path = PathBuf::from(&last_line);
  if !last_line.is_empty() && final_path.exists() {
    info!(path = %final_path.display(), "Using plugin-reported final destination");
    Ok(Some(final_path))
  } else {
    Ok(None)
  }
}
