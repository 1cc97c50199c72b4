//! Post-action property application: ownership, mode, executable bit.

use curator_core::Processor;
use nix::unistd::{Gid, Group, Uid, User, chown};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::mode::{ModeParseError, ModeSpec};
use crate::properties::truthy;

#[derive(Error, Debug)]
pub enum PostProcessError {
  #[error("Invalid chown specification '{0}', expected user:group")]
  BadChownSpec(String),

  #[error("User '{0}' not found")]
  UnknownUser(String),

  #[error("Group '{0}' not found")]
  UnknownGroup(String),

  #[error("Mode: {0}")]
  Mode(#[from] ModeParseError),

  #[error("IO: {0}")]
  Io(#[from] std::io::Error),

  #[error("System: {0}")]
  Sys(#[from] nix::Error),

  #[error("Walk: {0}")]
  Walk(#[from] walkdir::Error),
}

/// Walk the processor's properties in key order and apply the recognized
/// post-processing knobs to the handler's final path.
pub fn apply(final_path: &Path, processor: &Processor) -> Result<(), PostProcessError> {
  debug!(path = %final_path.display(), "Post-processing");
  for (key, value) in &processor.properties {
    match key.to_ascii_lowercase().as_str() {
      "chown" => apply_chown(final_path, value)?,
      "chmod" => apply_chmod(final_path, value)?,
      "setexec" => apply_setexec(final_path, value)?,
      _ => {}
    }
  }
  Ok(())
}

fn resolve_owner(spec: &str) -> Result<(Uid, Gid), PostProcessError> {
  let (user_name, group_name) = spec
    .split_once(':')
    .ok_or_else(|| PostProcessError::BadChownSpec(spec.to_string()))?;

  let user = User::from_name(user_name)?.ok_or_else(|| PostProcessError::UnknownUser(user_name.to_string()))?;
  let group = Group::from_name(group_name)?.ok_or_else(|| PostProcessError::UnknownGroup(group_name.to_string()))?;
  Ok((user.uid, group.gid))
}

fn apply_chown(path: &Path, spec: &str) -> Result<(), PostProcessError> {
  debug!(path = %path.display(), spec, "Applying ownership");
  let (uid, gid) = resolve_owner(spec)?;

  if path.is_dir() {
    for entry in WalkDir::new(path) {
      let entry = entry?;
      chown(entry.path(), Some(uid), Some(gid))?;
    }
  } else {
    chown(path, Some(uid), Some(gid))?;
  }
  Ok(())
}

fn in_bin_dir(path: &Path) -> bool {
  path
    .parent()
    .and_then(Path::file_name)
    .is_some_and(|name| name.eq_ignore_ascii_case("bin"))
}

fn chmod_one(path: &Path, spec: &ModeSpec, force_exec: bool) -> Result<(), PostProcessError> {
  let metadata = std::fs::metadata(path)?;
  let is_dir = metadata.is_dir();
  let mut mode = spec.apply(metadata.permissions().mode(), is_dir);
  if force_exec {
    mode |= 0o111;
  }
  std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
  Ok(())
}

fn apply_chmod(path: &Path, spec: &str) -> Result<(), PostProcessError> {
  debug!(path = %path.display(), spec, "Applying mode");
  let spec = ModeSpec::parse(spec)?;

  if path.is_dir() {
    for entry in WalkDir::new(path) {
      let entry = entry?;
      // Directories stay traversable; anything landing in a bin directory
      // is meant to run.
      let force_exec = entry.file_type().is_dir() || in_bin_dir(entry.path());
      chmod_one(entry.path(), &spec, force_exec)?;
    }
  } else {
    chmod_one(path, &spec, false)?;
  }
  Ok(())
}

fn apply_setexec(final_path: &Path, value: &str) -> Result<(), PostProcessError> {
  // `install` publishes its final path through this property, so a value
  // naming an existing path redirects the bit there.
  let target: PathBuf = if truthy(Some(&value.to_string())) {
    final_path.to_path_buf()
  } else if Path::new(value).exists() {
    PathBuf::from(value)
  } else {
    return Ok(());
  };

  debug!(path = %target.display(), "Setting executable bit");
  let metadata = std::fs::metadata(&target)?;
  let mode = metadata.permissions().mode() | 0o111;
  std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
  Ok(())
}
