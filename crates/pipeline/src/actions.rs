//! Built-in handlers: copy, move, extract, install, delete.
//!
//! Every action takes the source file, the expanded destination directory,
//! and the classified details, and returns the final path post-processing
//! should operate on — `None` when nothing remains (delete, dedup hits).

use curator_core::Processor;
use curator_mime::{Details, MimeIndex};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::properties::truthy;

#[derive(Error, Debug)]
pub enum ActionError {
  #[error("IO: {0}")]
  Io(#[from] std::io::Error),

  #[error("Unsupported archive format for {0}")]
  UnsupportedArchive(PathBuf),

  #[error("Zip: {0}")]
  Zip(#[from] zip::result::ZipError),

  // Internal outcomes, demoted to success by the pipeline.
  #[error("copy-deleted")]
  CopyDeleted,

  #[error("sha256-match: source deleted")]
  ShaMatch,
}

impl ActionError {
  /// Sentinels signal "done, nothing left to post-process" rather than a
  /// failure. They never surface outside the pipeline.
  pub fn is_sentinel(&self) -> bool {
    matches!(self, ActionError::CopyDeleted | ActionError::ShaMatch)
  }
}

/// Dispatch to the named built-in. The processor is mutable because
/// `install` publishes its final path through the `setexec` property.
pub fn run_builtin(
  handler: &str,
  source: &Path,
  dest: &Path,
  details: &Details,
  processor: &mut Processor,
  index: &MimeIndex,
) -> Result<Option<PathBuf>, ActionError> {
  match handler.to_ascii_lowercase().as_str() {
    "copy" => copy(source, dest, details, processor, index).map(Some),
    "move" => move_file(source, dest, details, processor, index),
    "extract" => extract(source, dest, details, processor).map(Some),
    "install" => install(source, dest, details, processor, index),
    "delete" => delete(source).map(|()| None),
    other => {
      // Unreachable from the pipeline; resolution guards on is_builtin.
      warn!(handler = other, "Unknown builtin handler");
      Ok(None)
    }
  }
}

fn copy(
  source: &Path,
  dest: &Path,
  _details: &Details,
  processor: &Processor,
  index: &MimeIndex,
) -> Result<PathBuf, ActionError> {
  let (_, stem, extension) = index.split_path_by_mime(source);

  let mut basename = stem;
  if !truthy(processor.properties.get("strip-extension")) {
    basename.push_str(&extension);
  }
  if truthy(processor.properties.get("lowercase-destination")) {
    basename = basename.to_lowercase();
  }

  // A destination carrying the source's extension is a literal file name,
  // not a directory.
  let dest_ext = dest
    .extension()
    .map(|e| format!(".{}", e.to_string_lossy()))
    .unwrap_or_default();
  let final_path = if !extension.is_empty() && dest_ext.eq_ignore_ascii_case(&extension) {
    dest.to_path_buf()
  } else {
    dest.join(&basename)
  };

  debug!(final_path = %final_path.display(), "Copy: testing final destination");
  if final_path.exists() {
    if truthy(processor.properties.get("compare-sha")) {
      return copy_with_sha_check(source, &final_path, index);
    }
    warn!(path = %final_path.display(), "File already exists at destination. Removing source");
    delete(source)?;
    return Err(ActionError::CopyDeleted);
  }

  stream_copy(source, &final_path)?;
  Ok(final_path)
}

fn move_file(
  source: &Path,
  dest: &Path,
  details: &Details,
  processor: &Processor,
  index: &MimeIndex,
) -> Result<Option<PathBuf>, ActionError> {
  debug!(source = %source.display(), "Triggering move");
  match copy(source, dest, details, processor, index) {
    Ok(final_path) => {
      delete(source)?;
      Ok(Some(final_path))
    }
    // Copy already disposed of the source.
    Err(ActionError::CopyDeleted) => Ok(None),
    Err(err) => Err(err),
  }
}

fn extract(source: &Path, dest: &Path, details: &Details, processor: &Processor) -> Result<PathBuf, ActionError> {
  let name = source.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
  let mut stem = strip_suffix_ignore_case(&name, &details.extension);
  stem = strip_suffix_ignore_case(&stem, ".tar");
  let target = dest.join(&stem);

  info!(source = %source.display(), target = %target.display(), "Extracting archive");
  let lower = name.to_lowercase();
  if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
    let file = BufReader::new(File::open(source)?);
    tar::Archive::new(flate2::read::GzDecoder::new(file)).unpack(&target)?;
  } else if lower.ends_with(".tar") {
    let file = BufReader::new(File::open(source)?);
    tar::Archive::new(file).unpack(&target)?;
  } else if lower.ends_with(".zip") {
    let file = File::open(source)?;
    zip::ZipArchive::new(file)?.extract(&target)?;
  } else {
    return Err(ActionError::UnsupportedArchive(source.to_path_buf()));
  }

  if truthy(processor.properties.get("cleanup-source")) {
    delete(source)?;
  }
  Ok(target)
}

fn install(
  source: &Path,
  dest: &Path,
  details: &Details,
  processor: &mut Processor,
  index: &MimeIndex,
) -> Result<Option<PathBuf>, ActionError> {
  // Installation is a move into place; the executable bit is applied by
  // post-processing through the setexec property.
  let final_path = move_file(source, dest, details, processor, index)?;
  if let Some(ref path) = final_path {
    processor
      .properties
      .insert("setexec".to_string(), path.to_string_lossy().into_owned());
  }
  Ok(final_path)
}

fn delete(source: &Path) -> Result<(), ActionError> {
  info!(path = %source.display(), "Deleting path");
  std::fs::remove_file(source)?;
  Ok(())
}

/// Collision handling when `compare-sha` is enabled: identical content
/// deletes the source; differing content probes `{stem}_{i}{ext}` until a
/// free name is found.
fn copy_with_sha_check(source: &Path, dest: &Path, index: &MimeIndex) -> Result<PathBuf, ActionError> {
  debug!(source = %source.display(), "Copy with sha256 comparison");
  let (dir, stem, extension) = index.split_path_by_mime(dest);
  let source_sha = sha256_file(source)?;

  let mut candidate = dest.to_path_buf();
  let mut i = 1usize;
  while candidate.exists() {
    if source_sha == sha256_file(&candidate)? {
      info!(source = %source.display(), existing = %candidate.display(), "Identical content already present. Removing source");
      delete(source)?;
      return Err(ActionError::ShaMatch);
    }
    candidate = dir.join(format!("{stem}_{i}{extension}"));
    i += 1;
  }

  stream_copy(source, &candidate)?;
  Ok(candidate)
}

fn stream_copy(source: &Path, dest: &Path) -> Result<(), ActionError> {
  let mut reader = BufReader::new(File::open(source)?);
  let mut writer = BufWriter::new(File::create(dest)?);
  std::io::copy(&mut reader, &mut writer)?;
  Ok(())
}

fn sha256_file(path: &Path) -> Result<String, ActionError> {
  let mut reader = BufReader::new(File::open(path)?);
  let mut hasher = Sha256::new();
  let mut buf = [0u8; 8192];
  loop {
    let n = reader.read(&mut buf)?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }
  Ok(format!("{:x}", hasher.finalize()))
}

fn strip_suffix_ignore_case(name: &str, suffix: &str) -> String {
  if !suffix.is_empty() && name.len() >= suffix.len() && name.to_lowercase().ends_with(&suffix.to_lowercase()) {
    name[..name.len() - suffix.len()].to_string()
  } else {
    name.to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;
  use tempfile::TempDir;

  fn test_index(root: &Path) -> MimeIndex {
    let dir = root.join("mime/image");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
      dir.join("jpeg.xml"),
      r#"<mime-type type="image/jpeg"><glob pattern="*.jpg"/></mime-type>"#,
    )
    .unwrap();
    let dir = root.join("mime/application");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
      dir.join("x-compressed-tar.xml"),
      r#"<mime-type type="application/x-compressed-tar"><glob pattern="*.tar.gz"/></mime-type>"#,
    )
    .unwrap();
    MimeIndex::load(&[root.join("mime")])
  }

  fn jpeg_details() -> Details {
    Details {
      category: "image".into(),
      mime_type: "image/jpeg".into(),
      subclass: Vec::new(),
      extension: ".jpg".into(),
      dry_run: false,
    }
  }

  fn processor(props: &[(&str, &str)]) -> Processor {
    Processor {
      mime_type: "image/jpeg".into(),
      path: String::new(),
      handler: "copy".into(),
      properties: props
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>(),
      negated: false,
    }
  }

  #[test]
  fn copy_places_file_under_destination() {
    let tmp = TempDir::new().unwrap();
    let index = test_index(tmp.path());
    let source = tmp.path().join("x.jpg");
    std::fs::write(&source, b"bytes").unwrap();
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();

    let final_path = copy(&source, &out, &jpeg_details(), &processor(&[]), &index).unwrap();
    assert_eq!(final_path, out.join("x.jpg"));
    assert_eq!(std::fs::read(&final_path).unwrap(), b"bytes");
    assert!(source.exists());
  }

  #[test]
  fn copy_strip_extension_and_lowercase() {
    let tmp = TempDir::new().unwrap();
    let index = test_index(tmp.path());
    let source = tmp.path().join("IMG.jpg");
    std::fs::write(&source, b"bytes").unwrap();
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();

    let props = processor(&[("strip-extension", "true"), ("lowercase-destination", "true")]);
    let final_path = copy(&source, &out, &jpeg_details(), &props, &index).unwrap();
    assert_eq!(final_path, out.join("img"));
  }

  #[test]
  fn copy_collision_without_sha_deletes_source() {
    let tmp = TempDir::new().unwrap();
    let index = test_index(tmp.path());
    let source = tmp.path().join("x.jpg");
    std::fs::write(&source, b"new").unwrap();
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("x.jpg"), b"old").unwrap();

    let err = copy(&source, &out, &jpeg_details(), &processor(&[]), &index).unwrap_err();
    assert!(matches!(err, ActionError::CopyDeleted));
    assert!(!source.exists());
    assert_eq!(std::fs::read(out.join("x.jpg")).unwrap(), b"old");
  }

  #[test]
  fn sha_dedup_identical_deletes_source() {
    let tmp = TempDir::new().unwrap();
    let index = test_index(tmp.path());
    let source = tmp.path().join("x.jpg");
    std::fs::write(&source, b"same").unwrap();
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("x.jpg"), b"same").unwrap();

    let err = copy(&source, &out, &jpeg_details(), &processor(&[("compare-sha", "true")]), &index).unwrap_err();
    assert!(matches!(err, ActionError::ShaMatch));
    assert!(!source.exists());
    assert_eq!(std::fs::read(out.join("x.jpg")).unwrap(), b"same");
  }

  #[test]
  fn sha_dedup_distinct_gets_numeric_suffix() {
    let tmp = TempDir::new().unwrap();
    let index = test_index(tmp.path());
    let source = tmp.path().join("x.jpg");
    std::fs::write(&source, b"new content").unwrap();
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("x.jpg"), b"old content").unwrap();

    let final_path = copy(&source, &out, &jpeg_details(), &processor(&[("compare-sha", "true")]), &index).unwrap();
    assert_eq!(final_path, out.join("x_1.jpg"));
    assert_eq!(std::fs::read(&final_path).unwrap(), b"new content");
    assert_eq!(std::fs::read(out.join("x.jpg")).unwrap(), b"old content");
  }

  #[test]
  fn sha_dedup_skips_taken_suffixes() {
    let tmp = TempDir::new().unwrap();
    let index = test_index(tmp.path());
    let source = tmp.path().join("x.jpg");
    std::fs::write(&source, b"third").unwrap();
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("x.jpg"), b"first").unwrap();
    std::fs::write(out.join("x_1.jpg"), b"second").unwrap();

    let final_path = copy(&source, &out, &jpeg_details(), &processor(&[("compare-sha", "true")]), &index).unwrap();
    assert_eq!(final_path, out.join("x_2.jpg"));
  }

  #[test]
  fn move_removes_source() {
    let tmp = TempDir::new().unwrap();
    let index = test_index(tmp.path());
    let source = tmp.path().join("x.jpg");
    std::fs::write(&source, b"bytes").unwrap();
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();

    let final_path = move_file(&source, &out, &jpeg_details(), &processor(&[]), &index)
      .unwrap()
      .unwrap();
    assert!(!source.exists());
    assert_eq!(std::fs::read(final_path).unwrap(), b"bytes");
  }

  #[test]
  fn move_collision_is_success_without_final() {
    let tmp = TempDir::new().unwrap();
    let index = test_index(tmp.path());
    let source = tmp.path().join("x.jpg");
    std::fs::write(&source, b"new").unwrap();
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("x.jpg"), b"old").unwrap();

    let outcome = move_file(&source, &out, &jpeg_details(), &processor(&[]), &index).unwrap();
    assert!(outcome.is_none());
    assert!(!source.exists());
  }

  #[test]
  fn extract_tar_gz_strips_both_suffixes() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("archive.tar.gz");

    // Build a small archive containing one file.
    let payload = tmp.path().join("payload.txt");
    std::fs::write(&payload, b"hello").unwrap();
    let gz = flate2::write::GzEncoder::new(File::create(&source).unwrap(), flate2::Compression::default());
    let mut builder = tar::Builder::new(gz);
    builder.append_path_with_name(&payload, "payload.txt").unwrap();
    builder.into_inner().unwrap().finish().unwrap();

    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    let details = Details {
      category: "application".into(),
      mime_type: "application/x-compressed-tar".into(),
      extension: ".tar.gz".into(),
      ..Default::default()
    };
    let props = processor(&[("cleanup-source", "true")]);

    let target = extract(&source, &out, &details, &props).unwrap();
    assert_eq!(target, out.join("archive"));
    assert_eq!(std::fs::read(target.join("payload.txt")).unwrap(), b"hello");
    assert!(!source.exists());
  }

  #[test]
  fn extract_rejects_unknown_format() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("blob.rar");
    std::fs::write(&source, b"not an archive").unwrap();
    let details = Details {
      extension: ".rar".into(),
      ..Default::default()
    };

    let err = extract(&source, tmp.path(), &details, &processor(&[])).unwrap_err();
    assert!(matches!(err, ActionError::UnsupportedArchive(_)));
    assert!(source.exists());
  }

  #[test]
  fn install_publishes_final_through_setexec() {
    let tmp = TempDir::new().unwrap();
    let index = test_index(tmp.path());
    let source = tmp.path().join("tool.jpg");
    std::fs::write(&source, b"#!/bin/sh").unwrap();
    let out = tmp.path().join("bin");
    std::fs::create_dir_all(&out).unwrap();

    let mut props = processor(&[]);
    let final_path = install(&source, &out, &jpeg_details(), &mut props, &index)
      .unwrap()
      .unwrap();
    assert_eq!(props.properties.get("setexec").unwrap(), &final_path.to_string_lossy());
  }

  #[test]
  fn delete_removes_and_returns_nothing() {
    let tmp = TempDir::new().unwrap();
    let index = test_index(tmp.path());
    let source = tmp.path().join("x.jpg");
    std::fs::write(&source, b"bytes").unwrap();

    let outcome = run_builtin("delete", &source, tmp.path(), &jpeg_details(), &mut processor(&[]), &index).unwrap();
    assert!(outcome.is_none());
    assert!(!source.exists());
  }
}
