//! Destination template expansion.
//!
//! Templates come from a processor's `path` and may reference `{{.ext}}`,
//! `{{.ucext}}`, and `{{.date}}`. Each placeholder is only available when
//! the matching property is enabled on the processor; the pipeline's
//! preprocess step turns properties on for every placeholder the template
//! actually uses, so an unresolved placeholder here means a property was
//! explicitly disabled.

use chrono::{DateTime, Local, NaiveDateTime};
use curator_core::{Processor, expand_home_str};
use curator_mime::Details;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

use crate::properties::truthy;

#[derive(Error, Debug)]
pub enum TemplateError {
  #[error("Template '{template}' references a property not enabled on the processor")]
  UnresolvedPlaceholder { template: String },

  #[error("Unable to stat source {path}: {source}")]
  SourceStat {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Expand a destination template for the given source file. Pure: the
/// caller creates the resulting directory.
pub fn expand(
  template: &str,
  source: &Path,
  details: &Details,
  processor: &Processor,
) -> Result<PathBuf, TemplateError> {
  let bare_ext = details.extension.replacen('.', "", 1);

  let mut expanded = expand_home_str(template);
  expanded = expanded.replace("{{.ext}}", &bare_ext.to_lowercase());

  if truthy(processor.properties.get("uppercase-extension-directory")) {
    expanded = expanded.replace("{{.ucext}}", &bare_ext.to_uppercase());
  }

  if truthy(processor.properties.get("include-date-directory")) {
    let date = resolve_date(source, details, processor)?;
    expanded = expanded.replace("{{.date}}", &date);
  }

  if expanded.contains("{{.") {
    return Err(TemplateError::UnresolvedPlaceholder {
      template: template.to_string(),
    });
  }

  trace!(template, expanded, "Expanded destination template");
  Ok(PathBuf::from(expanded))
}

/// The `YYYY-MM-DD` bucket for a source file: EXIF date for images when
/// available, source mtime otherwise. Dry-run uses the current date since
/// the synthetic file never exists.
fn resolve_date(source: &Path, details: &Details, processor: &Processor) -> Result<String, TemplateError> {
  if details.dry_run {
    return Ok(Local::now().format("%Y-%m-%d").to_string());
  }

  if details.category == "image"
    && let Some(date) = exif_date(source, processor)
  {
    return Ok(date);
  }

  let metadata = std::fs::metadata(source).map_err(|err| TemplateError::SourceStat {
    path: source.to_path_buf(),
    source: err,
  })?;
  let modified = metadata.modified().map_err(|err| TemplateError::SourceStat {
    path: source.to_path_buf(),
    source: err,
  })?;
  let modified: DateTime<Local> = modified.into();
  Ok(modified.format("%Y-%m-%d").to_string())
}

/// Read the preferred date tag from EXIF metadata. The `exif-date`
/// property overrides the default `CreateDate` tag. Any failure falls
/// back to mtime in the caller.
fn exif_date(source: &Path, processor: &Processor) -> Option<String> {
  let file = std::fs::File::open(source).ok()?;
  let mut reader = std::io::BufReader::new(file);
  let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;

  let wanted = processor
    .properties
    .get("exif-date")
    .map(String::as_str)
    .unwrap_or("CreateDate");

  let field = exif.fields().find(|f| {
    f.tag.to_string() == wanted || (wanted == "CreateDate" && f.tag == exif::Tag::DateTimeDigitized)
  })?;

  let raw = match &field.value {
    exif::Value::Ascii(segments) => segments
      .iter()
      .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
      .collect::<Vec<_>>()
      .join(" "),
    other => other.display_as(field.tag).to_string(),
  };
  let raw = raw.trim();

  let parsed = DateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S%:z")
    .map(|dt| dt.date_naive())
    .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S").map(|dt| dt.date()))
    .ok()?;

  debug!(source = %source.display(), tag = wanted, date = %parsed, "Using EXIF date");
  Some(parsed.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;
  use tempfile::TempDir;

  fn processor_with(props: &[(&str, &str)]) -> Processor {
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

  fn jpeg_details() -> Details {
    Details {
      category: "image".into(),
      mime_type: "image/jpeg".into(),
      subclass: Vec::new(),
      extension: ".JPG".into(),
      dry_run: false,
    }
  }

  #[test]
  fn expands_ext_lowercase() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("photo.JPG");
    std::fs::write(&source, b"x").unwrap();

    let dest = expand("/out/{{.ext}}", &source, &jpeg_details(), &processor_with(&[])).unwrap();
    assert_eq!(dest, PathBuf::from("/out/jpg"));
  }

  #[test]
  fn expands_ucext_when_enabled() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("photo.jpg");
    std::fs::write(&source, b"x").unwrap();

    let processor = processor_with(&[("uppercase-extension-directory", "true")]);
    let dest = expand("/out/{{.ucext}}", &source, &jpeg_details(), &processor).unwrap();
    assert_eq!(dest, PathBuf::from("/out/JPG"));
  }

  #[test]
  fn disabled_placeholder_fails_cleanly() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("photo.jpg");
    std::fs::write(&source, b"x").unwrap();

    let err = expand("/out/{{.ucext}}", &source, &jpeg_details(), &processor_with(&[])).unwrap_err();
    assert!(matches!(err, TemplateError::UnresolvedPlaceholder { .. }));
  }

  #[test]
  fn date_uses_mtime_without_exif() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("notes.txt");
    std::fs::write(&source, b"x").unwrap();

    let details = Details {
      category: "text".into(),
      mime_type: "text/plain".into(),
      extension: ".txt".into(),
      ..Default::default()
    };
    let processor = processor_with(&[("include-date-directory", "true")]);
    let dest = expand("/out/{{.date}}", &source, &details, &processor).unwrap();

    let today = Local::now().format("%Y-%m-%d").to_string();
    assert_eq!(dest, PathBuf::from(format!("/out/{today}")));
  }

  #[test]
  fn dry_run_expands_date_without_source() {
    let details = Details {
      dry_run: true,
      ..jpeg_details()
    };
    let processor = processor_with(&[("include-date-directory", "true")]);
    let dest = expand("/out/{{.date}}", Path::new("/nope/ghost.jpg"), &details, &processor).unwrap();
    assert!(dest.to_string_lossy().starts_with("/out/"));
  }

  #[test]
  fn multi_segment_extension_keeps_inner_dot() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("backup.tar.gz");
    std::fs::write(&source, b"x").unwrap();

    let details = Details {
      category: "application".into(),
      mime_type: "application/x-compressed-tar".into(),
      extension: ".tar.gz".into(),
      ..Default::default()
    };
    let dest = expand("/out/{{.ext}}", &source, &details, &processor_with(&[])).unwrap();
    assert_eq!(dest, PathBuf::from("/out/tar.gz"));
  }
}
