//! Scenario coverage at the crate boundary: classification feeding the
//! resolver and the full pipeline, including post-processing.

use curator_core::Processor;
use curator_mime::MimeIndex;
use curator_pipeline::{PipelineContext, handle};
use std::collections::BTreeMap;
use std::fs::File;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

fn build_index(root: &Path) -> MimeIndex {
  let write = |category: &str, file: &str, xml: &str| {
    let dir = root.join("mime").join(category);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file), xml).unwrap();
  };
  write(
    "image",
    "jpeg.xml",
    r#"<mime-type type="image/jpeg"><glob pattern="*.jpg"/></mime-type>"#,
  );
  write(
    "application",
    "gzip.xml",
    r#"<mime-type type="application/gzip"><glob pattern="*.gz"/></mime-type>"#,
  );
  write(
    "application",
    "x-compressed-tar.xml",
    r#"<mime-type type="application/x-compressed-tar"><glob pattern="*.tar.gz"/><sub-class-of type="application/gzip"/></mime-type>"#,
  );
  write(
    "text",
    "x-shellscript.xml",
    r#"<mime-type type="text/x-shellscript"><glob pattern="*.sh"/><sub-class-of type="application/x-executable"/></mime-type>"#,
  );
  MimeIndex::load(&[root.join("mime")])
}

fn processor(mime_type: &str, handler: &str, path: &Path, props: &[(&str, &str)]) -> Processor {
  Processor {
    mime_type: mime_type.into(),
    path: path.to_string_lossy().into_owned(),
    handler: handler.into(),
    properties: props
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect::<BTreeMap<_, _>>(),
    negated: false,
  }
}

async fn route(index: &MimeIndex, source: &Path, processors: &[Processor]) {
  let details = index.find_best_match(&source.to_string_lossy()).expect("classified");
  let ctx = PipelineContext {
    index,
    dry_run: None,
  };
  handle(source, &details, processors, &ctx).await.unwrap();
}

#[tokio::test]
async fn shellscript_routes_by_subclass_into_bin() {
  let tmp = tempfile::TempDir::new().unwrap();
  let index = build_index(tmp.path());
  let bin = tmp.path().join("bin");

  let source = tmp.path().join("hello.sh");
  std::fs::write(&source, b"#!/bin/sh\necho hello\n").unwrap();

  let processors = vec![processor("application/x-executable", "install", &bin, &[])];
  route(&index, &source, &processors).await;

  let installed = bin.join("hello.sh");
  assert!(!source.exists());
  let mode = std::fs::metadata(&installed).unwrap().permissions().mode();
  assert_eq!(mode & 0o111, 0o111, "installed script should be executable");
}

#[tokio::test]
async fn sha_dedup_keeps_existing_and_suffixes_differing() {
  let tmp = tempfile::TempDir::new().unwrap();
  let index = build_index(tmp.path());
  let out = tmp.path().join("out");
  std::fs::create_dir_all(&out).unwrap();

  let processors = vec![processor("image/jpeg", "copy", &out, &[("compare-sha", "true")])];

  // Identical bytes already at the destination: source is consumed.
  std::fs::write(out.join("x.jpg"), b"same bytes").unwrap();
  let duplicate = tmp.path().join("x.jpg");
  std::fs::write(&duplicate, b"same bytes").unwrap();
  route(&index, &duplicate, &processors).await;
  assert!(!duplicate.exists());
  assert_eq!(std::fs::read(out.join("x.jpg")).unwrap(), b"same bytes");
  assert!(!out.join("x_1.jpg").exists());

  // Differing bytes pick up a numeric suffix, the original is untouched.
  let variant = tmp.path().join("x.jpg");
  std::fs::write(&variant, b"different bytes").unwrap();
  route(&index, &variant, &processors).await;
  assert_eq!(std::fs::read(out.join("x.jpg")).unwrap(), b"same bytes");
  assert_eq!(std::fs::read(out.join("x_1.jpg")).unwrap(), b"different bytes");
}

#[tokio::test]
async fn archive_extracts_into_stripped_directory_and_cleans_source() {
  let tmp = tempfile::TempDir::new().unwrap();
  let index = build_index(tmp.path());
  let out = tmp.path().join("out");

  let payload = tmp.path().join("notes.txt");
  std::fs::write(&payload, b"contents").unwrap();
  let source = tmp.path().join("archive.tar.gz");
  let gz = flate2::write::GzEncoder::new(File::create(&source).unwrap(), flate2::Compression::default());
  let mut builder = tar::Builder::new(gz);
  builder.append_path_with_name(&payload, "notes.txt").unwrap();
  builder.into_inner().unwrap().finish().unwrap();

  let processors = vec![processor(
    "application/x-compressed-tar",
    "extract",
    &out,
    &[("cleanup-source", "true")],
  )];
  route(&index, &source, &processors).await;

  assert!(!source.exists());
  assert_eq!(std::fs::read(out.join("archive/notes.txt")).unwrap(), b"contents");
}

#[tokio::test]
async fn date_bucketing_places_file_under_mtime_directory() {
  let tmp = tempfile::TempDir::new().unwrap();
  let index = build_index(tmp.path());

  let source = tmp.path().join("photo.jpg");
  std::fs::write(&source, b"not really a jpeg").unwrap();

  let template = tmp.path().join("pictures/{{.date}}");
  let processors = vec![processor("image/jpeg", "move", &template, &[])];
  route(&index, &source, &processors).await;

  let today = chrono::Local::now().format("%Y-%m-%d").to_string();
  let bucket = tmp.path().join("pictures").join(&today);
  assert!(bucket.join("photo.jpg").exists());
  assert!(!source.exists());
}

#[tokio::test]
async fn plugin_handler_runs_and_final_path_is_postprocessed() {
  let tmp = tempfile::TempDir::new().unwrap();
  let index = build_index(tmp.path());
  let out = tmp.path().join("out");

  let produced = tmp.path().join("produced.bin");
  std::fs::write(&produced, b"artifact").unwrap();
  std::fs::set_permissions(&produced, std::fs::Permissions::from_mode(0o644)).unwrap();

  let plugin = tmp.path().join("publish.sh");
  std::fs::write(&plugin, format!("#!/bin/sh\necho processing\necho {}\n", produced.display())).unwrap();

  let source = tmp.path().join("x.jpg");
  std::fs::write(&source, b"payload").unwrap();

  let mut rule = processor("image/jpeg", "", &out, &[("chmod", "600")]);
  rule.handler = plugin.to_string_lossy().into_owned();
  route(&index, &source, &[rule]).await;

  // The plugin's reported path went through post-processing.
  let mode = std::fs::metadata(&produced).unwrap().permissions().mode() & 0o7777;
  assert_eq!(mode, 0o600);
}
