//! In-memory index over one or more shared-mime-info database trees.
//!
//! The index is constructed once per config (re)load and never mutated
//! afterwards; concurrent readers share it through an `Arc` without any
//! synchronization. Categories are the top-level subdirectory names of the
//! database tree (`image`, `application`, ...), and iteration order is
//! deterministic: category name order, then file discovery order.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::details::Details;
use crate::record::{MimeRecord, MimeTypeDoc};

/// MIME type the freedesktop database assigns to in-progress browser
/// downloads. Never dispatched to a processor.
pub const PARTIAL_DOWNLOAD: &str = "application/x-partial-download";

/// Mapping from category to its ordered MIME records.
#[derive(Debug, Default)]
pub struct MimeIndex {
  categories: BTreeMap<String, Vec<MimeRecord>>,
}

impl MimeIndex {
  /// Build an index from the given database roots. Missing roots are
  /// skipped with a warning; unparseable files are skipped silently so the
  /// index loads what it can.
  pub fn load(paths: &[PathBuf]) -> Self {
    let mut index = Self::default();
    for root in paths {
      if !root.is_dir() {
        warn!(path = %root.display(), "Unable to load MIME directory");
        continue;
      }
      index.load_root(root);
    }
    debug!(
      categories = index.categories.len(),
      types = index.len(),
      "MIME index loaded"
    );
    index
  }

  fn load_root(&mut self, root: &Path) {
    let entries = match std::fs::read_dir(root) {
      Ok(entries) => entries,
      Err(err) => {
        warn!(path = %root.display(), error = %err, "Unable to read MIME directory");
        return;
      }
    };

    for entry in entries.flatten() {
      let path = entry.path();
      if !path.is_dir() {
        continue;
      }
      let category = entry.file_name().to_string_lossy().into_owned();
      self.load_category(&category, &path);
    }
  }

  fn load_category(&mut self, category: &str, dir: &Path) {
    let records = self.categories.entry(category.to_string()).or_default();
    let mut seen: HashSet<String> = records.iter().map(|r| r.mime_type.clone()).collect();

    for entry in WalkDir::new(dir)
      .sort_by_file_name()
      .into_iter()
      .filter_map(|e| e.ok())
    {
      if !entry.file_type().is_file() {
        continue;
      }
      let Ok(contents) = std::fs::read_to_string(entry.path()) else {
        continue;
      };
      // Load what parses; the database ships files this index has no use for.
      let Ok(doc) = quick_xml::de::from_str::<MimeTypeDoc>(&contents) else {
        trace!(path = %entry.path().display(), "Skipping unparseable MIME declaration");
        continue;
      };
      if seen.contains(&doc.mime_type) {
        continue;
      }
      seen.insert(doc.mime_type.clone());
      records.push(MimeRecord::from_doc(doc));
    }
  }

  /// Total number of records across all categories.
  pub fn len(&self) -> usize {
    self.categories.values().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Iterate `(category, record)` pairs in index order.
  pub fn records(&self) -> impl Iterator<Item = (&str, &MimeRecord)> {
    self
      .categories
      .iter()
      .flat_map(|(category, records)| records.iter().map(move |r| (category.as_str(), r)))
  }

  /// All matches for a query, which may be a file path, a bare file name,
  /// or a MIME type string. Per record, type/alias equality wins over glob
  /// matching for the reported extension. Falls back to magic-byte
  /// detection when nothing matches and the query names a real file.
  pub fn find_all_matches(&self, query: &str) -> Vec<Details> {
    self.find_matches_inner(query, true)
  }

  fn find_matches_inner(&self, query: &str, allow_magic: bool) -> Vec<Details> {
    let name = Path::new(query)
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| query.to_string());

    let mut matches = Vec::new();
    for (category, record) in self.records() {
      let extension = if record.mime_type.eq_ignore_ascii_case(query) || record.alias_matches(query) {
        Some(record.first_glob_extension())
      } else {
        record.matching_glob(&name).map(|glob| glob.extension())
      };

      if let Some(extension) = extension {
        matches.push(Details {
          category: category.to_string(),
          mime_type: record.mime_type.clone(),
          subclass: record.subclass_of.clone(),
          extension,
          dry_run: false,
        });
      }
    }

    if matches.is_empty() && allow_magic {
      let path = Path::new(query);
      if path.is_file()
        && let Ok(Some(kind)) = infer::get_from_path(path)
      {
        debug!(path = %path.display(), detected = kind.mime_type(), "Falling back to magic-byte detection");
        return self.find_matches_inner(kind.mime_type(), false);
      }
    }

    matches
  }

  /// The match with the longest extension, so `*.tar.gz` beats `*.gz`.
  /// Ties keep the first-seen match.
  pub fn find_best_match(&self, query: &str) -> Option<Details> {
    let mut best: Option<Details> = None;
    for candidate in self.find_all_matches(query) {
      match best {
        Some(ref current) if candidate.extension.len() <= current.extension.len() => {}
        _ => best = Some(candidate),
      }
    }
    best
  }

  /// Split a path into `(dir, stem, extension)` where the extension honors
  /// multi-segment extensions known to the index. Unknown names fall back
  /// to the last dot segment.
  pub fn split_path_by_mime(&self, path: &Path) -> (PathBuf, String, String) {
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

    let extension = match self.find_best_match(&name) {
      Some(details)
        if !details.extension.is_empty() && name.to_lowercase().ends_with(&details.extension.to_lowercase()) =>
      {
        name[name.len() - details.extension.len()..].to_string()
      }
      _ => Path::new(&name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default(),
    };

    let stem = name[..name.len() - extension.len()].to_string();
    (dir, stem, extension)
  }
}
