//! One parsed `<mime-type>` declaration from a shared-mime-info tree.

use globset::{GlobBuilder, GlobMatcher};
use serde::Deserialize;
use tracing::trace;

/// Raw XML document shape. Converted to [`MimeRecord`] on load so glob
/// patterns are compiled exactly once.
#[derive(Debug, Deserialize)]
#[serde(rename = "mime-type")]
pub(crate) struct MimeTypeDoc {
  #[serde(rename = "@type")]
  pub mime_type: String,
  #[serde(default, rename = "glob")]
  pub globs: Vec<GlobEntry>,
  #[serde(default, rename = "alias")]
  pub aliases: Vec<AliasEntry>,
  #[serde(default, rename = "sub-class-of")]
  pub subclass_of: Vec<SubClassEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GlobEntry {
  #[serde(rename = "@pattern")]
  pub pattern: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AliasEntry {
  #[serde(rename = "@type")]
  pub mime_type: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubClassEntry {
  #[serde(rename = "@type")]
  pub mime_type: String,
}

/// A glob pattern paired with its compiled matcher. Patterns are matched
/// case-insensitively with shell-glob semantics.
#[derive(Debug, Clone)]
pub struct GlobPattern {
  pub pattern: String,
  matcher: GlobMatcher,
}

impl GlobPattern {
  fn compile(pattern: &str) -> Option<Self> {
    match GlobBuilder::new(pattern).case_insensitive(true).build() {
      Ok(glob) => Some(Self {
        pattern: pattern.to_string(),
        matcher: glob.compile_matcher(),
      }),
      Err(err) => {
        trace!(pattern, error = %err, "Skipping uncompilable glob pattern");
        None
      }
    }
  }

  pub fn matches(&self, name: &str) -> bool {
    self.matcher.is_match(name)
  }

  /// The pattern with its `*` removed, e.g. `*.tar.gz` → `.tar.gz`.
  pub fn extension(&self) -> String {
    self.pattern.replacen('*', "", 1)
  }
}

/// A single MIME declaration: canonical type, glob patterns, aliases, and
/// subclass relations. Immutable after load.
#[derive(Debug, Clone)]
pub struct MimeRecord {
  pub mime_type: String,
  pub globs: Vec<GlobPattern>,
  pub aliases: Vec<String>,
  pub subclass_of: Vec<String>,
}

impl MimeRecord {
  pub(crate) fn from_doc(doc: MimeTypeDoc) -> Self {
    Self {
      mime_type: doc.mime_type,
      globs: doc.globs.iter().filter_map(|g| GlobPattern::compile(&g.pattern)).collect(),
      aliases: doc.aliases.into_iter().map(|a| a.mime_type).collect(),
      subclass_of: doc.subclass_of.into_iter().map(|s| s.mime_type).collect(),
    }
  }

  /// Extension taken from the first glob, e.g. `.jpg`. Empty when the
  /// record declares no globs.
  pub fn first_glob_extension(&self) -> String {
    self.globs.first().map(GlobPattern::extension).unwrap_or_default()
  }

  /// Test if any alias equals the query, case-insensitively.
  pub fn alias_matches(&self, query: &str) -> bool {
    self.aliases.iter().any(|a| a.eq_ignore_ascii_case(query))
  }

  /// The first glob pattern matching the given file name, if any.
  pub fn matching_glob(&self, name: &str) -> Option<&GlobPattern> {
    self.globs.iter().find(|g| g.matches(name))
  }
}
