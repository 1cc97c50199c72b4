//! The result of classifying a single file name or type query.

use serde::{Deserialize, Serialize};

/// Classification result. Value type; cheap to clone. Serialized as part
/// of the plugin argument JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Details {
  pub category: String,
  #[serde(rename = "type")]
  pub mime_type: String,
  pub subclass: Vec<String>,
  pub extension: String,

  /// Set during config validation; the pipeline records destinations
  /// instead of touching the filesystem.
  #[serde(default)]
  pub dry_run: bool,
}

impl Details {
  /// Whether this type declares any subclass relation.
  pub fn is_subclass(&self) -> bool {
    !self.subclass.is_empty()
  }

  /// Case-insensitive membership test against the subclass list.
  pub fn is_subclass_of(&self, class: &str) -> bool {
    self.subclass.iter().any(|sc| sc.eq_ignore_ascii_case(class))
  }

  /// Whether the classified file should carry the executable bit.
  pub fn is_executable(&self) -> bool {
    self.is_subclass_of("application/x-executable")
  }
}
