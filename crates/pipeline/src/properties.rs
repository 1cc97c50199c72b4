//! Property-bag helpers shared across the pipeline.

/// Truthiness for processor property values: `1`, `t`, `true` in any case.
pub fn truthy(value: Option<&String>) -> bool {
  value.is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "t" | "true"))
}
