//! Processor selection for a classified file.
//!
//! Priority: exact type match, then subclass match, then category or `*`
//! fallback. Negated processors never match at any level.

use curator_core::Processor;
use curator_mime::Details;

/// Pick the processor for `details`, or `None` when nothing applies.
pub fn resolve<'a>(processors: &'a [Processor], details: &Details) -> Option<&'a Processor> {
  if let Some(exact) = processors.iter().find(|p| !p.negated && p.mime_type == details.mime_type) {
    return Some(exact);
  }

  if details.is_subclass()
    && let Some(subclass) = processors.iter().find(|p| !p.negated && details.is_subclass_of(&p.mime_type))
  {
    return Some(subclass);
  }

  processors
    .iter()
    .find(|p| !p.negated && (p.mime_type == details.category || p.mime_type == "*"))
}
