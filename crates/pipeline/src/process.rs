//! The per-file pipeline: resolve a processor, expand its destination,
//! run the handler, post-process the result.

use curator_core::{Processor, is_builtin};
use curator_mime::{Details, MimeIndex};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::actions::{self, ActionError};
use crate::dryrun::{DryRunSet, RecursiveConfig};
use crate::plugin::{self, PluginError};
use crate::postprocess::{self, PostProcessError};
use crate::resolve::resolve;
use crate::template::{self, TemplateError};

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("Template: {0}")]
  Template(#[from] TemplateError),

  #[error("Unable to create destination directory {path}: {source}")]
  CreateDest {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Action: {0}")]
  Action(#[from] ActionError),

  #[error("Plugin: {0}")]
  Plugin(#[from] PluginError),

  #[error("Post-process: {0}")]
  PostProcess(#[from] PostProcessError),

  #[error(transparent)]
  Recursive(#[from] RecursiveConfig),
}

/// Shared read-only state the pipeline needs. `dry_run` is only set while
/// the config validator is driving the pipeline.
pub struct PipelineContext<'a> {
  pub index: &'a MimeIndex,
  pub dry_run: Option<&'a DryRunSet>,
}

/// Resolve the processor for a classified file and run the pipeline on it.
/// A missing processor is a reported failure, not a fatal one.
pub async fn handle(
  source: &Path,
  details: &Details,
  processors: &[Processor],
  ctx: &PipelineContext<'_>,
) -> Result<(), ProcessError> {
  let Some(processor) = resolve(processors, details) else {
    if details.dry_run {
      if let Some(set) = ctx.dry_run {
        set.remove(source);
      }
    } else {
      error!(
        mime_type = %details.mime_type,
        category = %details.category,
        subclass = ?details.subclass,
        "No processor defined"
      );
    }
    return Ok(());
  };

  if details.dry_run {
    debug!(processor = %processor, source = %source.display(), "Dry run: found processor");
  } else {
    info!(processor = %processor, source = %source.display(), "Found processor");
  }
  process(source, details, processor, ctx).await
}

/// Run the pipeline for an already-resolved processor. Operates on a clone
/// of the processor: preprocessing and `install` mutate its properties.
pub async fn process(
  source: &Path,
  details: &Details,
  processor: &Processor,
  ctx: &PipelineContext<'_>,
) -> Result<(), ProcessError> {
  let mut processor = processor.clone();

  // Activate the templater property behind every placeholder the template
  // actually uses.
  for (placeholder, property) in [
    ("{{.date}}", "include-date-directory"),
    ("{{.ext}}", "extension-directory"),
    ("{{.ucext}}", "uppercase-extension-directory"),
  ] {
    if processor.path.contains(placeholder) {
      processor.properties.insert(property.to_string(), "true".to_string());
    }
  }

  let dest = template::expand(&processor.path, source, details, &processor)?;

  if details.dry_run {
    let tentative = dest.join(source.file_name().unwrap_or_default());
    debug!(
      path = %tentative.display(),
      mime_type = %details.mime_type,
      "Dry run: recording would-be destination"
    );
    if let Some(set) = ctx.dry_run {
      set.add(&details.mime_type, &tentative)?;
    }
    return Ok(());
  }

  std::fs::DirBuilder::new()
    .recursive(true)
    .mode(0o750)
    .create(&dest)
    .map_err(|err| ProcessError::CreateDest {
      path: dest.clone(),
      source: err,
    })?;

  let final_path = if is_builtin(&processor.handler) {
    debug!(handler = %processor.handler, "Using builtin handler");
    let handler = processor.handler.clone();
    match actions::run_builtin(&handler, source, &dest, details, &mut processor, ctx.index) {
      Ok(final_path) => final_path,
      Err(err) if err.is_sentinel() => None,
      Err(err) => return Err(err.into()),
    }
  } else {
    debug!(handler = %processor.handler, "Using plugin handler");
    plugin::run(source, &dest, details, &processor).await?
  };

  if let Some(final_path) = final_path {
    postprocess::apply(&final_path, &processor)?;
  }
  info!(source = %source.display(), "Completed processing");
  Ok(())
}
