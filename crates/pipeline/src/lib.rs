pub mod actions;
pub mod dryrun;
pub mod mode;
pub mod plugin;
pub mod postprocess;
pub mod process;
pub mod properties;
pub mod resolve;
pub mod template;

pub use actions::ActionError;
pub use dryrun::{DryRunSet, RecursiveConfig, validate};
pub use mode::{ModeParseError, ModeSpec};
pub use plugin::PluginError;
pub use postprocess::PostProcessError;
pub use process::{PipelineContext, ProcessError, handle, process};
pub use resolve::resolve;
pub use template::TemplateError;
