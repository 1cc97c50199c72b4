pub mod engine;
pub mod supervisor;

pub use engine::{EngineConfig, EngineError, Job, WatchEngine};
pub use supervisor::Supervisor;
